use crate::chat::{Applied, ChatState, Message, ToolCall};
use crate::client::AgUiClient;
use crate::error::{SessionError, TransportError};
use crate::protocol::AgUiEvent;
use crate::sse::{FrameSplitter, decode_frame};
use futures::StreamExt;
use std::pin::pin;
use tokio_util::sync::CancellationToken;

/// How an exchange ended when the transport itself did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Finished,
    Failed { message: String },
    StreamEnded,
    Cancelled,
}

/// Owned snapshot of everything a renderer needs.
#[derive(Debug, Clone)]
pub struct ChatView {
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub status: String,
    pub is_loading: bool,
    pub exchanges: u64,
}

/// Owns one conversation and runs its exchanges one at a time.
#[derive(Debug, Default)]
pub struct Session {
    state: ChatState,
    is_loading: bool,
    exchanges: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn view(&self) -> ChatView {
        ChatView {
            messages: self.state.messages().to_vec(),
            tool_calls: self.state.tool_calls().cloned().collect(),
            status: self.state.status().to_string(),
            is_loading: self.is_loading,
            exchanges: self.exchanges,
        }
    }

    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.is_loading {
            return Err(SessionError::Busy);
        }
        self.state.reset();
        tracing::info!("conversation reset");
        Ok(())
    }

    /// Runs one prompt through the server and folds the streamed events into
    /// the conversation.
    ///
    /// The user message is recorded before any network activity. `on_update`
    /// is called after every visible change. Whatever happens, the session is
    /// ready for the next prompt when this returns, or when the future is
    /// dropped. A cancelled exchange leaves the conversation as it was when
    /// the token fired.
    pub async fn run_exchange<F>(
        &mut self,
        client: &AgUiClient,
        prompt: &str,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<ExchangeOutcome, SessionError>
    where
        F: FnMut(&Session),
    {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        if self.is_loading {
            return Err(SessionError::Busy);
        }

        self.is_loading = true;
        self.state.begin_exchange(prompt);
        tracing::info!(exchange = self.exchanges + 1, "exchange started");
        on_update(self);

        let mut exchange = InFlight {
            session: self,
            armed: true,
        };
        let result = exchange
            .session
            .drive(client, prompt, cancel, &mut on_update)
            .await;
        exchange.armed = false;
        let session = &mut *exchange.session;

        match &result {
            Ok(ExchangeOutcome::Cancelled) => {
                tracing::info!("exchange cancelled");
                session.is_loading = false;
                session.exchanges += 1;
                return Ok(ExchangeOutcome::Cancelled);
            }
            Ok(outcome) => tracing::info!(?outcome, "exchange ended"),
            Err(err) => {
                tracing::error!(error = %err, "exchange failed");
                session.state.transport_failed();
                on_update(session);
            }
        }

        session.state.end_exchange();
        session.is_loading = false;
        session.exchanges += 1;
        on_update(session);

        result.map_err(SessionError::from)
    }

    async fn drive<F>(
        &mut self,
        client: &AgUiClient,
        prompt: &str,
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> Result<ExchangeOutcome, TransportError>
    where
        F: FnMut(&Session),
    {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
            response = client.open_stream(prompt) => response?,
        };

        let mut stream = pin!(response.bytes_stream());
        let mut splitter = FrameSplitter::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(TransportError::Stream)?;

            for frame in splitter.push(&chunk) {
                if let Some(outcome) = self.consume_frame(&frame, on_update) {
                    return Ok(outcome);
                }
            }
        }

        if let Some(frame) = splitter.finish() {
            if let Some(outcome) = self.consume_frame(&frame, on_update) {
                return Ok(outcome);
            }
        }

        tracing::warn!("stream closed without a terminal event");
        Ok(ExchangeOutcome::StreamEnded)
    }

    // Returns the outcome once a terminal event has been applied.
    fn consume_frame<F>(&mut self, frame: &str, on_update: &mut F) -> Option<ExchangeOutcome>
    where
        F: FnMut(&Session),
    {
        let event = match decode_frame(frame)? {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, %frame, "skipping malformed frame");
                return None;
            }
        };

        if event == AgUiEvent::Unknown {
            tracing::debug!(%frame, "unrecognized event type");
            return None;
        }

        let kind = event.kind();
        let applied = self.state.apply(event);
        tracing::trace!(kind, phase = ?self.state.phase(), "applied event");
        on_update(self);

        match applied {
            Applied::Continue => None,
            Applied::Finished => Some(ExchangeOutcome::Finished),
            Applied::Failed(message) => Some(ExchangeOutcome::Failed { message }),
        }
    }
}

// Puts the session back to idle if the exchange future is dropped before it
// completes, e.g. under an outer `tokio::time::timeout`.
struct InFlight<'a> {
    session: &'a mut Session,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("exchange dropped before completion");
            self.session.state.end_exchange();
            self.session.is_loading = false;
            self.session.exchanges += 1;
        }
    }
}
