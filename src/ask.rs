use crate::chat::{ChatState, MessageId, Role, ToolCallStatus};
use crate::client::AgUiClient;
use crate::session::{ExchangeOutcome, Session};
use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;

/// Writes a streaming exchange as plain text: reply text to `out`, tool
/// activity to `err`. Only what arrived since the previous call is written.
#[derive(Debug, Default)]
struct StreamPrinter {
    reply: Option<MessageId>,
    printed: usize,
    tools: HashMap<String, ToolCallStatus>,
    failed: Option<io::Error>,
}

impl StreamPrinter {
    /// Like `update`, but keeps the first write error and returns false once
    /// output has failed.
    fn observe(
        &mut self,
        state: &ChatState,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> bool {
        if self.failed.is_some() {
            return false;
        }
        match self.update(state, out, err) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "output closed");
                self.failed = Some(error);
                false
            }
        }
    }

    fn update(
        &mut self,
        state: &ChatState,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<()> {
        for call in state.tool_calls() {
            let previous = self.tools.insert(call.id.clone(), call.status);
            let completed = call.status == ToolCallStatus::Completed;
            let restarted = previous == Some(ToolCallStatus::Completed) && !completed;
            if previous.is_none() || restarted {
                writeln!(err, "→ {}", call.name)?;
            }
            if completed && previous != Some(ToolCallStatus::Completed) {
                writeln!(err, "← {} {}", call.name, call.args)?;
                if let Some(result) = &call.result {
                    writeln!(err, "{result}")?;
                }
            }
        }

        let reply = state
            .messages()
            .iter()
            .skip_while(|m| m.role != Role::User)
            .find(|m| m.role == Role::Assistant);
        if let Some(reply) = reply {
            if self.reply != Some(reply.id) {
                self.reply = Some(reply.id);
                self.printed = 0;
            }
            if let Some(fresh) = reply.content.get(self.printed..) {
                out.write_all(fresh.as_bytes())?;
                out.flush()?;
                self.printed = reply.content.len();
            }
        }
        Ok(())
    }
}

/// Runs a single prompt and streams the answer to stdout.
pub async fn run(client: AgUiClient, prompt: String) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut session = Session::new();
    let mut printer = StreamPrinter::default();
    let outcome = session
        .run_exchange(&client, &prompt, &cancel, |s| {
            if !printer.observe(s.state(), &mut io::stdout(), &mut io::stderr()) {
                cancel.cancel();
            }
        })
        .await?;
    if let Some(err) = printer.failed.take() {
        return Err(err.into());
    }
    writeln!(io::stdout())?;

    match outcome {
        ExchangeOutcome::Finished | ExchangeOutcome::StreamEnded => Ok(()),
        ExchangeOutcome::Cancelled => Err("interrupted".into()),
        ExchangeOutcome::Failed { message } => Err(message.into()),
    }
}
