use crate::protocol::AgUiEvent;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use std::fmt;

pub const GREETING: &str =
    "Hi! Ask me anything, or run a tool with /list_files <path> or /read_file <path>.";

const TRANSPORT_FAILURE_REPLY: &str =
    "Sorry, I couldn't reach the server. Check that it is running and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Calling,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: String,
    pub result: Option<String>,
    pub status: ToolCallStatus,
}

/// The single status line shown to the user. Overwritten, never accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Online,
    Processing,
    Typing,
    Calling(String),
    ProcessingResults,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Online => f.write_str("online"),
            Status::Processing => f.write_str("processing"),
            Status::Typing => f.write_str("typing"),
            Status::Calling(name) => write!(f, "calling {name}"),
            Status::ProcessingResults => f.write_str("processing results"),
            Status::Error => f.write_str("error"),
        }
    }
}

/// Where the current exchange is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Started,
    Typing,
    CallingTool,
    Finished,
    Errored,
}

/// What the caller should do after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Continue,
    Finished,
    Failed(String),
}

/// Transcript, tool-call registry and status, mutated only through
/// [`ChatState::apply`] and the exchange boundary methods.
#[derive(Debug)]
pub struct ChatState {
    messages: Vec<Message>,
    tool_calls: IndexMap<String, ToolCall>,
    status: Status,
    phase: Phase,
    // Index into `messages` of this exchange's assistant reply.
    reply: Option<usize>,
    next_id: u64,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    pub fn new() -> Self {
        let mut state = Self {
            messages: Vec::new(),
            tool_calls: IndexMap::new(),
            status: Status::Online,
            phase: Phase::Idle,
            reply: None,
            next_id: 0,
        };
        state.push_message(Role::Assistant, GREETING.to_string());
        state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> + '_ {
        self.tool_calls.values()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Replaces the transcript with the greeting and forgets all tool calls.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.tool_calls.clear();
        self.status = Status::Online;
        self.phase = Phase::Idle;
        self.reply = None;
        self.push_message(Role::Assistant, GREETING.to_string());
    }

    /// Opens a new exchange: records the user's prompt and starts a fresh
    /// tool-call registry. The transcript is kept.
    pub fn begin_exchange(&mut self, prompt: &str) {
        self.push_message(Role::User, prompt.to_string());
        self.tool_calls.clear();
        self.reply = None;
        self.phase = Phase::Idle;
        self.status = Status::Processing;
    }

    pub fn end_exchange(&mut self) {
        self.status = Status::Online;
        self.reply = None;
    }

    pub fn apply(&mut self, event: AgUiEvent) -> Applied {
        match event {
            AgUiEvent::RunStarted { .. } => {
                self.phase = Phase::Started;
                self.status = Status::Processing;
            }
            AgUiEvent::TextMessageStart { .. } => {
                if self.reply.is_none() {
                    self.open_reply();
                }
                self.phase = Phase::Typing;
                self.status = Status::Typing;
            }
            AgUiEvent::TextMessageContent { delta, .. } => {
                let index = match self.reply {
                    Some(index) => index,
                    None => {
                        tracing::debug!("content delta before message start; opening reply");
                        self.open_reply()
                    }
                };
                self.messages[index].content.push_str(&delta);
                self.phase = Phase::Typing;
            }
            AgUiEvent::TextMessageEnd { .. } => {
                self.phase = Phase::Started;
                self.status = Status::Online;
            }
            AgUiEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
            } => {
                self.status = Status::Calling(tool_call_name.clone());
                self.phase = Phase::CallingTool;
                match self.tool_calls.get_mut(&tool_call_id) {
                    Some(call) => {
                        tracing::debug!(id = %tool_call_id, "restarting tool call");
                        call.name = tool_call_name;
                        call.args.clear();
                        call.result = None;
                        call.status = ToolCallStatus::Calling;
                    }
                    None => {
                        self.tool_calls.insert(
                            tool_call_id.clone(),
                            ToolCall {
                                id: tool_call_id,
                                name: tool_call_name,
                                args: String::new(),
                                result: None,
                                status: ToolCallStatus::Calling,
                            },
                        );
                    }
                }
            }
            AgUiEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => match self.tool_calls.get_mut(&tool_call_id) {
                Some(call) => call.args.push_str(&delta),
                None => tracing::debug!(id = %tool_call_id, "args for unknown tool call"),
            },
            AgUiEvent::ToolCallResult {
                tool_call_id,
                content,
                ..
            } => match self.tool_calls.get_mut(&tool_call_id) {
                Some(call) => {
                    call.result = Some(content);
                    call.status = ToolCallStatus::Completed;
                    self.status = Status::ProcessingResults;
                }
                None => tracing::debug!(id = %tool_call_id, "result for unknown tool call"),
            },
            AgUiEvent::RunFinished { .. } => {
                self.phase = Phase::Finished;
                self.status = Status::Online;
                return Applied::Finished;
            }
            AgUiEvent::RunError { message, .. } => {
                self.phase = Phase::Errored;
                self.status = Status::Error;
                self.fallback_reply(format!("Error: {message}"));
                return Applied::Failed(message);
            }
            AgUiEvent::Unknown => {
                tracing::debug!("ignoring unrecognized event type");
            }
        }
        Applied::Continue
    }

    /// Records a transport failure for the current exchange.
    pub fn transport_failed(&mut self) {
        self.phase = Phase::Errored;
        self.status = Status::Error;
        self.fallback_reply(TRANSPORT_FAILURE_REPLY.to_string());
    }

    // Makes sure the user sees `text` unless the reply already has content.
    fn fallback_reply(&mut self, text: String) {
        match self.reply {
            None => {
                self.push_message(Role::Assistant, text);
                self.reply = Some(self.messages.len() - 1);
            }
            Some(index) if self.messages[index].content.is_empty() => {
                self.messages[index].content = text;
            }
            Some(_) => {}
        }
    }

    fn open_reply(&mut self) -> usize {
        self.push_message(Role::Assistant, String::new());
        let index = self.messages.len() - 1;
        self.reply = Some(index);
        index
    }

    fn push_message(&mut self, role: Role, content: String) {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message {
            id,
            role,
            content,
            timestamp: Local::now(),
        });
    }
}

#[cfg(test)]
impl ChatState {
    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_calls.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run_started() -> AgUiEvent {
        AgUiEvent::RunStarted {
            thread_id: None,
            run_id: None,
        }
    }

    fn message_start() -> AgUiEvent {
        AgUiEvent::TextMessageStart {
            message_id: None,
            role: Some("assistant".to_string()),
        }
    }

    fn message_end() -> AgUiEvent {
        AgUiEvent::TextMessageEnd { message_id: None }
    }

    fn run_finished() -> AgUiEvent {
        AgUiEvent::RunFinished {
            thread_id: None,
            run_id: None,
        }
    }

    fn assistant_messages(state: &ChatState) -> Vec<&Message> {
        state
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect()
    }

    #[test]
    fn streamed_reply_accumulates_and_returns_online() {
        let mut state = ChatState::new();
        state.begin_exchange("hello");

        let events = vec![
            run_started(),
            message_start(),
            AgUiEvent::content("Hi"),
            AgUiEvent::content(" there"),
            message_end(),
            run_finished(),
        ];
        let outcomes: Vec<Applied> = events.into_iter().map(|e| state.apply(e)).collect();
        state.end_exchange();

        assert_eq!(outcomes.last(), Some(&Applied::Finished));
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.messages().last().unwrap().content, "Hi there");
        assert_eq!(state.status(), &Status::Online);
        assert_eq!(state.tool_calls().count(), 0);
        assert_eq!(state.phase(), Phase::Finished);
    }

    #[test]
    fn status_follows_the_exchange() {
        let mut state = ChatState::new();
        state.begin_exchange("q");

        state.apply(run_started());
        assert_eq!(state.status().to_string(), "processing");
        state.apply(message_start());
        assert_eq!(state.status().to_string(), "typing");
        state.apply(AgUiEvent::tool_start("1", "search"));
        assert_eq!(state.status().to_string(), "calling search");
        assert_eq!(state.phase(), Phase::CallingTool);
        state.apply(AgUiEvent::tool_result("1", "ok"));
        assert_eq!(state.status().to_string(), "processing results");
        state.apply(message_end());
        assert_eq!(state.status().to_string(), "online");
    }

    #[test]
    fn tool_call_lifecycle() {
        let mut state = ChatState::new();
        state.begin_exchange("find cats");

        state.apply(AgUiEvent::tool_start("1", "search"));
        state.apply(AgUiEvent::tool_args("1", "q=cats"));
        state.apply(AgUiEvent::tool_result("1", "3 results"));

        let calls: Vec<&ToolCall> = state.tool_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].args, "q=cats");
        assert_eq!(calls[0].result.as_deref(), Some("3 results"));
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
    }

    #[test]
    fn restarting_a_tool_call_resets_it_in_place() {
        let mut state = ChatState::new();
        state.begin_exchange("q");

        state.apply(AgUiEvent::tool_start("a", "first"));
        state.apply(AgUiEvent::tool_start("b", "second"));
        state.apply(AgUiEvent::tool_args("a", "old"));
        state.apply(AgUiEvent::tool_result("a", "done"));
        state.apply(AgUiEvent::tool_start("a", "first"));

        let ids: Vec<&str> = state.tool_calls().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let call = state.tool_call("a").unwrap();
        assert_eq!(call.args, "");
        assert_eq!(call.result, None);
        assert_eq!(call.status, ToolCallStatus::Calling);
    }

    #[test]
    fn restart_under_a_new_name_renames_the_call() {
        let mut state = ChatState::new();
        state.begin_exchange("q");

        state.apply(AgUiEvent::tool_start("a", "search"));
        state.apply(AgUiEvent::tool_start("a", "fetch"));

        assert_eq!(state.tool_call("a").unwrap().name, "fetch");
        assert_eq!(state.status().to_string(), "calling fetch");
        assert_eq!(state.tool_calls().count(), 1);
    }

    #[test]
    fn unknown_tool_ids_are_ignored() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(run_started());

        state.apply(AgUiEvent::tool_args("ghost", "x"));
        state.apply(AgUiEvent::tool_result("ghost", "y"));

        assert_eq!(state.tool_calls().count(), 0);
        assert_eq!(state.status(), &Status::Processing);
    }

    #[test]
    fn interleaved_args_stay_with_their_call() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(AgUiEvent::tool_start("1", "a"));
        state.apply(AgUiEvent::tool_start("2", "b"));
        for (id, delta) in [("1", "x"), ("2", "p"), ("1", "y"), ("2", "q"), ("1", "z")] {
            state.apply(AgUiEvent::tool_args(id, delta));
        }

        assert_eq!(state.tool_call("1").unwrap().args, "xyz");
        assert_eq!(state.tool_call("2").unwrap().args, "pq");
    }

    #[test]
    fn content_without_message_start_opens_a_reply() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(AgUiEvent::content("late"));
        state.apply(message_start());
        state.apply(AgUiEvent::content(" start"));

        let replies = assistant_messages(&state);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].content, "late start");
    }

    #[test]
    fn run_error_without_reply_appends_one_message() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(run_started());

        let applied = state.apply(AgUiEvent::run_error("model unavailable"));

        assert_eq!(applied, Applied::Failed("model unavailable".to_string()));
        let replies = assistant_messages(&state);
        assert_eq!(replies.len(), 2);
        assert!(replies[1].content.contains("model unavailable"));
        assert_eq!(state.status(), &Status::Error);
        assert_eq!(state.phase(), Phase::Errored);
    }

    #[test]
    fn run_error_after_message_start_does_not_append() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(message_start());
        state.apply(AgUiEvent::content("partial"));
        state.apply(AgUiEvent::run_error("boom"));

        let replies = assistant_messages(&state);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].content, "partial");
    }

    #[test]
    fn run_error_fills_an_empty_reply() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(message_start());
        state.apply(AgUiEvent::run_error("boom"));

        let replies = assistant_messages(&state);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].content, "Error: boom");
    }

    #[test]
    fn transport_failure_leaves_a_visible_message() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.transport_failed();

        assert_eq!(state.status(), &Status::Error);
        let last = state.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, TRANSPORT_FAILURE_REPLY);
    }

    #[test]
    fn new_exchange_keeps_transcript_and_clears_tool_calls() {
        let mut state = ChatState::new();
        state.begin_exchange("first");
        state.apply(AgUiEvent::tool_start("1", "search"));
        state.apply(AgUiEvent::content("one"));
        state.end_exchange();

        state.begin_exchange("second");
        state.apply(AgUiEvent::content("two"));

        assert_eq!(state.tool_calls().count(), 0);
        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec![GREETING, "first", "one", "second", "two"]);
    }

    #[test]
    fn reset_restores_greeting() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        state.apply(AgUiEvent::tool_start("1", "search"));
        state.apply(AgUiEvent::run_error("x"));

        state.reset();
        state.reset();

        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].content, GREETING);
        assert_eq!(state.messages()[0].role, Role::Assistant);
        assert_eq!(state.tool_calls().count(), 0);
        assert_eq!(state.status(), &Status::Online);
    }

    #[test]
    fn message_ids_increase_in_arrival_order() {
        let mut state = ChatState::new();
        state.begin_exchange("a");
        state.apply(AgUiEvent::content("b"));
        let ids: Vec<MessageId> = state.messages().iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn unknown_events_change_nothing() {
        let mut state = ChatState::new();
        state.begin_exchange("q");
        let before = state.messages().len();
        assert_eq!(state.apply(AgUiEvent::Unknown), Applied::Continue);
        assert_eq!(state.messages().len(), before);
        assert_eq!(state.status(), &Status::Processing);
    }

    fn arb_noise() -> impl Strategy<Value = AgUiEvent> {
        prop_oneof![
            Just(AgUiEvent::Unknown),
            Just(AgUiEvent::tool_start("t", "tool")),
            Just(AgUiEvent::tool_args("t", "{}")),
            Just(AgUiEvent::tool_result("t", "ok")),
            Just(message_end()),
            Just(run_started()),
        ]
    }

    proptest! {
        #[test]
        fn reply_is_concatenation_of_deltas(
            steps in proptest::collection::vec(
                ("[a-z \u{e9}]{0,6}", proptest::option::of(arb_noise())),
                1..20,
            ),
        ) {
            let mut state = ChatState::new();
            state.begin_exchange("q");
            state.apply(message_start());

            let mut expected = String::new();
            for (delta, noise) in steps {
                expected.push_str(&delta);
                state.apply(AgUiEvent::content(delta));
                if let Some(event) = noise {
                    state.apply(event);
                }
            }

            let replies = assistant_messages(&state);
            prop_assert_eq!(replies.len(), 2);
            prop_assert_eq!(&replies[1].content, &expected);
        }
    }
}
