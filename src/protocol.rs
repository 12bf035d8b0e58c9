use serde::{Deserialize, Serialize};

/// One AG-UI event as carried in the payload of a `data:` frame.
///
/// Fields the reducer does not need are optional so that servers omitting
/// them still decode. Unrecognized `type` values land in [`AgUiEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AgUiEvent {
    RunStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    TextMessageStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    TextMessageContent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        delta: String,
    },
    TextMessageEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        tool_call_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    RunFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl AgUiEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgUiEvent::RunStarted { .. } => "RUN_STARTED",
            AgUiEvent::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            AgUiEvent::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            AgUiEvent::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            AgUiEvent::ToolCallStart { .. } => "TOOL_CALL_START",
            AgUiEvent::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            AgUiEvent::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            AgUiEvent::RunFinished { .. } => "RUN_FINISHED",
            AgUiEvent::RunError { .. } => "RUN_ERROR",
            AgUiEvent::Unknown => "UNKNOWN",
        }
    }

    pub fn run_error(message: impl Into<String>) -> Self {
        AgUiEvent::RunError {
            message: message.into(),
            code: None,
        }
    }

    pub fn tool_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        AgUiEvent::ToolCallStart {
            tool_call_id: id.into(),
            tool_call_name: name.into(),
        }
    }

    pub fn tool_args(id: impl Into<String>, delta: impl Into<String>) -> Self {
        AgUiEvent::ToolCallArgs {
            tool_call_id: id.into(),
            delta: delta.into(),
        }
    }
}

#[cfg(test)]
impl AgUiEvent {
    pub fn content(delta: impl Into<String>) -> Self {
        AgUiEvent::TextMessageContent {
            message_id: None,
            delta: delta.into(),
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        AgUiEvent::ToolCallResult {
            message_id: None,
            tool_call_id: id.into(),
            content: content.into(),
            role: None,
        }
    }
}
