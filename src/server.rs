use crate::error::ServerError;
use crate::protocol::AgUiEvent;
use crate::tools::{ToolDefinition, find_tool, get_all_tools};
use axum::extract::Query;
use axum::http::HeaderName;
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const REPLY_CHUNK_CHARS: usize = 25;
const TOOL_RESULT_LIMIT: usize = 8000;

pub struct ServerConfig {
    pub listen: String,
}

#[derive(Debug, Deserialize)]
struct PromptQuery {
    userprompt: String,
}

pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
    tracing::info!(addr = %config.listen, "AG-UI server listening");
    axum::serve(listener, router()).await?;
    Ok(())
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(health))
        .route("/tools", get(list_tools))
        .route("/get_data", post(stream_response))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "message": "AG-UI server is running"}))
}

async fn list_tools() -> Json<Vec<ToolDefinition>> {
    Json(get_all_tools())
}

async fn stream_response(Query(query): Query<PromptQuery>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if run_agent(query.userprompt, &tx).await.is_err() {
            tracing::debug!("client went away mid-run");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event: AgUiEvent| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    let headers = [
        (CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    (headers, Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct RunIds {
    thread: String,
    run: String,
    message: String,
}

impl RunIds {
    fn new() -> Self {
        Self {
            thread: format!("thread_{}", Uuid::new_v4().simple()),
            run: format!("run_{}", Uuid::new_v4().simple()),
            message: format!("msg_{}", Uuid::new_v4().simple()),
        }
    }
}

type Emit = Result<(), mpsc::error::SendError<AgUiEvent>>;

/// Scripted agent: echoes the prompt, or runs a local tool for `/<tool> <args>`.
async fn run_agent(prompt: String, tx: &mpsc::Sender<AgUiEvent>) -> Emit {
    let ids = RunIds::new();
    tracing::info!(run_id = %ids.run, "run started");

    tx.send(AgUiEvent::RunStarted {
        thread_id: Some(ids.thread.clone()),
        run_id: Some(ids.run.clone()),
    })
    .await?;
    tx.send(AgUiEvent::TextMessageStart {
        message_id: Some(ids.message.clone()),
        role: Some("assistant".to_string()),
    })
    .await?;

    let reply = match parse_tool_command(&prompt) {
        None => format!("You said: {}", prompt.trim()),
        Some((name, raw_args)) => match call_tool(name, raw_args, &ids, tx).await? {
            Some(reply) => reply,
            None => return Ok(()),
        },
    };

    for delta in chunk_text(&reply, REPLY_CHUNK_CHARS) {
        tx.send(AgUiEvent::TextMessageContent {
            message_id: Some(ids.message.clone()),
            delta,
        })
        .await?;
    }

    tx.send(AgUiEvent::TextMessageEnd {
        message_id: Some(ids.message.clone()),
    })
    .await?;
    tx.send(AgUiEvent::RunFinished {
        thread_id: Some(ids.thread),
        run_id: Some(ids.run),
    })
    .await?;
    Ok(())
}

// Returns the reply text, or `None` when the run was ended with an error.
async fn call_tool(
    name: &str,
    raw_args: &str,
    ids: &RunIds,
    tx: &mpsc::Sender<AgUiEvent>,
) -> Result<Option<String>, mpsc::error::SendError<AgUiEvent>> {
    let Some(tool) = find_tool(name) else {
        tx.send(AgUiEvent::run_error(format!("Unknown tool: {name}")))
            .await?;
        return Ok(None);
    };

    let args = match parse_tool_args(raw_args) {
        Ok(args) => args,
        Err(err) => {
            tracing::warn!(tool = name, error = %err, "malformed tool arguments");
            tx.send(AgUiEvent::run_error(format!(
                "Malformed tool arguments for {name}"
            )))
            .await?;
            return Ok(None);
        }
    };

    let call_id = format!("call_{}", Uuid::new_v4().simple());
    tx.send(AgUiEvent::tool_start(&call_id, name)).await?;
    tx.send(AgUiEvent::tool_args(&call_id, args.to_string()))
        .await?;

    let content = match (tool.handler)(args).await {
        Ok(output) => output,
        Err(err) => format!("Error: {err}"),
    };
    let content = truncate_result(&content, TOOL_RESULT_LIMIT);

    tx.send(AgUiEvent::ToolCallResult {
        message_id: Some(ids.message.clone()),
        tool_call_id: call_id,
        content,
        role: Some("tool".to_string()),
    })
    .await?;

    Ok(Some(format!("Ran `{name}`; the output is in the tool panel.")))
}

fn parse_tool_command(prompt: &str) -> Option<(&str, &str)> {
    let command = prompt.trim().strip_prefix('/')?;
    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    if name.is_empty() {
        return None;
    }
    Some((name, rest.trim()))
}

fn parse_tool_args(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.is_empty() {
        Ok(json!({}))
    } else if raw.starts_with('{') {
        serde_json::from_str(raw)
    } else {
        Ok(json!({"path": raw}))
    }
}

fn truncate_result(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((end, _)) => format!("{}… [truncated]", &value[..end]),
        None => value.to_string(),
    }
}

fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
