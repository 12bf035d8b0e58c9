use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolError, confined_path};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ListFilesInput {
    #[schemars(
        description = "Optional relative path to list. Defaults to the server's working directory."
    )]
    #[serde(default)]
    path: String,
}

async fn list_files_impl(input: serde_json::Value) -> Result<String, ToolError> {
    let input: ListFilesInput = serde_json::from_value(input)?;
    let dir = if input.path.is_empty() { "." } else { &input.path };
    confined_path(dir)?;
    let io_error = |source| ToolError::Io {
        context: format!("error listing {dir}"),
        source,
    };

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;

    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().await.map_err(io_error)?.is_dir() {
            files.push(format!("{}/", name));
        } else {
            files.push(name);
        }
    }

    files.sort();
    Ok(serde_json::to_string(&files)?)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_files",
        description: "List files and directories at a path. Directories end with a slash.",
        input_schema: serde_json::to_value(schema_for!(ListFilesInput)).unwrap_or_default(),
        handler: |input| Box::pin(list_files_impl(input)),
    }
}
