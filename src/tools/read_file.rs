use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolError, confined_path};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ReadFileInput {
    #[schemars(description = "The relative path of a file in the server's working directory.")]
    path: String,
}

async fn read_file_impl(input: serde_json::Value) -> Result<String, ToolError> {
    let input: ReadFileInput = serde_json::from_value(input)?;
    tokio::fs::read_to_string(confined_path(&input.path)?)
        .await
        .map_err(|source| ToolError::Io {
            context: format!("error reading {}", input.path),
            source,
        })
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file",
        description: "Read the contents of a file relative to the server's working directory.",
        input_schema: serde_json::to_value(schema_for!(ReadFileInput)).unwrap_or_default(),
        handler: |input| Box::pin(read_file_impl(input)),
    }
}
