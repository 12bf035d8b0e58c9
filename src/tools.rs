use serde::Serialize;
use std::future::Future;
use std::path::{Component, Path};
use std::pin::Pin;
use thiserror::Error;

mod list_files;
mod read_file;

#[derive(Debug, Error)]
pub(crate) enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] serde_json::Error),

    #[error("path must stay inside the working directory: {0}")]
    OutsideWorkingDir(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

type ToolHandler =
    fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

#[derive(Serialize)]
pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    #[serde(skip)]
    pub(crate) handler: ToolHandler,
}

pub(crate) fn get_all_tools() -> Vec<ToolDefinition> {
    vec![read_file::definition(), list_files::definition()]
}

pub(crate) fn find_tool(name: &str) -> Option<ToolDefinition> {
    get_all_tools().into_iter().find(|tool| tool.name == name)
}

/// Accepts only relative paths that cannot climb out of the working directory.
fn confined_path(raw: &str) -> Result<&Path, ToolError> {
    let path = Path::new(raw);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ToolError::OutsideWorkingDir(raw.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_exposes_schemas() {
        let tools = get_all_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["read_file", "list_files"]);
        for tool in &tools {
            assert!(tool.input_schema.get("properties").is_some(), "{}", tool.name);
        }
    }

    #[tokio::test]
    async fn list_files_marks_directories() {
        let listing = (find_tool("list_files").unwrap().handler)(json!({"path": "src"}))
            .await
            .unwrap();
        let entries: Vec<String> = serde_json::from_str(&listing).unwrap();
        assert!(entries.contains(&"main.rs".to_string()));
        assert!(entries.contains(&"tools/".to_string()));
    }

    #[tokio::test]
    async fn read_file_reports_missing_files() {
        let err = (find_tool("read_file").unwrap().handler)(json!({"path": "no/such/file"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io { .. }));
    }

    #[test]
    fn paths_are_confined_to_the_working_directory() {
        assert!(confined_path("src/main.rs").is_ok());
        assert!(confined_path("./src").is_ok());
        assert!(confined_path("").is_ok());
        for raw in ["/etc/passwd", "../secret", "src/../../secret"] {
            assert!(
                matches!(confined_path(raw), Err(ToolError::OutsideWorkingDir(_))),
                "{raw}"
            );
        }
    }

    #[tokio::test]
    async fn tools_refuse_paths_outside_the_working_directory() {
        let read = (find_tool("read_file").unwrap().handler)(json!({"path": "/etc/hostname"}))
            .await
            .unwrap_err();
        assert!(matches!(read, ToolError::OutsideWorkingDir(_)));

        let list = (find_tool("list_files").unwrap().handler)(json!({"path": ".."}))
            .await
            .unwrap_err();
        assert!(matches!(list, ToolError::OutsideWorkingDir(_)));
    }

    #[tokio::test]
    async fn read_file_rejects_bad_input() {
        let err = (find_tool("read_file").unwrap().handler)(json!({"file": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
