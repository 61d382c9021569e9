use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

use super::{required_str, resolve_path};

const MAX_ENTRIES: usize = 1000;

pub struct ListDirectoryTool;

#[derive(Debug, Serialize)]
struct Entry {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory with their kind and size"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["DirectoryPath"],
            "properties": {
                "DirectoryPath": {
                    "type": "string",
                    "description": "Directory to list, absolute or relative to the working directory"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let dir = resolve_path(ctx, required_str(&args, "DirectoryPath")?);

        let listed = dir.clone();
        let (entries, truncated) = tokio::task::spawn_blocking(move || read_entries(&listed))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("listing task failed: {e}")))?
            .map_err(|e| {
                ToolError::ExecutionFailed(format!("cannot list {}: {e}", dir.display()))
            })?;

        let mut response = json!({
            "path": dir.display().to_string(),
            "entries": entries,
        });
        if truncated {
            response["truncated"] = json!(true);
        }
        Ok(ToolOutput::json(response))
    }
}

fn read_entries(dir: &Path) -> std::io::Result<(Vec<Entry>, bool)> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // symlink_metadata so links are reported as links
        let (kind, size) = match entry.path().symlink_metadata() {
            Ok(meta) if meta.is_dir() => ("directory", None),
            Ok(meta) if meta.is_file() => ("file", Some(meta.len())),
            Ok(meta) if meta.file_type().is_symlink() => ("symlink", None),
            Ok(_) => ("other", None),
            Err(_) => ("unknown", None),
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
            size,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let truncated = entries.len() > MAX_ENTRIES;
    entries.truncate(MAX_ENTRIES);
    Ok((entries, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[tokio::test]
    async fn lists_sorted_entries_with_kind_and_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let ctx = context("list_directory", dir.path().to_path_buf());
        let out = ListDirectoryTool
            .execute(json!({"DirectoryPath": "."}), &ctx)
            .await
            .unwrap();
        let entries = out.response["entries"].as_array().unwrap();

        let names: Vec<_> = entries.iter().map(|e| e["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(entries[1]["kind"], "file");
        assert_eq!(entries[1]["size"], 5);
        assert_eq!(entries[2]["kind"], "directory");
        assert!(entries[2].get("size").is_none());
        assert!(out.response.get("truncated").is_none());
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let ctx = context("list_directory", std::env::temp_dir());
        let err = ListDirectoryTool
            .execute(json!({"DirectoryPath": "/no/such/dir/here"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn path_is_required() {
        let ctx = context("list_directory", std::env::temp_dir());
        let err = ListDirectoryTool.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
