//! Builtin file tools, confined to a root directory

use agentry_core::{Error, ErrorKind, Result, ToolExecutor, ToolInfo};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

const MAX_READ_BYTES: usize = 256 * 1024;

pub struct BuiltinTools {
    root: PathBuf,
    tools: Vec<ToolInfo>,
}

impl BuiltinTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tools: vec![
                ToolInfo::new("read_file", "Read a UTF-8 file; params: {\"path\"}"),
                ToolInfo::new("list_dir", "List a directory; params: {\"path\"} (default \".\")"),
                ToolInfo::new("write_file", "Write a file; params: {\"path\", \"content\"}")
                    .confirmed(),
            ],
        }
    }

    /// Resolve a relative path under the root; `..` may not climb out
    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let path = Path::new(raw);
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir if resolved != self.root => {
                    resolved.pop();
                }
                _ => return Err(escapes(raw)),
            }
        }
        Ok(resolved)
    }

    /// `resolve`, then follow symlinks: the deepest existing ancestor must
    /// really live under the root, and a dangling link is never followed.
    async fn confine(&self, raw: &str) -> Result<PathBuf> {
        let path = self.resolve(raw)?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| io_error(raw, e))?;

        for ancestor in path.ancestors() {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(real) => {
                    if !real.starts_with(&root) {
                        return Err(escapes(raw));
                    }
                    let rest = path.strip_prefix(ancestor).unwrap_or(Path::new(""));
                    return Ok(real.join(rest));
                }
                Err(_) if tokio::fs::symlink_metadata(ancestor).await.is_ok() => {
                    return Err(escapes(raw));
                }
                Err(_) => continue,
            }
        }
        Err(escapes(raw))
    }

    async fn read_file(&self, args: &Value) -> Result<Value> {
        let raw = required_str(args, "path")?;
        let path = self.confine(raw).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(raw, e))?;
        let truncated = bytes.len() > MAX_READ_BYTES;
        let content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_READ_BYTES)]);
        Ok(json!({"path": raw, "content": content, "truncated": truncated}))
    }

    async fn list_dir(&self, args: &Value) -> Result<Value> {
        let raw = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = self.confine(raw).await?;
        let mut dir = tokio::fs::read_dir(&path).await.map_err(|e| io_error(raw, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(raw, e))? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(json!({"path": raw, "entries": entries}))
    }

    async fn write_file(&self, args: &Value) -> Result<Value> {
        let raw = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        let path = self.confine(raw).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(raw, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(raw, e))?;
        Ok(json!({"path": raw, "bytes": content.len()}))
    }
}

impl ToolExecutor for BuiltinTools {
    fn tool(&self, name: &str) -> Option<ToolInfo> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    fn tools(&self) -> Vec<ToolInfo> {
        self.tools.clone()
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            "read_file" => self.read_file(&args).await,
            "list_dir" => self.list_dir(&args).await,
            "write_file" => self.write_file(&args).await,
            _ => Err(Error::tool_not_found(name)),
        }
    }
}

fn required_str<'a>(args: &'a Value, key: &'static str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_argument(format!("missing string param `{key}`")))
}

fn escapes(raw: &str) -> Error {
    Error::invalid_argument(format!("path `{raw}` leaves the working directory"))
        .with_context("path", raw)
}

fn io_error(path: &str, err: std::io::Error) -> Error {
    Error::new(ErrorKind::IoFailed, format!("{path}: {err}"))
        .with_context("path", path)
        .set_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_and_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = BuiltinTools::new(temp.path());

        tools
            .execute_tool("write_file", json!({"path": "notes/a.txt", "content": "hello"}))
            .await
            .expect("write");
        let read = tools
            .execute_tool("read_file", json!({"path": "./notes/a.txt"}))
            .await
            .expect("read");
        assert_eq!(read["content"], "hello");

        let listed = tools.execute_tool("list_dir", json!({})).await.expect("list");
        assert_eq!(listed["entries"], json!(["notes/"]));
    }

    #[tokio::test]
    async fn paths_stay_under_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = BuiltinTools::new(temp.path());

        for path in ["../outside.txt", "/etc/passwd"] {
            let err = tools
                .execute_tool("read_file", json!({"path": path}))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "path: {path}");
        }
        let err = tools.execute_tool("read_file", json!({"path": "missing.txt"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_cannot_leave_root() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        std::fs::write(outside.path().join("secret.txt"), "s3cret").expect("write");
        symlink(outside.path(), temp.path().join("link")).expect("symlink");
        symlink(outside.path().join("new.txt"), temp.path().join("dangling")).expect("symlink");
        let tools = BuiltinTools::new(temp.path());

        let err = tools
            .execute_tool("read_file", json!({"path": "link/secret.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        for path in ["link/new.txt", "dangling"] {
            let err = tools
                .execute_tool("write_file", json!({"path": path, "content": "x"}))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "path: {path}");
        }
        assert!(!outside.path().join("new.txt").exists());

        let err = tools.execute_tool("list_dir", json!({"path": "link"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn only_write_needs_confirmation() {
        let tools = BuiltinTools::new(".");
        assert!(tools.tool("write_file").unwrap().requires_confirmation);
        assert!(!tools.tool("read_file").unwrap().requires_confirmation);
        assert!(tools.tool("bash").is_none());
    }
}
