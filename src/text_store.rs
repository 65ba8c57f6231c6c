use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ToolError, ToolResult};

pub fn ensure_dir(path: &Path) -> ToolResult<()> {
    std::fs::create_dir_all(path).map_err(|err| ToolError::io("creating directory", path, err))
}

pub fn read_text(path: &Path) -> ToolResult<String> {
    std::fs::read_to_string(path).map_err(|err| ToolError::io("reading file", path, err))
}

/// Like [`read_text`], but an absent file reads as `None`.
pub fn read_text_if_exists(path: &Path) -> ToolResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ToolError::io("reading file", path, err)),
    }
}

pub fn read_bytes(path: &Path) -> ToolResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| ToolError::io("reading file", path, err))
}

pub fn write_text(path: &Path, content: &str) -> ToolResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, content.as_bytes()).map_err(|err| ToolError::io("writing file", path, err))
}

pub fn append_text(path: &Path, content: &str) -> ToolResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| ToolError::io("opening file for append", path, err))?;
    file.write_all(content.as_bytes())
        .map_err(|err| ToolError::io("appending to file", path, err))
}

/// Walks `root` depth-first and returns every file accepted by `keep`,
/// sorted. A missing root yields an empty list.
pub fn list_files_recursive<F>(root: &Path, keep: F) -> ToolResult<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current)
            .map_err(|err| ToolError::io("listing directory", &current, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| ToolError::io("reading entry in", &current, err))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if keep(&path) {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{append_text, list_files_recursive, read_text, read_text_if_exists, write_text};

    #[test]
    fn write_creates_parent_directories_and_append_extends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cypress/support/commands.js");
        write_text(&path, "one\n").expect("write");
        append_text(&path, "two\n").expect("append");
        assert_eq!(read_text(&path).expect("read"), "one\ntwo\n");
    }

    #[test]
    fn missing_files_read_as_none_or_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.txt");
        assert_eq!(read_text_if_exists(&path).expect("optional read"), None);
        let err = read_text(&path).expect_err("must-exist read fails");
        assert_eq!(err.code, crate::error::ToolErrorCode::Io);
    }

    #[test]
    fn recursive_listing_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_text(&dir.path().join("b/nested/two.cy.js"), "").expect("write");
        write_text(&dir.path().join("a/one.cy.ts"), "").expect("write");
        write_text(&dir.path().join("a/readme.md"), "").expect("write");

        let files = list_files_recursive(dir.path(), |path| {
            path.to_string_lossy().contains(".cy.")
        })
        .expect("list");
        let names = files
            .iter()
            .map(|path| path.strip_prefix(dir.path()).expect("prefix").to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                std::path::PathBuf::from("a/one.cy.ts"),
                std::path::PathBuf::from("b/nested/two.cy.js"),
            ]
        );

        let missing = list_files_recursive(&dir.path().join("nope"), |_| true).expect("list");
        assert!(missing.is_empty());
    }
}
