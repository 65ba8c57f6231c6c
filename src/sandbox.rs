use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{ToolError, ToolErrorCode, ToolResult};

/// Resolves agent-supplied paths against the repository root.
///
/// Every filesystem touch made on behalf of a tool call goes through
/// [`PathSandbox::resolve`]; a resolution that leaves the root fails with
/// `path_outside_root` before any file is opened.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: &Path) -> ToolResult<Self> {
        let root = root
            .canonicalize()
            .map_err(|err| ToolError::io("canonicalizing repository root", root, err))?;
        if !root.is_dir() {
            return Err(ToolError::new(
                ToolErrorCode::Io,
                format!("repository root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve<I, S>(&self, segments: I) -> ToolResult<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        let mut candidate = self.root.clone();
        for segment in segments {
            candidate.push(segment.as_ref());
        }

        let lexical = normalize_lexically(&candidate);
        if !lexical.starts_with(&self.root) {
            return Err(self.escape_error(&lexical));
        }

        let resolved = canonicalize_with_missing_segments(&lexical)?;
        if !resolved.starts_with(&self.root) {
            return Err(self.escape_error(&resolved));
        }
        Ok(resolved)
    }

    /// Resolves a single agent-supplied path string, rejecting blanks.
    pub fn resolve_input(&self, raw: &str) -> ToolResult<PathBuf> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_args("path must be a non-empty string"));
        }
        self.resolve([trimmed])
    }

    pub fn display(&self, path: &Path) -> String {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            let text = relative.to_string_lossy().to_string();
            if text.is_empty() {
                ".".to_owned()
            } else {
                text.replace('\\', "/")
            }
        } else {
            path.display().to_string()
        }
    }

    fn escape_error(&self, resolved: &Path) -> ToolError {
        ToolError::new(
            ToolErrorCode::PathOutsideRoot,
            format!(
                "path escapes repo: {} is outside {}",
                resolved.display(),
                self.root.display()
            ),
        )
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                out = PathBuf::from(prefix.as_os_str());
            }
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

fn canonicalize_with_missing_segments(path: &Path) -> ToolResult<PathBuf> {
    let mut cursor = path.to_path_buf();
    let mut missing = Vec::<OsString>::new();
    loop {
        if cursor.exists() {
            let mut resolved = cursor
                .canonicalize()
                .map_err(|err| ToolError::io("canonicalizing path", &cursor, err))?;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }

        let file_name = cursor.file_name().ok_or_else(|| {
            ToolError::new(
                ToolErrorCode::Io,
                format!("unable to resolve parent path for {}", path.display()),
            )
        })?;
        missing.push(file_name.to_os_string());
        cursor = cursor.parent().map(Path::to_path_buf).ok_or_else(|| {
            ToolError::new(
                ToolErrorCode::Io,
                format!("unable to resolve parent path for {}", path.display()),
            )
        })?;
    }
}

#[cfg(test)]
mod tests {
    use super::PathSandbox;
    use crate::error::ToolErrorCode;

    #[test]
    fn resolves_nested_paths_that_do_not_exist_yet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox");
        let resolved = sandbox
            .resolve(["cypress", "e2e", "new.cy.js"])
            .expect("resolve");
        assert!(resolved.starts_with(sandbox.root()));
        assert_eq!(sandbox.display(&resolved), "cypress/e2e/new.cy.js");
    }

    #[test]
    fn parent_segments_that_stay_inside_are_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox");
        let resolved = sandbox
            .resolve_input("cypress/../cypress/support/e2e.js")
            .expect("resolve");
        assert_eq!(sandbox.display(&resolved), "cypress/support/e2e.js");
    }

    #[test]
    fn escaping_paths_fail_without_creating_anything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).expect("repo dir");
        let sandbox = PathSandbox::new(&repo).expect("sandbox");

        for raw in ["../outside.txt", "cypress/../../outside.txt", "/etc/passwd"] {
            let err = sandbox.resolve_input(raw).expect_err("escape must fail");
            assert_eq!(err.code, ToolErrorCode::PathOutsideRoot, "input {raw}");
        }
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn sibling_directory_with_shared_prefix_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).expect("repo dir");
        std::fs::create_dir_all(dir.path().join("repo2")).expect("sibling dir");
        let sandbox = PathSandbox::new(&repo).expect("sandbox");
        let err = sandbox
            .resolve_input("../repo2/file.txt")
            .expect_err("sibling must fail");
        assert_eq!(err.code, ToolErrorCode::PathOutsideRoot);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&repo).expect("repo dir");
        std::fs::create_dir_all(&outside).expect("outside dir");
        std::os::unix::fs::symlink(&outside, repo.join("link")).expect("symlink");
        let sandbox = PathSandbox::new(&repo).expect("sandbox");
        let err = sandbox
            .resolve_input("link/secret.txt")
            .expect_err("symlink escape must fail");
        assert_eq!(err.code, ToolErrorCode::PathOutsideRoot);
    }

    #[test]
    fn blank_input_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox");
        let err = sandbox.resolve_input("   ").expect_err("blank must fail");
        assert_eq!(err.code, ToolErrorCode::InvalidArgs);
    }
}
