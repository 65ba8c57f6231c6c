use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{ToolError, ToolResult};
use crate::sandbox::PathSandbox;
use crate::text_store;

pub type EnvMap = BTreeMap<String, String>;

/// Named `KEY=value` profiles stored next to the repository root.
///
/// Nothing is cached: every operation reads the file fresh, so an edit made between two
/// calls is merged instead of overwritten.
#[derive(Debug, Clone)]
pub struct EnvProfileStore {
    sandbox: PathSandbox,
    base_file: String,
}

impl EnvProfileStore {
    pub fn new(sandbox: PathSandbox, base_file: impl Into<String>) -> Self {
        Self {
            sandbox,
            base_file: base_file.into(),
        }
    }

    pub fn path(&self, profile: Option<&str>) -> ToolResult<PathBuf> {
        match profile.map(str::trim).filter(|name| !name.is_empty()) {
            None => self.sandbox.resolve([&self.base_file]),
            Some(name) => {
                if name.contains(['/', '\\']) {
                    return Err(ToolError::invalid_args(format!(
                        "profile name `{name}` must not contain path separators"
                    )));
                }
                self.sandbox.resolve([format!("{}.{name}", self.base_file)])
            }
        }
    }

    pub fn display(&self, path: &std::path::Path) -> String {
        self.sandbox.display(path)
    }

    /// Absent profiles read as an empty mapping.
    pub fn load(&self, profile: Option<&str>) -> ToolResult<(PathBuf, EnvMap)> {
        let path = self.path(profile)?;
        let env = text_store::read_text_if_exists(&path)?
            .map(|text| parse_env(&text))
            .unwrap_or_default();
        Ok((path, env))
    }

    pub fn update(
        &self,
        profile: Option<&str>,
        updates: &EnvMap,
        remove_keys: &[String],
    ) -> ToolResult<(PathBuf, EnvMap)> {
        let (path, mut env) = self.load(profile)?;
        for (key, value) in updates {
            env.insert(key.clone(), value.clone());
        }
        for key in remove_keys {
            env.remove(key);
        }
        text_store::write_text(&path, &render_env(&env))?;
        debug!(
            path = %path.display(),
            updated = updates.len(),
            removed = remove_keys.len(),
            "env profile written"
        );
        Ok((path, env))
    }
}

/// dotenv parsing. Lines that do not parse are skipped with a warning so one bad entry does
/// not hide the rest of the profile.
pub fn parse_env(text: &str) -> EnvMap {
    let mut env = EnvMap::new();
    for entry in dotenvy::from_read_iter(text.as_bytes()) {
        match entry {
            Ok((key, value)) => {
                env.insert(key, value);
            }
            Err(err) => warn!(error = %err, "skipping malformed env line"),
        }
    }
    env
}

/// Sorted `KEY=value` lines with a trailing newline. Values that would not survive a
/// re-parse verbatim are double-quoted and escaped.
pub fn render_env(env: &EnvMap) -> String {
    let lines = env
        .iter()
        .map(|(key, value)| format!("{key}={}", render_value(value)))
        .collect::<Vec<_>>();
    format!("{}\n", lines.join("\n"))
}

fn render_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|ch| ch.is_whitespace() || matches!(ch, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if !needs_quotes {
        return value.to_owned();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("\\$"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
