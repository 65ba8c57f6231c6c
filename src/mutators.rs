use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config_codec::{CodeFragment, ConfigCodec, ConfigValue};
use crate::error::ToolResult;
use crate::js_literal;
use crate::sandbox::PathSandbox;
use crate::scaffold::STORAGE_HELPER_SOURCE;
use crate::text_store;

static SUITE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bdescribe\s*(?:\.(?:only|skip))?\s*\(").expect("valid regex")
});

pub const COMMANDS_IMPORT_LINE: &str = "import \"./commands\";";
pub const STORAGE_IMPORT_LINE: &str = "import \"./storage\";";
pub const DEFAULT_COMMANDS_SOURCE: &str = "Cypress.Commands.add(\"noop\", () => {});\n";

const SETUP_NODE_EVENTS: &str = "setupNodeEvents";
const HOOK_BODY_INDENT: &str = "    ";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBodies {
    pub before: Option<String>,
    pub before_each: Option<String>,
    pub after: Option<String>,
    pub after_each: Option<String>,
}

impl HookBodies {
    fn blocks(&self) -> Vec<String> {
        [
            ("before", &self.before),
            ("beforeEach", &self.before_each),
            ("after", &self.after),
            ("afterEach", &self.after_each),
        ]
        .into_iter()
        .filter_map(|(name, body)| {
            body.as_deref()
                .filter(|body| !body.is_empty())
                .map(|body| render_hook(name, body))
        })
        .collect()
    }
}

fn render_hook(name: &str, body: &str) -> String {
    let body = body
        .trim()
        .split('\n')
        .collect::<Vec<_>>()
        .join(&format!("\n{HOOK_BODY_INDENT}"));
    format!("  {name}(() => {{\n{HOOK_BODY_INDENT}{body}\n  }});\n")
}

/// Splices hook blocks right after the opening brace of the first suite body.
///
/// Falls back to prepending when no suite with a balanced body is found. Returns `None`
/// when every hook body is absent or empty.
pub fn insert_hooks(content: &str, hooks: &HookBodies) -> Option<String> {
    let blocks = hooks.blocks();
    if blocks.is_empty() {
        return None;
    }
    let joined = blocks.concat();
    match suite_body_anchor(content) {
        Some(anchor) => Some(format!(
            "{}\n{joined}{}",
            &content[..anchor],
            &content[anchor..]
        )),
        None => Some(format!("{joined}\n{content}")),
    }
}

fn suite_body_anchor(content: &str) -> Option<usize> {
    let declaration = SUITE_DECLARATION.find(content)?;
    let arguments = js_literal::call_arguments(content, declaration.end() - 1)?;
    let open = arguments
        .into_iter()
        .find_map(|argument| function_body_open(content, argument))?;
    js_literal::matching_close(content, open)?;
    Some(open + 1)
}

/// Position of the body `{` when `argument` is a `function` expression or a block arrow.
fn function_body_open(content: &str, argument: Range<usize>) -> Option<usize> {
    let mut pos = argument.start;
    if let Some(rest) = content[pos..argument.end].strip_prefix("async") {
        if rest.starts_with(|ch: char| ch.is_whitespace() || ch == '(') {
            pos = skip_whitespace(content, pos + "async".len());
        }
    }
    let is_function = content[pos..argument.end].strip_prefix("function").is_some_and(|rest| {
        !rest.starts_with(|ch: char| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
    });
    let open = if is_function {
        let params = js_literal::find_code_byte(content, pos, b'(')?;
        skip_whitespace(content, js_literal::matching_close(content, params)?)
    } else {
        let after_params = if content[pos..].starts_with('(') {
            js_literal::matching_close(content, pos)?
        } else {
            let name = content[pos..argument.end]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                .unwrap_or(argument.end - pos);
            if name == 0 {
                return None;
            }
            pos + name
        };
        let arrow = skip_whitespace(content, after_params);
        if !content[arrow..].starts_with("=>") {
            return None;
        }
        skip_whitespace(content, arrow + 2)
    };
    (open < argument.end && content.as_bytes()[open] == b'{').then_some(open)
}

fn skip_whitespace(content: &str, pos: usize) -> usize {
    content.len() - content[pos..].trim_start().len()
}

/// Prepends `line` unless the file already contains it. Returns whether the file changed.
pub fn ensure_import_line(path: &Path, line: &str) -> ToolResult<bool> {
    match text_store::read_text_if_exists(path)? {
        Some(content) if content.contains(line) => Ok(false),
        Some(content) => {
            text_store::write_text(path, &format!("{line}\n{content}"))?;
            Ok(true)
        }
        None => {
            text_store::write_text(path, &format!("{line}\n"))?;
            Ok(true)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportFiles {
    pub support_file: PathBuf,
    pub commands_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginWiring {
    pub config_path: PathBuf,
    pub require_specifier: String,
    pub changed: bool,
}

/// Idempotent edits to the support files and the runner configuration.
#[derive(Debug, Clone)]
pub struct SourceMutators {
    sandbox: PathSandbox,
    codec: ConfigCodec,
    cypress_dir: String,
}

impl SourceMutators {
    pub fn new(sandbox: PathSandbox, codec: ConfigCodec, cypress_dir: impl Into<String>) -> Self {
        Self {
            sandbox,
            codec,
            cypress_dir: cypress_dir.into(),
        }
    }

    fn support_path(&self, file: &str) -> ToolResult<PathBuf> {
        self.sandbox.resolve([self.cypress_dir.as_str(), "support", file])
    }

    fn default_support_file(&self) -> String {
        format!("{}/support/e2e.js", self.cypress_dir.trim_end_matches('/'))
    }

    pub fn ensure_support_files(&self) -> ToolResult<SupportFiles> {
        let support_file = self.support_path("e2e.js")?;
        let commands_file = self.support_path("commands.js")?;
        if !support_file.exists() {
            text_store::write_text(&support_file, "")?;
        }
        if !commands_file.exists() {
            text_store::write_text(&commands_file, DEFAULT_COMMANDS_SOURCE)?;
        }
        ensure_import_line(&support_file, COMMANDS_IMPORT_LINE)?;
        Ok(SupportFiles {
            support_file,
            commands_file,
        })
    }

    /// Points `e2e.supportFile` at the default bootstrap file when it is missing or falsy.
    /// The config is only rewritten when that changes something.
    pub fn ensure_support_enabled(&self, config_path: Option<&str>) -> ToolResult<PathBuf> {
        let loaded = self.codec.load(config_path)?;
        let mut config = loaded.config;
        let e2e = config.object_entry("e2e");
        if e2e.get("supportFile").is_some_and(ConfigValue::is_truthy) {
            return Ok(loaded.path);
        }
        e2e.insert("supportFile", ConfigValue::String(self.default_support_file()));
        info!(path = %loaded.path.display(), "enabling support file in config");
        self.codec.save(config_path, &config)
    }

    pub fn add_custom_command(
        &self,
        name: &str,
        body: &str,
        config_path: Option<&str>,
    ) -> ToolResult<PathBuf> {
        let files = self.ensure_support_files()?;
        self.ensure_support_enabled(config_path)?;
        let line = format!("Cypress.Commands.add({}, {body});\n", Value::String(name.to_owned()));
        text_store::append_text(&files.commands_file, &line)?;
        debug!(command = name, "custom command appended");
        Ok(files.commands_file)
    }

    /// Returns the spec path and whether anything was inserted.
    pub fn insert_hooks_into_spec(&self, path: &str, hooks: &HookBodies) -> ToolResult<(PathBuf, bool)> {
        let resolved = self.sandbox.resolve_input(path)?;
        let content = text_store::read_text(&resolved)?;
        let Some(updated) = insert_hooks(&content, hooks) else {
            return Ok((resolved, false));
        };
        text_store::write_text(&resolved, &updated)?;
        Ok((resolved, true))
    }

    /// Writes the storage helper commands and imports them from the bootstrap file.
    pub fn add_storage_helpers(&self) -> ToolResult<(PathBuf, PathBuf)> {
        let files = self.ensure_support_files()?;
        self.ensure_support_enabled(None)?;
        let helper_path = self.support_path("storage.js")?;
        text_store::write_text(&helper_path, STORAGE_HELPER_SOURCE)?;
        ensure_import_line(&files.support_file, STORAGE_IMPORT_LINE)?;
        Ok((files.support_file, helper_path))
    }

    /// Rewrites `e2e.setupNodeEvents` so it calls the previous callback (if any), then the
    /// plugin module. The plugin registered last runs last, so its config changes win.
    pub fn wire_plugin(&self, config_path: Option<&str>, plugin_file: &Path) -> ToolResult<PluginWiring> {
        let loaded = self.codec.load(config_path)?;
        let specifier = require_specifier(&loaded.path, plugin_file);
        let call = format!("require({})(on, config);", Value::String(specifier.clone()));

        let mut config = loaded.config;
        let e2e = config.object_entry("e2e");
        let previous = e2e
            .get(SETUP_NODE_EVENTS)
            .and_then(ConfigValue::as_fragment)
            .cloned();
        if previous
            .as_ref()
            .is_some_and(|fragment| fragment.source().contains(&call))
        {
            return Ok(PluginWiring {
                config_path: loaded.path,
                require_specifier: specifier,
                changed: false,
            });
        }

        let mut body = String::new();
        if let Some(previous) = &previous {
            body.push_str(&format!("  ({})(on, config);\n", previous.source()));
        }
        body.push_str(&format!("  {call}\n"));
        e2e.insert(
            SETUP_NODE_EVENTS,
            ConfigValue::Fragment(CodeFragment::new(format!(
                "(on, config) => {{\n{body}  return config;\n}}"
            ))),
        );
        let config_path = self.codec.save(config_path, &config)?;
        info!(plugin = %specifier, "plugin wired into setupNodeEvents");
        Ok(PluginWiring {
            config_path,
            require_specifier: specifier,
            changed: true,
        })
    }

    /// Sets `e2e.retries` when either mode is given (the other defaults to 0).
    /// Returns the config path and the resulting retries value.
    pub fn set_retries(
        &self,
        config_path: Option<&str>,
        run_mode: Option<i64>,
        open_mode: Option<i64>,
    ) -> ToolResult<(PathBuf, Value)> {
        let loaded = self.codec.load(config_path)?;
        let mut config = loaded.config;
        let e2e = config.object_entry("e2e");
        if run_mode.is_some() || open_mode.is_some() {
            let retries = json!({
                "runMode": run_mode.unwrap_or(0),
                "openMode": open_mode.unwrap_or(0),
            });
            e2e.insert("retries", ConfigValue::from_json(&retries));
        }
        let retries = e2e
            .get("retries")
            .map(ConfigValue::to_json)
            .unwrap_or(Value::Null);
        let path = self.codec.save(config_path, &config)?;
        Ok((path, retries))
    }

    pub fn set_reporter(
        &self,
        config_path: Option<&str>,
        reporter: &str,
        reporter_options: Option<&Value>,
    ) -> ToolResult<PathBuf> {
        let loaded = self.codec.load(config_path)?;
        let mut config = loaded.config;
        config.insert("reporter", ConfigValue::String(reporter.to_owned()));
        if let Some(options) = reporter_options {
            config.insert("reporterOptions", ConfigValue::from_json(options));
        }
        self.codec.save(config_path, &config)
    }
}

/// Module specifier for `require` from the config file's directory, without extension.
fn require_specifier(config_file: &Path, module_file: &Path) -> String {
    let from = config_file
        .parent()
        .map(|dir| dir.components().collect::<Vec<_>>())
        .unwrap_or_default();
    let target = module_file.with_extension("");
    let to = target.components().collect::<Vec<_>>();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(left, right)| left == right)
        .count();
    let mut segments = vec!["..".to_owned(); from.len() - common];
    segments.extend(to[common..].iter().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }));
    let joined = segments.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}
