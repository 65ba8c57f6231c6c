use std::path::{Path, PathBuf};

use serde_json::{json, Number, Value};
use tracing::debug;

use crate::error::{ToolError, ToolErrorCode, ToolResult};
use crate::js_literal;
use crate::sandbox::PathSandbox;
use crate::text_store;

/// Key used when a code fragment is shown to (or supplied by) the agent as JSON.
pub const FRAGMENT_JSON_KEY: &str = "$code";

const INDENT_STEP: usize = 2;

/// Opaque source text carried through load, mutate and save without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment(String);

impl CodeFragment {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn source(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<ConfigValue>),
    Object(ConfigObject),
    Fragment(CodeFragment),
}

impl ConfigValue {
    pub fn as_object(&self) -> Option<&ConfigObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_fragment(&self) -> Option<&CodeFragment> {
        match self {
            Self::Fragment(fragment) => Some(fragment),
            _ => None,
        }
    }

    /// JavaScript truthiness, with fragments (functions, expressions) counted as truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
            Self::String(text) => !text.is_empty(),
            Self::List(_) | Self::Object(_) | Self::Fragment(_) => true,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => Self::Number(
                number
                    .as_f64()
                    .filter(|_| number.is_f64())
                    .and_then(normalize_number)
                    .unwrap_or_else(|| number.clone()),
            ),
            Value::String(text) => Self::String(text.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::String(source)) = map.get(FRAGMENT_JSON_KEY) {
                        return Self::Fragment(CodeFragment::new(source.clone()));
                    }
                }
                Self::Object(ConfigObject::from_json_map(map))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Number(number) => Value::Number(number.clone()),
            Self::String(text) => Value::String(text.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(object) => object.to_json(),
            Self::Fragment(fragment) => json!({ FRAGMENT_JSON_KEY: fragment.source() }),
        }
    }
}

/// Insertion-ordered mapping, mirroring JavaScript object key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigObject {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.entries
            .iter_mut()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Replaces in place when the key exists, so the key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns the nested object under `key`, replacing a missing or non-object value
    /// with an empty object first.
    pub fn object_entry(&mut self, key: &str) -> &mut ConfigObject {
        if self.get(key).and_then(ConfigValue::as_object).is_none() {
            self.insert(key, ConfigValue::Object(ConfigObject::new()));
        }
        match self.get_mut(key) {
            Some(ConfigValue::Object(object)) => object,
            _ => unreachable!("object entry inserted above"),
        }
    }

    pub fn from_json(value: &Value) -> ToolResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_json_map(map)),
            other => Err(ToolError::invalid_args(format!(
                "configuration must be a JSON object, got {other}"
            ))),
        }
    }

    fn from_json_map(map: &serde_json::Map<String, Value>) -> Self {
        let mut object = Self::new();
        for (key, value) in map {
            object.insert(key.clone(), ConfigValue::from_json(value));
        }
        object
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Integral floats become integers so `1.0` and `1` compare equal after a save/load cycle.
pub fn normalize_number(value: f64) -> Option<Number> {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return Some(Number::from(value as i64));
    }
    Number::from_f64(value)
}

pub fn render_config_source(config: &ConfigObject) -> String {
    format!("module.exports = {};\n", object_to_js(config, 0))
}

/// Rewrites only the exported object literal of `existing`, so imports, `require` lines,
/// `defineConfig(...)` wrappers and trailing code survive. A source without an export gets
/// one appended; an unparsable or absent source is replaced wholesale.
pub fn splice_config_source(existing: Option<&str>, config: &ConfigObject) -> String {
    let Some(raw) = existing else {
        return render_config_source(config);
    };
    match js_literal::parse_config_document(raw) {
        Ok((_, Some(span))) => format!(
            "{}{}{}",
            &raw[..span.start],
            object_to_js(config, 0),
            &raw[span.end..]
        ),
        Ok((_, None)) if !raw.trim().is_empty() => {
            let separator = if raw.ends_with('\n') { "\n" } else { "\n\n" };
            format!("{raw}{separator}{}", render_config_source(config))
        }
        _ => render_config_source(config),
    }
}

pub fn value_to_js(value: &ConfigValue, indent: usize) -> String {
    match value {
        ConfigValue::Null => "null".to_owned(),
        ConfigValue::Bool(flag) => flag.to_string(),
        ConfigValue::Number(number) => number.to_string(),
        ConfigValue::String(text) => quote_js(text),
        ConfigValue::Fragment(fragment) => fragment.source().to_owned(),
        ConfigValue::List(items) => {
            if items.is_empty() {
                return "[]".to_owned();
            }
            let pad = " ".repeat(indent);
            let pad_inner = " ".repeat(indent + INDENT_STEP);
            let inner = items
                .iter()
                .map(|item| format!("{pad_inner}{}", value_to_js(item, indent + INDENT_STEP)))
                .collect::<Vec<_>>();
            format!("[\n{}\n{pad}]", inner.join(",\n"))
        }
        ConfigValue::Object(object) => object_to_js(object, indent),
    }
}

fn object_to_js(object: &ConfigObject, indent: usize) -> String {
    if object.is_empty() {
        return "{}".to_owned();
    }
    let pad = " ".repeat(indent);
    let pad_inner = " ".repeat(indent + INDENT_STEP);
    let inner = object
        .iter()
        .map(|(key, value)| {
            format!(
                "{pad_inner}{}: {}",
                quote_js(key),
                value_to_js(value, indent + INDENT_STEP)
            )
        })
        .collect::<Vec<_>>();
    format!("{{\n{}\n{pad}}}", inner.join(",\n"))
}

fn quote_js(text: &str) -> String {
    Value::String(text.to_owned()).to_string()
}

/// Sets `value` at a dotted key path, replacing any missing or non-object
/// intermediate with an empty object.
pub fn set_deep_value(target: &mut ConfigObject, key_path: &str, value: ConfigValue) -> ToolResult<()> {
    let parts = key_path
        .split('.')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    let Some((last, parents)) = parts.split_last() else {
        return Err(ToolError::invalid_args(format!(
            "keyPath `{key_path}` has no segments"
        )));
    };
    let mut current = target;
    for part in parents {
        current = current.object_entry(part);
    }
    current.insert(*last, value);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: ConfigObject,
    pub raw: Option<String>,
}

/// Loads and saves the test runner configuration file.
#[derive(Debug, Clone)]
pub struct ConfigCodec {
    sandbox: PathSandbox,
    candidates: Vec<String>,
}

impl ConfigCodec {
    pub fn new(sandbox: PathSandbox, candidates: Vec<String>) -> Self {
        Self {
            sandbox,
            candidates,
        }
    }

    /// An explicit path wins; otherwise the first existing candidate, falling back to the
    /// first candidate name for a repository that has no config yet.
    pub fn resolve_path(&self, explicit: Option<&str>) -> ToolResult<PathBuf> {
        if let Some(explicit) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
            return self.sandbox.resolve_input(explicit);
        }
        let mut first = None;
        for candidate in &self.candidates {
            let resolved = self.sandbox.resolve([candidate])?;
            if resolved.is_file() {
                return Ok(resolved);
            }
            first.get_or_insert(resolved);
        }
        first.ok_or_else(|| ToolError::invalid_args("no configuration file candidates configured"))
    }

    pub fn load(&self, explicit: Option<&str>) -> ToolResult<LoadedConfig> {
        let path = self.resolve_path(explicit)?;
        let Some(raw) = text_store::read_text_if_exists(&path)? else {
            debug!(path = %path.display(), "config file absent, using empty config");
            return Ok(LoadedConfig {
                path,
                config: ConfigObject::new(),
                raw: None,
            });
        };
        let config = parse_config(&path, &raw)?;
        Ok(LoadedConfig {
            path,
            config,
            raw: Some(raw),
        })
    }

    pub fn save(&self, explicit: Option<&str>, config: &ConfigObject) -> ToolResult<PathBuf> {
        let path = self.resolve_path(explicit)?;
        let existing = text_store::read_text_if_exists(&path)?;
        text_store::write_text(&path, &splice_config_source(existing.as_deref(), config))?;
        debug!(path = %path.display(), keys = config.len(), "config saved");
        Ok(path)
    }

    pub fn display(&self, path: &Path) -> String {
        self.sandbox.display(path)
    }
}

fn parse_config(path: &Path, raw: &str) -> ToolResult<ConfigObject> {
    js_literal::parse_config_source(raw).map_err(|message| {
        ToolError::new(
            ToolErrorCode::MalformedConfig,
            format!("failed loading config {}: {message}", path.display()),
        )
    })
}
