use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RunnerConfig;
use crate::env_profile::EnvMap;
use crate::error::ToolResult;
use crate::sandbox::PathSandbox;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Run,
    Open,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestingType {
    #[default]
    E2e,
    Component,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Firefox,
    Edge,
    Electron,
}

impl Browser {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Edge => "edge",
            Self::Electron => "electron",
        }
    }
}

/// One test-runner invocation as requested by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub testing_type: TestingType,
    pub specs: Vec<String>,
    pub browser: Option<Browser>,
    pub headed: bool,
    pub config_file: Option<String>,
    pub config: BTreeMap<String, Value>,
    pub env_profile: Option<String>,
    pub env: Option<BTreeMap<String, Value>>,
    pub record: bool,
    pub parallel: bool,
    pub ci_build_id: Option<String>,
    pub group: Option<String>,
    pub tag: Option<String>,
    pub reporter: Option<String>,
    pub reporter_options: BTreeMap<String, Value>,
}

/// Builds the runner argument vector. Pure: equal options give equal vectors.
pub fn build_args(options: &RunOptions) -> Vec<String> {
    let mut args = Vec::new();
    args.push(match options.mode {
        RunMode::Open => "open".to_owned(),
        RunMode::Run => "run".to_owned(),
    });
    if options.testing_type == TestingType::Component {
        args.push("--component".to_owned());
    }
    if !options.specs.is_empty() {
        args.push("--spec".to_owned());
        args.push(options.specs.join(","));
    }
    if let Some(browser) = options.browser {
        args.push("--browser".to_owned());
        args.push(browser.as_str().to_owned());
    }
    if options.headed {
        args.push("--headed".to_owned());
    }
    push_text_flag(&mut args, "--config-file", options.config_file.as_deref());
    if !options.config.is_empty() {
        args.push("--config".to_owned());
        args.push(flatten_pairs(&options.config));
    }
    // Unlike --config, an env mapping is emitted even when empty.
    if let Some(env) = &options.env {
        args.push("--env".to_owned());
        args.push(flatten_pairs(env));
    }
    if options.record {
        args.push("--record".to_owned());
    }
    if options.parallel {
        args.push("--parallel".to_owned());
    }
    push_text_flag(&mut args, "--ci-build-id", options.ci_build_id.as_deref());
    push_text_flag(&mut args, "--group", options.group.as_deref());
    push_text_flag(&mut args, "--tag", options.tag.as_deref());
    push_text_flag(&mut args, "--reporter", options.reporter.as_deref());
    if !options.reporter_options.is_empty() {
        args.push("--reporter-options".to_owned());
        args.push(flatten_pairs(&options.reporter_options));
    }
    args
}

fn push_text_flag(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        args.push(flag.to_owned());
        args.push(value.to_owned());
    }
}

fn flatten_pairs(map: &BTreeMap<String, Value>) -> String {
    map.iter()
        .map(|(key, value)| format!("{key}={}", flatten_value(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Text form of a value on the runner command line: strings raw, lists comma-joined,
/// objects as compact JSON.
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(flatten_value).collect::<Vec<_>>().join(","),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub binary: String,
    pub prefix_args: Vec<String>,
}

/// Prefers the project-local runner; otherwise goes through the package runner
/// (`npx -y cypress ...`).
pub fn resolve_binary(sandbox: &PathSandbox, runner: &RunnerConfig) -> ToolResult<ResolvedBinary> {
    let local = sandbox.resolve([&runner.local_binary])?;
    if local.is_file() {
        return Ok(ResolvedBinary {
            binary: local.display().to_string(),
            prefix_args: Vec::new(),
        });
    }
    let mut prefix_args = runner.package_runner_args.clone();
    prefix_args.push(runner.tool_name.clone());
    Ok(ResolvedBinary {
        binary: runner.package_runner.clone(),
        prefix_args,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub binary: String,
    pub args: Vec<String>,
    pub env: EnvMap,
    pub cwd: PathBuf,
}

impl CommandLine {
    pub fn new(resolved: &ResolvedBinary, options: &RunOptions, env: EnvMap, cwd: PathBuf) -> Self {
        let mut args = resolved.prefix_args.clone();
        args.extend(build_args(options));
        Self {
            binary: resolved.binary.clone(),
            args,
            env,
            cwd,
        }
    }
}
