use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use base64::Engine as _;
use jsonschema::{validator_for, Validator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::command::{flatten_value, resolve_binary, CommandLine, RunOptions, TestingType};
use crate::config::Config;
use crate::config_codec::{set_deep_value, ConfigCodec, ConfigObject, ConfigValue};
use crate::env_profile::{EnvMap, EnvProfileStore};
use crate::error::{ToolError, ToolErrorCode, ToolResult};
use crate::mutators::{HookBodies, SourceMutators};
use crate::process_runner::{CancellationToken, CommandExecutor};
use crate::run_cache::{RunCache, RunCommand, RunResult};
use crate::sandbox::PathSandbox;
use crate::scaffold::Scaffolder;
use crate::summary::summarize_output;
use crate::test_structure::parse_test_structure;
use crate::text_store;

pub const TOOL_LIST_SPECS: &str = "cypress_list_specs";
pub const TOOL_READ_TEST_FILE: &str = "cypress_read_test_file";
pub const TOOL_GET_TEST_STRUCTURE: &str = "cypress_get_test_structure";
pub const TOOL_READ_CONFIG: &str = "cypress_read_config";
pub const TOOL_UPDATE_CONFIG: &str = "cypress_update_config";
pub const TOOL_READ_ENV: &str = "cypress_read_env";
pub const TOOL_UPDATE_ENV: &str = "cypress_update_env";
pub const TOOL_RUN_TESTS: &str = "cypress_run_tests";
pub const TOOL_GET_LAST_RUN_RESULTS: &str = "cypress_get_last_run_results";
pub const TOOL_GET_LAST_RUN_LOGS: &str = "cypress_get_last_run_logs";
pub const TOOL_LIST_ARTIFACTS: &str = "cypress_list_artifacts";
pub const TOOL_READ_ARTIFACT: &str = "cypress_read_artifact";
pub const TOOL_LIST_NETWORK_LOGS: &str = "cypress_list_network_logs";
pub const TOOL_READ_NETWORK_LOG: &str = "cypress_read_network_log";
pub const TOOL_CREATE_TEST_FILE: &str = "cypress_create_test_file";
pub const TOOL_ADD_CUSTOM_COMMAND: &str = "cypress_add_custom_command";
pub const TOOL_INSERT_HOOKS: &str = "cypress_insert_hooks";
pub const TOOL_CREATE_STORAGE_STATE: &str = "cypress_create_storage_state";
pub const TOOL_ADD_STORAGE_HELPERS: &str = "cypress_add_storage_helpers";
pub const TOOL_CREATE_PAGE_OBJECT: &str = "cypress_create_page_object";
pub const TOOL_ADD_FIXTURE: &str = "cypress_add_fixture";
pub const TOOL_UPDATE_FIXTURE: &str = "cypress_update_fixture";
pub const TOOL_SET_RETRIES: &str = "cypress_set_retries";
pub const TOOL_SET_REPORTER: &str = "cypress_set_reporter";
pub const TOOL_ADD_PLUGIN: &str = "cypress_add_plugin";
pub const TOOL_GENERATE_CI_GITHUB_ACTIONS: &str = "cypress_generate_ci_github_actions";

const SPEC_EXTENSIONS: [&str; 4] = [".cy.js", ".cy.jsx", ".cy.ts", ".cy.tsx"];
const NETWORK_LOG_EXTENSIONS: [&str; 3] = ["har", "json", "log"];
const ARTIFACT_DIRS: [&str; 4] = ["screenshots", "videos", "results", "reports"];
const NETWORK_LOG_DIRS: [&str; 3] = ["har", "logs", "network"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSpecsArgs {
    testing_type: Option<TestingType>,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Default, Deserialize)]
struct OptionalPathArgs {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
    key_path: String,
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfigArgs {
    path: Option<String>,
    #[serde(default)]
    updates: Vec<ConfigUpdate>,
    replace_with: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadEnvArgs {
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEnvArgs {
    profile: Option<String>,
    #[serde(default)]
    updates: EnvMap,
    #[serde(default)]
    remove_keys: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ArtifactEncoding {
    #[default]
    Base64,
    Utf8,
}

#[derive(Debug, Deserialize)]
struct ReadArtifactArgs {
    path: String,
    #[serde(default)]
    encoding: ArtifactEncoding,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTestFileArgs {
    #[serde(default)]
    testing_type: TestingType,
    name: String,
    description: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCustomCommandArgs {
    name: String,
    body: String,
    config_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsertHooksArgs {
    path: String,
    #[serde(flatten)]
    hooks: HookBodies,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStorageStateArgs {
    #[serde(default = "default_storage_state_name")]
    name: String,
    local_storage: Option<Value>,
    session_storage: Option<Value>,
    cookies: Option<Value>,
}

fn default_storage_state_name() -> String {
    "storageState".to_owned()
}

#[derive(Debug, Deserialize)]
struct NamedContentArgs {
    name: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureArgs {
    name: String,
    content: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetRetriesArgs {
    run_mode: Option<i64>,
    open_mode: Option<i64>,
    config_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetReporterArgs {
    reporter: String,
    reporter_options: Option<Value>,
    config_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPluginArgs {
    name: String,
    content: Option<String>,
    config_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GithubWorkflowArgs {
    workflow_name: String,
    node_version: String,
    install_command: String,
    run_command: String,
}

impl Default for GithubWorkflowArgs {
    fn default() -> Self {
        Self {
            workflow_name: "cypress.yml".to_owned(),
            node_version: "20".to_owned(),
            install_command: "npm ci".to_owned(),
            run_command: "npx cypress run".to_owned(),
        }
    }
}

/// Named, schema-validated operations over one repository.
pub struct ToolCatalog {
    settings: Config,
    sandbox: PathSandbox,
    codec: ConfigCodec,
    env: EnvProfileStore,
    cache: RunCache,
    scaffolder: Scaffolder,
    mutators: SourceMutators,
    executor: Arc<dyn CommandExecutor>,
    descriptors: Vec<ToolDescriptor>,
    validators: HashMap<&'static str, Validator>,
    /// Held by every call that touches repository files. Read-merge-write updates from
    /// concurrent calls would otherwise overwrite each other.
    serial: Mutex<()>,
}

impl ToolCatalog {
    pub fn new(settings: Config, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let sandbox = PathSandbox::new(&settings.workspace.repo_root).map_err(|err| {
            anyhow!(
                "failed opening repository root {}: {err}",
                settings.workspace.repo_root.display()
            )
        })?;
        let codec = ConfigCodec::new(sandbox.clone(), settings.workspace.config_files.clone());
        let env = EnvProfileStore::new(sandbox.clone(), settings.workspace.env_profile_file.clone());
        let cache_dir = sandbox
            .resolve([&settings.workspace.cache_dir])
            .map_err(|err| anyhow!("invalid workspace.cache_dir: {err}"))?;
        let scaffolder = Scaffolder::new(sandbox.clone(), settings.workspace.cypress_dir.clone());
        let mutators = SourceMutators::new(
            sandbox.clone(),
            codec.clone(),
            settings.workspace.cypress_dir.clone(),
        );

        let descriptors = tool_descriptors();
        let mut validators = HashMap::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let validator = validator_for(&descriptor.input_schema).map_err(|error| {
                anyhow!("invalid input schema for '{}': {error}", descriptor.name)
            })?;
            validators.insert(descriptor.name, validator);
        }

        Ok(Self {
            settings,
            sandbox,
            codec,
            env,
            cache: RunCache::new(cache_dir),
            scaffolder,
            mutators,
            executor,
            descriptors,
            validators,
            serial: Mutex::new(()),
        })
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Validates `arguments` against the tool's schema, then runs it.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolResult<Value> {
        let started = Instant::now();
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let Some(validator) = self.validators.get(name) else {
            return Err(ToolError::new(
                ToolErrorCode::UnknownTool,
                format!("unknown tool `{name}`"),
            ));
        };
        if let Some(error) = validator.iter_errors(&arguments).next() {
            return Err(ToolError::invalid_args(format!(
                "invalid arguments for `{name}`: {error}"
            )));
        }

        let result = self.dispatch(name, arguments, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(tool = name, elapsed_ms, "tool call completed"),
            Err(err) => warn!(
                tool = name,
                code = err.code.as_str(),
                elapsed_ms,
                "tool call failed: {}",
                err.message
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolResult<Value> {
        if name == TOOL_RUN_TESTS {
            return self.run_tests(parse_args(arguments)?, cancel).await;
        }
        let _serial = self.serial.lock().await;
        match name {
            TOOL_LIST_SPECS => self.list_specs(parse_args(arguments)?),
            TOOL_READ_TEST_FILE => self.read_text_file(parse_args(arguments)?),
            TOOL_GET_TEST_STRUCTURE => self.get_test_structure(parse_args(arguments)?),
            TOOL_READ_CONFIG => self.read_config(parse_args(arguments)?),
            TOOL_UPDATE_CONFIG => self.update_config(parse_args(arguments)?),
            TOOL_READ_ENV => self.read_env(parse_args(arguments)?),
            TOOL_UPDATE_ENV => self.update_env(parse_args(arguments)?),
            TOOL_GET_LAST_RUN_RESULTS => self.last_run_results().await,
            TOOL_GET_LAST_RUN_LOGS => self.last_run_logs().await,
            TOOL_LIST_ARTIFACTS => self.list_artifacts(),
            TOOL_READ_ARTIFACT => self.read_artifact(parse_args(arguments)?),
            TOOL_LIST_NETWORK_LOGS => self.list_network_logs(),
            TOOL_READ_NETWORK_LOG => self.read_text_file(parse_args(arguments)?),
            TOOL_CREATE_TEST_FILE => self.create_test_file(parse_args(arguments)?),
            TOOL_ADD_CUSTOM_COMMAND => self.add_custom_command(parse_args(arguments)?),
            TOOL_INSERT_HOOKS => self.insert_hooks(parse_args(arguments)?),
            TOOL_CREATE_STORAGE_STATE => self.create_storage_state(parse_args(arguments)?),
            TOOL_ADD_STORAGE_HELPERS => self.add_storage_helpers(),
            TOOL_CREATE_PAGE_OBJECT => self.create_page_object(parse_args(arguments)?),
            TOOL_ADD_FIXTURE | TOOL_UPDATE_FIXTURE => self.write_fixture(parse_args(arguments)?),
            TOOL_SET_RETRIES => self.set_retries(parse_args(arguments)?),
            TOOL_SET_REPORTER => self.set_reporter(parse_args(arguments)?),
            TOOL_ADD_PLUGIN => self.add_plugin(parse_args(arguments)?),
            TOOL_GENERATE_CI_GITHUB_ACTIONS => self.generate_github_workflow(parse_args(arguments)?),
            other => Err(ToolError::new(
                ToolErrorCode::UnknownTool,
                format!("unknown tool `{other}`"),
            )),
        }
    }

    fn display(&self, path: &Path) -> String {
        self.sandbox.display(path)
    }

    fn cypress_path(&self, segment: &str) -> ToolResult<PathBuf> {
        self.sandbox
            .resolve([self.settings.workspace.cypress_dir.as_str(), segment])
    }

    fn list_relative<F>(&self, dirs: &[&str], keep: F) -> ToolResult<Vec<String>>
    where
        F: Fn(&Path) -> bool,
    {
        let mut found = BTreeSet::new();
        for dir in dirs {
            let root = self.cypress_path(dir)?;
            for file in text_store::list_files_recursive(&root, &keep)? {
                found.insert(self.display(&file));
            }
        }
        Ok(found.into_iter().collect())
    }

    fn list_specs(&self, args: ListSpecsArgs) -> ToolResult<Value> {
        let mut dirs = Vec::new();
        if matches!(args.testing_type, None | Some(TestingType::E2e)) {
            dirs.extend(["e2e", "integration"]);
        }
        if matches!(args.testing_type, None | Some(TestingType::Component)) {
            dirs.push("component");
        }
        let specs = self.list_relative(&dirs, |path| {
            let name = path.to_string_lossy();
            SPEC_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
        })?;
        Ok(json!({ "specs": specs }))
    }

    fn read_text_file(&self, args: PathArgs) -> ToolResult<Value> {
        let resolved = self.sandbox.resolve_input(&args.path)?;
        let content = text_store::read_text(&resolved)?;
        Ok(json!({ "path": self.display(&resolved), "content": content }))
    }

    fn get_test_structure(&self, args: PathArgs) -> ToolResult<Value> {
        let resolved = self.sandbox.resolve_input(&args.path)?;
        let content = text_store::read_text(&resolved)?;
        Ok(json!({
            "path": self.display(&resolved),
            "structure": parse_test_structure(&content),
        }))
    }

    fn read_config(&self, args: OptionalPathArgs) -> ToolResult<Value> {
        let loaded = self.codec.load(args.path.as_deref())?;
        Ok(json!({
            "path": self.display(&loaded.path),
            "config": loaded.config.to_json(),
            "raw": loaded.raw.unwrap_or_default(),
        }))
    }

    fn update_config(&self, args: UpdateConfigArgs) -> ToolResult<Value> {
        let explicit = args.path.as_deref();
        let replacement = args
            .replace_with
            .filter(|value| ConfigValue::from_json(value).is_truthy());
        if let Some(replacement) = replacement {
            self.codec.save(explicit, &ConfigObject::from_json(&replacement)?)?;
        } else if !args.updates.is_empty() {
            let mut config = self.codec.load(explicit)?.config;
            for update in &args.updates {
                set_deep_value(&mut config, &update.key_path, ConfigValue::from_json(&update.value))?;
            }
            self.codec.save(explicit, &config)?;
        }
        let reloaded = self.codec.load(explicit)?;
        Ok(json!({
            "path": self.display(&reloaded.path),
            "config": reloaded.config.to_json(),
        }))
    }

    fn read_env(&self, args: ReadEnvArgs) -> ToolResult<Value> {
        let (path, env) = self.env.load(args.profile.as_deref())?;
        Ok(json!({ "path": self.env.display(&path), "env": env }))
    }

    fn update_env(&self, args: UpdateEnvArgs) -> ToolResult<Value> {
        let (path, env) = self
            .env
            .update(args.profile.as_deref(), &args.updates, &args.remove_keys)?;
        Ok(json!({ "path": self.env.display(&path), "env": env }))
    }

    /// Only profile loading and cache persistence hold the serial lock, so other tools stay
    /// responsive while the runner executes.
    async fn run_tests(&self, mut options: RunOptions, cancel: &CancellationToken) -> ToolResult<Value> {
        let serial = self.serial.lock().await;
        let default_profile_exists = self.env.path(None)?.is_file();
        let wants_env =
            options.env.is_some() || options.env_profile.is_some() || default_profile_exists;
        let (_, mut merged) = self.env.load(options.env_profile.as_deref())?;
        for (key, value) in options.env.take().unwrap_or_default() {
            merged.insert(key, flatten_value(&value));
        }
        if wants_env {
            options.env = Some(
                merged
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect::<BTreeMap<_, _>>(),
            );
        }

        let resolved = resolve_binary(&self.sandbox, &self.settings.runner)?;
        let command = CommandLine::new(
            &resolved,
            &options,
            merged,
            self.sandbox.root().to_path_buf(),
        );
        drop(serial);
        let outcome = self.executor.execute(&command, cancel).await?;
        let raw_output = outcome.raw_output();
        let result = RunResult {
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
            summary: summarize_output(&raw_output),
            raw_output,
            command: RunCommand {
                binary: command.binary,
                args: command.args,
            },
            signal: outcome.signal,
            cancelled: outcome.cancelled,
        };
        let _serial = self.serial.lock().await;
        self.cache.save(&result).await?;
        to_json_value(&result)
    }

    async fn last_run_results(&self) -> ToolResult<Value> {
        match self.cache.load().await? {
            Some(result) => to_json_value(&result),
            None => Ok(json!({ "message": "No runs recorded." })),
        }
    }

    async fn last_run_logs(&self) -> ToolResult<Value> {
        let logs = self.cache.read_logs().await?;
        Ok(json!({ "path": self.display(&self.cache.log_path()), "logs": logs }))
    }

    fn list_artifacts(&self) -> ToolResult<Value> {
        let artifacts = self.list_relative(&ARTIFACT_DIRS, |_| true)?;
        Ok(json!({ "artifacts": artifacts }))
    }

    fn read_artifact(&self, args: ReadArtifactArgs) -> ToolResult<Value> {
        let resolved = self.sandbox.resolve_input(&args.path)?;
        let bytes = text_store::read_bytes(&resolved)?;
        let (encoding, content) = match args.encoding {
            ArtifactEncoding::Base64 => (
                "base64",
                base64::engine::general_purpose::STANDARD.encode(&bytes),
            ),
            ArtifactEncoding::Utf8 => ("utf8", String::from_utf8_lossy(&bytes).into_owned()),
        };
        Ok(json!({
            "path": self.display(&resolved),
            "encoding": encoding,
            "content": content,
        }))
    }

    fn list_network_logs(&self) -> ToolResult<Value> {
        let logs = self.list_relative(&NETWORK_LOG_DIRS, |path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| NETWORK_LOG_EXTENSIONS.contains(&ext))
        })?;
        Ok(json!({ "logs": logs }))
    }

    fn create_test_file(&self, args: CreateTestFileArgs) -> ToolResult<Value> {
        let path = self.scaffolder.create_test_file(
            args.testing_type,
            &args.name,
            args.description.as_deref(),
            args.content.as_deref(),
        )?;
        Ok(json!({ "path": self.display(&path) }))
    }

    fn add_custom_command(&self, args: AddCustomCommandArgs) -> ToolResult<Value> {
        let path = self
            .mutators
            .add_custom_command(&args.name, &args.body, args.config_path.as_deref())?;
        Ok(json!({ "path": self.display(&path), "added": args.name }))
    }

    fn insert_hooks(&self, args: InsertHooksArgs) -> ToolResult<Value> {
        let (path, inserted) = self.mutators.insert_hooks_into_spec(&args.path, &args.hooks)?;
        Ok(json!({ "path": self.display(&path), "inserted": inserted }))
    }

    fn create_storage_state(&self, args: CreateStorageStateArgs) -> ToolResult<Value> {
        let path = self.scaffolder.create_storage_state(
            &args.name,
            args.local_storage,
            args.session_storage,
            args.cookies,
        )?;
        Ok(json!({ "path": self.display(&path) }))
    }

    fn add_storage_helpers(&self) -> ToolResult<Value> {
        let (support_file, helper_path) = self.mutators.add_storage_helpers()?;
        Ok(json!({
            "supportFile": self.display(&support_file),
            "helperPath": self.display(&helper_path),
        }))
    }

    fn create_page_object(&self, args: NamedContentArgs) -> ToolResult<Value> {
        let path = self
            .scaffolder
            .create_page_object(&args.name, args.content.as_deref())?;
        Ok(json!({ "path": self.display(&path) }))
    }

    fn write_fixture(&self, args: FixtureArgs) -> ToolResult<Value> {
        let path = self.scaffolder.write_fixture(&args.name, &args.content)?;
        Ok(json!({ "path": self.display(&path) }))
    }

    fn set_retries(&self, args: SetRetriesArgs) -> ToolResult<Value> {
        let (path, retries) =
            self.mutators
                .set_retries(args.config_path.as_deref(), args.run_mode, args.open_mode)?;
        Ok(json!({ "path": self.display(&path), "retries": retries }))
    }

    fn set_reporter(&self, args: SetReporterArgs) -> ToolResult<Value> {
        let path = self.mutators.set_reporter(
            args.config_path.as_deref(),
            &args.reporter,
            args.reporter_options.as_ref(),
        )?;
        Ok(json!({
            "path": self.display(&path),
            "reporter": args.reporter,
            "reporterOptions": args.reporter_options,
        }))
    }

    fn add_plugin(&self, args: AddPluginArgs) -> ToolResult<Value> {
        let plugin_path = self
            .scaffolder
            .write_plugin(&args.name, args.content.as_deref())?;
        let wiring = self
            .mutators
            .wire_plugin(args.config_path.as_deref(), &plugin_path)?;
        Ok(json!({
            "pluginPath": self.display(&plugin_path),
            "configPath": self.display(&wiring.config_path),
            "require": wiring.require_specifier,
            "wired": wiring.changed,
        }))
    }

    fn generate_github_workflow(&self, args: GithubWorkflowArgs) -> ToolResult<Value> {
        let path = self.scaffolder.write_github_workflow(
            &args.workflow_name,
            &args.node_version,
            &args.install_command,
            &args.run_command,
        )?;
        Ok(json!({ "path": self.display(&path) }))
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> ToolResult<T> {
    serde_json::from_value(arguments)
        .map_err(|err| ToolError::invalid_args(format!("invalid arguments: {err}")))
}

fn to_json_value<T: Serialize>(value: &T) -> ToolResult<Value> {
    serde_json::to_value(value).map_err(|err| {
        ToolError::new(ToolErrorCode::Io, format!("failed serialising tool result: {err}"))
    })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn testing_type_schema() -> Value {
    json!({ "type": "string", "enum": ["e2e", "component"] })
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    let string = json!({ "type": "string" });
    let object = json!({ "type": "object" });
    let config_path = json!({ "type": "string", "description": "Config file, defaults to the first existing candidate" });
    vec![
        ToolDescriptor {
            name: TOOL_LIST_SPECS,
            description: "List spec files (*.cy.js/jsx/ts/tsx) for e2e and/or component testing",
            input_schema: object_schema(json!({ "testingType": testing_type_schema() }), &[]),
        },
        ToolDescriptor {
            name: TOOL_READ_TEST_FILE,
            description: "Read a test file from the repository",
            input_schema: object_schema(json!({ "path": string }), &["path"]),
        },
        ToolDescriptor {
            name: TOOL_GET_TEST_STRUCTURE,
            description: "Outline describe/context/it/test blocks of a spec file",
            input_schema: object_schema(json!({ "path": string }), &["path"]),
        },
        ToolDescriptor {
            name: TOOL_READ_CONFIG,
            description: "Read the runner configuration as structured data plus raw source",
            input_schema: object_schema(json!({ "path": string }), &[]),
        },
        ToolDescriptor {
            name: TOOL_UPDATE_CONFIG,
            description: "Set dotted key paths in the runner configuration, or replace it entirely",
            input_schema: object_schema(
                json!({
                    "path": string,
                    "updates": {
                        "type": "array",
                        "items": object_schema(json!({ "keyPath": string, "value": {} }), &["keyPath", "value"])
                    },
                    "replaceWith": {}
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: TOOL_READ_ENV,
            description: "Read an environment profile (.env.cypress or .env.cypress.<profile>)",
            input_schema: object_schema(json!({ "profile": string }), &[]),
        },
        ToolDescriptor {
            name: TOOL_UPDATE_ENV,
            description: "Merge updates into an environment profile and remove keys",
            input_schema: object_schema(
                json!({
                    "profile": string,
                    "updates": { "type": "object", "additionalProperties": { "type": "string" } },
                    "removeKeys": { "type": "array", "items": string }
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: TOOL_RUN_TESTS,
            description: "Run the test runner and record the result as the last run",
            input_schema: object_schema(
                json!({
                    "mode": { "type": "string", "enum": ["run", "open"] },
                    "testingType": testing_type_schema(),
                    "specs": { "type": "array", "items": string },
                    "browser": { "type": "string", "enum": ["chrome", "firefox", "edge", "electron"] },
                    "headed": { "type": "boolean" },
                    "configFile": string,
                    "config": object,
                    "envProfile": string,
                    "env": object,
                    "record": { "type": "boolean" },
                    "parallel": { "type": "boolean" },
                    "ciBuildId": string,
                    "group": string,
                    "tag": string,
                    "reporter": string,
                    "reporterOptions": object
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: TOOL_GET_LAST_RUN_RESULTS,
            description: "Return the most recent run result",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: TOOL_GET_LAST_RUN_LOGS,
            description: "Return the raw output of the most recent run",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: TOOL_LIST_ARTIFACTS,
            description: "List screenshots, videos, results and reports",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: TOOL_READ_ARTIFACT,
            description: "Read an artifact as base64 (default) or utf8",
            input_schema: object_schema(
                json!({
                    "path": string,
                    "encoding": { "type": "string", "enum": ["base64", "utf8"] }
                }),
                &["path"],
            ),
        },
        ToolDescriptor {
            name: TOOL_LIST_NETWORK_LOGS,
            description: "List HAR, JSON and log files under har, logs and network",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: TOOL_READ_NETWORK_LOG,
            description: "Read a network log file",
            input_schema: object_schema(json!({ "path": string }), &["path"]),
        },
        ToolDescriptor {
            name: TOOL_CREATE_TEST_FILE,
            description: "Create a spec file with a default suite or the given content",
            input_schema: object_schema(
                json!({
                    "testingType": testing_type_schema(),
                    "name": string,
                    "description": string,
                    "content": string
                }),
                &["name"],
            ),
        },
        ToolDescriptor {
            name: TOOL_ADD_CUSTOM_COMMAND,
            description: "Append a Cypress.Commands.add registration to the commands support file",
            input_schema: object_schema(
                json!({ "name": string, "body": string, "configPath": config_path }),
                &["name", "body"],
            ),
        },
        ToolDescriptor {
            name: TOOL_INSERT_HOOKS,
            description: "Insert before/beforeEach/after/afterEach hooks into the first suite of a spec",
            input_schema: object_schema(
                json!({
                    "path": string,
                    "before": string,
                    "beforeEach": string,
                    "after": string,
                    "afterEach": string
                }),
                &["path"],
            ),
        },
        ToolDescriptor {
            name: TOOL_CREATE_STORAGE_STATE,
            description: "Write a storage-state fixture with localStorage, sessionStorage and cookies",
            input_schema: object_schema(
                json!({
                    "name": string,
                    "localStorage": object,
                    "sessionStorage": object,
                    "cookies": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": { "name": string, "value": string, "options": object },
                            "required": ["name", "value"]
                        }
                    }
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: TOOL_ADD_STORAGE_HELPERS,
            description: "Add loadStorageState/clearStorageState commands to the support files",
            input_schema: object_schema(json!({}), &[]),
        },
        ToolDescriptor {
            name: TOOL_CREATE_PAGE_OBJECT,
            description: "Create a page object module under pages/",
            input_schema: object_schema(json!({ "name": string, "content": string }), &["name"]),
        },
        ToolDescriptor {
            name: TOOL_ADD_FIXTURE,
            description: "Write a JSON fixture",
            input_schema: object_schema(json!({ "name": string, "content": {} }), &["name", "content"]),
        },
        ToolDescriptor {
            name: TOOL_UPDATE_FIXTURE,
            description: "Overwrite a JSON fixture",
            input_schema: object_schema(json!({ "name": string, "content": {} }), &["name", "content"]),
        },
        ToolDescriptor {
            name: TOOL_SET_RETRIES,
            description: "Set e2e.retries run and open mode counts",
            input_schema: object_schema(
                json!({
                    "runMode": { "type": "integer", "minimum": 0 },
                    "openMode": { "type": "integer", "minimum": 0 },
                    "configPath": config_path
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: TOOL_SET_REPORTER,
            description: "Set the reporter and its options in the configuration",
            input_schema: object_schema(
                json!({ "reporter": string, "reporterOptions": object, "configPath": config_path }),
                &["reporter"],
            ),
        },
        ToolDescriptor {
            name: TOOL_ADD_PLUGIN,
            description: "Write a plugin module and chain it into e2e.setupNodeEvents",
            input_schema: object_schema(
                json!({ "name": string, "content": string, "configPath": config_path }),
                &["name"],
            ),
        },
        ToolDescriptor {
            name: TOOL_GENERATE_CI_GITHUB_ACTIONS,
            description: "Generate a GitHub Actions workflow that runs the suite",
            input_schema: object_schema(
                json!({
                    "workflowName": string,
                    "nodeVersion": string,
                    "installCommand": string,
                    "runCommand": string
                }),
                &[],
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{tool_descriptors, ToolCatalog};
    use crate::command::CommandLine;
    use crate::config::Config;
    use crate::error::{ToolErrorCode, ToolResult};
    use crate::process_runner::{CancellationToken, CommandExecutor, ProcessOutcome};

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<CommandLine>>,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(
            &self,
            command: &CommandLine,
            _cancel: &CancellationToken,
        ) -> ToolResult<ProcessOutcome> {
            self.seen.lock().expect("lock").push(command.clone());
            Ok(ProcessOutcome {
                exit_code: 1,
                signal: None,
                stdout: "  Tests: 2\n  Passing: 1\n  Failing: 1\n".to_owned(),
                stderr: String::new(),
                duration_ms: 5,
                cancelled: false,
            })
        }
    }

    fn catalog(root: &std::path::Path) -> (ToolCatalog, Arc<RecordingExecutor>) {
        let mut settings = Config::default();
        settings.workspace.repo_root = root.to_path_buf();
        let executor = Arc::new(RecordingExecutor::default());
        let catalog = ToolCatalog::new(settings, executor.clone()).expect("catalog");
        (catalog, executor)
    }

    async fn call(catalog: &ToolCatalog, name: &str, args: Value) -> Value {
        catalog
            .call(name, args, &CancellationToken::new())
            .await
            .unwrap_or_else(|err| panic!("{name} failed: {err}"))
    }

    #[test]
    fn catalog_exposes_every_tool_once() {
        let descriptors = tool_descriptors();
        assert_eq!(descriptors.len(), 26);
        let mut names = descriptors.iter().map(|tool| tool.name).collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 26);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let token = CancellationToken::new();
        let err = catalog
            .call("cypress_nope", json!({}), &token)
            .await
            .expect_err("unknown");
        assert_eq!(err.code, ToolErrorCode::UnknownTool);
        let err = catalog
            .call("cypress_read_test_file", json!({ "path": 5 }), &token)
            .await
            .expect_err("bad type");
        assert_eq!(err.code, ToolErrorCode::InvalidArgs);
        let err = catalog
            .call("cypress_run_tests", json!({ "browser": "safari" }), &token)
            .await
            .expect_err("bad enum");
        assert_eq!(err.code, ToolErrorCode::InvalidArgs);
    }

    #[tokio::test]
    async fn sandbox_violations_surface_as_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let err = catalog
            .call(
                "cypress_read_test_file",
                json!({ "path": "../../etc/passwd" }),
                &CancellationToken::new(),
            )
            .await
            .expect_err("escape");
        assert_eq!(err.code, ToolErrorCode::PathOutsideRoot);
    }

    #[tokio::test]
    async fn specs_are_listed_sorted_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        for file in [
            "cypress/e2e/b.cy.ts",
            "cypress/e2e/nested/a.cy.js",
            "cypress/e2e/helper.js",
            "cypress/integration/old.cy.jsx",
            "cypress/component/Button.cy.tsx",
        ] {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
            std::fs::write(path, "").expect("write");
        }
        let (catalog, _) = catalog(dir.path());
        let all = call(&catalog, "cypress_list_specs", json!({})).await;
        assert_eq!(
            all["specs"],
            json!([
                "cypress/component/Button.cy.tsx",
                "cypress/e2e/b.cy.ts",
                "cypress/e2e/nested/a.cy.js",
                "cypress/integration/old.cy.jsx"
            ])
        );
        let component = call(&catalog, "cypress_list_specs", json!({ "testingType": "component" })).await;
        assert_eq!(component["specs"], json!(["cypress/component/Button.cy.tsx"]));
    }

    #[tokio::test]
    async fn config_updates_round_trip_and_keep_fragments() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("cypress.config.js"),
            "module.exports = {\n  e2e: {\n    setupNodeEvents(on, config) {\n      return config;\n    },\n  },\n};\n",
        )
        .expect("config");
        let (catalog, _) = catalog(dir.path());
        let updated = call(
            &catalog,
            "cypress_update_config",
            json!({ "updates": [
                { "keyPath": "e2e.baseUrl", "value": "http://localhost:4200" },
                { "keyPath": "video", "value": false }
            ] }),
        )
        .await;
        assert_eq!(updated["path"], "cypress.config.js");
        assert_eq!(
            updated["config"],
            json!({
                "e2e": {
                    "setupNodeEvents": { "$code": "function setupNodeEvents(on, config) {\n      return config;\n    }" },
                    "baseUrl": "http://localhost:4200"
                },
                "video": false
            })
        );

        let read = call(&catalog, "cypress_read_config", json!({})).await;
        assert!(read["raw"].as_str().expect("raw").starts_with("module.exports = {\n"));
    }

    #[tokio::test]
    async fn env_round_trip_through_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let updated = call(
            &catalog,
            "cypress_update_env",
            json!({ "profile": "ci", "updates": { "B": "2", "A": "1" } }),
        )
        .await;
        assert_eq!(updated, json!({ "path": ".env.cypress.ci", "env": { "A": "1", "B": "2" } }));
        let read = call(&catalog, "cypress_read_env", json!({ "profile": "ci" })).await;
        assert_eq!(read["env"], json!({ "A": "1", "B": "2" }));
    }

    #[tokio::test]
    async fn run_tests_merges_profile_and_caches_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(".env.cypress.staging"), "API=https://staging\nUSER=ada\n")
            .expect("profile");
        let (catalog, executor) = catalog(dir.path());
        let result = call(
            &catalog,
            "cypress_run_tests",
            json!({ "envProfile": "staging", "env": { "USER": "bob", "RETRIES": 2 }, "specs": ["cypress/e2e/a.cy.js"] }),
        )
        .await;
        assert_eq!(result["exitCode"], 1);
        assert_eq!(result["summary"], json!({ "failing": 1, "passing": 1, "tests": 2 }));
        assert_eq!(result["rawOutput"], "Tests: 2\n  Passing: 1\n  Failing: 1");
        assert_eq!(
            result["command"]["args"],
            json!([
                "-y", "cypress", "run",
                "--spec", "cypress/e2e/a.cy.js",
                "--env", "API=https://staging,RETRIES=2,USER=bob"
            ])
        );

        let seen = executor.seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].env.get("USER").map(String::as_str), Some("bob"));
        assert_eq!(seen[0].binary, "npx");

        let last = call(&catalog, "cypress_get_last_run_results", json!({})).await;
        assert_eq!(last, result);
        let logs = call(&catalog, "cypress_get_last_run_logs", json!({})).await;
        assert_eq!(logs["path"], "cypress/.mcp/last-run.log");
        assert_eq!(logs["logs"], result["rawOutput"]);
    }

    #[tokio::test]
    async fn run_without_env_sources_omits_env_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let result = call(&catalog, "cypress_run_tests", json!({})).await;
        assert_eq!(result["command"]["args"], json!(["-y", "cypress", "run"]));
    }

    #[tokio::test]
    async fn last_run_message_when_nothing_ran() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let last = call(&catalog, "cypress_get_last_run_results", json!({})).await;
        assert_eq!(last, json!({ "message": "No runs recorded." }));
    }

    #[tokio::test]
    async fn artifacts_are_listed_and_read_as_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shot = dir.path().join("cypress/screenshots/login/fail.png");
        std::fs::create_dir_all(shot.parent().expect("parent")).expect("dir");
        std::fs::write(&shot, [0_u8, 1, 2]).expect("write");
        let har = dir.path().join("cypress/har/session.har");
        std::fs::create_dir_all(har.parent().expect("parent")).expect("dir");
        std::fs::write(&har, "{}").expect("write");
        std::fs::write(dir.path().join("cypress/har/notes.txt"), "x").expect("write");

        let (catalog, _) = catalog(dir.path());
        let artifacts = call(&catalog, "cypress_list_artifacts", json!({})).await;
        assert_eq!(artifacts["artifacts"], json!(["cypress/screenshots/login/fail.png"]));
        let read = call(
            &catalog,
            "cypress_read_artifact",
            json!({ "path": "cypress/screenshots/login/fail.png" }),
        )
        .await;
        assert_eq!(read["encoding"], "base64");
        assert_eq!(read["content"], "AAEC");
        let logs = call(&catalog, "cypress_list_network_logs", json!({})).await;
        assert_eq!(logs["logs"], json!(["cypress/har/session.har"]));
    }

    #[tokio::test]
    async fn scaffolding_tools_write_expected_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, _) = catalog(dir.path());
        let test_file = call(&catalog, "cypress_create_test_file", json!({ "name": "Checkout Flow" })).await;
        assert_eq!(test_file["path"], "cypress/e2e/checkout-flow.cy.js");

        let hooks = call(
            &catalog,
            "cypress_insert_hooks",
            json!({ "path": "cypress/e2e/checkout-flow.cy.js", "beforeEach": "cy.visit('/')" }),
        )
        .await;
        assert_eq!(hooks["inserted"], true);
        let structure = call(
            &catalog,
            "cypress_get_test_structure",
            json!({ "path": "cypress/e2e/checkout-flow.cy.js" }),
        )
        .await;
        assert_eq!(structure["structure"][1]["name"], "runs");

        let plugin = call(&catalog, "cypress_add_plugin", json!({ "name": "db tasks" })).await;
        assert_eq!(plugin["pluginPath"], "cypress/plugins/db-tasks.js");
        assert_eq!(plugin["configPath"], "cypress.config.js");
        assert_eq!(plugin["wired"], true);

        let helpers = call(&catalog, "cypress_add_storage_helpers", json!({})).await;
        assert_eq!(helpers["helperPath"], "cypress/support/storage.js");

        let workflow = call(&catalog, "cypress_generate_ci_github_actions", json!({})).await;
        assert_eq!(workflow["path"], ".github/workflows/cypress.yml");

        let err = catalog
            .call("cypress_add_fixture", json!({ "name": "///", "content": {} }), &CancellationToken::new())
            .await
            .expect_err("empty slug");
        assert_eq!(err.code, ToolErrorCode::InvalidArgs);
    }
}
