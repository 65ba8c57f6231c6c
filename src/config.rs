use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_cypress_dir")]
    pub cypress_dir: String,
    #[serde(default = "default_config_files")]
    pub config_files: Vec<String>,
    #[serde(default = "default_env_profile_file")]
    pub env_profile_file: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            cypress_dir: default_cypress_dir(),
            config_files: default_config_files(),
            env_profile_file: default_env_profile_file(),
            cache_dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_local_binary")]
    pub local_binary: String,
    #[serde(default = "default_package_runner")]
    pub package_runner: String,
    #[serde(default = "default_package_runner_args")]
    pub package_runner_args: Vec<String>,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            local_binary: default_local_binary(),
            package_runner: default_package_runner(),
            package_runner_args: default_package_runner_args(),
            tool_name: default_tool_name(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed reading config file {}", path.display()))?;
            toml::from_str::<Config>(&text)
                .with_context(|| format!("failed parsing TOML config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_cli_overrides(&mut self, repo_root: Option<&Path>) {
        if let Some(root) = repo_root {
            self.workspace.repo_root = root.to_path_buf();
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("MCP_CYPRESS_REPO_ROOT") {
            self.workspace.repo_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty_env("MCP_CYPRESS_DIR") {
            self.workspace.cypress_dir = v;
        }
        if let Some(v) = non_empty_env("MCP_CYPRESS_CACHE_DIR") {
            self.workspace.cache_dir = v;
        }
        if let Some(v) = non_empty_env("MCP_CYPRESS_ENV_FILE") {
            self.workspace.env_profile_file = v;
        }
        if let Some(v) = non_empty_env("MCP_CYPRESS_LOCAL_BINARY") {
            self.runner.local_binary = v;
        }
        if let Some(v) = non_empty_env("MCP_CYPRESS_PACKAGE_RUNNER") {
            self.runner.package_runner = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace.repo_root.as_os_str().is_empty() {
            anyhow::bail!("workspace.repo_root must not be empty");
        }
        for (label, value) in [
            ("workspace.cypress_dir", &self.workspace.cypress_dir),
            ("workspace.cache_dir", &self.workspace.cache_dir),
            ("workspace.env_profile_file", &self.workspace.env_profile_file),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{label} must not be empty");
            }
            if Path::new(value).is_absolute() {
                anyhow::bail!("{label} must be relative to the repository root, got {value}");
            }
        }
        if self.workspace.config_files.is_empty()
            || self
                .workspace
                .config_files
                .iter()
                .any(|name| name.trim().is_empty())
        {
            anyhow::bail!("workspace.config_files must list at least one non-empty file name");
        }
        if self.runner.package_runner.trim().is_empty() {
            anyhow::bail!("runner.package_runner must not be empty");
        }
        if self.runner.tool_name.trim().is_empty() {
            anyhow::bail!("runner.tool_name must not be empty");
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_cypress_dir() -> String {
    "cypress".to_owned()
}

fn default_config_files() -> Vec<String> {
    vec![
        "cypress.config.js".to_owned(),
        "cypress.config.ts".to_owned(),
        "cypress.config.cjs".to_owned(),
        "cypress.config.mjs".to_owned(),
    ]
}

fn default_env_profile_file() -> String {
    ".env.cypress".to_owned()
}

fn default_cache_dir() -> String {
    "cypress/.mcp".to_owned()
}

fn default_local_binary() -> String {
    "node_modules/.bin/cypress".to_owned()
}

fn default_package_runner() -> String {
    "npx".to_owned()
}

fn default_package_runner_args() -> Vec<String> {
    vec!["-y".to_owned()]
}

fn default_tool_name() -> String {
    "cypress".to_owned()
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[workspace]
cypress_dir = "e2e-suite"

[runner]
package_runner = "pnpm"
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.workspace.cypress_dir, "e2e-suite");
        assert_eq!(cfg.workspace.cache_dir, "cypress/.mcp");
        assert_eq!(cfg.workspace.config_files.len(), 4);
        assert_eq!(cfg.runner.package_runner, "pnpm");
        assert_eq!(cfg.runner.package_runner_args, vec!["-y".to_owned()]);
        cfg.validate().expect("valid config");
    }

    #[test]
    fn validate_rejects_absolute_cache_dir() {
        let mut cfg = Config::default();
        cfg.workspace.cache_dir = "/tmp/cache".to_owned();
        let err = cfg.validate().expect_err("absolute cache dir must fail");
        assert!(err.to_string().contains("workspace.cache_dir"));
    }

    #[test]
    fn validate_rejects_empty_config_candidates() {
        let mut cfg = Config::default();
        cfg.workspace.config_files.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cli_repo_override_wins() {
        let mut cfg = Config::default();
        cfg.apply_cli_overrides(Some(std::path::Path::new("/srv/repo")));
        assert_eq!(cfg.workspace.repo_root, std::path::PathBuf::from("/srv/repo"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(cfg.runner.tool_name, "cypress");
    }
}
