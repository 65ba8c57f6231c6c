use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ToolError, ToolResult};

pub const LAST_RUN_FILE: &str = "last-run.json";
pub const LAST_RUN_LOG_FILE: &str = "last-run.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommand {
    pub binary: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub exit_code: i64,
    pub duration_ms: u64,
    pub summary: BTreeMap<String, u64>,
    pub raw_output: String,
    pub command: RunCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancelled: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Holds the single most recent run, in memory and under the cache directory.
pub struct RunCache {
    dir: PathBuf,
    last: RwLock<Option<RunResult>>,
}

impl RunCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last: RwLock::new(None),
        }
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join(LAST_RUN_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LAST_RUN_LOG_FILE)
    }

    /// Replaces the in-memory slot, then writes the result and (when non-empty) the raw log.
    pub async fn save(&self, result: &RunResult) -> ToolResult<()> {
        *self.last.write().await = Some(result.clone());

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ToolError::io("creating cache directory", &self.dir, err))?;
        let result_path = self.result_path();
        let snapshot = serde_json::to_vec_pretty(result)
            .map_err(|err| ToolError::io("serialising run result for", &result_path, err))?;
        tokio::fs::write(&result_path, snapshot)
            .await
            .map_err(|err| ToolError::io("writing", &result_path, err))?;
        if !result.raw_output.is_empty() {
            let log_path = self.log_path();
            tokio::fs::write(&log_path, result.raw_output.as_bytes())
                .await
                .map_err(|err| ToolError::io("writing", &log_path, err))?;
        }
        debug!(path = %result_path.display(), exit_code = result.exit_code, "last run persisted");
        Ok(())
    }

    /// The in-memory result, or the persisted one after a restart; `None` when no run exists.
    pub async fn load(&self) -> ToolResult<Option<RunResult>> {
        if let Some(result) = self.last.read().await.clone() {
            return Ok(Some(result));
        }
        let path = self.result_path();
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let result = serde_json::from_slice::<RunResult>(&bytes)
            .map_err(|err| ToolError::io("parsing", &path, err))?;
        *self.last.write().await = Some(result.clone());
        Ok(Some(result))
    }

    /// The persisted raw log; empty when no log was written.
    pub async fn read_logs(&self) -> ToolResult<String> {
        let path = self.log_path();
        Ok(read_optional(&path)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default())
    }
}

async fn read_optional(path: &Path) -> ToolResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ToolError::io("reading", path, err)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{RunCache, RunCommand, RunResult};
    use crate::error::ToolErrorCode;

    fn sample(raw_output: &str) -> RunResult {
        RunResult {
            exit_code: 1,
            duration_ms: 1234,
            summary: BTreeMap::from([("failing".to_owned(), 1), ("tests".to_owned(), 3)]),
            raw_output: raw_output.to_owned(),
            command: RunCommand {
                binary: "npx".to_owned(),
                args: vec!["-y".to_owned(), "cypress".to_owned(), "run".to_owned()],
            },
            signal: None,
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn reload_after_restart_returns_saved_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_dir = dir.path().join("cypress/.mcp");
        let result = sample("Tests: 3\nFailing: 1");
        RunCache::new(cache_dir.clone()).save(&result).await.expect("save");

        let restarted = RunCache::new(cache_dir);
        assert_eq!(restarted.load().await.expect("load"), Some(result));
        assert_eq!(restarted.read_logs().await.expect("logs"), "Tests: 3\nFailing: 1");
    }

    #[tokio::test]
    async fn empty_output_skips_log_and_new_run_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = RunCache::new(dir.path().to_path_buf());
        assert_eq!(cache.load().await.expect("empty load"), None);

        cache.save(&sample("")).await.expect("save");
        assert!(!cache.log_path().exists());
        assert_eq!(cache.read_logs().await.expect("logs"), "");

        let mut newer = sample("second");
        newer.cancelled = true;
        newer.exit_code = -1;
        newer.signal = Some(9);
        cache.save(&newer).await.expect("save newer");
        assert_eq!(cache.load().await.expect("load"), Some(newer.clone()));

        let persisted: serde_json::Value = serde_json::from_slice(
            &std::fs::read(cache.result_path()).expect("read"),
        )
        .expect("json");
        assert_eq!(persisted["exitCode"], -1);
        assert_eq!(persisted["cancelled"], true);
        assert_eq!(persisted["signal"], 9);
        assert_eq!(persisted["command"]["binary"], "npx");
    }

    #[tokio::test]
    async fn corrupt_cache_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("last-run.json"), "{ not json").expect("write");
        let err = RunCache::new(dir.path().to_path_buf())
            .load()
            .await
            .expect_err("corrupt");
        assert_eq!(err.code, ToolErrorCode::Io);
    }
}
