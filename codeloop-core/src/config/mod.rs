//! Layered settings resolution: hard defaults, then the repo-local
//! `codeloop.toml`, then `CODELOOP_*` environment variables, then CLI
//! flags — each layer strictly overriding the one before it.

mod defaults;
mod load;
mod merge;

pub use defaults::DEFAULT_LOG_BACKLOG_COUNT;

use std::path::{Path, PathBuf};
use std::time::Duration;

use codeloop_kernel::RunError;

const MAX_ITERATIONS_PATHS: &[&[&str]] = &[&["max_iterations"]];
const MAX_FIX_ATTEMPTS_PATHS: &[&[&str]] = &[&["max_fix_attempts_per_step"]];
const WINDOW_PAIRS_PATHS: &[&[&str]] = &[&["conversation_window_pairs"]];
const COMMAND_TIMEOUT_PATHS: &[&[&str]] = &[&["command_timeout_secs"]];
const TAIL_CAP_PATHS: &[&[&str]] = &[&["command_tail_cap_bytes"]];
const LOG_LEVEL_PATHS: &[&[&str]] = &[&["log_level"]];
const LOG_FORMAT_PATHS: &[&[&str]] = &[&["log_format"]];
const LOG_DIR_PATHS: &[&[&str]] = &[&["log_dir"]];
const LOG_BACKLOG_PATHS: &[&[&str]] = &[&["log_backlog_count"]];
const TRANSPORT_KIND_PATHS: &[&[&str]] = &[&["transport", "kind"]];
const HTTP_ENDPOINT_PATHS: &[&[&str]] = &[&["transport", "endpoint"]];
const HTTP_API_KEY_PATHS: &[&[&str]] = &[&["transport", "api_key"]];
const MODEL_PATHS: &[&[&str]] = &[&["transport", "model"]];
const BROWSER_URL_PATHS: &[&[&str]] = &[&["transport", "browser_url"]];
const BROWSER_PAGE_URL_PATHS: &[&[&str]] = &[&["transport", "browser_page_url"]];
const BROWSER_USER_DATA_DIR_PATHS: &[&[&str]] = &[&["transport", "browser_user_data_dir"]];
const BROWSER_HEADLESS_PATHS: &[&[&str]] = &[&["transport", "browser_headless"]];
const API_CALL_TIMEOUT_PATHS: &[&[&str]] = &[&["api_call_timeout_secs"]];
const MAX_RETRIES_PATHS: &[&[&str]] = &[&["retry", "max_retries"]];
const RETRY_BASE_DELAY_PATHS: &[&[&str]] = &[&["retry", "base_delay_ms"]];
const RETRY_CEILING_PATHS: &[&[&str]] = &[&["retry", "wall_clock_ceiling_secs"]];

#[derive(Debug, Clone)]
pub enum TransportConfig {
    Http {
        endpoint: String,
        api_key: Option<String>,
        model: String,
    },
    Browser {
        webdriver_url: String,
        page_url: String,
        /// Profile directory the WebDriver session reuses across runs; a
        /// lock file inside it keeps two orchestrators from sharing it.
        user_data_dir: PathBuf,
        headless: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub repo_root: PathBuf,
    pub max_iterations: u32,
    pub max_fix_attempts_per_step: u32,
    pub conversation_window_pairs: usize,
    pub command_timeout: Duration,
    pub command_tail_cap_bytes: usize,
    pub transport: TransportConfig,
    pub log_level: String,
    pub log_format: String,
    pub log_dir: Option<PathBuf>,
    pub log_backlog_count: usize,
    /// Per-model-call deadline; distinct from `command_timeout`.
    pub api_call_timeout: Duration,
    pub retry: crate::transport::RetryPolicy,
}

/// CLI flags, the highest-priority layer. `None` means "not passed on the
/// command line", so the layer beneath shows through.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_iterations: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub transport_kind: Option<String>,
    pub http_endpoint: Option<String>,
    pub model: Option<String>,
    pub browser_url: Option<String>,
    pub browser_page_url: Option<String>,
    pub browser_user_data_dir: Option<String>,
    pub browser_headless: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub api_call_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

impl CliOverrides {
    fn to_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        if let Some(v) = self.max_iterations {
            root.insert("max_iterations".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.command_timeout_secs {
            root.insert("command_timeout_secs".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.log_level {
            root.insert("log_level".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.log_format {
            root.insert("log_format".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.api_call_timeout_secs {
            root.insert("api_call_timeout_secs".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.max_retries {
            root.insert(
                "retry".to_string(),
                serde_json::json!({ "max_retries": v }),
            );
        }

        let mut transport = serde_json::Map::new();
        if let Some(v) = &self.transport_kind {
            transport.insert("kind".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.http_endpoint {
            transport.insert("endpoint".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.model {
            transport.insert("model".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.browser_url {
            transport.insert("browser_url".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.browser_page_url {
            transport.insert("browser_page_url".to_string(), serde_json::json!(v));
        }
        if let Some(v) = &self.browser_user_data_dir {
            transport.insert("browser_user_data_dir".to_string(), serde_json::json!(v));
        }
        if let Some(v) = self.browser_headless {
            transport.insert("browser_headless".to_string(), serde_json::json!(v));
        }
        if !transport.is_empty() {
            root.insert("transport".to_string(), serde_json::Value::Object(transport));
        }

        serde_json::Value::Object(root)
    }
}

fn default_layer() -> serde_json::Value {
    serde_json::json!({
        "max_iterations": defaults::DEFAULT_MAX_ITERATIONS,
        "max_fix_attempts_per_step": defaults::DEFAULT_MAX_FIX_ATTEMPTS_PER_STEP,
        "conversation_window_pairs": defaults::DEFAULT_CONVERSATION_WINDOW_PAIRS,
        "command_timeout_secs": defaults::DEFAULT_COMMAND_TIMEOUT_SECS,
        "command_tail_cap_bytes": defaults::DEFAULT_COMMAND_TAIL_CAP_BYTES,
        "log_level": defaults::DEFAULT_LOG_LEVEL,
        "log_format": defaults::DEFAULT_LOG_FORMAT,
        "log_backlog_count": defaults::DEFAULT_LOG_BACKLOG_COUNT,
        "api_call_timeout_secs": defaults::DEFAULT_API_CALL_TIMEOUT_SECS,
        "retry": {
            "max_retries": defaults::DEFAULT_MAX_RETRIES,
            "base_delay_ms": defaults::DEFAULT_RETRY_BASE_DELAY_MS,
            "wall_clock_ceiling_secs": defaults::DEFAULT_RETRY_WALL_CLOCK_CEILING_SECS,
        },
        "transport": {
            "kind": "http",
            "endpoint": defaults::DEFAULT_HTTP_ENDPOINT,
            "model": defaults::DEFAULT_MODEL,
            "browser_headless": true,
        }
    })
}

/// Resolves the final [`Settings`] by merging, in increasing priority:
/// hard defaults, `codeloop.toml`, `CODELOOP_*` env vars, then CLI flags.
/// `codeloop.toml` is looked up under `repo_root`.
pub fn resolve(repo_root: &Path, cli: &CliOverrides) -> Result<Settings, RunError> {
    resolve_with_config_dir(repo_root, None, cli)
}

/// Same as [`resolve`], but looks up `codeloop.toml` under `config_dir`
/// instead of `repo_root` when `config_dir` is `Some` (`--config-file`).
/// Defaults derived from the repo itself (e.g. the browser transport's
/// profile directory) still key off `repo_root`.
pub fn resolve_with_config_dir(
    repo_root: &Path,
    config_dir: Option<&Path>,
    cli: &CliOverrides,
) -> Result<Settings, RunError> {
    let repo_file_dir = config_dir.unwrap_or(repo_root);
    let merged = merge::merge_layers(default_layer(), load::load_repo_file(repo_file_dir)?);
    let merged = merge::merge_layers(merged, load::load_env());
    let merged = merge::merge_layers(merged, cli.to_json());

    let max_iterations = load::find_u64(&merged, MAX_ITERATIONS_PATHS)
        .ok_or_else(|| RunError::ConfigError("max_iterations missing".to_string()))?
        as u32;
    let max_fix_attempts_per_step = load::find_u64(&merged, MAX_FIX_ATTEMPTS_PATHS)
        .ok_or_else(|| RunError::ConfigError("max_fix_attempts_per_step missing".to_string()))?
        as u32;
    let conversation_window_pairs = load::find_u64(&merged, WINDOW_PAIRS_PATHS)
        .ok_or_else(|| RunError::ConfigError("conversation_window_pairs missing".to_string()))?
        as usize;
    let command_timeout_secs = load::find_u64(&merged, COMMAND_TIMEOUT_PATHS)
        .ok_or_else(|| RunError::ConfigError("command_timeout_secs missing".to_string()))?;
    let command_tail_cap_bytes = load::find_u64(&merged, TAIL_CAP_PATHS)
        .ok_or_else(|| RunError::ConfigError("command_tail_cap_bytes missing".to_string()))?
        as usize;
    let log_level = load::find_string(&merged, LOG_LEVEL_PATHS)
        .unwrap_or_else(|| defaults::DEFAULT_LOG_LEVEL.to_string());
    let log_format = load::find_string(&merged, LOG_FORMAT_PATHS)
        .unwrap_or_else(|| defaults::DEFAULT_LOG_FORMAT.to_string());
    let log_dir = load::find_string(&merged, LOG_DIR_PATHS).map(PathBuf::from);
    let log_backlog_count = load::find_u64(&merged, LOG_BACKLOG_PATHS)
        .unwrap_or(defaults::DEFAULT_LOG_BACKLOG_COUNT as u64) as usize;

    let api_call_timeout_secs = load::find_u64(&merged, API_CALL_TIMEOUT_PATHS)
        .unwrap_or(defaults::DEFAULT_API_CALL_TIMEOUT_SECS);
    let max_retries = load::find_u64(&merged, MAX_RETRIES_PATHS)
        .unwrap_or(defaults::DEFAULT_MAX_RETRIES as u64) as u32;
    let retry_base_delay_ms = load::find_u64(&merged, RETRY_BASE_DELAY_PATHS)
        .unwrap_or(defaults::DEFAULT_RETRY_BASE_DELAY_MS);
    let retry_wall_clock_ceiling_secs = load::find_u64(&merged, RETRY_CEILING_PATHS)
        .unwrap_or(defaults::DEFAULT_RETRY_WALL_CLOCK_CEILING_SECS);

    let transport_kind =
        load::find_string(&merged, TRANSPORT_KIND_PATHS).unwrap_or_else(|| "http".to_string());
    let transport = match transport_kind.as_str() {
        "http" => TransportConfig::Http {
            endpoint: load::find_string(&merged, HTTP_ENDPOINT_PATHS)
                .unwrap_or_else(|| defaults::DEFAULT_HTTP_ENDPOINT.to_string()),
            api_key: load::find_string(&merged, HTTP_API_KEY_PATHS),
            model: load::find_string(&merged, MODEL_PATHS)
                .unwrap_or_else(|| defaults::DEFAULT_MODEL.to_string()),
        },
        "browser" => TransportConfig::Browser {
            webdriver_url: load::find_string(&merged, BROWSER_URL_PATHS).ok_or_else(|| {
                RunError::ConfigError("transport.browser_url required for browser transport".to_string())
            })?,
            page_url: load::find_string(&merged, BROWSER_PAGE_URL_PATHS).ok_or_else(|| {
                RunError::ConfigError(
                    "transport.browser_page_url required for browser transport".to_string(),
                )
            })?,
            user_data_dir: load::find_string(&merged, BROWSER_USER_DATA_DIR_PATHS)
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    repo_root
                        .join(crate::state::STATE_SUBDIR)
                        .join(defaults::DEFAULT_BROWSER_USER_DATA_SUBDIR)
                }),
            headless: load::find_bool(&merged, BROWSER_HEADLESS_PATHS).unwrap_or(true),
        },
        other => {
            return Err(RunError::ConfigError(format!(
                "unknown transport kind `{other}`"
            )));
        }
    };

    Ok(Settings {
        repo_root: repo_root.to_path_buf(),
        max_iterations,
        max_fix_attempts_per_step,
        conversation_window_pairs,
        command_timeout: Duration::from_secs(command_timeout_secs),
        command_tail_cap_bytes,
        transport,
        log_level,
        log_format,
        log_dir,
        log_backlog_count,
        api_call_timeout: Duration::from_secs(api_call_timeout_secs),
        retry: crate::transport::RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(retry_base_delay_ms),
            wall_clock_ceiling: Duration::from_secs(retry_wall_clock_ceiling_secs),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let settings = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(settings.max_iterations, defaults::DEFAULT_MAX_ITERATIONS);
        assert!(matches!(settings.transport, TransportConfig::Http { .. }));
        assert_eq!(
            settings.api_call_timeout,
            Duration::from_secs(defaults::DEFAULT_API_CALL_TIMEOUT_SECS)
        );
        assert_eq!(settings.retry.max_retries, defaults::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn cli_override_sets_api_timeout_and_retry_count() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            api_call_timeout_secs: Some(15),
            max_retries: Some(1),
            ..Default::default()
        };
        let settings = resolve(dir.path(), &cli).unwrap();
        assert_eq!(settings.api_call_timeout, Duration::from_secs(15));
        assert_eq!(settings.retry.max_retries, 1);
    }

    #[test]
    fn cli_override_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            max_iterations: Some(5),
            ..Default::default()
        };
        let settings = resolve(dir.path(), &cli).unwrap();
        assert_eq!(settings.max_iterations, 5);
    }

    #[test]
    fn repo_file_overrides_defaults_and_cli_overrides_repo_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(defaults::CONFIG_FILE_NAME),
            "max_iterations = 7\n",
        )
        .unwrap();
        let settings = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(settings.max_iterations, 7);

        let cli = CliOverrides {
            max_iterations: Some(99),
            ..Default::default()
        };
        let settings = resolve(dir.path(), &cli).unwrap();
        assert_eq!(settings.max_iterations, 99);
    }

    #[test]
    fn browser_transport_requires_url() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            transport_kind: Some("browser".to_string()),
            ..Default::default()
        };
        assert!(resolve(dir.path(), &cli).is_err());
    }

    #[test]
    fn browser_transport_requires_page_url() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            transport_kind: Some("browser".to_string()),
            browser_url: Some("http://localhost:4444".to_string()),
            ..Default::default()
        };
        assert!(resolve(dir.path(), &cli).is_err());
    }

    #[test]
    fn browser_transport_resolves_with_both_urls() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            transport_kind: Some("browser".to_string()),
            browser_url: Some("http://localhost:4444".to_string()),
            browser_page_url: Some("https://chat.example.com".to_string()),
            ..Default::default()
        };
        let settings = resolve(dir.path(), &cli).unwrap();
        match settings.transport {
            TransportConfig::Browser { webdriver_url, page_url, headless, .. } => {
                assert_eq!(webdriver_url, "http://localhost:4444");
                assert_eq!(page_url, "https://chat.example.com");
                assert!(headless);
            }
            _ => panic!("expected browser transport"),
        }
    }

    #[test]
    fn browser_transport_user_data_dir_defaults_under_state_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            transport_kind: Some("browser".to_string()),
            browser_url: Some("http://localhost:4444".to_string()),
            browser_page_url: Some("https://chat.example.com".to_string()),
            ..Default::default()
        };
        let settings = resolve(dir.path(), &cli).unwrap();
        match settings.transport {
            TransportConfig::Browser { user_data_dir, .. } => {
                assert!(user_data_dir.ends_with("browser-profile"));
                assert!(user_data_dir.starts_with(dir.path()));
            }
            _ => panic!("expected browser transport"),
        }
    }

    #[test]
    fn log_backlog_count_defaults_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let settings = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(settings.log_backlog_count, defaults::DEFAULT_LOG_BACKLOG_COUNT);

        std::fs::write(
            dir.path().join(defaults::CONFIG_FILE_NAME),
            "log_backlog_count = 3\n",
        )
        .unwrap();
        let settings = resolve(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(settings.log_backlog_count, 3);
    }
}
