//! Layer sources: repo-local `codeloop.toml`, `CODELOOP_*` environment
//! variables, and CLI overrides — each turned into a `serde_json::Value`
//! fragment, looked up with the same path-based helpers regardless of
//! where the value ultimately came from.

use std::path::Path;

use codeloop_kernel::RunError;

pub(super) fn value_at_path<'a>(
    value: &'a serde_json::Value,
    path: &[&str],
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path {
        match current {
            serde_json::Value::Object(map) => current = map.get(*segment)?,
            _ => return None,
        }
    }
    Some(current)
}

pub(super) fn find_string(value: &serde_json::Value, paths: &[&[&str]]) -> Option<String> {
    for path in paths {
        if let Some(serde_json::Value::String(s)) = value_at_path(value, path) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

pub(super) fn find_u64(value: &serde_json::Value, paths: &[&[&str]]) -> Option<u64> {
    for path in paths {
        if let Some(v) = value_at_path(value, path) {
            if let Some(n) = v.as_u64() {
                return Some(n);
            }
        }
    }
    None
}

pub(super) fn find_bool(value: &serde_json::Value, paths: &[&[&str]]) -> Option<bool> {
    for path in paths {
        if let Some(v) = value_at_path(value, path) {
            if let Some(b) = v.as_bool() {
                return Some(b);
            }
        }
    }
    None
}

/// Reads `codeloop.toml` from the repo root, if present, and returns it as
/// a JSON value so it can be merged with the other layers uniformly.
pub(super) fn load_repo_file(repo_root: &Path) -> Result<serde_json::Value, RunError> {
    let path = repo_root.join(super::defaults::CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| RunError::ConfigError(format!("reading {}: {e}", path.display())))?;
    let toml_value: toml::Value = toml::from_str(&raw)
        .map_err(|e| RunError::ConfigError(format!("parsing {}: {e}", path.display())))?;
    serde_json::to_value(toml_value)
        .map_err(|e| RunError::ConfigError(format!("converting {}: {e}", path.display())))
}

/// Reads the `CODELOOP_*` environment variables this crate recognizes into
/// the same nested-object shape a TOML file would produce, so the merge
/// logic doesn't need to know where a value came from.
pub(super) fn load_env() -> serde_json::Value {
    let mut root = serde_json::Map::new();

    let mut transport = serde_json::Map::new();
    if let Ok(v) = std::env::var("CODELOOP_TRANSPORT_ENDPOINT") {
        transport.insert("endpoint".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_TRANSPORT_API_KEY") {
        transport.insert("api_key".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_MODEL") {
        transport.insert("model".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_BROWSER_URL") {
        transport.insert("browser_url".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_BROWSER_PAGE_URL") {
        transport.insert("browser_page_url".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_BROWSER_USER_DATA_DIR") {
        transport.insert(
            "browser_user_data_dir".to_string(),
            serde_json::Value::String(v),
        );
    }
    if let Ok(v) = std::env::var("CODELOOP_BROWSER_HEADLESS") {
        if let Ok(b) = v.parse::<bool>() {
            transport.insert("browser_headless".to_string(), serde_json::json!(b));
        }
    }
    if !transport.is_empty() {
        root.insert("transport".to_string(), serde_json::Value::Object(transport));
    }

    if let Ok(v) = std::env::var("CODELOOP_MAX_ITERATIONS") {
        if let Ok(n) = v.parse::<u64>() {
            root.insert("max_iterations".to_string(), serde_json::json!(n));
        }
    }
    if let Ok(v) = std::env::var("CODELOOP_LOG_LEVEL") {
        root.insert("log_level".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_LOG_FORMAT") {
        root.insert("log_format".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_LOG_DIR") {
        root.insert("log_dir".to_string(), serde_json::Value::String(v));
    }
    if let Ok(v) = std::env::var("CODELOOP_LOG_BACKLOG") {
        if let Ok(n) = v.parse::<u64>() {
            root.insert("log_backlog_count".to_string(), serde_json::json!(n));
        }
    }
    if let Ok(v) = std::env::var("CODELOOP_API_TIMEOUT_SECS") {
        if let Ok(n) = v.parse::<u64>() {
            root.insert("api_call_timeout_secs".to_string(), serde_json::json!(n));
        }
    }

    let mut retry = serde_json::Map::new();
    if let Ok(v) = std::env::var("CODELOOP_MAX_RETRIES") {
        if let Ok(n) = v.parse::<u64>() {
            retry.insert("max_retries".to_string(), serde_json::json!(n));
        }
    }
    if let Ok(v) = std::env::var("CODELOOP_RETRY_CEILING_SECS") {
        if let Ok(n) = v.parse::<u64>() {
            retry.insert("wall_clock_ceiling_secs".to_string(), serde_json::json!(n));
        }
    }
    if !retry.is_empty() {
        root.insert("retry".to_string(), serde_json::Value::Object(retry));
    }

    serde_json::Value::Object(root)
}
