//! Hard defaults for every setting, used as the base layer before repo
//! config, environment, and CLI flags are merged on top.

pub const DEFAULT_MAX_ITERATIONS: u32 = 40;
pub const DEFAULT_MAX_FIX_ATTEMPTS_PER_STEP: u32 = 3;
pub const DEFAULT_CONVERSATION_WINDOW_PAIRS: usize = 8;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_COMMAND_TAIL_CAP_BYTES: usize = 8192;
pub const DEFAULT_HTTP_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "pretty";
/// Daily-rotated log files kept on disk before the oldest is deleted.
pub const DEFAULT_LOG_BACKLOG_COUNT: usize = 7;
pub const CONFIG_FILE_NAME: &str = "codeloop.toml";
/// Subdirectory of the repo's state dir holding the browser transport's
/// WebDriver profile, when one isn't configured explicitly.
pub const DEFAULT_BROWSER_USER_DATA_SUBDIR: &str = "browser-profile";

/// Per-model-call deadline, distinct from `command_timeout_secs` which
/// bounds the verification command instead.
pub const DEFAULT_API_CALL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_WALL_CLOCK_CEILING_SECS: u64 = 60;
