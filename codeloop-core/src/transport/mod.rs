//! Transport (C6): the two ways a run can reach the model — an
//! OpenAI-compatible HTTP chat-completions endpoint, or a browser session
//! driven through WebDriver for UIs with no API. Both implement
//! `AgentPort`, so the orchestrator never branches on which one is active.

pub mod browser;
pub mod http;
pub mod retry;

pub use browser::BrowserTransport;
pub use http::HttpTransport;
pub use retry::{RetryPolicy, RetryingAgent};

/// The tool name the model must call with its patch envelope as arguments;
/// any other shape in the reply is a protocol violation.
pub const SUBMIT_PATCH_TOOL: &str = "submit_patch";
