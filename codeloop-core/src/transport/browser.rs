//! Browser transport: drives a chat UI with no API through a WebDriver
//! session (`fantoccini`) when the model is only reachable that way. Typed
//! selectors are injected rather than hard-coded, since every such UI names
//! its input/send/response elements differently.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use std::future::Future;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::{AgentPort, AgentRequest, AgentResponse};
use fantoccini::{ClientBuilder, Locator};

const LOCK_FILE_NAME: &str = ".codeloop-browser.lock";

/// Holds the user-data directory's lock file for the lifetime of the
/// transport's session, so a second orchestrator pointed at the same
/// profile fails fast instead of corrupting it.
struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    fn acquire(user_data_dir: &Path) -> Result<Self, RunError> {
        std::fs::create_dir_all(user_data_dir).map_err(|e| {
            RunError::ResourceInUse(format!(
                "creating browser profile dir {}: {e}",
                user_data_dir.display()
            ))
        })?;
        let path = user_data_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|_| {
                RunError::ResourceInUse(format!(
                    "browser profile {} is already in use (lock file present)",
                    user_data_dir.display()
                ))
            })?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(ProfileLock { path })
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug, Clone)]
pub struct BrowserSelectors {
    pub prompt_input: String,
    pub send_button: String,
    pub latest_response: String,
}

impl Default for BrowserSelectors {
    fn default() -> Self {
        BrowserSelectors {
            prompt_input: "textarea#prompt-textarea".to_string(),
            send_button: "button[data-testid='send-button']".to_string(),
            latest_response: "div[data-message-author-role='assistant']:last-of-type".to_string(),
        }
    }
}

/// How long the extracted response text must stay unchanged across polls
/// before it's accepted as a finished (not still-streaming) reply.
const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(1500);

/// Markers some chat UIs append while a reply is mid-stream; stripped before
/// the text is handed to the patch validator.
const STREAMING_CHROME: &[&str] = &["▌", "Generating…", "Generating...", "Typing…", "Typing..."];

/// Phrase the model is asked to end a reply with when the page truncates a
/// long response into multiple chunks requiring a "continue" follow-up.
const CONTINUE_MARKER: &str = "[continued]";

pub struct BrowserTransport {
    webdriver_url: String,
    page_url: String,
    user_data_dir: PathBuf,
    headless: bool,
    selectors: BrowserSelectors,
    poll_interval: Duration,
    poll_timeout: Duration,
    idle_window: Duration,
}

impl BrowserTransport {
    pub fn new(webdriver_url: String, page_url: String, user_data_dir: PathBuf, headless: bool) -> Self {
        BrowserTransport {
            webdriver_url,
            page_url,
            user_data_dir,
            headless,
            selectors: BrowserSelectors::default(),
            poll_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(120),
            idle_window: DEFAULT_IDLE_WINDOW,
        }
    }

    /// WebDriver `moz:firefoxOptions`/`goog:chromeOptions`-style capability
    /// fragment requesting the held profile directory and headless mode.
    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut caps = serde_json::Map::new();
        let mut chrome_args = vec![format!(
            "--user-data-dir={}",
            self.user_data_dir.display()
        )];
        if self.headless {
            chrome_args.push("--headless=new".to_string());
        }
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": chrome_args }),
        );
        caps
    }

    fn flatten_prompt(turns: &[codeloop_kernel::conversation::Turn]) -> String {
        let mut prompt = turns
            .iter()
            .map(|turn| turn.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        prompt.push_str(&format!(
            "\n\nIf your reply would be truncated, end the visible chunk with {CONTINUE_MARKER} \
             and the next chunk will be requested automatically."
        ));
        prompt
    }

    fn strip_chrome(text: &str) -> String {
        let mut cleaned = text.to_string();
        for marker in STREAMING_CHROME {
            cleaned = cleaned.replace(marker, "");
        }
        cleaned.trim().to_string()
    }
}

impl AgentPort for BrowserTransport {
    fn submit<'a>(
        &'a self,
        request: AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AgentResponse, RunError>> + Send + 'a>> {
        Box::pin(async move {
            let _lock = ProfileLock::acquire(&self.user_data_dir)?;

            let client = ClientBuilder::native()
                .capabilities(self.capabilities())
                .connect(&self.webdriver_url)
                .await
                .map_err(|e| RunError::TransportUIFailure(format!("connecting to webdriver: {e}")))?;

            let result = self.drive(&client, &request).await;

            let _ = client.close().await;
            result
        })
    }
}

impl BrowserTransport {
    async fn send_prompt(&self, client: &fantoccini::Client, prompt: &str) -> Result<(), RunError> {
        let input = client
            .wait()
            .for_element(Locator::Css(&self.selectors.prompt_input))
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("locating prompt input: {e}")))?;

        // Clear any leftover draft text so it isn't prepended to ours.
        input
            .clear()
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("clearing prompt input: {e}")))?;

        input
            .send_keys(prompt)
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("typing prompt: {e}")))?;

        let send = client
            .find(Locator::Css(&self.selectors.send_button))
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("locating send button: {e}")))?;
        send.click()
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("clicking send: {e}")))
    }

    /// Polls the response element until its text has stopped changing for
    /// `idle_window`, so a mid-stream chunk is never mistaken for the full
    /// reply.
    async fn wait_for_idle_reply(&self, client: &fantoccini::Client) -> Result<String, RunError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        let mut last_seen: Option<(String, tokio::time::Instant)> = None;

        loop {
            if let Ok(element) = client.find(Locator::Css(&self.selectors.latest_response)).await {
                if let Ok(text) = element.text().await {
                    let cleaned = Self::strip_chrome(&text);
                    if !cleaned.is_empty() {
                        let now = tokio::time::Instant::now();
                        match &last_seen {
                            Some((prev, since)) if *prev == cleaned => {
                                if now.duration_since(*since) >= self.idle_window {
                                    return Ok(cleaned);
                                }
                            }
                            _ => last_seen = Some((cleaned, now)),
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RunError::TransportUIFailure(
                    "timed out waiting for a response in the page".to_string(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn drive(
        &self,
        client: &fantoccini::Client,
        request: &AgentRequest,
    ) -> Result<AgentResponse, RunError> {
        client
            .goto(&self.page_url)
            .await
            .map_err(|e| RunError::TransportUIFailure(format!("navigating: {e}")))?;

        self.send_prompt(client, &Self::flatten_prompt(&request.turns)).await?;
        let mut reply = self.wait_for_idle_reply(client).await?;

        // The model truncated its reply; ask it to keep going and append
        // each continuation chunk until it stops marking itself truncated.
        while reply.trim_end().ends_with(CONTINUE_MARKER) {
            reply = reply.trim_end().trim_end_matches(CONTINUE_MARKER).trim_end().to_string();
            self.send_prompt(client, "continue").await?;
            let next_chunk = self.wait_for_idle_reply(client).await?;
            reply.push('\n');
            reply.push_str(&next_chunk);
        }

        Ok(AgentResponse { raw_text: reply })
    }
}
