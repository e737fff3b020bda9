//! Command Runner (C7): runs a verification command under a timeout,
//! killing it if it overruns, and caps the captured output to the last
//! `tail_cap_bytes` so a runaway build log never blows up the next model
//! turn.
//!
//! The command line is handed to `sh -c` rather than split and exec'd
//! directly, so pipes, `&&`, quoting, and glob expansion in a user-supplied
//! verification command work as they would at an interactive shell. stdout
//! and stderr are merged, but are drained concurrently, not sequentially —
//! a command that fills one pipe's OS buffer before the other would
//! otherwise block on write() forever since nothing is reading the other
//! side.
//!
//! On unix the child is spawned as the leader of its own process group, so
//! an overrun build that forked helpers (a test runner, a linker) can be
//! signalled as a whole rather than leaving orphans behind: SIGTERM to the
//! group first, a short grace window for it to exit cooperatively, then
//! SIGKILL.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use std::future::Future;

use codeloop_kernel::error::RunError;
use codeloop_kernel::ports::{CommandOutcome, CommandPort};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// How long the group is given to exit after SIGTERM before SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub struct TokioCommandRunner {
    pub tail_cap_bytes: usize,
}

#[cfg(unix)]
fn prepare_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn prepare_process_group(_cmd: &mut Command) {}

/// Signals the overrun command's whole process group: SIGTERM, a grace
/// window, then SIGKILL if it's still alive. `pid` is the child's own pid,
/// which (since it leads its group) doubles as the group id.
#[cfg(unix)]
async fn kill_process_group(pid: u32, child: &mut tokio::process::Child) {
    let pgid = pid as i32;
    unsafe {
        libc::kill(-pgid, libc::SIGTERM);
    }
    let grace = tokio::time::sleep(KILL_GRACE_PERIOD);
    tokio::select! {
        _ = child.wait() => return,
        _ = grace => {}
    }
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32, child: &mut tokio::process::Child) {
    let _ = child.kill().await;
}

fn cap_tail(bytes: &[u8], cap: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= cap {
        text.into_owned()
    } else {
        let mut start = text.len() - cap;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        text[start..].to_string()
    }
}

impl CommandPort for TokioCommandRunner {
    fn run<'a>(
        &'a self,
        command_line: &'a str,
        cwd: &'a Path,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutcome, RunError>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(command_line)
                .current_dir(cwd)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            prepare_process_group(&mut cmd);
            let mut child = cmd.spawn().map_err(|e| {
                RunError::ConfigError(format!("spawning `{command_line}`: {e}"))
            })?;
            let pid = child.id().unwrap_or(0);

            let mut stdout = child.stdout.take();
            let mut stderr = child.stderr.take();

            let wait_future = async {
                // Both pipes must be drained concurrently: the child can fill
                // either one's OS buffer and block on write() while we're
                // only reading the other, wedging the run until timeout.
                let out_read = async {
                    let mut out_buf = Vec::new();
                    if let Some(mut out) = stdout.take() {
                        let _ = out.read_to_end(&mut out_buf).await;
                    }
                    out_buf
                };
                let err_read = async {
                    let mut err_buf = Vec::new();
                    if let Some(mut err) = stderr.take() {
                        let _ = err.read_to_end(&mut err_buf).await;
                    }
                    err_buf
                };
                let (out_buf, err_buf) = tokio::join!(out_read, err_read);
                let status = child.wait().await;
                (status, out_buf, err_buf)
            };

            match tokio::time::timeout(timeout, wait_future).await {
                Ok((status, out_buf, err_buf)) => {
                    let status = status.map_err(|e| {
                        RunError::ConfigError(format!("waiting on `{command_line}`: {e}"))
                    })?;
                    let mut combined = out_buf;
                    combined.extend_from_slice(&err_buf);
                    let tail = cap_tail(&combined, self.tail_cap_bytes);
                    Ok(CommandOutcome {
                        exit_code: status.code(),
                        tail,
                        succeeded: status.success(),
                    })
                }
                Err(_) => {
                    kill_process_group(pid, &mut child).await;
                    Err(RunError::CommandTimeout(timeout))
                }
            }
        })
    }
}
