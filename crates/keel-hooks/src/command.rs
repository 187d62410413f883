//! Command hook invocation.
//!
//! A command hook is an isolated subprocess: payload JSON on stdin, verdict
//! JSON on stdout. The exit code carries the coarse answer:
//!
//! - `0` — proceed; stdout may refine the verdict (rewrite, message), and
//!   an empty stdout is an implicit proceed.
//! - `2` — block; stderr is the diagnostic surfaced to the model and user.
//! - anything else (including signal death) — a non-blocking warning.
//!
//! Every invocation runs under a hard deadline; an overrun kills the child
//! and surfaces as a timeout error, which the dispatcher records as a
//! warning.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::HookError;
use crate::types::Verdict;

/// Exit code a hook uses to veto the operation.
pub const BLOCK_EXIT_CODE: i32 = 2;

/// What one invocation produced, before dispatcher policy is applied.
#[derive(Debug)]
pub(crate) enum Invocation {
    /// A structured answer (proceed, block, rewrite).
    Verdict(Verdict),
    /// The hook misbehaved; carry on with a warning.
    Warning(String),
}

/// Run one command hook to completion under a deadline.
pub(crate) async fn invoke(
    name: &str,
    program: &str,
    args: &[String],
    payload_json: &[u8],
    timeout_ms: u64,
) -> Result<Invocation, HookError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| HookError::Process {
            name: name.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A hook that exits without reading stdin closes the pipe early;
        // that is its business, not a dispatch failure.
        let _ = stdin.write_all(payload_json).await;
        let _ = stdin.shutdown().await;
    }

    let waited = timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await;
    let output = match waited {
        Ok(result) => result.map_err(|source| HookError::Process {
            name: name.to_string(),
            source,
        })?,
        Err(_elapsed) => {
            // Dropping the in-flight wait kills the child (kill_on_drop).
            return Err(HookError::Timeout {
                name: name.to_string(),
                timeout_ms,
            });
        }
    };

    let code = output.status.code();
    debug!(hook = name, code, "Command hook exited");

    match code {
        Some(0) => parse_verdict(name, &output.stdout).map(Invocation::Verdict),
        Some(BLOCK_EXIT_CODE) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("hook '{name}' blocked the operation")
            } else {
                stderr
            };
            Ok(Invocation::Verdict(Verdict::block(message)))
        }
        other => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = match other {
                Some(code) if stderr.is_empty() => {
                    format!("hook '{name}' exited with code {code}")
                }
                Some(code) => format!("hook '{name}' exited with code {code}: {stderr}"),
                None => format!("hook '{name}' was killed by a signal"),
            };
            Ok(Invocation::Warning(message))
        }
    }
}

/// Parse a zero-exit hook's stdout into a verdict.
///
/// Empty stdout means implicit proceed.
fn parse_verdict(name: &str, stdout: &[u8]) -> Result<Verdict, HookError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Verdict::default());
    }
    serde_json::from_str(trimmed).map_err(|source| HookError::Verdict {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_empty_stdout_is_implicit_proceed() {
        let result = invoke("t", "/bin/sh", &sh("exit 0"), b"{}", 5_000)
            .await
            .unwrap();
        assert_matches!(result, Invocation::Verdict(v) if !v.is_block());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_stdout_refines_verdict() {
        let script = r#"cat > /dev/null; echo '{"proceed": true, "message": "ok"}'"#;
        let result = invoke("t", "/bin/sh", &sh(script), b"{}", 5_000)
            .await
            .unwrap();
        assert_matches!(result, Invocation::Verdict(v) if v.message.as_deref() == Some("ok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_two_blocks_with_stderr_diagnostic() {
        let result = invoke("t", "/bin/sh", &sh("echo refused >&2; exit 2"), b"{}", 5_000)
            .await
            .unwrap();
        assert_matches!(result, Invocation::Verdict(v) => {
            assert!(v.is_block());
            assert_eq!(v.message.as_deref(), Some("refused"));
        });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_other_exit_code_is_warning() {
        let result = invoke("t", "/bin/sh", &sh("exit 7"), b"{}", 5_000)
            .await
            .unwrap();
        assert_matches!(result, Invocation::Warning(msg) if msg.contains("code 7"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overrun_is_a_timeout_error() {
        let err = invoke("t", "/bin/sh", &sh("sleep 5"), b"{}", 100)
            .await
            .unwrap_err();
        assert_matches!(err, HookError::Timeout { timeout_ms: 100, .. });
    }

    #[tokio::test]
    async fn test_missing_program_is_a_process_error() {
        let err = invoke("t", "/nonexistent/keel-hook", &[], b"{}", 5_000)
            .await
            .unwrap_err();
        assert_matches!(err, HookError::Process { .. });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_stdout_is_a_verdict_error() {
        let result = invoke("t", "/bin/sh", &sh("echo not-json"), b"{}", 5_000).await;
        assert_matches!(result, Err(HookError::Verdict { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_receives_payload_on_stdin() {
        // The hook echoes stdin back as its message field.
        let script = r#"input=$(cat); printf '{"message": "got"}' "#;
        let result = invoke("t", "/bin/sh", &sh(script), b"{\"k\":1}", 5_000)
            .await
            .unwrap();
        assert_matches!(result, Invocation::Verdict(v) if v.message.as_deref() == Some("got"));
    }
}
