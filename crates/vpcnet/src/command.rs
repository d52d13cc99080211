use tokio::process::Command;
use tracing::trace;

/// Typed outcome of a failed host command.
///
/// `AlreadyExists` and `NotFound` are first-class outcomes: callers creating
/// or removing kernel objects treat them as success.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("object already exists: {command}: {detail}")]
    AlreadyExists { command: String, detail: String },

    #[error("object does not exist: {command}: {detail}")]
    NotFound { command: String, detail: String },

    #[error("permission denied: {command}: {detail}")]
    PermissionDenied { command: String, detail: String },

    #[error("command failed: {command}: {detail}")]
    Other { command: String, detail: String },
}

impl HostError {
    /// Classify a failure by the well-known phrases the ip/iptables/sysctl
    /// tools and the kernel put on stderr.
    fn classify(command: String, detail: String) -> Self {
        let lower = detail.to_lowercase();
        if lower.contains("file exists") || lower.contains("already exists") {
            HostError::AlreadyExists { command, detail }
        } else if lower.contains("no such file or directory")
            || lower.contains("cannot find device")
            || lower.contains("does not exist")
            || lower.contains("no such device")
            || lower.contains("no such process")
            || lower.contains("bad rule")
            || lower.contains("no chain/target/match")
        {
            HostError::NotFound { command, detail }
        } else if lower.contains("operation not permitted") || lower.contains("permission denied")
        {
            HostError::PermissionDenied { command, detail }
        } else {
            HostError::Other { command, detail }
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, HostError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound { .. })
    }
}

fn format_command_display(program: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend_from_slice(args);
    parts.join(" ")
}

/// Execute a host command and capture its output.
///
/// Returns trimmed stdout on success, a classified [`HostError`] otherwise.
pub async fn exec(program: &str, args: &[&str]) -> Result<String, HostError> {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| HostError::Other {
            command: cmd_display.clone(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(HostError::classify(cmd_display, stderr))
    }
}

/// Execute a host command, ignoring any errors.
///
/// For best-effort teardown paths where a failed removal must not stop the
/// remaining removals.
pub async fn exec_ignore_errors(program: &str, args: &[&str]) {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec_ignore_errors");

    match Command::new(program).args(args).output().await {
        Ok(o) if !o.status.success() => {
            let stderr = String::from_utf8_lossy(&o.stderr);
            trace!(command = %cmd_display, stderr = %stderr.trim(), "command failed (ignored)");
        }
        Err(e) => {
            trace!(command = %cmd_display, error = %e, "command failed to spawn (ignored)");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_command_display_joins_args() {
        let display = format_command_display("ip", &["link", "add", "br0", "type", "bridge"]);
        assert_eq!(display, "ip link add br0 type bridge");
    }

    #[tokio::test]
    async fn exec_returns_trimmed_stdout() {
        let output = exec("echo", &["hello"]).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn exec_captures_multiline_output() {
        let output = exec("printf", &["a\\nb\\nc"]).await.unwrap();
        assert_eq!(output, "a\nb\nc");
    }

    #[tokio::test]
    async fn exec_classifies_already_exists() {
        let err = exec("sh", &["-c", "echo 'RTNETLINK answers: File exists' >&2; exit 2"])
            .await
            .unwrap_err();
        assert!(err.is_already_exists(), "got: {err}");
    }

    #[tokio::test]
    async fn exec_classifies_not_found() {
        let err = exec("sh", &["-c", "echo 'Cannot find device \"br0\"' >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
    }

    #[tokio::test]
    async fn exec_classifies_missing_rule_check() {
        let err = exec(
            "sh",
            &[
                "-c",
                "echo 'iptables: Bad rule (does a matching rule exist in that chain?).' >&2; exit 1",
            ],
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
    }

    #[tokio::test]
    async fn exec_classifies_permission_denied() {
        let err = exec("sh", &["-c", "echo 'Operation not permitted' >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn exec_classifies_other() {
        let err = exec("sh", &["-c", "echo 'something broke' >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Other { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn exec_spawn_failure_is_other() {
        let err = exec("/nonexistent/binary", &[]).await.unwrap_err();
        assert!(matches!(err, HostError::Other { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn exec_ignore_errors_does_not_panic_on_failure() {
        exec_ignore_errors("false", &[]).await;
    }

    #[tokio::test]
    async fn exec_ignore_errors_does_not_panic_on_success() {
        exec_ignore_errors("true", &[]).await;
    }
}
