use super::{IssuedToken, TokenSource};
use crate::Result;
use async_trait::async_trait;
use core::time::Duration;
use ohno::{IntoAppError, bail};
use std::process::{Output, Stdio};
use tokio::process::Command;

const LOG_TARGET: &str = "      auth";

/// Issues tokens by running an external program.
///
/// The organization login is appended as the last argument. The program prints
/// `{"token": "...", "expires_at": "<RFC 3339>"}` on stdout and exits with status 0.
#[derive(Debug, Clone)]
pub struct CommandTokenSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTokenSource {
    /// `command` is the program followed by its leading arguments; `None` when it is empty
    #[must_use]
    pub fn from_command_line(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    async fn run(&self, organization: &str) -> Result<Output> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(organization)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .into_app_err_with(|| format!("could not spawn token command '{}'", self.program))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e).into_app_err_with(|| format!("token command '{}' failed to run", self.program)),
            Err(_) => bail!("token command '{}' timed out after {} seconds", self.program, self.timeout.as_secs()),
        }
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn issue_token(&self, organization: &str) -> Result<IssuedToken> {
        log::debug!(target: LOG_TARGET, "Running '{}' for '{organization}'", self.program);
        let output = self.run(organization).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("token command '{}' failed for '{organization}': {}", self.program, stderr.trim());
        }

        // stdout carries the token, so it never appears in the error
        serde_json::from_slice(&output.stdout)
            .into_app_err_with(|| format!("token command '{}' printed no valid token for '{organization}'", self.program))
    }
}

#[cfg(all(test, unix))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn shell(script: &str, timeout: Duration) -> CommandTokenSource {
        let command = ["sh", "-c", script].map(str::to_string);
        CommandTokenSource::from_command_line(&command, timeout).unwrap()
    }

    #[test]
    fn test_empty_command_line() {
        assert!(CommandTokenSource::from_command_line(&[], Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot spawn processes")]
    async fn test_token_is_read_from_stdout() {
        // `sh -c` binds the appended organization to $0
        let source = shell(
            r#"echo "{\"token\":\"tok-$0\",\"expires_at\":\"2030-01-01T00:00:00Z\"}""#,
            Duration::from_secs(10),
        );

        let issued = source.issue_token("contoso").await.unwrap();
        assert_eq!(issued.token, "tok-contoso");
        assert_eq!(issued.expires_at, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot spawn processes")]
    async fn test_failing_command_reports_stderr() {
        let source = shell("echo installation not found >&2; exit 3", Duration::from_secs(10));
        let err = source.issue_token("contoso").await.unwrap_err().to_string();
        assert!(err.contains("installation not found"), "{err}");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot spawn processes")]
    async fn test_unparseable_output_does_not_echo_it() {
        let source = shell("echo ghs_secret", Duration::from_secs(10));
        let err = source.issue_token("contoso").await.unwrap_err().to_string();
        assert!(err.contains("no valid token"), "{err}");
        assert!(!err.contains("ghs_secret"), "{err}");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot spawn processes")]
    async fn test_slow_command_times_out() {
        let source = shell("sleep 5", Duration::from_millis(100));
        let err = source.issue_token("contoso").await.unwrap_err().to_string();
        assert!(err.contains("timed out"), "{err}");
    }
}
