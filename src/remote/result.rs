//! Remote command result type.

use std::time::Duration;

use crate::error::CourierError;
use crate::Result;

/// Outcome of one remote command.
///
/// `stdout` and `stderr` hold whatever was captured, even when `error`
/// is set, so callers can inspect partial output.
#[derive(Debug, Default)]
pub struct SshResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// First failure of the command, if any.
    pub error: Option<CourierError>,
    /// Time spent running the command.
    pub duration: Duration,
}

impl SshResult {
    /// Result of a call that failed before anything ran.
    pub fn from_error(error: CourierError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Check if the command succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Get stdout as string, trimmed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stdout lines.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    /// Trimmed stdout on success, the error otherwise.
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.stdout.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_error() {
        let result = SshResult::from_error(CourierError::NotConnected);
        assert!(!result.is_ok());
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert!(matches!(result.into_result(), Err(CourierError::NotConnected)));
    }

    #[test]
    fn test_success_trims() {
        let result = SshResult {
            stdout: "active\n".into(),
            ..Default::default()
        };
        assert!(result.is_ok());
        assert_eq!(result.stdout_trimmed(), "active");
        assert_eq!(result.into_result().unwrap(), "active");
    }

    #[test]
    fn test_output_lines() {
        let result = SshResult {
            stdout: "line1\nline2\nline3".into(),
            ..Default::default()
        };
        let lines: Vec<_> = result.stdout_lines().collect();
        assert_eq!(lines, vec!["line1", "line2", "line3"]);
    }

    #[test]
    fn test_partial_output_kept_on_failure() {
        let result = SshResult {
            stdout: "partial".into(),
            stderr: "boom".into(),
            error: Some(CourierError::RemoteExit {
                command: "make".into(),
                code: Some(2),
            }),
            duration: Duration::from_millis(5),
        };
        assert!(!result.is_ok());
        assert_eq!(result.stdout, "partial");
        assert_eq!(result.stderr, "boom");
    }
}
