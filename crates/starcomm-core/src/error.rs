//! Error taxonomy for invocations and container decoding

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running a Starlink application
#[derive(Error, Debug)]
pub enum StarError {
    #[error("command {command} does not exist; perhaps you have mistyped it?")]
    CommandNotFound { command: String },

    #[error(
        "Starlink error occurred during command:\n{command} {args:?}\n\
         exit status: {status}\n\
         Starlink writes its error messages to stdout; stdout and stderr are appended below.\n\
         {stdout}\n{stderr}"
    )]
    ExecutionFailed {
        command: String,
        args: Vec<String>,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("command {command} timed out after {}s and was killed", .timeout.as_secs_f64())]
    TimedOut {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl StarError {
    /// Captured stdout of the failed command, if there was one
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { stdout, .. } | Self::TimedOut { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

/// Errors raised while reading an HDS container
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed container {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("could not trace {path}: {message}")]
    Trace { path: PathBuf, message: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_message_carries_both_streams() {
        let err = StarError::ExecutionFailed {
            command: "/star/bin/kappa/stats".to_string(),
            args: vec!["ndf=m31".to_string()],
            status: "1".to_string(),
            stdout: "!! No such NDF".to_string(),
            stderr: "warning".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/star/bin/kappa/stats"));
        assert!(msg.contains("ndf=m31"));
        assert!(msg.contains("!! No such NDF"));
        assert!(msg.contains("warning"));
        assert!(msg.contains("exit status: 1"));
        assert_eq!(err.stdout(), Some("!! No such NDF"));
    }

    #[test]
    fn test_command_not_found_suggests_typo() {
        let err = StarError::CommandNotFound {
            command: "/star/bin/kappa/stast".to_string(),
        };
        assert!(err.to_string().contains("mistyped"));
        assert!(err.stdout().is_none());
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let err: StarError = DecodeError::malformed("/tmp/x.sdf", "bad shape").into();
        assert_eq!(err.to_string(), "malformed container /tmp/x.sdf: bad shape");
    }
}
