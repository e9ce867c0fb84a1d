//! Error taxonomy for the query pipeline.
//!
//! Every failure mode of the pipeline is a distinct variant so callers can
//! react precisely: retry a buffered query through the streaming path on
//! [`Error::OutputTooLarge`], fall back to substring search on
//! [`Error::QuerySyntax`], and show the exact failing invocation for
//! [`Error::CommandFailed`].
//!
//! Errors that originate from a subprocess carry the full rendered command
//! line, so a user can reproduce the failure outside the tool.
//!
//! The type is `Clone`: concurrent queries that share a cache key are
//! coalesced onto one in-flight subprocess, and every waiter receives the
//! same error value. Source errors are therefore stored as strings rather
//! than as `io::Error` values.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::target::OutputFormat;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of the input snippet embedded in a [`Error::Parse`].
const SNIPPET_MAX_LEN: usize = 200;

/// Top-level error type for the query pipeline.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The engine process exited non-zero.
    ///
    /// Never retried automatically; the rendered `command` lets the caller
    /// present the exact failing invocation.
    #[error("command failed with exit code {exit_code}: {command}\n{stderr}")]
    CommandFailed {
        /// Exit code reported by the process.
        exit_code: i32,
        /// Captured stderr output.
        stderr: String,
        /// The full rendered command line that was executed.
        command: String,
    },

    /// Buffered output exceeded the configured byte cap.
    ///
    /// Surfaced instead of truncating silently; callers should retry via
    /// the streaming path.
    #[error("output exceeded {limit} bytes: {command}")]
    OutputTooLarge {
        /// The cap that was exceeded.
        limit: u64,
        /// The full rendered command line that was executed.
        command: String,
    },

    /// The subprocess did not finish within the configured deadline and
    /// was killed.
    #[error("command timed out after {elapsed:?}: {command}")]
    Timeout {
        /// How long the command was allowed to run.
        elapsed: Duration,
        /// The full rendered command line that was executed.
        command: String,
    },

    /// Output was malformed for the declared format.
    #[error("malformed {format} output: {snippet}")]
    Parse {
        /// The format the input was declared to be in.
        format: OutputFormat,
        /// A bounded excerpt of the offending input.
        snippet: String,
    },

    /// A label that cannot be canonicalized.
    ///
    /// Rejected before any subprocess is spawned.
    #[error("invalid label {input:?}: {reason}")]
    InvalidLabel {
        /// The raw input that was rejected.
        input: String,
        /// Why it could not be canonicalized.
        reason: String,
    },

    /// The engine rejected the query expression itself.
    ///
    /// Distinguished from [`Error::CommandFailed`] so `search_targets` can
    /// trigger its text-search fallback.
    #[error("query syntax error: {command}\n{stderr}")]
    QuerySyntax {
        /// Captured stderr output containing the engine's diagnostic.
        stderr: String,
        /// The full rendered command line that was executed.
        command: String,
    },

    /// The engine executable could not be started.
    #[error("failed to spawn {path}: {reason}")]
    Spawn {
        /// Path to the executable that failed to start.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// No engine executable could be located.
    #[error("build engine executable not found (searched: {})", searched.join(", "))]
    EngineNotFound {
        /// Paths and names that were searched.
        searched: Vec<String>,
    },

    /// Transport-level I/O failure while talking to the subprocess.
    #[error("I/O error: {0}")]
    Io(String),

    /// An in-flight coalesced request was abandoned before completion.
    #[error("query was canceled before completion")]
    Canceled,
}

impl Error {
    /// Build a [`Error::Parse`] with a bounded snippet of the offending input.
    pub fn parse(format: OutputFormat, input: &str) -> Self {
        Self::Parse {
            format,
            snippet: snippet_of(input),
        }
    }

    /// Whether this error is the engine rejecting the query expression.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Self::QuerySyntax { .. })
    }

    /// Whether this error is the buffered-output cap being exceeded.
    ///
    /// Callers seeing this should retry through the streaming path.
    pub fn is_too_large(&self) -> bool {
        matches!(self, Self::OutputTooLarge { .. })
    }

    /// The rendered command line, for errors that carry one.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { command, .. }
            | Self::OutputTooLarge { command, .. }
            | Self::Timeout { command, .. }
            | Self::QuerySyntax { command, .. } => Some(command),
            _ => None,
        }
    }
}

/// Truncate `input` to a displayable excerpt, respecting char boundaries.
fn snippet_of(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= SNIPPET_MAX_LEN {
        return trimmed.to_string();
    }
    let mut end = SNIPPET_MAX_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_carries_full_invocation() {
        let error = Error::CommandFailed {
            exit_code: 1,
            stderr: "ERROR: no such package".to_string(),
            command: "bazel query //missing:all --output label".to_string(),
        };
        let rendered = error.to_string();
        assert!(rendered.contains("bazel query //missing:all --output label"));
        assert!(rendered.contains("no such package"));
        assert_eq!(
            error.command(),
            Some("bazel query //missing:all --output label")
        );
    }

    #[test]
    fn parse_snippet_is_bounded() {
        let long = "x".repeat(10_000);
        let error = Error::parse(OutputFormat::Label, &long);
        match error {
            Error::Parse { snippet, .. } => {
                assert!(snippet.len() <= SNIPPET_MAX_LEN + 3);
                assert!(snippet.ends_with("..."));
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn parse_snippet_respects_char_boundaries() {
        let long = "é".repeat(SNIPPET_MAX_LEN);
        // Must not panic on a multi-byte boundary.
        let _ = Error::parse(OutputFormat::Xml, &long);
    }

    #[test]
    fn predicates() {
        let syntax = Error::QuerySyntax {
            stderr: "syntax error".into(),
            command: "bazel query 'deps('".into(),
        };
        assert!(syntax.is_syntax_error());
        assert!(!syntax.is_too_large());

        let too_large = Error::OutputTooLarge {
            limit: 1024,
            command: "bazel query //...".into(),
        };
        assert!(too_large.is_too_large());
        assert!(!too_large.is_syntax_error());
    }

    #[test]
    fn display_formats_are_non_empty() {
        let errors = vec![
            Error::Timeout {
                elapsed: Duration::from_secs(30),
                command: "bazel query //...".into(),
            },
            Error::InvalidLabel {
                input: "a:b:c".into(),
                reason: "more than one ':' separator".into(),
            },
            Error::Spawn {
                path: PathBuf::from("/usr/bin/bazel"),
                reason: "permission denied".into(),
            },
            Error::EngineNotFound {
                searched: vec!["bazel".into(), "bazelisk".into()],
            },
            Error::Io("broken pipe".into()),
            Error::Canceled,
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
