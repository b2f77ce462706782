//! Sandbox error types

use std::time::Duration;
use thiserror::Error;

/// Errors from running or validating user-supplied code
///
/// These are local to a single node: the caller records them on the
/// execution, they never propagate past the dispatching layer.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The code does not parse. Line/column are best-effort, for inline
    /// diagnostics in the editor.
    #[error("syntax error: {message}")]
    Syntax {
        line: Option<u32>,
        column: Option<u32>,
        message: String,
    },

    /// The wall-clock budget was exhausted; partial effects were discarded.
    #[error("execution exceeded the {0:?} time limit")]
    Timeout(Duration),

    /// The chunk never defined the entry function.
    #[error("entry function `{0}` is not defined")]
    EntryNotFound(&'static str),

    /// The entry function returned something other than a dataset.
    #[error("transform must return an array of records, got {0}")]
    WrongReturnType(String),

    /// The code parsed but failed while running.
    #[error("execution failed: {0}")]
    Runtime(String),
}

impl SandboxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }
}

/// Pull a `Line: n, Column: m` location out of a parser message.
pub(crate) fn parse_line_column(text: &str) -> (Option<u32>, Option<u32>) {
    (extract_after(text, "Line: "), extract_after(text, "Column: "))
}

fn extract_after(text: &str, marker: &str) -> Option<u32> {
    let start = text.find(marker)? + marker.len();
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_column() {
        let msg = "sql parser error: Expected an expression, found: EOF at Line: 2, Column: 14";
        assert_eq!(parse_line_column(msg), (Some(2), Some(14)));
        assert_eq!(parse_line_column("no location here"), (None, None));
    }
}
