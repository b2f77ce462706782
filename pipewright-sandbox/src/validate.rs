//! Validation-only entry points
//!
//! Static syntax checks for both modes, returning the same error shape as
//! execution (`SandboxError::Syntax` with line/column) without running
//! anything. Backs inline editor diagnostics.

use datafusion::sql::parser::DFParser;

use crate::error::{SandboxError, parse_line_column};
use crate::script::syntax_from_lua_message;
use crate::vm;

/// Check a script chunk compiles, without executing it.
pub fn check_script(code: &str) -> Result<(), SandboxError> {
    let lua = vm::restricted().map_err(|e| SandboxError::Runtime(e.to_string()))?;

    // Compiling to a function parses the chunk but runs nothing.
    match lua.load(code).set_name("transform").into_function() {
        Ok(_) => Ok(()),
        Err(mlua::Error::SyntaxError { message, .. }) => Err(syntax_from_lua_message(&message)),
        Err(other) => Err(SandboxError::Runtime(other.to_string())),
    }
}

/// Check a query parses, without planning or executing it.
pub fn check_query(query: &str) -> Result<(), SandboxError> {
    match DFParser::parse_sql(query) {
        Ok(_) => Ok(()),
        Err(err) => {
            let text = err.to_string();
            let (line, column) = parse_line_column(&text);
            Err(SandboxError::Syntax {
                line,
                column,
                message: text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_script_passes() {
        assert!(check_script("function transform(rows) return rows end").is_ok());
    }

    #[test]
    fn test_script_syntax_error_reports_line() {
        let code = "function transform(rows)\n  return rows +\nend";
        let err = check_script(code).unwrap_err();
        match err {
            SandboxError::Syntax { line, message, .. } => {
                assert!(line.is_some(), "location missing in: {message}");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_check_never_executes() {
        // A chunk with side effects at the top level: validation must not
        // trip over them, because nothing runs.
        let code = "error('should never fire') ; function transform(rows) return rows end";
        assert!(check_script(code).is_ok());
    }

    #[test]
    fn test_valid_query_passes() {
        assert!(check_query("SELECT a, count(*) FROM input GROUP BY a").is_ok());
    }

    #[test]
    fn test_query_syntax_error() {
        let err = check_query("SELEC value FRM input").unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }), "{err:?}");
    }
}
