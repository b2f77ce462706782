//! Script-mode execution
//!
//! Loads a user chunk into a restricted VM, calls its `transform(rows)`
//! entry function with a copy of the dataset and decodes the returned table
//! back into records.
//!
//! The wall-clock bound is enforced from inside the VM: an instruction-count
//! hook raises a deadline error once the budget is spent, so even a tight
//! `while true do end` unwinds promptly. The call runs on a blocking worker
//! joined under `tokio::time::timeout` as an outer backstop, and the VM is
//! dropped on every exit path.

use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use std::time::{Duration, Instant};
use tracing::debug;

use pipewright_core::domain::dataset::{Dataset, Row};

use crate::error::SandboxError;
use crate::vm;

/// Name of the fixed-signature entry function a script must define.
pub const ENTRY_FUNCTION: &str = "transform";

/// How many VM instructions run between deadline checks.
const HOOK_GRANULARITY: u32 = 10_000;

/// Extra join time granted on top of the budget before the worker is
/// abandoned; the in-VM hook normally fires well before this.
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Marker raised by the deadline hook, recognized when mapping errors.
const DEADLINE_MESSAGE: &str = "transform deadline exceeded";

/// Run `code` against a private copy of `input` under `budget`.
pub async fn run_script(
    code: &str,
    input: &Dataset,
    budget: Duration,
) -> Result<Dataset, SandboxError> {
    let code = code.to_string();
    let input = input.clone();

    let worker = tokio::task::spawn_blocking(move || execute_blocking(&code, input, budget));

    match tokio::time::timeout(budget + JOIN_GRACE, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(SandboxError::Runtime(format!(
            "sandbox worker failed: {join_err}"
        ))),
        Err(_) => Err(SandboxError::Timeout(budget)),
    }
}

fn execute_blocking(
    code: &str,
    input: Dataset,
    budget: Duration,
) -> Result<Dataset, SandboxError> {
    let lua = vm::restricted().map_err(|e| SandboxError::Runtime(e.to_string()))?;
    arm_deadline(&lua, budget);

    lua.load(code)
        .set_name(ENTRY_FUNCTION)
        .exec()
        .map_err(|e| map_lua_error(e, budget))?;

    let entry: mlua::Value = lua
        .globals()
        .get(ENTRY_FUNCTION)
        .map_err(|e| map_lua_error(e, budget))?;
    let mlua::Value::Function(transform) = entry else {
        return Err(SandboxError::EntryNotFound(ENTRY_FUNCTION));
    };

    let rows = lua
        .to_value(&input.rows)
        .map_err(|e| map_lua_error(e, budget))?;
    debug!(rows = input.len(), "invoking transform entry function");

    let result: mlua::Value = transform
        .call(rows)
        .map_err(|e| map_lua_error(e, budget))?;

    decode_rows(&lua, result)
}

fn arm_deadline(lua: &Lua, budget: Duration) {
    let started = Instant::now();
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_GRANULARITY),
        move |_lua, _debug| {
            if started.elapsed() >= budget {
                Err(mlua::Error::RuntimeError(DEADLINE_MESSAGE.to_string()))
            } else {
                Ok(VmState::Continue)
            }
        },
    );
}

fn decode_rows(lua: &Lua, value: mlua::Value) -> Result<Dataset, SandboxError> {
    match value {
        mlua::Value::Table(ref table) if table.raw_len() == 0 => {
            // `{}` is a legal empty dataset; a map-shaped table is not.
            let has_entries = table
                .clone()
                .pairs::<mlua::Value, mlua::Value>()
                .next()
                .is_some();
            if has_entries {
                Err(SandboxError::WrongReturnType("a keyed table".to_string()))
            } else {
                Ok(Dataset::default())
            }
        }
        mlua::Value::Table(_) => lua
            .from_value::<Vec<Row>>(value)
            .map(Dataset::new)
            .map_err(|_| SandboxError::WrongReturnType("a malformed table".to_string())),
        other => Err(SandboxError::WrongReturnType(
            other.type_name().to_string(),
        )),
    }
}

fn map_lua_error(err: mlua::Error, budget: Duration) -> SandboxError {
    if is_deadline(&err) {
        return SandboxError::Timeout(budget);
    }
    match err {
        mlua::Error::SyntaxError { message, .. } => syntax_from_lua_message(&message),
        other => SandboxError::Runtime(other.to_string()),
    }
}

fn is_deadline(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::CallbackError { cause, .. } => is_deadline(cause.as_ref()),
        mlua::Error::RuntimeError(message) => message.contains(DEADLINE_MESSAGE),
        other => other.to_string().contains(DEADLINE_MESSAGE),
    }
}

/// Lua reports locations as `[string "transform"]:LINE: message`.
pub(crate) fn syntax_from_lua_message(message: &str) -> SandboxError {
    let line = message.find("]:").and_then(|at| {
        let rest = &message[at + 2..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });

    SandboxError::Syntax {
        line,
        column: None,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(values: &[i64]) -> Dataset {
        let rows = values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("value".to_string(), json!(v));
                row
            })
            .collect();
        Dataset::new(rows)
    }

    const DOUBLE: &str = r#"
        function transform(rows)
            local out = {}
            for i, row in ipairs(rows) do
                row.doubled = row.value * 2
                out[i] = row
            end
            return out
        end
    "#;

    #[tokio::test]
    async fn test_transform_maps_rows() {
        let input = dataset(&[1, 2, 3]);
        let output = run_script(DOUBLE, &input, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.len(), 3);
        assert_eq!(output.rows[2].get("doubled").unwrap().as_f64(), Some(6.0));
        // The caller's dataset is untouched.
        assert!(input.rows[0].get("doubled").is_none());
    }

    #[tokio::test]
    async fn test_empty_return_is_empty_dataset() {
        let code = "function transform(rows) return {} end";
        let output = run_script(code, &dataset(&[1]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_return_type() {
        let code = "function transform(rows) return 'nope' end";
        let err = run_script(code, &dataset(&[1]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::WrongReturnType(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_entry_function() {
        let err = run_script("local x = 1", &dataset(&[1]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::EntryNotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let code = "function transform(rows) while true do end end";
        let budget = Duration::from_secs(2);

        let started = Instant::now();
        let err = run_script(code, &dataset(&[1]), budget).await.unwrap_err();

        assert!(err.is_timeout(), "{err:?}");
        // Bounded overhead: well within the join grace window.
        assert!(started.elapsed() < budget + JOIN_GRACE);
    }

    #[tokio::test]
    async fn test_timeout_releases_resources_across_invocations() {
        let code = "function transform(rows) while true do end end";
        let budget = Duration::from_millis(200);

        for _ in 0..3 {
            let err = run_script(code, &dataset(&[1]), budget).await.unwrap_err();
            assert!(err.is_timeout(), "{err:?}");
        }

        // A healthy script still runs after repeated timeouts.
        let ok = run_script(DOUBLE, &dataset(&[4]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok.rows[0].get("doubled").unwrap().as_f64(), Some(8.0));
    }

    #[tokio::test]
    async fn test_no_filesystem_capability() {
        let code = "function transform(rows) return io.open('/etc/passwd') end";
        let err = run_script(code, &dataset(&[1]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)), "{err:?}");
    }
}
