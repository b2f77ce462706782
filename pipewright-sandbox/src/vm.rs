//! Restricted Lua VM construction

use mlua::prelude::*;
use mlua::{LuaOptions, StdLib};

/// Base-library globals that can reach code or files outside the chunk.
/// The base library itself is always present, so these are removed one by
/// one after construction.
const BLOCKED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "require", "collectgarbage"];

/// Create a Lua VM with only the pure standard libraries.
///
/// TABLE, STRING and MATH are the full allow-list: no io, no os, no debug.
/// User code has no path to the filesystem, network or process.
pub fn restricted() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    for name in BLOCKED_GLOBALS {
        globals.set(*name, mlua::Value::Nil)?;
    }

    Ok(lua)
}
