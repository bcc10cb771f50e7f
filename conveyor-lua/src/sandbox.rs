//! Lua sandbox creation
//!
//! Definitions are plain data, so the sandbox only exposes the table, string
//! and math libraries plus the `pipeline` helper module. There is no I/O, no
//! process access and no way to load external code.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox with the `pipeline` module registered
///
/// # Example
/// ```
/// use conveyor_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let kind: String = lua
///     .load(r#"return pipeline.build { name = "compile" }.type"#)
///     .eval()?;
/// assert_eq!(kind, "build");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only TABLE, STRING and MATH; IO, OS, PACKAGE, DEBUG and COROUTINE stay out
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Register the `pipeline` module
///
/// `define` and `stage` return their table unchanged. The action helpers
/// stamp the table with its `type` so the parser knows which adapter it
/// belongs to.
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", define_fn)?;

    let stage_fn = lua.create_function(|_, stage: Table| Ok(stage))?;
    pipeline.set("stage", stage_fn)?;

    for kind in ["source", "build", "deploy", "approval"] {
        let action_fn = lua.create_function(move |_, action: Table| {
            action.set("type", kind)?;
            Ok(action)
        })?;
        pipeline.set(kind, action_fn)?;
    }

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}
