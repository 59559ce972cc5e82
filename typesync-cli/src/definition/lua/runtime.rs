//! Lua runtime for definition scripts
//!
//! Provides a sandboxed Lua environment that evaluates a definition script,
//! exposes the build context to its entry point and parses what it returns.

use anyhow::{Context, Result};
use mlua::{Function, Lua, StdLib, Table, Value};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::definition::types::{
    BuildContext, ContentTypeDefinition, FieldDefinition, ModuleId, ModuleKind, ModuleOutput,
};

/// Memory ceiling for a single definition script
const MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// A sandboxed Lua runtime for executing one definition script
pub struct LuaRuntime {
    lua: Lua,
}

impl LuaRuntime {
    /// Create a new sandboxed Lua runtime
    pub fn new() -> Result<Self> {
        // No io, os, debug or package: scripts only describe data
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )
        .context("Failed to create Lua runtime")?;

        lua.set_memory_limit(MEMORY_LIMIT)?;

        Ok(LuaRuntime { lua })
    }

    /// Evaluate a script and return its entry point
    ///
    /// The chunk must `return` exactly one function.
    pub fn load_entry_point(&self, source: &str, chunk_name: &str) -> Result<Function> {
        let value: Value = self
            .lua
            .load(source)
            .set_name(chunk_name)
            .eval()
            .with_context(|| format!("Failed to evaluate {}", chunk_name))?;

        match value {
            Value::Function(entry) => Ok(entry),
            Value::Nil => anyhow::bail!(
                "{} does not export an entry point (expected `return function(ctx) ... end`)",
                chunk_name
            ),
            other => anyhow::bail!(
                "{} exports a {} instead of an entry point function",
                chunk_name,
                other.type_name()
            ),
        }
    }

    /// Build the `ctx` table handed to the entry point
    ///
    /// Lookups block the current (blocking-pool) thread on the async context,
    /// so this must never be called from a runtime worker thread.
    pub fn context_table(&self, ctx: Arc<dyn BuildContext>, handle: Handle) -> Result<Table> {
        let table = self.lua.create_table()?;

        table.set("config", self.json_to_lua(ctx.config())?)?;

        let module = self.lua.create_table()?;
        module.set("kind", ctx.module_id().kind.as_str())?;
        module.set("name", ctx.module_id().name.as_str())?;
        table.set("module", module)?;

        table.set(
            "resolve_container",
            self.lookup_fn(ctx.clone(), handle.clone(), ModuleKind::Container)?,
        )?;
        table.set(
            "resolve_record",
            self.lookup_fn(ctx, handle, ModuleKind::Record)?,
        )?;

        Ok(table)
    }

    fn lookup_fn(
        &self,
        ctx: Arc<dyn BuildContext>,
        handle: Handle,
        kind: ModuleKind,
    ) -> Result<Function> {
        let function = self.lua.create_function(move |_, name: String| {
            let target = ModuleId::new(kind, name);
            handle
                .block_on(ctx.resolve(&target))
                .map_err(|e| mlua::Error::external(format!("{:#}", e)))
        })?;
        Ok(function)
    }

    /// Load the script, call its entry point and parse the result
    pub fn run_entry_point(
        &self,
        source: &str,
        chunk_name: &str,
        ctx: Arc<dyn BuildContext>,
        handle: Handle,
    ) -> Result<ModuleOutput> {
        let entry = self.load_entry_point(source, chunk_name)?;
        let ctx_table = self.context_table(ctx, handle)?;

        let result: Value = entry
            .call(ctx_table)
            .with_context(|| format!("Entry point of {} failed", chunk_name))?;

        self.parse_output(result)
            .with_context(|| format!("Invalid result from {}", chunk_name))
    }

    /// Parse what an entry point returned
    pub fn parse_output(&self, value: Value) -> Result<ModuleOutput> {
        match value {
            Value::Table(table) => Ok(ModuleOutput::Definition(self.parse_definition(table)?)),
            Value::String(id) => Ok(ModuleOutput::Synced(id.to_str()?.to_string())),
            other => anyhow::bail!(
                "entry point must return a definition table or a remote id string, got {}",
                other.type_name()
            ),
        }
    }

    /// Parse a definition table into a ContentTypeDefinition
    fn parse_definition(&self, table: Table) -> Result<ContentTypeDefinition> {
        let mut definition = ContentTypeDefinition {
            name: table.get::<Option<String>>("name")?,
            api_key: table.get::<Option<String>>("api_key")?,
            ..Default::default()
        };

        if let Some(options) = table.get::<Option<Table>>("options")? {
            definition.options = self.table_to_object(options, "options")?;
        }

        if let Some(fields) = table.get::<Option<Table>>("fields")? {
            let len = fields.raw_len();
            let entries = fields.pairs::<Value, Value>().count();
            if entries != len {
                anyhow::bail!(
                    "'fields' must be a list without holes or named keys ({} entries, length {})",
                    entries,
                    len
                );
            }

            for index in 1..=len {
                let field = match fields.raw_get::<Value>(index)? {
                    Value::Table(field) => field,
                    Value::Nil => anyhow::bail!("fields[{}] is nil; 'fields' must not have holes", index),
                    other => anyhow::bail!("fields[{}] must be a table, got {}", index, other.type_name()),
                };
                definition.fields.push(
                    self.parse_field(field)
                        .with_context(|| format!("Invalid field at fields[{}]", index))?,
                );
            }
        }

        Ok(definition)
    }

    /// Parse a single field table
    fn parse_field(&self, table: Table) -> Result<FieldDefinition> {
        let key: String = table
            .get::<Option<String>>("key")?
            .context("Field must have a 'key'")?;
        let field_type: String = table
            .get::<Option<String>>("type")?
            .with_context(|| format!("Field '{}' must have a 'type'", key))?;

        let mut field = FieldDefinition::new(key, field_type);
        field.label = table.get::<Option<String>>("label")?;
        field.hint = table.get::<Option<String>>("hint")?;
        field.localized = table.get::<Option<bool>>("localized")?.unwrap_or(false);

        if let Some(validators) = table.get::<Option<Table>>("validators")? {
            field.validators = self.table_to_object(validators, "validators")?;
        }

        Ok(field)
    }

    fn table_to_object(
        &self,
        table: Table,
        what: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        match self.lua_to_json(Value::Table(table))? {
            serde_json::Value::Object(map) => Ok(map),
            _ => anyhow::bail!("'{}' must be a table with string keys", what),
        }
    }

    /// Convert JSON value to Lua value
    pub fn json_to_lua(&self, value: &serde_json::Value) -> Result<Value> {
        match value {
            serde_json::Value::Null => Ok(Value::Nil),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Number(f))
                } else {
                    Ok(Value::Nil)
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(self.lua.create_string(s)?)),
            serde_json::Value::Array(arr) => {
                let table = self.lua.create_table()?;
                for (i, item) in arr.iter().enumerate() {
                    table.set(i + 1, self.json_to_lua(item)?)?;
                }
                Ok(Value::Table(table))
            }
            serde_json::Value::Object(obj) => {
                let table = self.lua.create_table()?;
                for (key, val) in obj {
                    table.set(key.as_str(), self.json_to_lua(val)?)?;
                }
                Ok(Value::Table(table))
            }
        }
    }

    /// Convert Lua value to JSON
    pub fn lua_to_json(&self, value: Value) -> Result<serde_json::Value> {
        match value {
            Value::Nil => Ok(serde_json::Value::Null),
            Value::Boolean(b) => Ok(serde_json::Value::Bool(b)),
            Value::Integer(i) => Ok(serde_json::json!(i)),
            Value::Number(n) => Ok(serde_json::json!(n)),
            Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
            Value::Table(t) => {
                let len = t.raw_len();
                if len > 0 {
                    let mut arr = Vec::with_capacity(len);
                    for i in 1..=len {
                        arr.push(self.lua_to_json(t.raw_get::<Value>(i)?)?);
                    }
                    return Ok(serde_json::Value::Array(arr));
                }

                let mut obj = serde_json::Map::new();
                for pair in t.pairs::<Value, Value>() {
                    let (k, v) = pair?;
                    let key = match k {
                        Value::String(s) => s.to_str()?.to_string(),
                        Value::Integer(i) => i.to_string(),
                        _ => continue,
                    };
                    obj.insert(key, self.lua_to_json(v)?);
                }
                // Empty tables read as objects: `required = {}` is the common case
                Ok(serde_json::Value::Object(obj))
            }
            other => anyhow::bail!("Cannot convert Lua {} to JSON", other.type_name()),
        }
    }

    /// Get access to the underlying Lua instance
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}
