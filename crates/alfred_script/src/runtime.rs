//! Script runtime management
//!
//! One [`ScriptRuntime`] is a QuickJS runtime plus a bootstrapped context
//! (console + `require`). Runtimes are built by [`ScriptRuntimeFactory`] and
//! recycled through the runtime pool, so nothing evaluated here may leave
//! bindings behind: each function file runs inside its own function scope.

use crate::pool::InstanceFactory;
use crate::shims::{self, ModuleRegistry};
use rquickjs::prelude::Rest;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Object, Runtime, Value};
use std::sync::Arc;
use thiserror::Error;

/// Engine-level failures, not yet attributed to a function file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("failed to bootstrap runtime: {0}")]
    Bootstrap(String),

    #[error("{0}")]
    Evaluation(String),

    #[error("{0}")]
    Binding(String),

    #[error("{0}")]
    Invocation(String),
}

/// Script execution context
pub struct ScriptRuntime {
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
    context: Context,
}

impl ScriptRuntime {
    pub fn new(modules: Arc<ModuleRegistry>) -> Result<Self, EngineError> {
        let bootstrap = |err: rquickjs::Error| EngineError::Bootstrap(err.to_string());

        let runtime = Runtime::new().map_err(bootstrap)?;
        let context = Context::full(&runtime).map_err(bootstrap)?;
        context.with(|ctx| {
            shims::install(&ctx, modules)
                .catch(&ctx)
                .map_err(|err| EngineError::Bootstrap(describe(err)))
        })?;

        Ok(Self { runtime, context })
    }

    /// Evaluate `source` in its own scope and report whether it defines
    /// `name` as a function. `name` must be a plain identifier.
    pub fn defines(&self, source: &str, name: &str) -> Result<bool, EngineError> {
        self.context.with(|ctx| {
            let exports = evaluate_unit(&ctx, source, &[name])?;
            let entry = exports
                .get::<_, Value>(name)
                .catch(&ctx)
                .map_err(|err| EngineError::Binding(describe(err)))?;
            Ok(entry.is_function())
        })
    }

    /// Evaluate `source` in its own scope and call the function it defines
    /// as `name`, marshalling arguments and the return value through JSON.
    pub fn call_json(
        &self,
        source: &str,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, EngineError> {
        self.context.with(|ctx| {
            let binding = |err: CaughtError<'_>| EngineError::Binding(describe(err));

            let exports = evaluate_unit(&ctx, source, &[name])?;
            let target = exports.get::<_, Value>(name).catch(&ctx).map_err(binding)?;
            let Some(function) = target.as_function().cloned() else {
                return Err(EngineError::Binding(format!("{name} is not a function")));
            };

            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                let json = serde_json::to_string(arg)
                    .map_err(|err| EngineError::Binding(err.to_string()))?;
                values.push(ctx.json_parse(json).catch(&ctx).map_err(binding)?);
            }

            let result = call(&function, values)
                .catch(&ctx)
                .map_err(|err| EngineError::Invocation(describe(err)))?;

            let json = ctx.json_stringify(result).catch(&ctx).map_err(binding)?;
            match json {
                None => Ok(serde_json::Value::Null),
                Some(json) => {
                    let json = json
                        .to_string()
                        .map_err(|err| EngineError::Binding(err.to_string()))?;
                    serde_json::from_str(&json).map_err(|err| EngineError::Binding(err.to_string()))
                }
            }
        })
    }
}

/// Run `source` as the body of a fresh function and collect `names` from
/// its scope.
///
/// Top-level `const`, `let`, `class` and function declarations stay local
/// to this evaluation, so the runtime can take the same or another file
/// again. The outer `var`s catch undeclared assignments to an entry-point
/// name, which would otherwise land on (and survive in) the global object.
fn evaluate_unit<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    names: &[&str],
) -> Result<Object<'js>, EngineError> {
    let exports = names
        .iter()
        .map(|name| format!("{name}: typeof {name} === 'function' ? {name} : undefined"))
        .collect::<Vec<_>>()
        .join(", ");
    let locals = names.join(", ");
    let wrapped = format!(
        "(function () {{\nvar {locals};\nreturn (function () {{\n{source}\n;\n\
         return {{ {exports} }};\n}})();\n}})()"
    );
    ctx.eval::<Object, _>(wrapped)
        .catch(ctx)
        .map_err(|err| EngineError::Evaluation(describe(err)))
}

fn call<'js>(function: &Function<'js>, args: Vec<Value<'js>>) -> rquickjs::Result<Value<'js>> {
    function.call::<_, Value>((Rest(args),))
}

/// Render a caught engine error the way scripts see it: `Name: message`.
fn describe(err: CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => {
            let message = exception.message().unwrap_or_default();
            match exception.as_object().get::<_, Option<String>>("name") {
                Ok(Some(name)) if !name.is_empty() => format!("{name}: {message}"),
                _ => message,
            }
        }
        CaughtError::Value(value) => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_else(|| format!("uncaught value: {value:?}")),
        CaughtError::Error(err) => err.to_string(),
    }
}

/// Builds bootstrapped runtimes for the pool.
pub struct ScriptRuntimeFactory {
    modules: Arc<ModuleRegistry>,
}

impl ScriptRuntimeFactory {
    pub fn new(modules: Arc<ModuleRegistry>) -> Self {
        Self { modules }
    }
}

impl Default for ScriptRuntimeFactory {
    fn default() -> Self {
        Self::new(Arc::new(ModuleRegistry::new()))
    }
}

impl InstanceFactory for ScriptRuntimeFactory {
    type Instance = ScriptRuntime;
    type Error = EngineError;

    fn create(&self) -> Result<ScriptRuntime, EngineError> {
        ScriptRuntime::new(Arc::clone(&self.modules))
    }
}
