//! Host shims installed into every fresh runtime
//!
//! - `console.{log,info,debug,warn,error}` forwarded to `tracing`
//! - CommonJS-style `require(name)` over a host [`ModuleRegistry`]

use rquickjs::prelude::{Coerced, Rest};
use rquickjs::{Ctx, Function, Object};
use std::collections::HashMap;
use std::sync::Arc;

/// Host-provided modules that scripts can `require`.
///
/// Filled before the pool is built and shared read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<String, String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `name`. Returns the source it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Option<String> {
        self.modules.insert(name.into(), source.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

pub(crate) fn install(ctx: &Ctx<'_>, modules: Arc<ModuleRegistry>) -> rquickjs::Result<()> {
    install_console(ctx)?;
    install_require(ctx, modules)
}

#[derive(Debug, Clone, Copy)]
enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

fn install_console(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    console.set("log", console_fn(ctx, ConsoleLevel::Info)?)?;
    console.set("info", console_fn(ctx, ConsoleLevel::Info)?)?;
    console.set("debug", console_fn(ctx, ConsoleLevel::Debug)?)?;
    console.set("warn", console_fn(ctx, ConsoleLevel::Warn)?)?;
    console.set("error", console_fn(ctx, ConsoleLevel::Error)?)?;
    ctx.globals().set("console", console)
}

fn console_fn<'js>(ctx: &Ctx<'js>, level: ConsoleLevel) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        let line = args
            .0
            .into_iter()
            .map(|arg| arg.0)
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            ConsoleLevel::Debug => tracing::debug!(target: "alfred_script::console", "{line}"),
            ConsoleLevel::Info => tracing::info!(target: "alfred_script::console", "{line}"),
            ConsoleLevel::Warn => tracing::warn!(target: "alfred_script::console", "{line}"),
            ConsoleLevel::Error => tracing::error!(target: "alfred_script::console", "{line}"),
        }
    })
}

// Modules run once per runtime and are cached by name.
const REQUIRE_BOOTSTRAP: &str = r#"
(function (global, load) {
    const cache = Object.create(null);
    global.require = function require(name) {
        if (name in cache) {
            return cache[name].exports;
        }
        const source = load(name);
        if (source === undefined) {
            throw new Error("Cannot find module '" + name + "'");
        }
        const module = { exports: {} };
        cache[name] = module;
        const body = new Function("module", "exports", "require", source);
        body(module, module.exports, global.require);
        return module.exports;
    };
})
"#;

fn install_require(ctx: &Ctx<'_>, modules: Arc<ModuleRegistry>) -> rquickjs::Result<()> {
    let installer: Function = ctx.eval(REQUIRE_BOOTSTRAP)?;
    let load = Function::new(ctx.clone(), move |name: String| {
        modules.get(&name).map(str::to_owned)
    })?;
    installer.call::<_, ()>((ctx.globals(), load))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptRuntime;
    use serde_json::json;

    fn runtime_with(modules: ModuleRegistry) -> ScriptRuntime {
        ScriptRuntime::new(Arc::new(modules)).unwrap()
    }

    #[test]
    fn test_registry() {
        let mut modules = ModuleRegistry::new();
        assert!(modules.is_empty());
        assert!(modules.register("a", "1").is_none());
        assert_eq!(modules.register("a", "2").as_deref(), Some("1"));
        assert_eq!(modules.get("a"), Some("2"));
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn test_console_is_callable() {
        let rt = runtime_with(ModuleRegistry::new());
        let source = "console.log('hello', 1, {a: 1}); console.warn(); console.error('x');";
        assert!(!rt.defines(source, "alfred").unwrap());
    }

    #[test]
    fn test_require_loads_registered_module_once() {
        let mut modules = ModuleRegistry::new();
        modules.register(
            "counter",
            "let n = 0; module.exports = { next: function () { n += 1; return n; } };",
        );
        let rt = runtime_with(modules);
        let source = "function run() { return require('counter').next(); }";
        assert_eq!(rt.call_json(source, "run", &[]).unwrap(), json!(1));
        // The module stays cached in the runtime across evaluations.
        assert_eq!(rt.call_json(source, "run", &[]).unwrap(), json!(2));
    }

    #[test]
    fn test_require_unknown_module_throws() {
        let rt = runtime_with(ModuleRegistry::new());
        let err = rt.defines("require('nope');", "alfred").unwrap_err();
        assert!(err.to_string().contains("Cannot find module 'nope'"));
    }
}
