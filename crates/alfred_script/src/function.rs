//! Function files
//!
//! A [`ScriptFunction`] wraps the source of one function file and the entry
//! points it defines. Every call borrows a runtime from the shared pool,
//! evaluates the whole source into it again, calls the entry point and hands
//! the runtime back, on success and on every error path.
//!
//! Re-evaluating on each call is deliberate. Pooled runtimes are shared by
//! unrelated files, so the entry point has to be materialized into whatever
//! runtime the pool hands out. The pool saves the bootstrap cost (context,
//! console, `require`), not the parse. Each evaluation runs in its own
//! function scope, so top-level declarations never collide with those of an
//! earlier occupant.

use crate::error::ScriptError;
use crate::pool::PooledInstance;
use crate::runtime::ScriptRuntimeFactory;
use crate::ScriptPool;
use alfred_core::{Helper, Mock, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const FUNC_UPDATE_HELPERS: &str = "updateHelpers";
pub const FUNC_ALFRED: &str = "alfred";

/// One loaded function file.
///
/// Immutable after construction, so it can be shared across worker threads.
pub struct ScriptFunction {
    pool: Arc<ScriptPool>,
    file_name: String,
    source: String,
    has_update_helpers: bool,
    has_alfred: bool,
}

impl ScriptFunction {
    /// Load `source` and record which recognized entry points it defines.
    ///
    /// Fails only when the source itself does not evaluate; a missing entry
    /// point is just recorded.
    pub fn new(
        pool: Arc<ScriptPool>,
        file_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, ScriptError> {
        let mut function = Self {
            pool,
            file_name: file_name.into(),
            source: source.into(),
            has_update_helpers: false,
            has_alfred: false,
        };

        function.has_alfred = function.has_entry_point(FUNC_ALFRED)?;
        function.has_update_helpers = function.has_entry_point(FUNC_UPDATE_HELPERS)?;

        tracing::debug!(
            file = %function.file_name,
            alfred = function.has_alfred,
            update_helpers = function.has_update_helpers,
            "loaded function file"
        );
        Ok(function)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn has_update_helpers(&self) -> bool {
        self.has_update_helpers
    }

    pub fn has_alfred(&self) -> bool {
        self.has_alfred
    }

    /// Run `updateHelpers(helpers)`.
    ///
    /// On error the caller's `helpers` are untouched and remain the fallback.
    pub fn update_helpers(&self, helpers: &[Helper]) -> Result<Vec<Helper>, ScriptError> {
        self.require(self.has_update_helpers, FUNC_UPDATE_HELPERS)?;
        let args = [self.to_json(helpers)?];
        let value = self.invoke(FUNC_UPDATE_HELPERS, &args)?;
        self.from_json(FUNC_UPDATE_HELPERS, value)
    }

    /// Run `alfred(mock, helpers, req, res)` and return the new response.
    ///
    /// On error the caller's `response` is untouched and remains the fallback.
    pub fn alfred(
        &self,
        mock: &Mock,
        helpers: &[Helper],
        request: &Request,
        response: &Response,
    ) -> Result<Response, ScriptError> {
        self.require(self.has_alfred, FUNC_ALFRED)?;
        let args = [
            self.to_json(mock)?,
            self.to_json(helpers)?,
            self.to_json(request)?,
            self.to_json(response)?,
        ];
        let value = self.invoke(FUNC_ALFRED, &args)?;
        self.from_json(FUNC_ALFRED, value)
    }

    /// Evaluate the source in a pooled runtime and report whether `name` is
    /// bound to a function afterwards.
    pub fn has_entry_point(&self, name: &str) -> Result<bool, ScriptError> {
        if !is_identifier(name) {
            return Err(ScriptError::Binding {
                unit: self.file_name.clone(),
                message: format!("'{name}' is not a valid identifier"),
            });
        }

        let runtime = self.acquire()?;
        runtime
            .defines(&self.source, name)
            .map_err(|err| ScriptError::from_engine(&self.file_name, err))
    }

    fn require(&self, defined: bool, entry_point: &'static str) -> Result<(), ScriptError> {
        if defined {
            Ok(())
        } else {
            Err(ScriptError::MissingCapability {
                unit: self.file_name.clone(),
                entry_point,
            })
        }
    }

    fn acquire(&self) -> Result<PooledInstance<'_, ScriptRuntimeFactory>, ScriptError> {
        self.pool.acquire().map_err(|source| ScriptError::Pool {
            unit: self.file_name.clone(),
            source,
        })
    }

    fn invoke(
        &self,
        entry_point: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, ScriptError> {
        let runtime = self.acquire()?;
        runtime
            .call_json(&self.source, entry_point, args)
            .map_err(|err| ScriptError::from_engine(&self.file_name, err))
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<serde_json::Value, ScriptError> {
        serde_json::to_value(value).map_err(|err| ScriptError::Binding {
            unit: self.file_name.clone(),
            message: err.to_string(),
        })
    }

    fn from_json<T: DeserializeOwned>(
        &self,
        entry_point: &str,
        value: serde_json::Value,
    ) -> Result<T, ScriptError> {
        serde_json::from_value(value).map_err(|err| ScriptError::Binding {
            unit: self.file_name.clone(),
            message: format!("{entry_point} returned an unexpected value: {err}"),
        })
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("file_name", &self.file_name)
            .field("has_update_helpers", &self.has_update_helpers)
            .field("has_alfred", &self.has_alfred)
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
