use crate::pool::PoolError;
use crate::runtime::EngineError;
use thiserror::Error;

/// What went wrong, without parsing the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingCapability,
    Evaluation,
    Binding,
    Invocation,
    Pool,
}

/// Errors raised while probing or invoking a function file.
///
/// Everything except `MissingCapability` renders as `<file>: <message>`.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("function file {unit} does not define {entry_point}")]
    MissingCapability {
        unit: String,
        entry_point: &'static str,
    },

    #[error("{unit}: {message}")]
    Evaluation { unit: String, message: String },

    #[error("{unit}: {message}")]
    Binding { unit: String, message: String },

    #[error("{unit}: {message}")]
    Invocation { unit: String, message: String },

    #[error("{unit}: {source}")]
    Pool {
        unit: String,
        #[source]
        source: PoolError,
    },
}

impl ScriptError {
    pub(crate) fn from_engine(unit: &str, err: EngineError) -> Self {
        let unit = unit.to_owned();
        match err {
            EngineError::Bootstrap(_) | EngineError::Evaluation(_) => ScriptError::Evaluation {
                unit,
                message: err.to_string(),
            },
            EngineError::Binding(message) => ScriptError::Binding { unit, message },
            EngineError::Invocation(message) => ScriptError::Invocation { unit, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::MissingCapability { .. } => ErrorKind::MissingCapability,
            ScriptError::Evaluation { .. } => ErrorKind::Evaluation,
            ScriptError::Binding { .. } => ErrorKind::Binding,
            ScriptError::Invocation { .. } => ErrorKind::Invocation,
            ScriptError::Pool { .. } => ErrorKind::Pool,
        }
    }

    /// Name of the function file the error belongs to.
    pub fn unit(&self) -> &str {
        match self {
            ScriptError::MissingCapability { unit, .. }
            | ScriptError::Evaluation { unit, .. }
            | ScriptError::Binding { unit, .. }
            | ScriptError::Invocation { unit, .. }
            | ScriptError::Pool { unit, .. } => unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_prefixed_with_unit() {
        let err = ScriptError::from_engine("greet.js", EngineError::Invocation("Error: no".into()));
        assert_eq!(err.to_string(), "greet.js: Error: no");
        assert_eq!(err.kind(), ErrorKind::Invocation);
        assert_eq!(err.unit(), "greet.js");

        let err = ScriptError::from_engine("greet.js", EngineError::Bootstrap("oom".into()));
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert_eq!(err.to_string(), "greet.js: failed to bootstrap runtime: oom");
    }

    #[test]
    fn test_missing_capability_message() {
        let err = ScriptError::MissingCapability {
            unit: "greet.js".into(),
            entry_point: "alfred",
        };
        assert_eq!(err.to_string(), "function file greet.js does not define alfred");
    }
}
