//! Script host error types.

use crate::object::ObjectRef;

/// Errors raised by a [`ScriptHost`](crate::ScriptHost) or by script code.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The object handle no longer resolves.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectRef),

    /// The named function is not defined on the object.
    #[error("function {function} not found on {object}")]
    FunctionNotFound {
        /// Target object.
        object: ObjectRef,
        /// Function name.
        function: String,
    },

    /// No constructor is known for the class name.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// A bytecode blob could not be loaded.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// Script code failed while running.
    #[error("runtime error in {function}: {message}")]
    Runtime {
        /// Function that failed.
        function: String,
        /// Engine-provided message.
        message: String,
    },

    /// Script code panicked inside a native callback.
    #[error("script panicked: {0}")]
    Panic(String),
}

impl ScriptError {
    /// Create a runtime error.
    #[must_use]
    pub fn runtime(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Short classification string for log fields.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::ObjectNotFound(_) => "object_not_found",
            Self::FunctionNotFound { .. } => "function_not_found",
            Self::UnknownClass(_) => "unknown_class",
            Self::InvalidBytecode(_) => "invalid_bytecode",
            Self::Runtime { .. } => "runtime",
            Self::Panic(_) => "panic",
        }
    }
}
