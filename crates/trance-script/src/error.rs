//! Runtime errors raised by the interpreter and builtins

use thiserror::Error;
use trance_test::ScriptError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown name '{0}'")]
    UndefinedVariable(String),

    #[error("unknown function '{0}'")]
    UndefinedFunction(String),

    #[error("'{name}' is not a function ({found})")]
    NotCallable { name: String, found: &'static str },

    #[error("cannot assign to '{0}': declared with let")]
    ImmutableBinding(String),

    #[error("{0}")]
    TypeError(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: String, len: usize },

    #[error("{function} expects {expected}, got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("maximum call depth of {0} exceeded")]
    CallDepth(usize),
}

impl RuntimeError {
    pub fn type_error(message: impl Into<String>) -> Self {
        RuntimeError::TypeError(message.into())
    }
}

/// Located by the interpreter at the statement that raised it
impl From<RuntimeError> for ScriptError {
    fn from(err: RuntimeError) -> Self {
        ScriptError::raised(err.to_string())
    }
}
