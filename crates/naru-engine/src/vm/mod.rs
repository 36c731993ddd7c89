//! Naru VM runtime
//!
//! Executes emitted bodies: the instruction interpreter, the value and
//! object model, async state machines and their task plumbing, and the
//! `Program` handle the driver talks to.

pub mod builtins;
pub(crate) mod interp;
pub(crate) mod machine;
pub mod object;
pub mod program;
pub(crate) mod settled;
pub mod task;
pub mod value;

pub use program::Program;
pub use task::{TaskAwaiter, TaskRef};
pub use value::Value;

/// A language-level exception in flight.
///
/// The payload is always a value the user can catch; non-instance thrown
/// values are wrapped into `Error` instances at the throw boundary, so
/// every caught exception carries a `message` property.
#[derive(Debug, Clone)]
pub struct Exception {
    value: Value,
}

impl Exception {
    /// Wrap an already-normalized payload
    pub(crate) fn new(value: Value) -> Self {
        Self { value }
    }

    /// The payload a catch clause binds
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The error message string.
    ///
    /// This is the only part of an exception that crosses into user
    /// data (e.g. the `reason` field of a settled record).
    pub fn message(&self) -> String {
        match &self.value {
            Value::Instance(instance) => match instance.fields.borrow().get("message") {
                Some(Value::String(s)) => s.to_string(),
                Some(other) => other.to_display_string(),
                None => String::new(),
            },
            Value::String(s) => s.to_string(),
            other => other.to_display_string(),
        }
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}
