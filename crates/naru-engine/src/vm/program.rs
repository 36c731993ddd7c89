//! The compiled program handle
//!
//! `compile` produces a [`Program`]; the driver runs entry points
//! through it. Shared state (function table, class registry, static
//! field storage) lives behind an `Rc` so parked state machines can
//! re-enter the interpreter from task continuations.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::compiler::code::{ClassId, FnBody, FnId};
use crate::compiler::registry::ClassRegistry;
use crate::vm::interp;
use crate::vm::object::Instance;
use crate::vm::task::TaskRef;
use crate::vm::value::Value;
use crate::vm::Exception;

/// Whether a class's synthetic static constructor has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticInit {
    Pending,
    Running,
    Done,
}

/// Shared runtime state behind a [`Program`]
pub struct VmState {
    /// Emitted bodies; handles index into this table
    pub(crate) functions: Vec<Rc<FnBody>>,
    /// Class metadata; immutable after load
    pub(crate) registry: ClassRegistry,
    /// Top-level function name table
    pub(crate) fn_names: FxHashMap<String, FnId>,
    /// Static field storage, one slot vector per class
    statics: RefCell<Vec<Vec<Value>>>,
    /// Static initializer progress per class
    static_init: RefCell<Vec<StaticInit>>,
    error_class: ClassId,
    type_error_class: ClassId,
}

impl VmState {
    /// Build an error instance of one of the pre-seeded error classes
    fn make_error(&self, class: ClassId, name: &str, message: &str) -> Value {
        let instance = Instance::new(class);
        instance.set_field("name", Value::string(name));
        instance.set_field("message", Value::string(message));
        Value::Instance(Rc::new(instance))
    }

    /// A TypeError exception with the given message
    pub fn type_error(&self, message: &str) -> Exception {
        Exception::new(self.make_error(self.type_error_class, "TypeError", message))
    }

    /// An Error exception with the given message
    pub fn error(&self, message: &str) -> Exception {
        Exception::new(self.make_error(self.error_class, "Error", message))
    }

    /// Normalize a thrown (or rejected) value into an exception.
    ///
    /// Instances pass through; any other value is wrapped into an
    /// `Error` whose message is its string form, so every caught
    /// exception carries `.message`.
    pub fn wrap_thrown(&self, value: Value) -> Exception {
        match value {
            Value::Instance(_) => Exception::new(value),
            other => self.error(&other.to_display_string()),
        }
    }

    /// Read a static field slot
    pub(crate) fn get_static(&self, class: ClassId, slot: u16) -> Value {
        self.statics.borrow()[class][slot as usize].clone()
    }

    /// Write a static field slot
    pub(crate) fn set_static(&self, class: ClassId, slot: u16, value: Value) {
        self.statics.borrow_mut()[class][slot as usize] = value;
    }
}

/// Run a class's synthetic static constructor if it has not run yet.
///
/// Triggered before the first static member access or instance
/// creation of the class. Re-entrant touches while the initializer is
/// running observe the in-progress storage.
pub(crate) fn ensure_static_init(
    state: &Rc<VmState>,
    class: ClassId,
) -> Result<(), Exception> {
    {
        let mut progress = state.static_init.borrow_mut();
        if progress[class] != StaticInit::Pending {
            return Ok(());
        }
        progress[class] = StaticInit::Running;
    }
    let result = match state.registry.get(class).static_init {
        Some(init) => interp::call_function(state, init, Vec::new()).map(|_| ()),
        None => Ok(()),
    };
    state.static_init.borrow_mut()[class] = StaticInit::Done;
    result
}

/// A compiled program, ready to run
pub struct Program {
    state: Rc<VmState>,
}

impl Program {
    /// Assemble a program from the compiler's output tables
    pub(crate) fn new(
        functions: Vec<FnBody>,
        registry: ClassRegistry,
        fn_names: FxHashMap<String, FnId>,
    ) -> Self {
        let statics = registry
            .iter()
            .map(|descriptor| vec![Value::Undefined; descriptor.static_fields.len()])
            .collect();
        let static_init = registry.iter().map(|_| StaticInit::Pending).collect();
        let error_class = registry.id_of("Error").expect("Error class is pre-seeded");
        let type_error_class = registry
            .id_of("TypeError")
            .expect("TypeError class is pre-seeded");

        Self {
            state: Rc::new(VmState {
                functions: functions.into_iter().map(Rc::new).collect(),
                registry,
                fn_names,
                statics: RefCell::new(statics),
                static_init: RefCell::new(static_init),
                error_class,
                type_error_class,
            }),
        }
    }

    /// The program's class registry
    pub fn registry(&self) -> &ClassRegistry {
        &self.state.registry
    }

    /// Build an `Error` exception against this program's registry.
    ///
    /// For drivers that complete external tasks: rejecting with an
    /// exception built here gives awaiting code a catchable value with
    /// the usual `message` property.
    pub fn make_error(&self, message: &str) -> Exception {
        self.state.error(message)
    }

    /// Shared state handle for in-crate unit tests
    #[cfg(test)]
    pub(crate) fn state_for_tests(&self) -> Rc<VmState> {
        Rc::clone(&self.state)
    }

    /// Invoke a top-level function by name.
    ///
    /// A synchronous entry returns its value (or the exception it
    /// threw); an async entry returns its task as a value.
    pub fn invoke(&self, entry: &str, args: Vec<Value>) -> Result<Value, Exception> {
        let func = self
            .state
            .fn_names
            .get(entry)
            .copied()
            .ok_or_else(|| self.state.type_error(&format!("unknown function '{}'", entry)))?;
        interp::call_function(&self.state, func, args)
    }

    /// Invoke an entry point and hand back a task for its outcome.
    ///
    /// An async entry returns its own task; a synchronous entry's
    /// result (or thrown exception) is wrapped in an already-terminal
    /// task.
    pub fn run_async(&self, entry: &str, args: Vec<Value>) -> Result<TaskRef, Exception> {
        if !self.state.fn_names.contains_key(entry) {
            return Err(self.state.type_error(&format!("unknown function '{}'", entry)));
        }
        match self.invoke(entry, args) {
            Ok(Value::Task(task)) => Ok(task),
            Ok(value) => Ok(TaskRef::fulfilled(value)),
            Err(error) => Ok(TaskRef::rejected(error)),
        }
    }
}
