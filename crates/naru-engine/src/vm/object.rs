//! Object model: instances, closures, bound methods

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::compiler::code::{ClassId, FnId};
use crate::vm::builtins::BuiltinMethod;
use crate::vm::value::Value;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn generate_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A class instance.
///
/// Instance fields live only in the dynamic property map; the class
/// descriptor never stores per-instance data. The map is allocated
/// before the constructor chain runs, so a superclass constructor
/// observes writes through the same storage the subclass sees.
#[derive(Debug)]
pub struct Instance {
    /// Unique object ID (diagnostics)
    pub object_id: u64,
    /// Class this is an instance of
    pub class_id: ClassId,
    /// Dynamic property storage; insertion order is preserved
    pub fields: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    /// Allocate an instance with an empty field map
    pub fn new(class_id: ClassId) -> Self {
        Self {
            object_id: generate_object_id(),
            class_id,
            fields: RefCell::new(IndexMap::new()),
        }
    }

    /// Read a field, if present
    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Write a field, creating it on first write
    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }
}

/// A closure: a function body plus its captured values.
///
/// Captures are taken by value when the closure is constructed.
#[derive(Debug)]
pub struct ClosureData {
    /// Body to run on call
    pub func: FnId,
    /// Captured values, in capture order
    pub captures: Vec<Value>,
}

/// How a bound method dispatches when called
#[derive(Debug)]
pub enum MethodTarget {
    /// An emitted body
    Compiled(FnId),
    /// A builtin
    Builtin(&'static BuiltinMethod),
}

/// A method bound to its receiver, created when a method name is read
/// off an object as a value rather than called
#[derive(Debug)]
pub struct BoundMethod {
    /// Receiver passed as slot 0 on call
    pub receiver: Value,
    /// Dispatch target, resolved at bind time
    pub target: MethodTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_ids_are_unique() {
        let a = Instance::new(0);
        let b = Instance::new(0);
        assert_ne!(a.object_id, b.object_id);
    }

    #[test]
    fn test_field_map_starts_empty() {
        let instance = Instance::new(3);
        assert_eq!(instance.class_id, 3);
        assert!(instance.get_field("x").is_none());
    }

    #[test]
    fn test_field_roundtrip_preserves_insertion_order() {
        let instance = Instance::new(0);
        instance.set_field("b", Value::Number(1.0));
        instance.set_field("a", Value::Number(2.0));
        let keys: Vec<String> = instance.fields.borrow().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
