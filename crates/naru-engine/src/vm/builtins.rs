//! Builtin methods on arrays and strings
//!
//! Data-driven dispatch: instead of hardcoded if-else chains in the
//! interpreter, a lazily-built table maps method names to handlers.
//! Arguments beyond `arity` are ignored; missing optional arguments
//! arrive as `undefined`.

use std::rc::Rc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::vm::program::VmState;
use crate::vm::value::Value;
use crate::vm::Exception;

/// Handler signature: receiver plus arguments, padded to `arity`
pub type BuiltinFn = fn(&Rc<VmState>, Value, Vec<Value>) -> Result<Value, Exception>;

/// A builtin method descriptor
#[derive(Debug)]
pub struct BuiltinMethod {
    /// Method name
    pub name: &'static str,
    /// Declared parameter count; extra caller arguments are dropped
    pub arity: usize,
    /// Required argument count; fewer is a TypeError
    pub min_args: usize,
    /// Handler
    pub body: BuiltinFn,
}

macro_rules! builtin {
    ($name:literal, $arity:expr, $min:expr, $body:path) => {
        BuiltinMethod {
            name: $name,
            arity: $arity,
            min_args: $min,
            body: $body,
        }
    };
}

static ARRAY_METHODS: &[BuiltinMethod] = &[
    builtin!("push", 1, 1, array::push),
    builtin!("pop", 0, 0, array::pop),
    builtin!("indexOf", 1, 1, array::index_of),
    builtin!("includes", 1, 1, array::includes),
    builtin!("join", 1, 0, array::join),
    builtin!("slice", 2, 0, array::slice),
];

static STRING_METHODS: &[BuiltinMethod] = &[
    builtin!("charAt", 1, 0, string::char_at),
    builtin!("substring", 2, 1, string::substring),
    builtin!("toUpperCase", 0, 0, string::to_upper_case),
    builtin!("toLowerCase", 0, 0, string::to_lower_case),
    builtin!("indexOf", 1, 1, string::index_of),
    builtin!("includes", 1, 1, string::includes),
    builtin!("trim", 0, 0, string::trim),
];

static ARRAY_TABLE: Lazy<FxHashMap<&'static str, &'static BuiltinMethod>> = Lazy::new(|| {
    ARRAY_METHODS.iter().map(|m| (m.name, m)).collect()
});

static STRING_TABLE: Lazy<FxHashMap<&'static str, &'static BuiltinMethod>> = Lazy::new(|| {
    STRING_METHODS.iter().map(|m| (m.name, m)).collect()
});

/// Look up an array method by name
pub fn array_method(name: &str) -> Option<&'static BuiltinMethod> {
    ARRAY_TABLE.get(name).copied()
}

/// Look up a string method by name
pub fn string_method(name: &str) -> Option<&'static BuiltinMethod> {
    STRING_TABLE.get(name).copied()
}

fn number_arg(state: &Rc<VmState>, value: &Value, method: &str) -> Result<f64, Exception> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(state.type_error(&format!(
            "{} expects a number, got {}",
            method,
            other.type_name()
        ))),
    }
}

// ── Array handlers ──────────────────────────────────────────────────────

mod array {
    use super::*;

    fn elements(state: &Rc<VmState>, receiver: &Value) -> Result<Rc<std::cell::RefCell<Vec<Value>>>, Exception> {
        match receiver {
            Value::Array(elements) => Ok(Rc::clone(elements)),
            other => Err(state.type_error(&format!(
                "receiver is not an array, got {}",
                other.type_name()
            ))),
        }
    }

    pub(super) fn push(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let elements = elements(state, &receiver)?;
        let mut elements = elements.borrow_mut();
        elements.push(args[0].clone());
        Ok(Value::Number(elements.len() as f64))
    }

    pub(super) fn pop(
        state: &Rc<VmState>,
        receiver: Value,
        _args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let elements = elements(state, &receiver)?;
        let popped = elements.borrow_mut().pop();
        Ok(popped.unwrap_or(Value::Undefined))
    }

    pub(super) fn index_of(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let elements = elements(state, &receiver)?;
        let elements = elements.borrow();
        let index = elements
            .iter()
            .position(|element| element.equals(&args[0]))
            .map(|i| i as f64)
            .unwrap_or(-1.0);
        Ok(Value::Number(index))
    }

    pub(super) fn includes(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let elements = elements(state, &receiver)?;
        let found = elements.borrow().iter().any(|element| element.equals(&args[0]));
        Ok(Value::Bool(found))
    }

    pub(super) fn join(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let separator = match &args[0] {
            Value::Undefined => ",".to_string(),
            other => other.to_display_string(),
        };
        let elements = elements(state, &receiver)?;
        let joined: Vec<String> = elements
            .borrow()
            .iter()
            .map(Value::to_display_string)
            .collect();
        Ok(Value::string(joined.join(&separator)))
    }

    pub(super) fn slice(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let elements = elements(state, &receiver)?;
        let elements = elements.borrow();
        let len = elements.len() as f64;
        let resolve = |bound: &Value, default: f64| -> Result<usize, Exception> {
            let n = match bound {
                Value::Undefined => default,
                other => number_arg(state, other, "slice")?,
            };
            let n = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
            Ok(n as usize)
        };
        let start = resolve(&args[0], 0.0)?;
        let end = resolve(&args[1], len)?;
        let slice = if start < end {
            elements[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Value::array(slice))
    }
}

// ── String handlers ─────────────────────────────────────────────────────

mod string {
    use super::*;

    fn text(state: &Rc<VmState>, receiver: &Value) -> Result<Rc<str>, Exception> {
        match receiver {
            Value::String(s) => Ok(Rc::clone(s)),
            other => Err(state.type_error(&format!(
                "receiver is not a string, got {}",
                other.type_name()
            ))),
        }
    }

    pub(super) fn char_at(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        let index = match &args[0] {
            Value::Undefined => 0.0,
            other => number_arg(state, other, "charAt")?,
        };
        if index < 0.0 {
            return Ok(Value::string(""));
        }
        let ch = s.chars().nth(index as usize);
        Ok(Value::string(
            ch.map(|c| c.to_string()).unwrap_or_default(),
        ))
    }

    pub(super) fn substring(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len() as f64;
        let clamp = |bound: &Value, default: f64| -> Result<usize, Exception> {
            let n = match bound {
                Value::Undefined => default,
                other => number_arg(state, other, "substring")?,
            };
            Ok(n.clamp(0.0, len) as usize)
        };
        let mut start = clamp(&args[0], 0.0)?;
        let mut end = clamp(&args[1], len)?;
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        Ok(Value::string(chars[start..end].iter().collect::<String>()))
    }

    pub(super) fn to_upper_case(
        state: &Rc<VmState>,
        receiver: Value,
        _args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        Ok(Value::string(s.to_uppercase()))
    }

    pub(super) fn to_lower_case(
        state: &Rc<VmState>,
        receiver: Value,
        _args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        Ok(Value::string(s.to_lowercase()))
    }

    pub(super) fn index_of(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        let needle = args[0].to_display_string();
        let index = s
            .find(&needle)
            .map(|byte| s[..byte].chars().count() as f64)
            .unwrap_or(-1.0);
        Ok(Value::Number(index))
    }

    pub(super) fn includes(
        state: &Rc<VmState>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        Ok(Value::Bool(s.contains(&args[0].to_display_string())))
    }

    pub(super) fn trim(
        state: &Rc<VmState>,
        receiver: Value,
        _args: Vec<Value>,
    ) -> Result<Value, Exception> {
        let s = text(state, &receiver)?;
        Ok(Value::string(s.trim()))
    }
}
