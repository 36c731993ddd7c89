//! Instruction interpreter
//!
//! One `Frame` per activation: locals, operand stack, and the
//! protected-region handler stack. Synchronous calls run a frame to
//! completion; async activations keep their frame on the state machine,
//! where `exec` returns `Flow::Suspend` at a pending await and is
//! re-entered from the task continuation.
//!
//! Exceptions unwind through the frame's handler stack first; only an
//! exception that escapes the frame propagates to the caller as `Err`.

use std::rc::Rc;

use crate::compiler::code::{BinOp, Const, FnBody, FnId, FnKind, Instr};
use crate::vm::builtins::{self, BuiltinMethod};
use crate::vm::machine;
use crate::vm::object::{BoundMethod, ClosureData, Instance, MethodTarget};
use crate::vm::program::{ensure_static_init, VmState};
use crate::vm::settled;
use crate::vm::task::{when_all_values, TaskAwaiter, TaskRef};
use crate::vm::value::Value;
use crate::vm::Exception;

/// An installed exception handler
#[derive(Debug, Clone)]
pub(crate) struct Handler {
    /// Instruction index of the catch block
    pub catch: usize,
    /// Operand stack depth when the handler was installed
    pub stack_depth: usize,
}

/// One activation's execution state
pub(crate) struct Frame {
    /// Body being executed
    pub code: Rc<FnBody>,
    /// Next instruction index
    pub ip: usize,
    /// Local slots (receiver, parameters, locals)
    pub locals: Vec<Value>,
    /// Operand stack
    pub stack: Vec<Value>,
    /// Active protected regions, innermost last
    pub handlers: Vec<Handler>,
    /// Captured values of the running closure
    pub captures: Vec<Value>,
}

impl Frame {
    /// Build a frame, binding arguments by position. Missing arguments
    /// stay `undefined`; extra arguments are dropped.
    pub fn new(code: Rc<FnBody>, args: Vec<Value>, captures: Vec<Value>) -> Self {
        let mut locals = vec![Value::Undefined; code.local_count];
        let declared = code.local_count.min(usize::from(code.has_receiver) + code.arity);
        for (slot, arg) in args.into_iter().take(declared).enumerate() {
            locals[slot] = arg;
        }
        Self {
            code,
            ip: 0,
            locals,
            stack: Vec::new(),
            handlers: Vec::new(),
            captures,
        }
    }

    /// Push onto the operand stack
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the operand stack
    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn pop_args(&mut self, count: usize) -> Vec<Value> {
        self.stack.split_off(self.stack.len() - count)
    }

    /// Transfer control to the innermost handler, binding the thrown
    /// value; an exception with no handler left escapes the frame.
    pub fn unwind(&mut self, error: Exception) -> Result<(), Exception> {
        match self.handlers.pop() {
            Some(handler) => {
                self.stack.truncate(handler.stack_depth);
                self.stack.push(error.value().clone());
                self.ip = handler.catch;
                Ok(())
            }
            None => Err(error),
        }
    }
}

/// How a run of `exec` left the frame
pub(crate) enum Flow {
    /// The body returned a value
    Return(Value),
    /// A pending await: park on the awaiter, resume at the site's entry
    Suspend {
        /// Awaiter of the pending task
        awaiter: TaskAwaiter,
        /// Await-site number to resume through
        site: u16,
    },
}

/// Call a function-table entry to completion (or to its task, for an
/// async body).
pub(crate) fn call_function(
    state: &Rc<VmState>,
    func: FnId,
    args: Vec<Value>,
) -> Result<Value, Exception> {
    let body = Rc::clone(&state.functions[func]);
    if body.kind == FnKind::AbstractTrap {
        return Err(state.type_error(&format!("abstract method invoked: {}", body.name)));
    }
    if body.is_async {
        return Ok(Value::Task(machine::invoke_async(state, &body, args)));
    }
    let mut frame = Frame::new(body, args, Vec::new());
    match exec(state, &mut frame)? {
        Flow::Return(value) => Ok(value),
        Flow::Suspend { .. } => unreachable!("await emitted in a synchronous body"),
    }
}

fn call_closure(
    state: &Rc<VmState>,
    closure: &ClosureData,
    args: Vec<Value>,
) -> Result<Value, Exception> {
    let body = Rc::clone(&state.functions[closure.func]);
    if body.is_async {
        return Ok(Value::Task(machine::invoke_async(state, &body, args)));
    }
    let mut frame = Frame::new(body, args, closure.captures.clone());
    match exec(state, &mut frame)? {
        Flow::Return(value) => Ok(value),
        Flow::Suspend { .. } => unreachable!("await emitted in a synchronous body"),
    }
}

/// Call a first-class value
pub(crate) fn call_value(
    state: &Rc<VmState>,
    callee: Value,
    args: Vec<Value>,
) -> Result<Value, Exception> {
    match &callee {
        Value::Closure(closure) => call_closure(state, closure, args),
        Value::Bound(bound) => match &bound.target {
            MethodTarget::Compiled(func) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(bound.receiver.clone());
                full.extend(args);
                call_function(state, *func, full)
            }
            MethodTarget::Builtin(method) => {
                call_builtin(state, *method, bound.receiver.clone(), args)
            }
        },
        Value::Builtin(method) => call_builtin(state, *method, Value::Undefined, args),
        other => Err(state.type_error(&format!("{} is not callable", other.type_name()))),
    }
}

fn call_builtin(
    state: &Rc<VmState>,
    method: &'static BuiltinMethod,
    receiver: Value,
    mut args: Vec<Value>,
) -> Result<Value, Exception> {
    if args.len() < method.min_args {
        return Err(state.type_error(&format!(
            "{} expects at least {} argument(s)",
            method.name, method.min_args
        )));
    }
    args.truncate(method.arity);
    while args.len() < method.arity {
        args.push(Value::Undefined);
    }
    (method.body)(state, receiver, args)
}

/// Late-bound method dispatch through the receiver's class chain
fn dispatch_virtual(
    state: &Rc<VmState>,
    receiver: Value,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, Exception> {
    match &receiver {
        Value::Instance(instance) => {
            let class = instance.class_id;
            if let Some(handle) = state.registry.resolve_virtual(class, name) {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                return call_function(state, handle, full);
            }
            if let Some(field) = instance.get_field(name) {
                return call_value(state, field, args);
            }
            if let Some(getter) = state.registry.resolve_getter(class, name) {
                let value = call_function(state, getter, vec![receiver.clone()])?;
                return call_value(state, value, args);
            }
            Err(state.type_error(&format!("'{}' is not a function", name)))
        }
        Value::Array(_) => match builtins::array_method(name) {
            Some(method) => call_builtin(state, method, receiver, args),
            None => Err(state.type_error(&format!("'{}' is not a function", name))),
        },
        Value::String(_) => match builtins::string_method(name) {
            Some(method) => call_builtin(state, method, receiver, args),
            None => Err(state.type_error(&format!("'{}' is not a function", name))),
        },
        Value::Object(map) => {
            let member = map.borrow().get(name).cloned();
            match member {
                Some(member) => call_value(state, member, args),
                None => Err(state.type_error(&format!("'{}' is not a function", name))),
            }
        }
        Value::Undefined | Value::Null => Err(state.type_error(&format!(
            "cannot read property '{}' of {}",
            name,
            receiver.type_name()
        ))),
        other => Err(state.type_error(&format!(
            "'{}' is not a function on {}",
            name,
            other.type_name()
        ))),
    }
}

/// Property read
fn get_prop(state: &Rc<VmState>, object: Value, name: &str) -> Result<Value, Exception> {
    match &object {
        Value::Instance(instance) => {
            let class = instance.class_id;
            if let Some(getter) = state.registry.resolve_getter(class, name) {
                return call_function(state, getter, vec![object.clone()]);
            }
            if let Some(value) = instance.get_field(name) {
                return Ok(value);
            }
            if let Some(handle) = state.registry.resolve_virtual(class, name) {
                return Ok(Value::Bound(Rc::new(BoundMethod {
                    receiver: object.clone(),
                    target: MethodTarget::Compiled(handle),
                })));
            }
            Ok(Value::Undefined)
        }
        Value::Object(map) => Ok(map.borrow().get(name).cloned().unwrap_or(Value::Undefined)),
        Value::Array(elements) => {
            if name == "length" {
                return Ok(Value::Number(elements.borrow().len() as f64));
            }
            match builtins::array_method(name) {
                Some(method) => Ok(Value::Bound(Rc::new(BoundMethod {
                    receiver: object.clone(),
                    target: MethodTarget::Builtin(method),
                }))),
                None => Ok(Value::Undefined),
            }
        }
        Value::String(s) => {
            if name == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            match builtins::string_method(name) {
                Some(method) => Ok(Value::Bound(Rc::new(BoundMethod {
                    receiver: object.clone(),
                    target: MethodTarget::Builtin(method),
                }))),
                None => Ok(Value::Undefined),
            }
        }
        Value::Undefined | Value::Null => Err(state.type_error(&format!(
            "cannot read property '{}' of {}",
            name,
            object.type_name()
        ))),
        _ => Ok(Value::Undefined),
    }
}

/// Property write; returns the assigned value
fn set_prop(
    state: &Rc<VmState>,
    object: Value,
    name: &str,
    value: Value,
) -> Result<Value, Exception> {
    match &object {
        Value::Instance(instance) => {
            if let Some(setter) = state.registry.resolve_setter(instance.class_id, name) {
                call_function(state, setter, vec![object.clone(), value.clone()])?;
                return Ok(value);
            }
            instance.set_field(name, value.clone());
            Ok(value)
        }
        Value::Object(map) => {
            map.borrow_mut().insert(name.to_string(), value.clone());
            Ok(value)
        }
        Value::Undefined | Value::Null => Err(state.type_error(&format!(
            "cannot set property '{}' of {}",
            name,
            object.type_name()
        ))),
        other => Err(state.type_error(&format!(
            "cannot set property '{}' on {}",
            name,
            other.type_name()
        ))),
    }
}

fn array_index(index: &Value) -> Option<usize> {
    match index {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

fn get_index(state: &Rc<VmState>, object: Value, index: Value) -> Result<Value, Exception> {
    match &object {
        Value::Array(elements) => Ok(array_index(&index)
            .and_then(|i| elements.borrow().get(i).cloned())
            .unwrap_or(Value::Undefined)),
        Value::String(s) => Ok(array_index(&index)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::string(c.to_string()))
            .unwrap_or(Value::Undefined)),
        Value::Object(map) => Ok(map
            .borrow()
            .get(&index.to_display_string())
            .cloned()
            .unwrap_or(Value::Undefined)),
        Value::Instance(instance) => Ok(instance
            .get_field(&index.to_display_string())
            .unwrap_or(Value::Undefined)),
        Value::Undefined | Value::Null => Err(state.type_error(&format!(
            "cannot read index of {}",
            object.type_name()
        ))),
        _ => Ok(Value::Undefined),
    }
}

fn set_index(
    state: &Rc<VmState>,
    object: Value,
    index: Value,
    value: Value,
) -> Result<Value, Exception> {
    match &object {
        Value::Array(elements) => {
            let i = array_index(&index).ok_or_else(|| {
                state.type_error("array index must be a non-negative integer")
            })?;
            let mut elements = elements.borrow_mut();
            if i >= elements.len() {
                elements.resize(i + 1, Value::Undefined);
            }
            elements[i] = value.clone();
            Ok(value)
        }
        Value::Object(map) => {
            map.borrow_mut().insert(index.to_display_string(), value.clone());
            Ok(value)
        }
        Value::Instance(instance) => {
            instance.set_field(&index.to_display_string(), value.clone());
            Ok(value)
        }
        other => Err(state.type_error(&format!(
            "cannot assign index on {}",
            other.type_name()
        ))),
    }
}

fn numeric_operands(
    state: &Rc<VmState>,
    op: BinOp,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), Exception> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(state.type_error(&format!(
            "{:?} expects numbers, got {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn binary_op(
    state: &Rc<VmState>,
    op: BinOp,
    left: Value,
    right: Value,
) -> Result<Value, Exception> {
    match op {
        BinOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::string(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            ))),
            _ => Err(state.type_error(&format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
        BinOp::Sub => {
            let (a, b) = numeric_operands(state, op, &left, &right)?;
            Ok(Value::Number(a - b))
        }
        BinOp::Mul => {
            let (a, b) = numeric_operands(state, op, &left, &right)?;
            Ok(Value::Number(a * b))
        }
        // IEEE semantics: division by zero is an infinity or NaN, not
        // an error.
        BinOp::Div => {
            let (a, b) = numeric_operands(state, op, &left, &right)?;
            Ok(Value::Number(a / b))
        }
        BinOp::Mod => {
            let (a, b) = numeric_operands(state, op, &left, &right)?;
            Ok(Value::Number(a % b))
        }
        BinOp::Eq => Ok(Value::Bool(left.equals(&right))),
        BinOp::Ne => Ok(Value::Bool(!left.equals(&right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            })),
            _ => {
                let (a, b) = numeric_operands(state, op, &left, &right)?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                }))
            }
        },
    }
}

/// Run a frame until it returns, suspends, or an exception escapes
pub(crate) fn exec(state: &Rc<VmState>, frame: &mut Frame) -> Result<Flow, Exception> {
    let body = Rc::clone(&frame.code);

    macro_rules! fallible {
        ($result:expr) => {
            match $result {
                Ok(value) => value,
                Err(error) => {
                    frame.unwind(error)?;
                    continue;
                }
            }
        };
    }

    loop {
        let instr = &body.code[frame.ip];
        frame.ip += 1;

        match instr {
            Instr::Const(constant) => {
                let value = match constant {
                    Const::Undefined => Value::Undefined,
                    Const::Null => Value::Null,
                    Const::Bool(b) => Value::Bool(*b),
                    Const::Number(n) => Value::Number(*n),
                    Const::String(s) => Value::String(Rc::clone(s)),
                };
                frame.push(value);
            }

            Instr::LoadLocal(slot) => {
                let value = frame.locals[*slot as usize].clone();
                frame.push(value);
            }
            Instr::StoreLocal(slot) => {
                let value = frame.pop();
                frame.locals[*slot as usize] = value;
            }
            Instr::LoadCaptured(index) => {
                let value = frame.captures[*index as usize].clone();
                frame.push(value);
            }

            Instr::Dup => {
                let top = frame.stack.last().expect("operand stack underflow").clone();
                frame.push(top);
            }
            Instr::Pop => {
                frame.pop();
            }
            Instr::IsUndefined => {
                let value = frame.pop();
                frame.push(Value::Bool(value.is_undefined()));
            }

            Instr::MakeArray(count) => {
                let elements = frame.pop_args(*count as usize);
                frame.push(Value::array(elements));
            }
            Instr::MakeObject(keys) => {
                let values = frame.pop_args(keys.len());
                let mut properties = indexmap::IndexMap::new();
                for (key, value) in keys.iter().zip(values) {
                    properties.insert(key.to_string(), value);
                }
                frame.push(Value::object(properties));
            }
            Instr::MakeClosure {
                func,
                capture_count,
            } => {
                let captures = frame.pop_args(*capture_count as usize);
                frame.push(Value::Closure(Rc::new(ClosureData {
                    func: *func,
                    captures,
                })));
            }

            Instr::GetProp(name) => {
                let object = frame.pop();
                let value = fallible!(get_prop(state, object, name));
                frame.push(value);
            }
            Instr::SetProp(name) => {
                let value = frame.pop();
                let object = frame.pop();
                let value = fallible!(set_prop(state, object, name, value));
                frame.push(value);
            }
            Instr::GetIndex => {
                let index = frame.pop();
                let object = frame.pop();
                let value = fallible!(get_index(state, object, index));
                frame.push(value);
            }
            Instr::SetIndex => {
                let value = frame.pop();
                let index = frame.pop();
                let object = frame.pop();
                let value = fallible!(set_index(state, object, index, value));
                frame.push(value);
            }

            Instr::GetStatic { class, slot } => {
                fallible!(ensure_static_init(state, *class));
                frame.push(state.get_static(*class, *slot));
            }
            Instr::SetStatic { class, slot } => {
                fallible!(ensure_static_init(state, *class));
                let value = frame.pop();
                state.set_static(*class, *slot, value.clone());
                frame.push(value);
            }

            Instr::CallFn { func, argc } => {
                let args = frame.pop_args(*argc as usize);
                let value = fallible!(call_function(state, *func, args));
                frame.push(value);
            }
            Instr::CallStatic { class, func, argc } => {
                fallible!(ensure_static_init(state, *class));
                let args = frame.pop_args(*argc as usize);
                let value = fallible!(call_function(state, *func, args));
                frame.push(value);
            }
            Instr::CallVirtual { name, argc } => {
                let args = frame.pop_args(*argc as usize);
                let receiver = frame.pop();
                let value = fallible!(dispatch_virtual(state, receiver, name, args));
                frame.push(value);
            }
            Instr::CallSuper { argc } => {
                let args = frame.pop_args(*argc as usize);
                let receiver = frame.pop();
                let owner = body.owner.expect("super emitted outside a class member");
                let parent = state
                    .registry
                    .get(owner)
                    .superclass
                    .expect("super validated during lowering");
                fallible!(ensure_static_init(state, parent));
                let ctor = state
                    .registry
                    .get(parent)
                    .constructor
                    .expect("constructor declared");
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver);
                full.extend(args);
                fallible!(call_function(state, ctor, full));
                frame.push(Value::Undefined);
            }
            Instr::CallSuperMethod { name, argc } => {
                let args = frame.pop_args(*argc as usize);
                let receiver = frame.pop();
                let owner = body.owner.expect("super emitted outside a class member");
                let parent = state
                    .registry
                    .get(owner)
                    .superclass
                    .expect("super validated during lowering");
                let handle = match state.registry.resolve_virtual(parent, name) {
                    Some(handle) => handle,
                    None => {
                        fallible!(Err(state
                            .type_error(&format!("'{}' is not a function", name))))
                    }
                };
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver);
                full.extend(args);
                let value = fallible!(call_function(state, handle, full));
                frame.push(value);
            }
            Instr::CallValue { argc } => {
                let args = frame.pop_args(*argc as usize);
                let callee = frame.pop();
                let value = fallible!(call_value(state, callee, args));
                frame.push(value);
            }

            Instr::New { class, argc } => {
                fallible!(ensure_static_init(state, *class));
                let args = frame.pop_args(*argc as usize);
                // The dynamic field map exists before the constructor
                // chain runs.
                let receiver = Value::Instance(Rc::new(Instance::new(*class)));
                let ctor = state
                    .registry
                    .get(*class)
                    .constructor
                    .expect("constructor declared");
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                fallible!(call_function(state, ctor, full));
                frame.push(receiver);
            }

            Instr::Binary(op) => {
                let right = frame.pop();
                let left = frame.pop();
                let value = fallible!(binary_op(state, *op, left, right));
                frame.push(value);
            }
            Instr::Not => {
                let value = frame.pop();
                frame.push(Value::Bool(!value.truthy()));
            }
            Instr::Neg => {
                let value = frame.pop();
                match value {
                    Value::Number(n) => frame.push(Value::Number(-n)),
                    other => {
                        fallible!(Err(state.type_error(&format!(
                            "cannot negate {}",
                            other.type_name()
                        ))))
                    }
                }
            }
            Instr::Concat(count) => {
                let parts = frame.pop_args(*count as usize);
                let mut text = String::new();
                for part in &parts {
                    text.push_str(&part.to_display_string());
                }
                frame.push(Value::string(text));
            }
            Instr::CheckNonNull => {
                let top = frame.stack.last().expect("operand stack underflow");
                if top.is_nullish() {
                    let kind = top.type_name();
                    fallible!(Err(state.type_error(&format!(
                        "non-null assertion failed on {}",
                        kind
                    ))))
                }
            }

            Instr::Jump(target) => frame.ip = *target,
            Instr::JumpIfFalse(target) => {
                let value = frame.pop();
                if !value.truthy() {
                    frame.ip = *target;
                }
            }
            Instr::JumpIfTrue(target) => {
                let value = frame.pop();
                if value.truthy() {
                    frame.ip = *target;
                }
            }

            Instr::EnterTry { catch } => {
                frame.handlers.push(Handler {
                    catch: *catch,
                    stack_depth: frame.stack.len(),
                });
            }
            Instr::LeaveTry => {
                frame.handlers.pop();
            }
            Instr::Throw => {
                let value = frame.pop();
                let error = state.wrap_thrown(value);
                frame.unwind(error)?;
            }

            Instr::Await { site } => {
                let value = frame.pop();
                match value {
                    Value::Task(task) => {
                        let awaiter = task.awaiter();
                        if awaiter.is_completed() {
                            // Completed inline: re-raises a rejection.
                            let result = fallible!(awaiter.get_result());
                            frame.push(result);
                        } else {
                            return Ok(Flow::Suspend {
                                awaiter,
                                site: *site,
                            });
                        }
                    }
                    // A direct value needs no suspension.
                    direct => frame.push(direct),
                }
            }

            Instr::PromiseResolve => {
                let value = frame.pop();
                let task = match value {
                    Value::Task(task) => task,
                    direct => TaskRef::fulfilled(direct),
                };
                frame.push(Value::Task(task));
            }
            Instr::PromiseReject => {
                let value = frame.pop();
                let error = state.wrap_thrown(value);
                frame.push(Value::Task(TaskRef::rejected(error)));
            }
            Instr::PromiseAll => {
                let value = frame.pop();
                let elements = match value {
                    Value::Array(elements) => elements.borrow().clone(),
                    other => {
                        fallible!(Err(state.type_error(&format!(
                            "Promise.all expects an array, got {}",
                            other.type_name()
                        ))))
                    }
                };
                let tasks: Vec<TaskRef> = elements
                    .into_iter()
                    .map(|element| match element {
                        Value::Task(task) => task,
                        direct => TaskRef::fulfilled(direct),
                    })
                    .collect();
                frame.push(Value::Task(when_all_values(&tasks)));
            }
            Instr::PromiseAllSettled => {
                let value = frame.pop();
                frame.push(Value::Task(settled::promise_all_settled(state, value)));
            }

            Instr::Return => {
                let value = frame.pop();
                return Ok(Flow::Return(value));
            }
        }
    }
}
