//! Emitted method bodies
//!
//! Every method, accessor, constructor, and function body lowers to a
//! flat instruction list executed by the interpreter loop in `vm::interp`.
//! Async bodies additionally carry a resume table mapping each await site
//! to the instruction index execution continues from after resumption.

use std::rc::Rc;

/// Index into the program's function table; reserving one is how a
/// method signature is declared before its body exists.
pub type FnId = usize;

/// Handle to a declared method, usable for dispatch and (once the body
/// is defined) execution.
pub type MethodHandle = FnId;

/// Index into the program's class registry
pub type ClassId = usize;

/// A constant operand
#[derive(Debug, Clone)]
pub enum Const {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean constant
    Bool(bool),
    /// Numeric constant
    Number(f64),
    /// String constant
    String(Rc<str>),
}

/// Binary operators with eager operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Numeric addition / string concatenation
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division (division by zero produces an infinity or NaN)
    Div,
    /// Remainder
    Mod,
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Less-than
    Lt,
    /// Less-or-equal
    Le,
    /// Greater-than
    Gt,
    /// Greater-or-equal
    Ge,
}

/// One instruction of an emitted body
#[derive(Debug, Clone)]
pub enum Instr {
    /// Push a constant
    Const(Const),
    /// Push a local slot
    LoadLocal(u16),
    /// Pop into a local slot
    StoreLocal(u16),
    /// Push a captured variable of the running closure
    LoadCaptured(u16),
    /// Duplicate the top of stack
    Dup,
    /// Discard the top of stack
    Pop,
    /// Pop a value, push whether it is `undefined`
    IsUndefined,
    /// Pop `n` elements, push an array of them in push order
    MakeArray(u16),
    /// Pop one value per key (in push order), push an object literal
    MakeObject(Rc<[Rc<str>]>),
    /// Pop `capture_count` values, push a closure over them
    MakeClosure {
        /// Body of the closure
        func: FnId,
        /// Number of captured values on the stack
        capture_count: u16,
    },
    /// Pop an object, push the named property
    GetProp(Rc<str>),
    /// Pop value then object, store the named property, push the value
    SetProp(Rc<str>),
    /// Pop index then object, push the element
    GetIndex,
    /// Pop value, index, object; store the element, push the value
    SetIndex,
    /// Push a static field slot of a class
    GetStatic {
        /// Owning class
        class: ClassId,
        /// Field slot
        slot: u16,
    },
    /// Pop a value into a static field slot, push the value back
    SetStatic {
        /// Owning class
        class: ClassId,
        /// Field slot
        slot: u16,
    },
    /// Call a function through an early-bound handle
    CallFn {
        /// Target handle
        func: FnId,
        /// Argument count on the stack
        argc: u8,
    },
    /// Call a static method (runs the class's static initializer first)
    CallStatic {
        /// Class the method was resolved on
        class: ClassId,
        /// Target handle
        func: FnId,
        /// Argument count on the stack
        argc: u8,
    },
    /// Call a method on the receiver below the arguments, resolved by
    /// name through the receiver's class chain at call time
    CallVirtual {
        /// Method name
        name: Rc<str>,
        /// Argument count on the stack (receiver not included)
        argc: u8,
    },
    /// Call the superclass constructor; receiver below the arguments
    CallSuper {
        /// Argument count on the stack
        argc: u8,
    },
    /// Call a superclass method, resolved starting at the parent of the
    /// emitting class
    CallSuperMethod {
        /// Method name
        name: Rc<str>,
        /// Argument count on the stack (receiver not included)
        argc: u8,
    },
    /// Call a first-class value (closure, bound method, builtin)
    CallValue {
        /// Argument count on the stack
        argc: u8,
    },
    /// Instantiate a class: allocate the field map, run the static
    /// initializer if pending, then run the constructor
    New {
        /// Class to instantiate
        class: ClassId,
        /// Constructor argument count on the stack
        argc: u8,
    },
    /// Binary operation on the two topmost values
    Binary(BinOp),
    /// Logical not
    Not,
    /// Numeric negation
    Neg,
    /// Pop `n` values, push their string concatenation in push order
    Concat(u16),
    /// Raise a TypeError when the top of stack is null or undefined
    CheckNonNull,
    /// Unconditional jump to an instruction index
    Jump(usize),
    /// Pop a value, jump when falsy
    JumpIfFalse(usize),
    /// Pop a value, jump when truthy
    JumpIfTrue(usize),
    /// Enter a protected region whose handler starts at `catch`
    EnterTry {
        /// Handler entry; the thrown value is on the stack on entry
        catch: usize,
    },
    /// Leave the innermost protected region
    LeaveTry,
    /// Pop a value and raise it
    Throw,
    /// Suspension point: pop the awaited value; a non-task value is
    /// pushed back directly, a terminal task yields its result (or
    /// re-raises), a pending task parks the machine in state `site`
    Await {
        /// Await-site number; indexes the body's resume table
        site: u16,
    },
    /// `Promise.resolve`: pop a value, push a task (tasks pass through)
    PromiseResolve,
    /// `Promise.reject`: pop a value, push a task rejected with it
    PromiseReject,
    /// `Promise.all`: pop an array, push the bulk task
    PromiseAll,
    /// `Promise.allSettled`: pop an array, push the settling task
    PromiseAllSettled,
    /// Pop the return value and leave the body
    Return,
}

/// What kind of body a function table entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// Top-level function
    Function,
    /// Instance method
    Method,
    /// Static method
    StaticMethod,
    /// Constructor
    Constructor,
    /// Synthetic static initializer
    StaticInit,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
    /// Arrow function body
    Arrow,
    /// Abstract method trap: dispatching to it raises a runtime error
    AbstractTrap,
}

/// An emitted body and its execution metadata
#[derive(Debug, Clone)]
pub struct FnBody {
    /// Diagnostic name (`Class::method` for members)
    pub name: String,
    /// Body kind
    pub kind: FnKind,
    /// Class the body was emitted for, when it is a member
    pub owner: Option<ClassId>,
    /// True when invocation builds a state machine instead of running
    /// the body to completion
    pub is_async: bool,
    /// Declared parameter count, excluding the receiver slot
    pub arity: usize,
    /// True when local slot 0 is the receiver
    pub has_receiver: bool,
    /// Total local slots (receiver + parameters + locals)
    pub local_count: usize,
    /// Instructions
    pub code: Vec<Instr>,
    /// Await site -> instruction index execution resumes from; empty
    /// for synchronous bodies
    pub resume_table: Vec<usize>,
}

impl FnBody {
    /// An abstract method trap for the given diagnostic name
    pub fn abstract_trap(name: String, owner: ClassId) -> Self {
        Self {
            name,
            kind: FnKind::AbstractTrap,
            owner: Some(owner),
            is_async: false,
            arity: 0,
            has_receiver: true,
            local_count: 1,
            code: Vec::new(),
            resume_table: Vec::new(),
        }
    }
}
