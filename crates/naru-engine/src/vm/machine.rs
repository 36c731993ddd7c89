//! Async state machines
//!
//! Every activation of an async body gets one machine. The machine's
//! `state` field is `-1` while initial or running, `-2` once terminal,
//! and the await-site number `k >= 0` while parked at site `k`. Its
//! frame — parameters, locals, operand stack, and the protected-region
//! handler stack — survives suspension, so resumption re-enters inside
//! the protected region it left and a rejection re-raised by
//! `get_result` reaches the correct handler.
//!
//! The invoker contract: allocate the machine in its initial state with
//! the arguments copied in, attach a fresh builder, run `MoveNext` once
//! synchronously, and hand back the builder's task. If every await on a
//! path completes inline, the task is already terminal when the invoker
//! returns.

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::code::FnBody;
use crate::vm::interp::{exec, Flow, Frame};
use crate::vm::program::VmState;
use crate::vm::task::{TaskAwaiter, TaskCompleter, TaskRef};
use crate::vm::value::Value;
use crate::vm::Exception;

/// Machine state: initial, or running between suspensions
pub(crate) const STATE_INITIAL: i32 = -1;
/// Machine state: the builder has been completed
pub(crate) const STATE_TERMINAL: i32 = -2;

/// Owns the task produced by one async activation and completes it
/// exactly once.
#[derive(Clone)]
pub(crate) struct AsyncTaskBuilder {
    task: TaskRef,
    completer: TaskCompleter,
}

impl AsyncTaskBuilder {
    pub fn new() -> Self {
        let (task, completer) = naru_runtime::create();
        Self { task, completer }
    }

    /// The task handed to the invoker's caller
    pub fn task(&self) -> TaskRef {
        self.task.clone()
    }

    /// Complete the task with a value
    pub fn set_result(&self, value: Value) {
        self.completer.set_value(value);
    }

    /// Complete the task with an error
    pub fn set_exception(&self, error: Exception) {
        self.completer.set_error(error);
    }

    /// Park a machine on an awaiter: when the awaited task settles, the
    /// resumption re-enters `MoveNext` from the task's continuation.
    pub fn await_on_completed(&self, awaiter: TaskAwaiter, resume: impl FnOnce() + 'static) {
        awaiter.on_completed(resume);
    }
}

/// One async activation
pub(crate) struct AsyncMachine {
    state: i32,
    builder: AsyncTaskBuilder,
    frame: Frame,
    awaiter: Option<TaskAwaiter>,
    vm: Rc<VmState>,
}

/// Invoke an async body: build the machine, drive it to its first
/// suspension (or completion), return the builder's task.
pub(crate) fn invoke_async(state: &Rc<VmState>, body: &Rc<FnBody>, args: Vec<Value>) -> TaskRef {
    let builder = AsyncTaskBuilder::new();
    let task = builder.task();
    let machine = Rc::new(RefCell::new(AsyncMachine {
        state: STATE_INITIAL,
        builder,
        frame: Frame::new(Rc::clone(body), args, Vec::new()),
        awaiter: None,
        vm: Rc::clone(state),
    }));
    AsyncMachine::move_next(&machine);
    task
}

impl AsyncMachine {
    /// The resumable lowered body.
    ///
    /// Structure: a dispatch prologue on `state` (a resume entry resets
    /// the state, reloads the parked awaiter, and applies `get_result`),
    /// then the interpreter run, then completion handling. `set_result`
    /// and `set_exception` execute after the run has left the body, so
    /// the handler stack can never observe a completed builder.
    pub fn move_next(this: &Rc<RefCell<AsyncMachine>>) {
        let mut machine = this.borrow_mut();
        if machine.state == STATE_TERMINAL {
            return;
        }

        // Dispatch prologue: re-entry at a parked await site.
        if machine.state >= 0 {
            let site = machine.state as usize;
            machine.state = STATE_INITIAL;
            let awaiter = machine
                .awaiter
                .take()
                .expect("resumed without a parked awaiter");
            let resume_ip = machine.frame.code.resume_table[site];
            machine.frame.ip = resume_ip;
            match awaiter.get_result() {
                Ok(value) => machine.frame.push(value),
                // Re-raise into the persisted handler stack: the resume
                // point is inside the protected region it suspended in.
                Err(error) => {
                    if let Err(error) = machine.frame.unwind(error) {
                        machine.state = STATE_TERMINAL;
                        machine.builder.set_exception(error);
                        return;
                    }
                }
            }
        }

        let vm = Rc::clone(&machine.vm);
        match exec(&vm, &mut machine.frame) {
            Ok(Flow::Return(value)) => {
                machine.state = STATE_TERMINAL;
                machine.builder.set_result(value);
            }
            Ok(Flow::Suspend { awaiter, site }) => {
                machine.state = site as i32;
                machine.awaiter = Some(awaiter.clone());
                let builder = machine.builder.clone();
                let resume = Rc::clone(this);
                drop(machine);
                builder.await_on_completed(awaiter, move || AsyncMachine::move_next(&resume));
            }
            // The single outer handler: anything escaping the body's own
            // protected regions fails the task.
            Err(error) => {
                machine.state = STATE_TERMINAL;
                machine.builder.set_exception(error);
            }
        }
    }
}
