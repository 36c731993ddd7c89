//! `Promise.allSettled`
//!
//! Two cooperating machines, following the same builder/awaiter
//! protocol as compiled async bodies.
//!
//! The per-element machine wraps its whole body in a handler: an
//! awaited rejection (or any later failure) is converted into a
//! fulfilled `{status: "rejected", reason}` record, so a per-element
//! task can never reject. The `reason` field carries the error message
//! string, not the raw thrown value.
//!
//! The aggregate machine settles the elements in input order, bulk
//! awaits them, and fulfills with the ordered record array; since no
//! element task rejects, the bulk await always resolves. Index `i` of
//! the output is derived from input element `i` regardless of
//! completion order. Only a failure to materialize the input itself
//! rejects the aggregate.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::vm::machine::{AsyncTaskBuilder, STATE_INITIAL, STATE_TERMINAL};
use crate::vm::program::VmState;
use crate::vm::task::{when_all_values, TaskAwaiter, TaskRef};
use crate::vm::value::Value;
use crate::vm::Exception;

fn settled_record(status: &str, key: &str, value: Value) -> Value {
    let mut record = IndexMap::new();
    record.insert("status".to_string(), Value::string(status));
    record.insert(key.to_string(), value);
    Value::object(record)
}

fn fulfilled_record(value: Value) -> Value {
    settled_record("fulfilled", "value", value)
}

fn rejected_record(error: &Exception) -> Value {
    settled_record("rejected", "reason", Value::string(error.message()))
}

// ── Per-element machine ─────────────────────────────────────────────────

struct ElementMachine {
    state: i32,
    builder: AsyncTaskBuilder,
    element: Option<Value>,
    awaiter: Option<TaskAwaiter>,
}

/// Settle one element: a task-like element is awaited, a direct value
/// is taken as-is. Always fulfills with a settled record.
fn process_element_settled(element: Value) -> TaskRef {
    let builder = AsyncTaskBuilder::new();
    let task = builder.task();
    let machine = Rc::new(RefCell::new(ElementMachine {
        state: STATE_INITIAL,
        builder,
        element: Some(element),
        awaiter: None,
    }));
    ElementMachine::move_next(&machine);
    task
}

impl ElementMachine {
    fn move_next(this: &Rc<RefCell<ElementMachine>>) {
        let mut machine = this.borrow_mut();

        let outcome: Result<Value, Exception> = match machine.state {
            STATE_INITIAL => {
                let element = machine.element.take().expect("element consumed once");
                match element {
                    Value::Task(task) => {
                        let awaiter = task.awaiter();
                        if awaiter.is_completed() {
                            awaiter.get_result()
                        } else {
                            machine.state = 0;
                            machine.awaiter = Some(awaiter.clone());
                            let builder = machine.builder.clone();
                            let resume = Rc::clone(this);
                            drop(machine);
                            builder.await_on_completed(awaiter, move || {
                                ElementMachine::move_next(&resume)
                            });
                            return;
                        }
                    }
                    direct => Ok(direct),
                }
            }
            0 => {
                machine.state = STATE_INITIAL;
                let awaiter = machine
                    .awaiter
                    .take()
                    .expect("resumed without a parked awaiter");
                awaiter.get_result()
            }
            _ => return,
        };

        // The whole body is protected: a rejection becomes a fulfilled
        // record, so this machine never rejects.
        let record = match outcome {
            Ok(value) => fulfilled_record(value),
            Err(error) => rejected_record(&error),
        };
        machine.state = STATE_TERMINAL;
        machine.builder.set_result(record);
    }
}

// ── Aggregate machine ───────────────────────────────────────────────────

struct AggregateMachine {
    state: i32,
    builder: AsyncTaskBuilder,
    input: Option<Value>,
    awaiter: Option<TaskAwaiter>,
    vm: Rc<VmState>,
}

/// `Promise.allSettled`: settle every element of the input array,
/// preserving input order in the output.
pub(crate) fn promise_all_settled(state: &Rc<VmState>, input: Value) -> TaskRef {
    let builder = AsyncTaskBuilder::new();
    let task = builder.task();
    let machine = Rc::new(RefCell::new(AggregateMachine {
        state: STATE_INITIAL,
        builder,
        input: Some(input),
        awaiter: None,
        vm: Rc::clone(state),
    }));
    AggregateMachine::move_next(&machine);
    task
}

impl AggregateMachine {
    fn move_next(this: &Rc<RefCell<AggregateMachine>>) {
        let mut machine = this.borrow_mut();

        let outcome: Result<Value, Exception> = match machine.state {
            STATE_INITIAL => {
                let input = machine.input.take().expect("input consumed once");
                let elements = match input {
                    Value::Array(elements) => elements.borrow().clone(),
                    other => {
                        // Failure to materialize the input rejects the
                        // aggregate itself.
                        let error = machine.vm.type_error(&format!(
                            "Promise.allSettled expects an array, got {}",
                            other.type_name()
                        ));
                        machine.state = STATE_TERMINAL;
                        machine.builder.set_exception(error);
                        return;
                    }
                };

                if elements.is_empty() {
                    machine.state = STATE_TERMINAL;
                    machine.builder.set_result(Value::array(Vec::new()));
                    return;
                }

                let tasks: Vec<TaskRef> =
                    elements.into_iter().map(process_element_settled).collect();
                let bulk = when_all_values(&tasks);
                let awaiter = bulk.awaiter();
                if awaiter.is_completed() {
                    awaiter.get_result()
                } else {
                    machine.state = 0;
                    machine.awaiter = Some(awaiter.clone());
                    let builder = machine.builder.clone();
                    let resume = Rc::clone(this);
                    drop(machine);
                    builder.await_on_completed(awaiter, move || {
                        AggregateMachine::move_next(&resume)
                    });
                    return;
                }
            }
            0 => {
                machine.state = STATE_INITIAL;
                let awaiter = machine
                    .awaiter
                    .take()
                    .expect("resumed without a parked awaiter");
                awaiter.get_result()
            }
            _ => return,
        };

        machine.state = STATE_TERMINAL;
        match outcome {
            Ok(records) => machine.builder.set_result(records),
            // Unreachable while per-element tasks uphold their no-reject
            // contract; kept so a contract break fails the task instead
            // of hanging it.
            Err(error) => machine.builder.set_exception(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::compiler::compile;

    fn empty_state() -> Rc<VmState> {
        let program = compile(&ast::Program::new(Vec::new())).expect("empty program compiles");
        program.state_for_tests()
    }

    fn record_fields(value: &Value) -> (String, String) {
        match value {
            Value::Object(map) => {
                let map = map.borrow();
                let status = map["status"].to_display_string();
                let payload = map
                    .get("value")
                    .or_else(|| map.get("reason"))
                    .map(Value::to_display_string)
                    .unwrap_or_default();
                (status, payload)
            }
            other => panic!("expected a record object, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_element_direct_value_fulfills() {
        let task = process_element_settled(Value::Number(3.0));
        let record = task.result().expect("terminal").expect("fulfilled");
        assert_eq!(record_fields(&record), ("fulfilled".into(), "3".into()));
    }

    #[test]
    fn test_element_rejection_becomes_record() {
        let state = empty_state();
        let failed = TaskRef::rejected(state.error("bad"));
        let task = process_element_settled(Value::Task(failed));
        let record = task.result().expect("terminal").expect("fulfilled");
        assert_eq!(record_fields(&record), ("rejected".into(), "bad".into()));
    }

    #[test]
    fn test_element_pending_task_settles_later() {
        let (pending, completer) = naru_runtime::create();
        let task = process_element_settled(Value::Task(pending));
        assert!(!task.is_terminal());
        completer.set_value(Value::string("late"));
        let record = task.result().expect("terminal").expect("fulfilled");
        assert_eq!(record_fields(&record), ("fulfilled".into(), "late".into()));
    }

    #[test]
    fn test_aggregate_empty_input() {
        let state = empty_state();
        let task = promise_all_settled(&state, Value::array(Vec::new()));
        match task.result() {
            Some(Ok(Value::Array(elements))) => assert!(elements.borrow().is_empty()),
            _ => panic!("expected fulfilled empty array"),
        }
    }

    #[test]
    fn test_aggregate_preserves_input_order() {
        let state = empty_state();
        let (slow, completer) = naru_runtime::create();
        let input = Value::array(vec![
            Value::Task(slow),
            Value::Task(TaskRef::rejected(state.error("boom"))),
            Value::Number(3.0),
        ]);
        let task = promise_all_settled(&state, input);
        assert!(!task.is_terminal());
        completer.set_value(Value::Number(1.0));

        match task.result() {
            Some(Ok(Value::Array(records))) => {
                let records = records.borrow();
                assert_eq!(records.len(), 3);
                assert_eq!(record_fields(&records[0]), ("fulfilled".into(), "1".into()));
                assert_eq!(record_fields(&records[1]), ("rejected".into(), "boom".into()));
                assert_eq!(record_fields(&records[2]), ("fulfilled".into(), "3".into()));
            }
            _ => panic!("expected fulfilled record array"),
        }
    }

    #[test]
    fn test_aggregate_rejects_on_non_array_input() {
        let state = empty_state();
        let task = promise_all_settled(&state, Value::Number(1.0));
        match task.result() {
            Some(Err(error)) => assert!(error.message().contains("expects an array")),
            _ => panic!("expected rejected task"),
        }
    }
}
