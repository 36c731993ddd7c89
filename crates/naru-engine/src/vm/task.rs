//! Value-level task plumbing
//!
//! The runtime crate is generic; here it is instantiated over the VM's
//! value and exception types, and its order-preserving `when_all` is
//! bridged into a task whose payload is a language array.

use crate::vm::value::Value;
use crate::vm::Exception;

/// A task producing a language value or rejecting with an exception
pub type TaskRef = naru_runtime::Task<Value, Exception>;

/// Awaiter over a [`TaskRef`]
pub type TaskAwaiter = naru_runtime::Awaiter<Value, Exception>;

/// Completer over a [`TaskRef`]
pub type TaskCompleter = naru_runtime::Completer<Value, Exception>;

/// Bulk-await a list of value tasks into a task holding the ordered
/// array of results. Rejects on the first input rejection.
pub fn when_all_values(tasks: &[TaskRef]) -> TaskRef {
    let (task, completer) = naru_runtime::create();
    let aggregate = naru_runtime::when_all(tasks);
    let awaiter = aggregate.awaiter();
    let slot = awaiter.clone();
    awaiter.on_completed(move || match slot.get_result() {
        Ok(values) => completer.set_value(Value::array(values)),
        Err(error) => completer.set_error(error),
    });
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_when_all_values_empty() {
        let task = when_all_values(&[]);
        match task.result() {
            Some(Ok(Value::Array(elements))) => assert!(elements.borrow().is_empty()),
            other => panic!("expected fulfilled array, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_when_all_values_orders_results() {
        let (first, c1) = naru_runtime::create::<Value, Exception>();
        let (second, c2) = naru_runtime::create::<Value, Exception>();
        let task = when_all_values(&[first, second]);

        c2.set_value(Value::Number(2.0));
        c1.set_value(Value::Number(1.0));

        match task.result() {
            Some(Ok(Value::Array(elements))) => {
                let elements = elements.borrow();
                assert!(elements[0].equals(&Value::Number(1.0)));
                assert!(elements[1].equals(&Value::Number(2.0)));
            }
            _ => panic!("expected fulfilled array"),
        }
    }
}
