//! Bulk task aggregation

use std::cell::RefCell;
use std::rc::Rc;

use crate::task::{create, Completer, Task};

/// Per-aggregate bookkeeping for `when_all`
struct Gather<T, E> {
    results: Vec<Option<T>>,
    remaining: usize,
    settled: bool,
    completer: Completer<Vec<T>, E>,
}

/// Aggregate a list of tasks into one task that fulfills with the ordered
/// list of results once every input fulfills.
///
/// Result `i` comes from input `i` regardless of completion order. The
/// aggregate rejects on the *first* rejection among the inputs; the
/// remaining tasks keep running but no longer affect the outcome. An
/// empty input fulfills immediately with an empty list.
pub fn when_all<T, E>(tasks: &[Task<T, E>]) -> Task<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let (aggregate, completer) = create();

    if tasks.is_empty() {
        completer.set_value(Vec::new());
        return aggregate;
    }

    let gather = Rc::new(RefCell::new(Gather {
        results: vec![None; tasks.len()],
        remaining: tasks.len(),
        settled: false,
        completer,
    }));

    for (index, task) in tasks.iter().enumerate() {
        let gather = Rc::clone(&gather);
        let awaiter = task.awaiter();
        let task = task.clone();
        awaiter.on_completed(move || {
            let mut state = gather.borrow_mut();
            if state.settled {
                return;
            }
            match task.result().expect("continuation ran before settlement") {
                Ok(value) => {
                    state.results[index] = Some(value);
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        state.settled = true;
                        let results = state
                            .results
                            .iter_mut()
                            .map(|slot| slot.take().expect("missing result"))
                            .collect();
                        let completer = state.completer.clone();
                        drop(state);
                        completer.set_value(results);
                    }
                }
                Err(error) => {
                    state.settled = true;
                    let completer = state.completer.clone();
                    drop(state);
                    completer.set_error(error);
                }
            }
        });
    }

    aggregate
}
