//! Task handles and the one-shot completer

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// A continuation registered on a pending task
pub(crate) type Continuation = Box<dyn FnOnce()>;

/// Internal task state.
///
/// Pending carries the registered continuations; both terminal states are
/// sticky — once settled a task never changes outcome again.
pub(crate) enum TaskState<T, E> {
    /// Not yet settled; continuations run in registration order on settle
    Pending(Vec<Continuation>),
    /// Settled with a value
    Fulfilled(T),
    /// Settled with an error
    Rejected(E),
}

/// A handle to an eventual result.
///
/// Cloning a `Task` clones the handle, not the state: all clones observe
/// the same settlement.
pub struct Task<T, E> {
    id: TaskId,
    pub(crate) state: Rc<RefCell<TaskState<T, E>>>,
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Rc::clone(&self.state),
        }
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            TaskState::Pending(_) => "pending",
            TaskState::Fulfilled(_) => "fulfilled",
            TaskState::Rejected(_) => "rejected",
        };
        write!(f, "Task({}, {})", self.id.as_u64(), state)
    }
}

impl<T, E> Task<T, E> {
    fn pending() -> Self {
        Self {
            id: TaskId::new(),
            state: Rc::new(RefCell::new(TaskState::Pending(Vec::new()))),
        }
    }

    /// Create a task that is already fulfilled
    pub fn fulfilled(value: T) -> Self {
        Self {
            id: TaskId::new(),
            state: Rc::new(RefCell::new(TaskState::Fulfilled(value))),
        }
    }

    /// Create a task that is already rejected
    pub fn rejected(error: E) -> Self {
        Self {
            id: TaskId::new(),
            state: Rc::new(RefCell::new(TaskState::Rejected(error))),
        }
    }

    /// Get the task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task has settled (fulfilled or rejected)
    pub fn is_terminal(&self) -> bool {
        !matches!(&*self.state.borrow(), TaskState::Pending(_))
    }

    /// True if the task settled with a value
    pub fn is_fulfilled(&self) -> bool {
        matches!(&*self.state.borrow(), TaskState::Fulfilled(_))
    }

    /// True if the task settled with an error
    pub fn is_rejected(&self) -> bool {
        matches!(&*self.state.borrow(), TaskState::Rejected(_))
    }

    /// Two handles are the same task if they share state
    pub fn same_task(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Obtain an awaiter for this task
    pub fn awaiter(&self) -> crate::Awaiter<T, E> {
        crate::Awaiter::new(self.clone())
    }

    /// Register a continuation to run when the task settles.
    ///
    /// Runs immediately if the task is already terminal.
    pub(crate) fn on_terminal(&self, continuation: Continuation) {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            TaskState::Pending(continuations) => continuations.push(continuation),
            _ => {
                drop(state);
                continuation();
            }
        }
    }
}

impl<T: Clone, E: Clone> Task<T, E> {
    /// Snapshot the outcome, if settled
    pub fn result(&self) -> Option<Result<T, E>> {
        match &*self.state.borrow() {
            TaskState::Pending(_) => None,
            TaskState::Fulfilled(v) => Some(Ok(v.clone())),
            TaskState::Rejected(e) => Some(Err(e.clone())),
        }
    }
}

/// One-shot producer side of a task.
///
/// The first call to `set_value` or `set_error` settles the task and
/// dispatches its continuations in registration order; later calls are
/// ignored (terminal states are sticky).
pub struct Completer<T, E> {
    task: Task<T, E>,
}

impl<T, E> Clone for Completer<T, E> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
        }
    }
}

impl<T, E> Completer<T, E> {
    /// Settle the task with a value
    pub fn set_value(&self, value: T) {
        self.settle(TaskState::Fulfilled(value));
    }

    /// Settle the task with an error
    pub fn set_error(&self, error: E) {
        self.settle(TaskState::Rejected(error));
    }

    /// The task this completer settles
    pub fn task(&self) -> Task<T, E> {
        self.task.clone()
    }

    fn settle(&self, outcome: TaskState<T, E>) {
        let mut state = self.task.state.borrow_mut();
        let continuations = match &mut *state {
            TaskState::Pending(continuations) => std::mem::take(continuations),
            // already terminal: sticky
            _ => return,
        };
        *state = outcome;
        // Release the borrow before dispatch: a continuation may inspect
        // the task (or settle other tasks that loop back here).
        drop(state);
        for continuation in continuations {
            continuation();
        }
    }
}

/// Create a pending task together with its one-shot completer
pub fn create<T, E>() -> (Task<T, E>, Completer<T, E>) {
    let task = Task::pending();
    let completer = Completer { task: task.clone() };
    (task, completer)
}
