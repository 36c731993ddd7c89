//! Naru cooperative task runtime
//!
//! A minimal single-threaded promise/task abstraction:
//! - **Task**: a handle to an eventual result, either still pending or
//!   terminal (fulfilled with a value or rejected with an error)
//! - **Completer**: the one-shot producer side of a task
//! - **Awaiter**: the consumer-side view used by suspension points
//!   (`is_completed` / `get_result` / `on_completed`)
//! - **when_all**: bulk aggregation preserving input order
//!
//! All code runs on a single logical thread. Continuations registered on
//! a pending task run synchronously, in registration order, when the task
//! settles; continuations registered on an already-terminal task run
//! immediately in the registrar's context.
//!
//! The runtime is generic over the fulfilled payload `T` and the rejection
//! payload `E` so it can be exercised without pulling in the engine's
//! value model.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod awaiter;
pub mod combine;
pub mod task;

pub use awaiter::Awaiter;
pub use combine::when_all;
pub use task::{create, Completer, Task, TaskId};
