//! Naru language core
//!
//! A TypeScript-subset language engine, from the AST down:
//! - **AST**: the contract with the upstream parser and type checker
//!   (`ast` module)
//! - **Compiler**: class registry, method emitter, and async lowering
//!   (`compiler` module)
//! - **VM**: value model, instruction interpreter, async state machines,
//!   and task plumbing (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use naru_engine::{ast, compile, Value};
//!
//! // The front end hands the compiler an AST.
//! let program = compile(&ast_program)?;
//!
//! // Synchronous entry points return values...
//! let value = program.invoke("main", vec![])?;
//!
//! // ...async entry points return tasks, already terminal when every
//! // awaited input was terminal at the await.
//! let task = program.run_async("main", vec![])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ast;
pub mod compiler;
pub mod vm;

pub use compiler::{compile, CompileError};
pub use vm::{Exception, Program, TaskAwaiter, TaskRef, Value};
