//! Shared helpers for building programs and inspecting task outcomes

#![allow(dead_code)]

use naru_engine::ast::{
    ClassDecl, Expression, FunctionDecl, Param, Program as AstProgram, Statement, VarDecl,
};
use naru_engine::{compile, Program, TaskRef, Value};

pub fn program(statements: Vec<Statement>) -> AstProgram {
    AstProgram::new(statements)
}

pub fn compile_program(statements: Vec<Statement>) -> Program {
    compile(&program(statements)).expect("program compiles")
}

pub fn class(decl: ClassDecl) -> Statement {
    Statement::Class(decl)
}

pub fn function(name: &str, params: Vec<Param>, body: Vec<Statement>) -> Statement {
    Statement::Function(FunctionDecl {
        name: name.to_string(),
        params,
        body,
        is_async: false,
    })
}

pub fn async_function(name: &str, params: Vec<Param>, body: Vec<Statement>) -> Statement {
    Statement::Function(FunctionDecl {
        name: name.to_string(),
        params,
        body,
        is_async: true,
    })
}

pub fn var(name: &str, init: Expression) -> Statement {
    Statement::Var(VarDecl {
        name: name.to_string(),
        init,
    })
}

pub fn ret(value: Expression) -> Statement {
    Statement::Return(Some(value))
}

pub fn expr_stmt(expression: Expression) -> Statement {
    Statement::Expression(expression)
}

/// The fulfilled value of a terminal task
pub fn fulfilled_value(task: &TaskRef) -> Value {
    match task.result() {
        Some(Ok(value)) => value,
        Some(Err(error)) => panic!("task rejected: {}", error.message()),
        None => panic!("task still pending"),
    }
}

/// The rejection message of a terminal task
pub fn rejected_message(task: &TaskRef) -> String {
    match task.result() {
        Some(Err(error)) => error.message(),
        Some(Ok(value)) => panic!("task fulfilled with {}", value.to_display_string()),
        None => panic!("task still pending"),
    }
}

pub fn assert_number(value: &Value, expected: f64) {
    match value {
        Value::Number(n) => assert_eq!(*n, expected),
        other => panic!("expected number {}, got {}", expected, other.type_name()),
    }
}

pub fn assert_string(value: &Value, expected: &str) {
    match value {
        Value::String(s) => assert_eq!(&**s, expected),
        other => panic!("expected string {:?}, got {}", expected, other.type_name()),
    }
}
