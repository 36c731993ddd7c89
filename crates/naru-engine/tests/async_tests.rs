//! Async lowering: suspension, resumption, exceptions across await points

mod common;

use common::*;
use naru_engine::ast::{
    BinaryOp, CatchClause, Expression, Param, Statement,
};
use naru_engine::{compile, CompileError, Exception, TaskRef, Value};

fn promise_resolve(value: Expression) -> Expression {
    Expression::call(
        Expression::member(Expression::ident("Promise"), "resolve"),
        vec![value],
    )
}

fn promise_reject(value: Expression) -> Expression {
    Expression::call(
        Expression::member(Expression::ident("Promise"), "reject"),
        vec![value],
    )
}

fn pending_task() -> (TaskRef, naru_runtime::Completer<Value, Exception>) {
    naru_runtime::create()
}

// ============================================================================
// Synchronous fast path
// ============================================================================

#[test]
fn test_sync_fast_path_returns_terminal_task() {
    // Every awaited task is already terminal, so the invoker's single
    // MoveNext run drives the machine to completion.
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![
            var("a", Expression::await_expr(promise_resolve(Expression::number(2.0)))),
            var("b", Expression::await_expr(promise_resolve(Expression::number(3.0)))),
            ret(Expression::binary(
                BinaryOp::Add,
                Expression::ident("a"),
                Expression::ident("b"),
            )),
        ],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert!(task.is_terminal());
    assert_number(&fulfilled_value(&task), 5.0);
}

#[test]
fn test_await_of_direct_value_skips_suspension() {
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![ret(Expression::await_expr(Expression::number(7.0)))],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_number(&fulfilled_value(&task), 7.0);
}

#[test]
fn test_invoke_of_async_entry_returns_task_value() {
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![ret(Expression::number(1.0))],
    )]);
    match program.invoke("main", Vec::new()).unwrap() {
        Value::Task(task) => assert_number(&fulfilled_value(&task), 1.0),
        other => panic!("expected task, got {}", other.type_name()),
    }
}

#[test]
fn test_run_async_wraps_synchronous_entry() {
    let program = compile_program(vec![function(
        "main",
        Vec::new(),
        vec![ret(Expression::number(9.0))],
    )]);
    let task = program.run_async("main", Vec::new()).unwrap();
    assert!(task.is_terminal());
    assert_number(&fulfilled_value(&task), 9.0);
}

// ============================================================================
// Suspension and resumption
// ============================================================================

#[test]
fn test_machine_parks_and_resumes_on_external_completion() {
    // async main(t) { let v = await t; return v + 1; }
    let program = compile_program(vec![async_function(
        "main",
        vec![Param::new("t")],
        vec![
            var("v", Expression::await_expr(Expression::ident("t"))),
            ret(Expression::binary(
                BinaryOp::Add,
                Expression::ident("v"),
                Expression::number(1.0),
            )),
        ],
    )]);

    let (input, completer) = pending_task();
    let task = program
        .run_async("main", vec![Value::Task(input)])
        .unwrap();
    assert!(!task.is_terminal());

    completer.set_value(Value::Number(41.0));
    assert!(task.is_terminal());
    assert_number(&fulfilled_value(&task), 42.0);
}

#[test]
fn test_locals_survive_suspension() {
    // A local defined before the await is used after it.
    // async main(t) { let base = 100; let v = await t; return base + v; }
    let program = compile_program(vec![async_function(
        "main",
        vec![Param::new("t")],
        vec![
            var("base", Expression::number(100.0)),
            var("v", Expression::await_expr(Expression::ident("t"))),
            ret(Expression::binary(
                BinaryOp::Add,
                Expression::ident("base"),
                Expression::ident("v"),
            )),
        ],
    )]);

    let (input, completer) = pending_task();
    let task = program.run_async("main", vec![Value::Task(input)]).unwrap();
    completer.set_value(Value::Number(23.0));
    assert_number(&fulfilled_value(&task), 123.0);
}

#[test]
fn test_await_in_loop_accumulates() {
    // async main(ts) { let total = 0; for (let i = 0; i < 3; i = i + 1) { total = total + await ts[i]; } return total; }
    let program = compile_program(vec![async_function(
        "main",
        vec![Param::new("ts")],
        vec![
            var("total", Expression::number(0.0)),
            Statement::For {
                init: Some(Box::new(var("i", Expression::number(0.0)))),
                test: Some(Expression::binary(
                    BinaryOp::Lt,
                    Expression::ident("i"),
                    Expression::number(3.0),
                )),
                update: Some(Expression::assign(
                    Expression::ident("i"),
                    Expression::binary(
                        BinaryOp::Add,
                        Expression::ident("i"),
                        Expression::number(1.0),
                    ),
                )),
                body: vec![expr_stmt(Expression::assign(
                    Expression::ident("total"),
                    Expression::binary(
                        BinaryOp::Add,
                        Expression::ident("total"),
                        Expression::await_expr(Expression::index(
                            Expression::ident("ts"),
                            Expression::ident("i"),
                        )),
                    ),
                ))],
            },
            ret(Expression::ident("total")),
        ],
    )]);

    let (first, c1) = pending_task();
    let (third, c3) = pending_task();
    let input = Value::array(vec![
        Value::Task(first),
        Value::Number(2.0),
        Value::Task(third),
    ]);

    let task = program.run_async("main", vec![input]).unwrap();
    assert!(!task.is_terminal());

    // The loop is parked on ts[0]; completing it carries execution to
    // the next pending await.
    c1.set_value(Value::Number(1.0));
    assert!(!task.is_terminal());
    c3.set_value(Value::Number(3.0));

    assert_number(&fulfilled_value(&task), 6.0);
}

// ============================================================================
// Exceptions across await points
// ============================================================================

#[test]
fn test_await_rejection_caught_by_user_handler() {
    // async main() { try { await Promise.reject("e"); return "X"; } catch (e) { return "got " + e.message; } }
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![Statement::Try {
            block: vec![
                expr_stmt(Expression::await_expr(promise_reject(Expression::string("e")))),
                ret(Expression::string("X")),
            ],
            catch: CatchClause {
                param: "e".to_string(),
                body: vec![ret(Expression::binary(
                    BinaryOp::Add,
                    Expression::string("got "),
                    Expression::member(Expression::ident("e"), "message"),
                ))],
            },
        }],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_string(&fulfilled_value(&task), "got e");
}

#[test]
fn test_rejection_after_suspension_resumes_inside_protected_region() {
    // The machine parks inside try; the rejection arrives later and must
    // re-raise at the resume point, inside the same handler.
    let program = compile_program(vec![async_function(
        "main",
        vec![Param::new("t")],
        vec![Statement::Try {
            block: vec![
                var("v", Expression::await_expr(Expression::ident("t"))),
                ret(Expression::ident("v")),
            ],
            catch: CatchClause {
                param: "e".to_string(),
                body: vec![ret(Expression::binary(
                    BinaryOp::Add,
                    Expression::string("caught "),
                    Expression::member(Expression::ident("e"), "message"),
                ))],
            },
        }],
    )]);

    let (input, completer) = pending_task();
    let task = program.run_async("main", vec![Value::Task(input)]).unwrap();
    assert!(!task.is_terminal());

    completer.set_error(program.make_error("late failure"));
    assert_string(&fulfilled_value(&task), "caught late failure");
}

#[test]
fn test_thrown_value_fails_task_with_same_message() {
    // async main() { throw new Error("kapow"); }
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![Statement::Throw(Expression::new_instance(
            "Error",
            vec![Expression::string("kapow")],
        ))],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_eq!(rejected_message(&task), "kapow");
}

#[test]
fn test_exception_round_trip_through_await() {
    // An async callee fails; awaiting it re-raises a value with the same
    // message in the caller.
    let program = compile_program(vec![
        async_function(
            "boom",
            Vec::new(),
            vec![Statement::Throw(Expression::new_instance(
                "Error",
                vec![Expression::string("kapow")],
            ))],
        ),
        async_function(
            "main",
            Vec::new(),
            vec![Statement::Try {
                block: vec![
                    expr_stmt(Expression::await_expr(Expression::call_name(
                        "boom",
                        Vec::new(),
                    ))),
                    ret(Expression::string("unreachable")),
                ],
                catch: CatchClause {
                    param: "e".to_string(),
                    body: vec![ret(Expression::member(Expression::ident("e"), "message"))],
                },
            }],
        ),
    ]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_string(&fulfilled_value(&task), "kapow");
}

#[test]
fn test_uncaught_rejection_propagates_to_task() {
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![expr_stmt(Expression::await_expr(promise_reject(
            Expression::string("unhandled"),
        )))],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_eq!(rejected_message(&task), "unhandled");
}

#[test]
fn test_catch_body_may_await() {
    // The catch clause itself suspends and resumes.
    // async main(t) { try { throw new Error("x"); } catch (e) { return await t; } }
    let program = compile_program(vec![async_function(
        "main",
        vec![Param::new("t")],
        vec![Statement::Try {
            block: vec![Statement::Throw(Expression::new_instance(
                "Error",
                vec![Expression::string("x")],
            ))],
            catch: CatchClause {
                param: "e".to_string(),
                body: vec![ret(Expression::await_expr(Expression::ident("t")))],
            },
        }],
    )]);

    let (input, completer) = pending_task();
    let task = program.run_async("main", vec![Value::Task(input)]).unwrap();
    assert!(!task.is_terminal());
    completer.set_value(Value::string("recovered"));
    assert_string(&fulfilled_value(&task), "recovered");
}

// ============================================================================
// Chained machines
// ============================================================================

#[test]
fn test_async_calling_async() {
    // async inner(t) { return await t + 1; }
    // async main(t) { return await inner(t) * 10; }
    let program = compile_program(vec![
        async_function(
            "inner",
            vec![Param::new("t")],
            vec![ret(Expression::binary(
                BinaryOp::Add,
                Expression::await_expr(Expression::ident("t")),
                Expression::number(1.0),
            ))],
        ),
        async_function(
            "main",
            vec![Param::new("t")],
            vec![ret(Expression::binary(
                BinaryOp::Mul,
                Expression::await_expr(Expression::call_name(
                    "inner",
                    vec![Expression::ident("t")],
                )),
                Expression::number(10.0),
            ))],
        ),
    ]);

    let (input, completer) = pending_task();
    let task = program.run_async("main", vec![Value::Task(input)]).unwrap();
    assert!(!task.is_terminal());
    completer.set_value(Value::Number(4.0));
    assert_number(&fulfilled_value(&task), 50.0);
}

#[test]
fn test_promise_all_rejects_on_first_rejection() {
    // async main() { try { return await Promise.all([Promise.resolve(1), Promise.reject("no")]); } catch (e) { return "err " + e.message; } }
    let program = compile_program(vec![async_function(
        "main",
        Vec::new(),
        vec![Statement::Try {
            block: vec![ret(Expression::await_expr(Expression::call(
                Expression::member(Expression::ident("Promise"), "all"),
                vec![Expression::Array(vec![
                    promise_resolve(Expression::number(1.0)),
                    promise_reject(Expression::string("no")),
                ])],
            )))],
            catch: CatchClause {
                param: "e".to_string(),
                body: vec![ret(Expression::binary(
                    BinaryOp::Add,
                    Expression::string("err "),
                    Expression::member(Expression::ident("e"), "message"),
                ))],
            },
        }],
    )]);

    let task = program.run_async("main", Vec::new()).unwrap();
    assert_string(&fulfilled_value(&task), "err no");
}

// ============================================================================
// Compile-time rules
// ============================================================================

#[test]
fn test_await_outside_async_rejected() {
    let result = compile(&program(vec![function(
        "main",
        Vec::new(),
        vec![ret(Expression::await_expr(Expression::number(1.0)))],
    )]));
    assert!(matches!(result, Err(CompileError::AwaitOutsideAsync)));
}

#[test]
fn test_closures_capture_by_value() {
    // function make() { let x = 5; return () => x + 1; }
    // function main() { return make()(); }
    use naru_engine::ast::ArrowBody;
    let program = compile_program(vec![
        function(
            "make",
            Vec::new(),
            vec![
                var("x", Expression::number(5.0)),
                ret(Expression::Arrow {
                    params: Vec::new(),
                    body: ArrowBody::Expression(Box::new(Expression::binary(
                        BinaryOp::Add,
                        Expression::ident("x"),
                        Expression::number(1.0),
                    ))),
                }),
            ],
        ),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::call(
                Expression::call_name("make", Vec::new()),
                Vec::new(),
            ))],
        ),
    ]);

    assert_number(&program.invoke("main", Vec::new()).unwrap(), 6.0);
}
