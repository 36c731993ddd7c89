//! Class machinery: constructors, virtual dispatch, accessors, statics

mod common;

use common::*;
use naru_engine::ast::{
    AccessorDecl, AccessorKind, BinaryOp, ClassDecl, Expression, FieldDecl, MethodDecl, Param,
};
use naru_engine::{compile, CompileError, Value};

fn simple_method(name: &str, result: Expression) -> MethodDecl {
    MethodDecl::new(name, Vec::new(), vec![ret(result)])
}

// ============================================================================
// Virtual dispatch and overrides
// ============================================================================

#[test]
fn test_override_multilevel() {
    // A.getValue -> 1, B overrides -> 2, C overrides -> 3
    let mut a = ClassDecl::new("A");
    a.methods.push(simple_method("getValue", Expression::number(1.0)));
    let mut b = ClassDecl::new("B");
    b.superclass = Some("A".to_string());
    b.methods
        .push(simple_method("getValue", Expression::number(2.0)).overriding());
    let mut c = ClassDecl::new("C");
    c.superclass = Some("B".to_string());
    c.methods
        .push(simple_method("getValue", Expression::number(3.0)).overriding());

    let program = compile_program(vec![
        class(a),
        class(b),
        class(c),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::call_method(
                Expression::new_instance("C", Vec::new()),
                "getValue",
                Vec::new(),
            ))],
        ),
    ]);

    let value = program.invoke("main", Vec::new()).unwrap();
    assert_number(&value, 3.0);
}

#[test]
fn test_skip_level_override_resolution() {
    // Only A declares m; C (two levels down) overrides it; B declares
    // nothing. Dispatch on instances of each class picks the nearest.
    let mut a = ClassDecl::new("A");
    a.methods.push(simple_method("m", Expression::number(1.0)));
    let mut b = ClassDecl::new("B");
    b.superclass = Some("A".to_string());
    let mut c = ClassDecl::new("C");
    c.superclass = Some("B".to_string());
    c.methods
        .push(simple_method("m", Expression::number(3.0)).overriding());

    let program = compile_program(vec![
        class(a),
        class(b),
        class(c),
        function(
            "callOn",
            vec![Param::new("x")],
            vec![ret(Expression::call_method(
                Expression::ident("x"),
                "m",
                Vec::new(),
            ))],
        ),
        function(
            "viaB",
            Vec::new(),
            vec![ret(Expression::call_name(
                "callOn",
                vec![Expression::new_instance("B", Vec::new())],
            ))],
        ),
        function(
            "viaC",
            Vec::new(),
            vec![ret(Expression::call_name(
                "callOn",
                vec![Expression::new_instance("C", Vec::new())],
            ))],
        ),
    ]);

    assert_number(&program.invoke("viaB", Vec::new()).unwrap(), 1.0);
    assert_number(&program.invoke("viaC", Vec::new()).unwrap(), 3.0);

    // The registry agrees: C's handle differs from A's.
    let registry = program.registry();
    let a_id = registry.id_of("A").unwrap();
    let c_id = registry.id_of("C").unwrap();
    assert_ne!(
        registry.resolve_virtual(a_id, "m"),
        registry.resolve_virtual(c_id, "m")
    );
}

#[test]
fn test_super_method_call() {
    let mut a = ClassDecl::new("A");
    a.methods.push(simple_method("m", Expression::number(10.0)));
    let mut b = ClassDecl::new("B");
    b.superclass = Some("A".to_string());
    // override m() { return super.m() + 1; }
    b.methods.push(
        MethodDecl::new(
            "m",
            Vec::new(),
            vec![ret(Expression::binary(
                BinaryOp::Add,
                Expression::call(
                    Expression::member(Expression::Super, "m"),
                    Vec::new(),
                ),
                Expression::number(1.0),
            ))],
        )
        .overriding(),
    );

    let program = compile_program(vec![
        class(a),
        class(b),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::call_method(
                Expression::new_instance("B", Vec::new()),
                "m",
                Vec::new(),
            ))],
        ),
    ]);

    assert_number(&program.invoke("main", Vec::new()).unwrap(), 11.0);
}

// ============================================================================
// Abstract classes
// ============================================================================

#[test]
fn test_abstract_area_override() {
    // abstract class Shape { abstract area(); }
    // class Circle extends Shape { r; override area() { return r*r*3 } }
    let mut shape = ClassDecl::new("Shape");
    shape.is_abstract = true;
    shape
        .methods
        .push(MethodDecl::abstract_method("area", Vec::new()));

    let mut circle = ClassDecl::new("Circle");
    circle.superclass = Some("Shape".to_string());
    circle.fields.push(FieldDecl {
        name: "r".to_string(),
        initializer: None,
        is_static: false,
    });
    circle.methods.push(MethodDecl::new(
        "constructor",
        vec![Param::new("r")],
        vec![expr_stmt(Expression::assign(
            Expression::member(Expression::This, "r"),
            Expression::ident("r"),
        ))],
    ));
    circle.methods.push(
        MethodDecl::new(
            "area",
            Vec::new(),
            vec![ret(Expression::binary(
                BinaryOp::Mul,
                Expression::binary(
                    BinaryOp::Mul,
                    Expression::member(Expression::This, "r"),
                    Expression::member(Expression::This, "r"),
                ),
                Expression::number(3.0),
            ))],
        )
        .overriding(),
    );

    let program = compile_program(vec![
        class(shape),
        class(circle),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::call_method(
                Expression::new_instance("Circle", vec![Expression::number(10.0)]),
                "area",
                Vec::new(),
            ))],
        ),
    ]);

    assert_number(&program.invoke("main", Vec::new()).unwrap(), 300.0);
}

#[test]
fn test_abstract_dispatch_raises() {
    let mut base = ClassDecl::new("Base");
    base.is_abstract = true;
    base.methods
        .push(MethodDecl::abstract_method("m", Vec::new()));
    let mut sub = ClassDecl::new("Sub");
    sub.superclass = Some("Base".to_string());

    let program = compile_program(vec![
        class(base),
        class(sub),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::call_method(
                Expression::new_instance("Sub", Vec::new()),
                "m",
                Vec::new(),
            ))],
        ),
    ]);

    let error = program.invoke("main", Vec::new()).unwrap_err();
    assert!(error.message().contains("abstract method invoked"));
}

#[test]
fn test_abstract_instantiation_rejected() {
    let mut shape = ClassDecl::new("Shape");
    shape.is_abstract = true;

    let result = compile(&program(vec![
        class(shape),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::new_instance("Shape", Vec::new()))],
        ),
    ]));
    assert!(matches!(result, Err(CompileError::AbstractInstantiation(_))));
}

// ============================================================================
// Constructors and field initialization
// ============================================================================

#[test]
fn test_field_initializers_run_before_constructor_body() {
    // class K { x = 1; constructor(v) { this.y = v + this.x; } }
    let mut k = ClassDecl::new("K");
    k.fields.push(FieldDecl {
        name: "x".to_string(),
        initializer: Some(Expression::number(1.0)),
        is_static: false,
    });
    k.methods.push(MethodDecl::new(
        "constructor",
        vec![Param::new("v")],
        vec![expr_stmt(Expression::assign(
            Expression::member(Expression::This, "y"),
            Expression::binary(
                BinaryOp::Add,
                Expression::ident("v"),
                Expression::member(Expression::This, "x"),
            ),
        ))],
    ));

    let program = compile_program(vec![
        class(k),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::member(
                Expression::new_instance("K", vec![Expression::number(10.0)]),
                "y",
            ))],
        ),
    ]);

    assert_number(&program.invoke("main", Vec::new()).unwrap(), 11.0);
}

#[test]
fn test_constructor_chain_runs_each_ancestor_once() {
    // Every class counts its own constructor runs in a static field;
    // C has no explicit constructor, so the synthesized one chains up.
    let counting_class = |name: &str, superclass: Option<&str>| {
        let mut decl = ClassDecl::new(name);
        decl.superclass = superclass.map(str::to_string);
        decl.fields.push(FieldDecl {
            name: "calls".to_string(),
            initializer: Some(Expression::number(0.0)),
            is_static: true,
        });
        let increment = expr_stmt(Expression::assign(
            Expression::member(Expression::ident(name), "calls"),
            Expression::binary(
                BinaryOp::Add,
                Expression::member(Expression::ident(name), "calls"),
                Expression::number(1.0),
            ),
        ));
        let body = if superclass.is_some() {
            vec![
                expr_stmt(Expression::call(Expression::Super, Vec::new())),
                increment,
            ]
        } else {
            vec![increment]
        };
        decl.methods
            .push(MethodDecl::new("constructor", Vec::new(), body));
        decl
    };

    let a = counting_class("A", None);
    let b = counting_class("B", Some("A"));
    let mut c = ClassDecl::new("C");
    c.superclass = Some("B".to_string());

    let program = compile_program(vec![
        class(a),
        class(b),
        class(c),
        function(
            "construct",
            Vec::new(),
            vec![
                var("x", Expression::new_instance("C", Vec::new())),
                ret(Expression::bool(true)),
            ],
        ),
        function(
            "aCalls",
            Vec::new(),
            vec![ret(Expression::member(Expression::ident("A"), "calls"))],
        ),
        function(
            "bCalls",
            Vec::new(),
            vec![ret(Expression::member(Expression::ident("B"), "calls"))],
        ),
    ]);

    program.invoke("construct", Vec::new()).unwrap();
    assert_number(&program.invoke("aCalls", Vec::new()).unwrap(), 1.0);
    assert_number(&program.invoke("bCalls", Vec::new()).unwrap(), 1.0);
}

#[test]
fn test_superclass_constructor_writes_shared_field_map() {
    // The subclass field map exists before the parent constructor runs,
    // so parent writes land in the same storage the child reads.
    let mut base = ClassDecl::new("Base");
    base.methods.push(MethodDecl::new(
        "constructor",
        Vec::new(),
        vec![expr_stmt(Expression::assign(
            Expression::member(Expression::This, "tag"),
            Expression::string("base"),
        ))],
    ));
    let mut child = ClassDecl::new("Child");
    child.superclass = Some("Base".to_string());

    let program = compile_program(vec![
        class(base),
        class(child),
        function(
            "main",
            Vec::new(),
            vec![ret(Expression::member(
                Expression::new_instance("Child", Vec::new()),
                "tag",
            ))],
        ),
    ]);

    assert_string(&program.invoke("main", Vec::new()).unwrap(), "base");
}

// ============================================================================
// Accessors
// ============================================================================

#[test]
fn test_getter_and_setter_compile_to_accessor_methods() {
    // get fahrenheit() { return this.celsius * 2 + 30 }
    // set fahrenheit(f) { this.celsius = (f - 30) / 2 }
    let mut temp = ClassDecl::new("Temp");
    temp.fields.push(FieldDecl {
        name: "celsius".to_string(),
        initializer: Some(Expression::number(0.0)),
        is_static: false,
    });
    temp.accessors.push(AccessorDecl {
        kind: AccessorKind::Get,
        name: "fahrenheit".to_string(),
        setter_param: None,
        body: Some(vec![ret(Expression::binary(
            BinaryOp::Add,
            Expression::binary(
                BinaryOp::Mul,
                Expression::member(Expression::This, "celsius"),
                Expression::number(2.0),
            ),
            Expression::number(30.0),
        ))]),
        is_abstract: false,
    });
    temp.accessors.push(AccessorDecl {
        kind: AccessorKind::Set,
        name: "fahrenheit".to_string(),
        setter_param: Some("f".to_string()),
        body: Some(vec![expr_stmt(Expression::assign(
            Expression::member(Expression::This, "celsius"),
            Expression::binary(
                BinaryOp::Div,
                Expression::binary(
                    BinaryOp::Sub,
                    Expression::ident("f"),
                    Expression::number(30.0),
                ),
                Expression::number(2.0),
            ),
        ))]),
        is_abstract: false,
    });

    let program = compile_program(vec![
        class(temp),
        function(
            "roundTrip",
            Vec::new(),
            vec![
                var("t", Expression::new_instance("Temp", Vec::new())),
                expr_stmt(Expression::assign(
                    Expression::member(Expression::ident("t"), "fahrenheit"),
                    Expression::number(50.0),
                )),
                ret(Expression::member(Expression::ident("t"), "celsius")),
            ],
        ),
        function(
            "read",
            Vec::new(),
            vec![
                var("t", Expression::new_instance("Temp", Vec::new())),
                expr_stmt(Expression::assign(
                    Expression::member(Expression::ident("t"), "celsius"),
                    Expression::number(5.0),
                )),
                ret(Expression::member(Expression::ident("t"), "fahrenheit")),
            ],
        ),
    ]);

    assert_number(&program.invoke("roundTrip", Vec::new()).unwrap(), 10.0);
    assert_number(&program.invoke("read", Vec::new()).unwrap(), 40.0);
}

// ============================================================================
// Parameters and defaults
// ============================================================================

#[test]
fn test_default_parameter_applies_on_undefined() {
    let program = compile_program(vec![function(
        "add",
        vec![
            Param::new("a"),
            Param::with_default("b", Expression::number(10.0)),
        ],
        vec![ret(Expression::binary(
            BinaryOp::Add,
            Expression::ident("a"),
            Expression::ident("b"),
        ))],
    )]);

    let missing = program.invoke("add", vec![Value::Number(1.0)]).unwrap();
    assert_number(&missing, 11.0);

    let explicit_undefined = program
        .invoke("add", vec![Value::Number(1.0), Value::Undefined])
        .unwrap();
    assert_number(&explicit_undefined, 11.0);

    let supplied = program
        .invoke("add", vec![Value::Number(1.0), Value::Number(5.0)])
        .unwrap();
    assert_number(&supplied, 6.0);
}

#[test]
fn test_end_of_body_returns_undefined() {
    let program = compile_program(vec![function(
        "noop",
        Vec::new(),
        vec![expr_stmt(Expression::number(42.0))],
    )]);
    assert!(program.invoke("noop", Vec::new()).unwrap().is_undefined());
}

// ============================================================================
// Static members
// ============================================================================

#[test]
fn test_static_fields_and_methods() {
    // class Counter { static total = 100; static bump(n) { Counter.total = Counter.total + n; return Counter.total; } }
    let mut counter = ClassDecl::new("Counter");
    counter.fields.push(FieldDecl {
        name: "total".to_string(),
        initializer: Some(Expression::number(100.0)),
        is_static: true,
    });
    counter.methods.push(
        MethodDecl::new(
            "bump",
            vec![Param::new("n")],
            vec![
                expr_stmt(Expression::assign(
                    Expression::member(Expression::ident("Counter"), "total"),
                    Expression::binary(
                        BinaryOp::Add,
                        Expression::member(Expression::ident("Counter"), "total"),
                        Expression::ident("n"),
                    ),
                )),
                ret(Expression::member(Expression::ident("Counter"), "total")),
            ],
        )
        .statically(),
    );

    let program = compile_program(vec![
        class(counter),
        function(
            "main",
            Vec::new(),
            vec![
                expr_stmt(Expression::call(
                    Expression::member(Expression::ident("Counter"), "bump"),
                    vec![Expression::number(1.0)],
                )),
                ret(Expression::call(
                    Expression::member(Expression::ident("Counter"), "bump"),
                    vec![Expression::number(2.0)],
                )),
            ],
        ),
    ]);

    // Static initializer ran exactly once before first use: 100 + 1 + 2.
    assert_number(&program.invoke("main", Vec::new()).unwrap(), 103.0);
}

// ============================================================================
// Declaration errors
// ============================================================================

#[test]
fn test_duplicate_class_rejected() {
    let result = compile(&program(vec![
        class(ClassDecl::new("P")),
        class(ClassDecl::new("P")),
    ]));
    assert!(matches!(result, Err(CompileError::DuplicateClass(_))));
}

#[test]
fn test_override_without_superclass_rejected() {
    let mut a = ClassDecl::new("A");
    a.methods
        .push(simple_method("m", Expression::number(1.0)).overriding());
    let result = compile(&program(vec![class(a)]));
    assert!(matches!(
        result,
        Err(CompileError::OverrideWithoutSuperclass { .. })
    ));
}

#[test]
fn test_override_on_static_rejected() {
    let mut a = ClassDecl::new("A");
    a.methods.push(simple_method("m", Expression::number(1.0)));
    let mut b = ClassDecl::new("B");
    b.superclass = Some("A".to_string());
    b.methods
        .push(simple_method("m", Expression::number(2.0)).statically().overriding());
    let result = compile(&program(vec![class(a), class(b)]));
    assert!(matches!(result, Err(CompileError::OverrideOnStatic { .. })));
}

#[test]
fn test_override_with_no_parent_match_rejected() {
    let a = ClassDecl::new("A");
    let mut b = ClassDecl::new("B");
    b.superclass = Some("A".to_string());
    b.methods
        .push(simple_method("solo", Expression::number(2.0)).overriding());
    let result = compile(&program(vec![class(a), class(b)]));
    assert!(matches!(result, Err(CompileError::OverrideMismatch { .. })));
}

#[test]
fn test_property_access_on_null_is_type_error() {
    let program = compile_program(vec![function(
        "main",
        Vec::new(),
        vec![ret(Expression::member(Expression::null(), "x"))],
    )]);
    let error = program.invoke("main", Vec::new()).unwrap_err();
    assert!(error.message().contains("null"));
}

#[test]
fn test_division_by_zero_is_infinity_not_error() {
    let program = compile_program(vec![function(
        "main",
        Vec::new(),
        vec![ret(Expression::binary(
            BinaryOp::Div,
            Expression::number(1.0),
            Expression::number(0.0),
        ))],
    )]);
    match program.invoke("main", Vec::new()).unwrap() {
        Value::Number(n) => assert!(n.is_infinite() && n > 0.0),
        other => panic!("expected number, got {}", other.type_name()),
    }
}
