//! End-to-end execution of compiled scripts

use heron_vm_compiler::ast::{
    BinaryOp, Expr, ForInTarget, ForInit, FunctionNode, Ident, LogicalOp, Property, Script, Stmt,
    StmtKind, SwitchCase, UnaryOp, UpdateOp, VarDecl,
};
use heron_vm_compiler::{Compiler, resolve_script};
use heron_vm_core::{Context, Value, VmError, VmResult};

fn compile(body: Vec<Stmt>) -> std::sync::Arc<heron_vm_bytecode::FunctionUnit> {
    let mut script = Script::new("test.js", body);
    resolve_script(&mut script);
    Compiler::new().compile(&script).expect("script compiles")
}

fn run(body: Vec<Stmt>) -> VmResult<Value> {
    Context::new().execute_script(compile(body))
}

fn eval(body: Vec<Stmt>) -> Value {
    match run(body) {
        Ok(v) => v,
        Err(e) => panic!("Failed: {}", e),
    }
}

fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::binary(op, left, right)
}

fn add_assign(target: Expr, value: Expr) -> Expr {
    Expr::Assign {
        op: Some(BinaryOp::Add),
        target: Box::new(target),
        value: Box::new(value),
    }
}

fn object(props: &[(&str, Expr)]) -> Expr {
    Expr::Object(
        props
            .iter()
            .map(|(key, value)| Property {
                key: key.to_string(),
                value: value.clone(),
            })
            .collect(),
    )
}

fn counting_loop(var: &str, limit: f64, body: Stmt) -> Stmt {
    Stmt::new(StmtKind::For {
        init: Some(ForInit::Var(vec![VarDecl {
            name: Ident::new(var),
            init: Some(Expr::num(0.0)),
        }])),
        test: Some(bin(BinaryOp::Lt, Expr::name(var), Expr::num(limit))),
        update: Some(Expr::update(UpdateOp::Increment, false, Expr::name(var))),
        body: Box::new(body),
    })
}

#[test]
fn test_for_loop_sum() {
    // var s = 0; for (var i = 0; i < 5; i++) s += i; s
    let result = eval(vec![
        Stmt::var("s", Some(Expr::num(0.0))),
        counting_loop("i", 5.0, Stmt::expr(add_assign(Expr::name("s"), Expr::name("i")))),
        Stmt::expr(Expr::name("s")),
    ]);
    assert_eq!(result, Value::from(10));
}

#[test]
fn test_completion_value_is_last_expression() {
    let result = eval(vec![
        Stmt::expr(Expr::num(1.0)),
        Stmt::var("x", Some(Expr::num(2.0))),
        Stmt::expr(Expr::str("done")),
        Stmt::var("y", None),
    ]);
    assert_eq!(result, Value::from("done"));
    assert_eq!(eval(vec![]), Value::Undefined);
}

#[test]
fn test_slot_and_activation_functions_agree() {
    // function f(a) { var b = a * 2; return b + 1; }
    let body = || {
        vec![
            Stmt::var(
                "b",
                Some(bin(BinaryOp::Mul, Expr::name("a"), Expr::num(2.0))),
            ),
            Stmt::ret(Some(bin(BinaryOp::Add, Expr::name("b"), Expr::num(1.0)))),
        ]
    };
    let slots = compile(vec![
        Stmt::function(FunctionNode::new(Some("f"), &["a"], body())),
        Stmt::expr(Expr::call(Expr::name("f"), vec![Expr::num(20.0)])),
    ]);
    assert!(!slots.function(0).needs_activation());

    // Referencing `arguments` moves the variables into an activation object
    let mut activation_body = body();
    activation_body.insert(0, Stmt::expr(Expr::name("arguments")));
    let activation = compile(vec![
        Stmt::function(FunctionNode::new(Some("f"), &["a"], activation_body)),
        Stmt::expr(Expr::call(Expr::name("f"), vec![Expr::num(20.0)])),
    ]);
    assert!(activation.function(0).needs_activation());

    assert_eq!(Context::new().execute_script(slots).unwrap(), Value::from(41));
    assert_eq!(Context::new().execute_script(activation).unwrap(), Value::from(41));
}

#[test]
fn test_repeated_params_agree_across_storage() {
    // function f(a, a) { return a; } f(1, 2)
    let call = || Stmt::expr(Expr::call(Expr::name("f"), vec![Expr::num(1.0), Expr::num(2.0)]));
    let slots = compile(vec![
        Stmt::function(FunctionNode::new(
            Some("f"),
            &["a", "a"],
            vec![Stmt::ret(Some(Expr::name("a")))],
        )),
        call(),
    ]);
    assert!(!slots.function(0).needs_activation());

    let activation = compile(vec![
        Stmt::function(FunctionNode::new(
            Some("f"),
            &["a", "a"],
            vec![
                Stmt::expr(Expr::name("arguments")),
                Stmt::ret(Some(Expr::name("a"))),
            ],
        )),
        call(),
    ]);
    assert!(activation.function(0).needs_activation());

    assert_eq!(Context::new().execute_script(slots).unwrap(), Value::from(2));
    assert_eq!(Context::new().execute_script(activation).unwrap(), Value::from(2));
}

#[test]
fn test_script_vars_are_global_properties() {
    let mut ctx = Context::new();
    ctx.execute_script(compile(vec![Stmt::var("answer", Some(Expr::num(42.0)))]))
        .unwrap();
    assert_eq!(ctx.global().get(&"answer".into()), Value::from(42));

    // A second script sees the first one's globals
    let result = ctx
        .execute_script(compile(vec![Stmt::expr(Expr::name("answer"))]))
        .unwrap();
    assert_eq!(result, Value::from(42));
}

#[test]
fn test_with_resolves_against_object() {
    // var o = {x: 1}; var x = 5; with (o) { x = 2; } o.x * 10 + x
    let result = eval(vec![
        Stmt::var("o", Some(object(&[("x", Expr::num(1.0))]))),
        Stmt::var("x", Some(Expr::num(5.0))),
        Stmt::new(StmtKind::With {
            object: Expr::name("o"),
            body: Box::new(Stmt::block(vec![Stmt::expr(Expr::assign(
                Expr::name("x"),
                Expr::num(2.0),
            ))])),
        }),
        Stmt::expr(bin(
            BinaryOp::Add,
            bin(BinaryOp::Mul, Expr::member(Expr::name("o"), "x"), Expr::num(10.0)),
            Expr::name("x"),
        )),
    ]);
    assert_eq!(result, Value::from(25));
}

#[test]
fn test_with_on_nullish_is_type_error() {
    let err = run(vec![Stmt::new(StmtKind::With {
        object: Expr::Null,
        body: Box::new(Stmt::new(StmtKind::Empty)),
    })])
    .unwrap_err();
    assert!(err.to_string().contains("TypeError"), "{}", err);
}

#[test]
fn test_for_in_visits_keys_in_order() {
    // var o = {a: 1, b: 2, c: 3}; var keys = ""; var sum = 0;
    // for (var k in o) { keys += k; sum += o[k]; } keys + sum
    let result = eval(vec![
        Stmt::var(
            "o",
            Some(object(&[
                ("a", Expr::num(1.0)),
                ("b", Expr::num(2.0)),
                ("c", Expr::num(3.0)),
            ])),
        ),
        Stmt::var("keys", Some(Expr::str(""))),
        Stmt::var("sum", Some(Expr::num(0.0))),
        Stmt::new(StmtKind::ForIn {
            target: ForInTarget::Var(Ident::new("k")),
            object: Expr::name("o"),
            body: Box::new(Stmt::block(vec![
                Stmt::expr(add_assign(Expr::name("keys"), Expr::name("k"))),
                Stmt::expr(add_assign(
                    Expr::name("sum"),
                    Expr::index(Expr::name("o"), Expr::name("k")),
                )),
            ])),
        }),
        Stmt::expr(bin(BinaryOp::Add, Expr::name("keys"), Expr::name("sum"))),
    ]);
    assert_eq!(result, Value::from("abc6"));
}

#[test]
fn test_for_in_over_array_and_null() {
    // var n = 0; for (var i in [7, 8, 9]) n += i; for (var j in null) n = -1; n
    let result = eval(vec![
        Stmt::var("n", Some(Expr::str(""))),
        Stmt::new(StmtKind::ForIn {
            target: ForInTarget::Var(Ident::new("i")),
            object: Expr::Array(vec![Expr::num(7.0), Expr::num(8.0), Expr::num(9.0)]),
            body: Box::new(Stmt::expr(add_assign(Expr::name("n"), Expr::name("i")))),
        }),
        Stmt::new(StmtKind::ForIn {
            target: ForInTarget::Var(Ident::new("j")),
            object: Expr::Null,
            body: Box::new(Stmt::expr(Expr::assign(Expr::name("n"), Expr::num(-1.0)))),
        }),
        Stmt::expr(Expr::name("n")),
    ]);
    assert_eq!(result, Value::from("012"));
}

#[test]
fn test_switch_fallthrough_and_default() {
    // function classify(n) {
    //   switch (n) { case 1: return "one"; case 2: case 3: return "few"; default: return "many"; }
    // }
    let classify = FunctionNode::new(
        Some("classify"),
        &["n"],
        vec![Stmt::new(StmtKind::Switch {
            discriminant: Expr::name("n"),
            cases: vec![
                SwitchCase {
                    test: Some(Expr::num(1.0)),
                    body: vec![Stmt::ret(Some(Expr::str("one")))],
                },
                SwitchCase {
                    test: Some(Expr::num(2.0)),
                    body: vec![],
                },
                SwitchCase {
                    test: Some(Expr::num(3.0)),
                    body: vec![Stmt::ret(Some(Expr::str("few")))],
                },
                SwitchCase {
                    test: None,
                    body: vec![Stmt::ret(Some(Expr::str("many")))],
                },
            ],
        })],
    );
    let call = |n: f64| Expr::call(Expr::name("classify"), vec![Expr::num(n)]);
    let result = eval(vec![
        Stmt::function(classify),
        Stmt::expr(bin(
            BinaryOp::Add,
            bin(BinaryOp::Add, call(1.0), call(2.0)),
            bin(BinaryOp::Add, call(3.0), call(9.0)),
        )),
    ]);
    assert_eq!(result, Value::from("onefewfewmany"));
}

#[test]
fn test_switch_uses_strict_equality_and_break() {
    // var r = ""; switch ("1") { case 1: r = "loose"; break; default: r = "strict"; } r
    let result = eval(vec![
        Stmt::var("r", Some(Expr::str(""))),
        Stmt::new(StmtKind::Switch {
            discriminant: Expr::str("1"),
            cases: vec![
                SwitchCase {
                    test: Some(Expr::num(1.0)),
                    body: vec![
                        Stmt::expr(Expr::assign(Expr::name("r"), Expr::str("loose"))),
                        Stmt::new(StmtKind::Break(None)),
                    ],
                },
                SwitchCase {
                    test: None,
                    body: vec![Stmt::expr(Expr::assign(Expr::name("r"), Expr::str("strict")))],
                },
            ],
        }),
        Stmt::expr(Expr::name("r")),
    ]);
    assert_eq!(result, Value::from("strict"));
}

#[test]
fn test_labeled_break_and_continue() {
    // var n = 0;
    // outer: for (var i = 0; i < 3; i++)
    //   for (var j = 0; j < 3; j++) {
    //     if (j == 1) continue outer;
    //     if (i == 2) break outer;
    //     n++;
    //   }
    // n * 10 + i
    let inner = counting_loop(
        "j",
        3.0,
        Stmt::block(vec![
            Stmt::if_else(
                bin(BinaryOp::Eq, Expr::name("j"), Expr::num(1.0)),
                Stmt::new(StmtKind::Continue(Some("outer".into()))),
                None,
            ),
            Stmt::if_else(
                bin(BinaryOp::Eq, Expr::name("i"), Expr::num(2.0)),
                Stmt::new(StmtKind::Break(Some("outer".into()))),
                None,
            ),
            Stmt::expr(Expr::update(UpdateOp::Increment, false, Expr::name("n"))),
        ]),
    );
    let result = eval(vec![
        Stmt::var("n", Some(Expr::num(0.0))),
        Stmt::new(StmtKind::Labeled {
            label: "outer".into(),
            body: Box::new(counting_loop("i", 3.0, inner)),
        }),
        Stmt::expr(bin(
            BinaryOp::Add,
            bin(BinaryOp::Mul, Expr::name("n"), Expr::num(10.0)),
            Expr::name("i"),
        )),
    ]);
    assert_eq!(result, Value::from(22));
}

#[test]
fn test_do_while_runs_once() {
    // var n = 0; do { n++; } while (false); n
    let result = eval(vec![
        Stmt::var("n", Some(Expr::num(0.0))),
        Stmt::new(StmtKind::DoWhile {
            body: Box::new(Stmt::expr(Expr::update(
                UpdateOp::Increment,
                true,
                Expr::name("n"),
            ))),
            test: Expr::Boolean(false),
        }),
        Stmt::expr(Expr::name("n")),
    ]);
    assert_eq!(result, Value::from(1));
}

#[test]
fn test_typeof() {
    // typeof nope + "," + typeof null + "," + typeof function(){} + "," + typeof "s"
    let comma = || Expr::str(",");
    let parts = [
        Expr::unary(UnaryOp::TypeOf, Expr::name("nope")),
        Expr::unary(UnaryOp::TypeOf, Expr::Null),
        Expr::unary(
            UnaryOp::TypeOf,
            Expr::Function(Box::new(FunctionNode::new(None, &[], vec![]))),
        ),
        Expr::unary(UnaryOp::TypeOf, Expr::str("s")),
        Expr::unary(UnaryOp::TypeOf, Expr::num(1.0)),
    ];
    let joined = parts
        .into_iter()
        .reduce(|acc, part| bin(BinaryOp::Add, bin(BinaryOp::Add, acc, comma()), part))
        .unwrap();
    assert_eq!(
        eval(vec![Stmt::expr(joined)]),
        Value::from("undefined,object,function,string,number")
    );
}

#[test]
fn test_delete_and_in() {
    // var o = {a: 1, b: 2}; delete o.a; ("a" in o) + "," + ("b" in o)
    let result = eval(vec![
        Stmt::var(
            "o",
            Some(object(&[("a", Expr::num(1.0)), ("b", Expr::num(2.0))])),
        ),
        Stmt::expr(Expr::unary(
            UnaryOp::Delete,
            Expr::member(Expr::name("o"), "a"),
        )),
        Stmt::expr(bin(
            BinaryOp::Add,
            bin(
                BinaryOp::Add,
                bin(BinaryOp::In, Expr::str("a"), Expr::name("o")),
                Expr::str(","),
            ),
            bin(BinaryOp::In, Expr::str("b"), Expr::name("o")),
        )),
    ]);
    assert_eq!(result, Value::from("false,true"));
}

#[test]
fn test_delete_global_name() {
    // g = 1; delete g; typeof g
    let result = eval(vec![
        Stmt::expr(Expr::assign(Expr::name("g"), Expr::num(1.0))),
        Stmt::expr(Expr::unary(UnaryOp::Delete, Expr::name("g"))),
        Stmt::expr(Expr::unary(UnaryOp::TypeOf, Expr::name("g"))),
    ]);
    assert_eq!(result, Value::from("undefined"));
}

#[test]
fn test_array_literal_and_length() {
    // var a = [1, 2, 3]; a[5] = 6; a.length + a[1]
    let result = eval(vec![
        Stmt::var(
            "a",
            Some(Expr::Array(vec![
                Expr::num(1.0),
                Expr::num(2.0),
                Expr::num(3.0),
            ])),
        ),
        Stmt::expr(Expr::assign(
            Expr::index(Expr::name("a"), Expr::num(5.0)),
            Expr::num(6.0),
        )),
        Stmt::expr(bin(
            BinaryOp::Add,
            Expr::member(Expr::name("a"), "length"),
            Expr::index(Expr::name("a"), Expr::num(1.0)),
        )),
    ]);
    assert_eq!(result, Value::from(8));
}

#[test]
fn test_logical_and_conditional() {
    // (0 || "x") + (null && 1) + (1 ? "y" : "z")
    let result = eval(vec![Stmt::expr(bin(
        BinaryOp::Add,
        bin(
            BinaryOp::Add,
            Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(Expr::num(0.0)),
                right: Box::new(Expr::str("x")),
            },
            Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(Expr::Null),
                right: Box::new(Expr::num(1.0)),
            },
        ),
        Expr::Conditional {
            test: Box::new(Expr::num(1.0)),
            consequent: Box::new(Expr::str("y")),
            alternate: Box::new(Expr::str("z")),
        },
    ))]);
    assert_eq!(result, Value::from("xnully"));
}

#[test]
fn test_coercions() {
    assert_eq!(
        eval(vec![Stmt::expr(bin(BinaryOp::Add, Expr::num(1.0), Expr::str("2")))]),
        Value::from("12")
    );
    assert_eq!(
        eval(vec![Stmt::expr(bin(BinaryOp::Mul, Expr::str("3"), Expr::str("4")))]),
        Value::from(12)
    );
    assert_eq!(
        eval(vec![Stmt::expr(bin(BinaryOp::Eq, Expr::Null, Expr::Undefined))]),
        Value::from(true)
    );
    assert_eq!(
        eval(vec![Stmt::expr(bin(BinaryOp::StrictEq, Expr::num(1.0), Expr::str("1")))]),
        Value::from(false)
    );
    assert_eq!(
        eval(vec![Stmt::expr(bin(BinaryOp::Ushr, Expr::num(-1.0), Expr::num(28.0)))]),
        Value::from(15)
    );
}

#[test]
fn test_undefined_name_is_reference_error() {
    let err = run(vec![Stmt::expr(Expr::name("missing")).at(3)]).unwrap_err();
    let VmError::Exception(thrown) = &err else {
        panic!("expected an exception, got {:?}", err);
    };
    assert_eq!(thrown.message, "ReferenceError: missing is not defined");
    assert_eq!(thrown.source_name.as_deref(), Some("test.js"));
    assert_eq!(thrown.line, Some(3));
    let error = thrown.value.as_object().expect("error object");
    assert_eq!(error.get(&"name".into()), Value::from("ReferenceError"));
}
