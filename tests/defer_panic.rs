mod common;

use common::{eval, interp_with_output};
use skiff::{Error, Value};

#[test]
fn defers_run_in_reverse_order_at_exit() {
    let (interp, out, _) = interp_with_output();
    let src = r#"
func f() {
    defer print("A")
    defer print("B")
    defer print("C")
}
f()
"#;
    interp.eval(src).expect("eval");
    assert_eq!(out.contents(), "CBA");
}

#[test]
fn defer_arguments_are_evaluated_at_the_defer_statement() {
    let (interp, out, _) = interp_with_output();
    let src = r#"
func f() {
    x := 1
    defer print(x)
    x = 2
    print(x)
}
f()
"#;
    interp.eval(src).expect("eval");
    assert_eq!(out.contents(), "21");
}

#[test]
fn recover_consumes_a_panic_and_the_function_returns_normally() {
    let src = r#"
func f() (rec string) {
    defer func() {
        r := recover()
        if r != nil {
            rec = r.(string)
        }
    }()
    for i := 0; i < 10; i++ {
        if i == 2 {
            panic("boom")
        }
    }
    return "no panic"
}
f()
"#;
    assert!(eval(src).equal(&Value::str("boom")));
}

#[test]
fn defers_run_even_when_a_panic_unwinds() {
    let (interp, out, _) = interp_with_output();
    let src = r#"
func f() {
    defer print("first")
    defer print("second")
    panic("stop")
}
f()
"#;
    let err = interp.eval(src).expect_err("panic must surface");
    assert_eq!(out.contents(), "secondfirst");
    match err {
        Error::Panic { value, stack } => {
            assert!(value.equal(&Value::str("stop")));
            assert!(!stack.is_empty());
        }
        other => panic!("unexpected error kind: {other}"),
    }
}

#[test]
fn unrecovered_panics_surface_to_the_caller() {
    let (interp, _, _) = interp_with_output();
    match interp.eval("panic(42)\n") {
        Err(Error::Panic { value, .. }) => assert!(value.equal(&Value::Int(42))),
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn runtime_faults_propagate_like_panics() {
    let (interp, out, _) = interp_with_output();
    let src = r#"
func f() int {
    defer print("cleanup")
    a := 0
    return 1 / a
}
f()
"#;
    let err = interp.eval(src).expect_err("division by zero");
    assert_eq!(out.contents(), "cleanup");
    match err {
        Error::Panic { value, .. } => {
            assert!(value.to_string().contains("divide by zero"))
        }
        other => panic!("unexpected error kind: {other}"),
    }
}

#[test]
fn runtime_faults_are_recoverable() {
    let src = r#"
func safeIndex(xs []int, i int) (v int, caught bool) {
    defer func() {
        if recover() != nil {
            caught = true
        }
    }()
    return xs[i], false
}
xs := []int{1, 2}
_, caught := safeIndex(xs, 9)
caught
"#;
    assert!(eval(src).equal(&Value::Bool(true)));
}

#[test]
fn a_recovered_panic_does_not_repropagate() {
    let src = r#"
func quiet() string {
    defer func() {
        recover()
    }()
    panic("swallowed")
}
func run() string {
    quiet()
    return "after"
}
run()
"#;
    assert!(eval(src).equal(&Value::str("after")));
}

#[test]
fn panics_in_defers_replace_the_pending_panic() {
    let (interp, _, _) = interp_with_output();
    let src = r#"
func f() {
    defer panic("second")
    panic("first")
}
f()
"#;
    match interp.eval(src) {
        Err(Error::Panic { value, .. }) => assert!(value.equal(&Value::str("second"))),
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn nil_map_writes_panic() {
    let (interp, _, _) = interp_with_output();
    let src = r#"
var m map[string]int
m["x"] = 1
"#;
    match interp.eval(src) {
        Err(Error::Panic { value, .. }) => {
            assert!(value.to_string().contains("nil map"))
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}
