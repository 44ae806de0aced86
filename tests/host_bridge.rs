mod common;

use common::interp_with_output;
use skiff::{Exports, HostExport, HostType, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn text_exports() -> Exports {
    let mut text: HashMap<String, HostExport> = HashMap::new();
    text.insert(
        "Upper".to_string(),
        HostExport::func(&[HostType::String], &[HostType::String], {
            Arc::new(|args: &[Value]| match args {
                [Value::Str(s)] => Ok(vec![Value::str(&s.to_uppercase())]),
                other => Err(skiff::exec::RuntimeError::Host {
                    message: format!("text.Upper: bad args: {other:?}"),
                }),
            })
        }),
    );
    text.insert(
        "Repeat".to_string(),
        HostExport::func(&[HostType::String, HostType::Int], &[HostType::String], {
            Arc::new(|args: &[Value]| match args {
                [Value::Str(s), Value::Int(n)] => {
                    Ok(vec![Value::str(&s.repeat((*n).max(0) as usize))])
                }
                other => Err(skiff::exec::RuntimeError::Host {
                    message: format!("text.Repeat: bad args: {other:?}"),
                }),
            })
        }),
    );
    text.insert("Version".to_string(), HostExport::Const(Value::Int(3)));

    let mut exports = Exports::new();
    exports.insert("text".to_string(), text);
    exports
}

fn fmt_exports() -> Exports {
    let mut fmt: HashMap<String, HostExport> = HashMap::new();
    // Placeholder bodies: registering a package named `fmt` rebinds the
    // print family onto the interpreter's streams.
    fmt.insert(
        "Println".to_string(),
        HostExport::variadic_func(&[HostType::Any], &[HostType::Int], {
            Arc::new(|_args: &[Value]| Ok(vec![Value::Int(0)]))
        }),
    );
    fmt.insert(
        "Printf".to_string(),
        HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::Int], {
            Arc::new(|_args: &[Value]| Ok(vec![Value::Int(0)]))
        }),
    );
    fmt.insert(
        "Sprintf".to_string(),
        HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::String], {
            Arc::new(|_args: &[Value]| Ok(vec![Value::str("")]))
        }),
    );
    let mut exports = Exports::new();
    exports.insert("fmt".to_string(), fmt);
    exports
}

#[test]
fn interpreted_code_calls_host_functions() {
    let (interp, _, _) = interp_with_output();
    interp.use_exports(text_exports());
    let src = r#"
import "text"
text.Upper("go") + text.Repeat("!", 3)
"#;
    let got = interp.eval(src).expect("eval");
    assert!(got.equal(&Value::str("GO!!!")));
}

#[test]
fn host_constants_are_visible() {
    let (interp, _, _) = interp_with_output();
    interp.use_exports(text_exports());
    let src = r#"
import "text"
text.Version * 10
"#;
    let got = interp.eval(src).expect("eval");
    assert!(got.equal(&Value::Int(30)));
}

#[test]
fn host_errors_surface_as_panics() {
    let (interp, _, _) = interp_with_output();
    let mut bad: HashMap<String, HostExport> = HashMap::new();
    bad.insert(
        "Fail".to_string(),
        HostExport::func(&[], &[HostType::Int], {
            Arc::new(|_args: &[Value]| {
                Err(skiff::exec::RuntimeError::Host {
                    message: "backend unavailable".to_string(),
                })
            })
        }),
    );
    let mut exports = Exports::new();
    exports.insert("svc".to_string(), bad);
    interp.use_exports(exports);

    match interp.eval("import \"svc\"\nsvc.Fail()\n") {
        Err(skiff::Error::Panic { value, .. }) => {
            assert!(value.to_string().contains("backend unavailable"))
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn registering_fmt_redirects_prints_to_the_interpreter_streams() {
    let (interp, out, _) = interp_with_output();
    interp.use_exports(fmt_exports());
    let src = r#"
import "fmt"
fmt.Println("hello", 42)
fmt.Printf("%d-%s\n", 7, "x")
"#;
    interp.eval(src).expect("eval");
    assert_eq!(out.contents(), "hello 42\n7-x\n");
}

#[test]
fn sprintf_formats_without_printing() {
    let (interp, out, _) = interp_with_output();
    interp.use_exports(fmt_exports());
    let src = r#"
import "fmt"
fmt.Sprintf("%s=%d", "n", 5)
"#;
    let got = interp.eval(src).expect("eval");
    assert!(got.equal(&Value::str("n=5")));
    assert_eq!(out.contents(), "");
}

#[test]
fn host_functions_work_from_deferred_and_concurrent_contexts() {
    let (interp, _, _) = interp_with_output();
    interp.use_exports(text_exports());
    let src = r#"
import "text"
done := make(chan string)
go func() {
    done <- text.Upper("bg")
}()
<-done
"#;
    let got = interp.eval(src).expect("eval");
    assert!(got.equal(&Value::str("BG")));
}

#[test]
fn missing_packages_and_symbols_are_reported() {
    let (interp, _, _) = interp_with_output();
    interp.use_exports(text_exports());
    match interp.eval("import \"nosuch\"\n1\n") {
        Err(skiff::Error::Compile(err)) => {
            assert!(err.message.contains("package not found"), "{}", err.message)
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
    match interp.eval("import \"text\"\ntext.Missing()\n") {
        Err(skiff::Error::Compile(err)) => {
            assert!(err.message.contains("undefined"), "{}", err.message)
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}
