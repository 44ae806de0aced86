use skiff::{Error, Interpreter, Options};
use std::env;
use std::process;

fn main() {
    let mut args = env::args().skip(1);
    let interp = Interpreter::new(Options::default());
    interp.use_exports(host_catalog());

    match args.next() {
        None => {
            if let Err(err) = interp.repl() {
                eprintln!("error: {err}");
                process::exit(1);
            }
        }
        Some(path) => {
            if args.next().is_some() {
                eprintln!("usage: skiff [file.skf]");
                process::exit(2);
            }
            match interp.eval_path(&path) {
                Ok(_) => {}
                Err(Error::Io(err)) => {
                    eprintln!("error: failed to read `{path}`: {err}");
                    process::exit(2);
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    process::exit(1);
                }
            }
        }
    }
}

/// The driver's minimal host catalog: the `fmt` print family, virtualised
/// onto the interpreter's streams at registration.
fn host_catalog() -> skiff::Exports {
    use skiff::{HostExport, HostType, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    let mut fmt: HashMap<String, HostExport> = HashMap::new();
    // Registration of a package named `fmt` rebinds the print family to
    // the interpreter's streams; these defaults only serve as the
    // signature carriers.
    fmt.insert(
        "Println".to_string(),
        HostExport::variadic_func(&[HostType::Any], &[HostType::Int], {
            Arc::new(move |_args: &[Value]| Ok(vec![Value::Int(0)]))
        }),
    );
    fmt.insert(
        "Print".to_string(),
        HostExport::variadic_func(&[HostType::Any], &[HostType::Int], {
            Arc::new(move |_args: &[Value]| Ok(vec![Value::Int(0)]))
        }),
    );
    fmt.insert(
        "Printf".to_string(),
        HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::Int], {
            Arc::new(move |_args: &[Value]| Ok(vec![Value::Int(0)]))
        }),
    );
    fmt.insert(
        "Sprintf".to_string(),
        HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::String], {
            Arc::new(move |_args: &[Value]| Ok(vec![Value::str("")]))
        }),
    );

    let mut exports = skiff::Exports::new();
    exports.insert("fmt".to_string(), fmt);
    exports
}
