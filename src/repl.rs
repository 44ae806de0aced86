use crate::interp::{CancelToken, Error, Interpreter};
use crate::scope::{SymKind, Symbol};
use crate::value::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

/// Runs a read-eval-print loop over the interpreter's configured input.
/// Lines accumulate until the parser stops reporting incomplete input;
/// each complete chunk evaluates in a fresh cancellable context, so an
/// interrupt from the host cancels the evaluation without ending the
/// loop. Returns the last value and error state when input ends.
pub fn run(interp: &Interpreter) -> Result<Value, Error> {
    preimport(interp);

    let core = interp.core().clone();
    let reader: Box<dyn Read + Send> = match core.take_stdin() {
        Some(reader) => reader,
        None => Box::new(std::io::stdin()),
    };
    let tty = core.stdin_tty();
    let mut lines = BufReader::new(reader).lines();

    let mut src = String::new();
    let mut last = Ok(Value::Nil);

    prompt(&core, tty, &Value::Nil, true);
    loop {
        let Some(line) = lines.next() else {
            return last;
        };
        let line = line?;
        src.push_str(&line);
        src.push('\n');

        let token = CancelToken::new();
        let result = interp.eval_with_context(&token, &src);
        match &result {
            Err(Error::Parse(err)) if err.is_incomplete(&line) => {
                // Keep reading; the construct is unfinished.
                continue;
            }
            Err(Error::Parse(err)) => {
                core.write_err(&format!("{err}\n"));
            }
            Err(Error::Panic { value, stack }) => {
                core.write_err(&format!("{value}\n"));
                core.write_err(&format!("{stack}\n"));
            }
            Err(Error::Cancelled) => {
                core.write_err("interrupted\n");
            }
            Err(err) => {
                core.write_err(&format!("{err}\n"));
            }
            Ok(_) => {}
        }
        src.clear();

        let value = match &result {
            Ok(v) => v.clone(),
            Err(_) => Value::Nil,
        };
        let silent = value.is_nil() || result.is_err();
        prompt(&core, tty, &value, silent);
        last = result;
    }
}

fn prompt(core: &crate::interp::InterpCore, tty: bool, value: &Value, silent: bool) {
    if !tty {
        return;
    }
    if !silent {
        core.write_out(&format!(": {value}\n"));
    }
    core.write_out("> ");
}

/// Preimports registered host packages under their base names so
/// interactive sessions can use them without import statements. Ambiguous
/// base names (two paths ending alike) are skipped and must be imported
/// explicitly.
fn preimport(interp: &Interpreter) {
    let core = interp.core();
    let mut globals = core.globals_mut();

    let mut by_base: HashMap<String, Vec<String>> = HashMap::new();
    for path in globals.bin_pkgs.keys() {
        if path.is_empty() {
            continue;
        }
        let base = path.rsplit('/').next().unwrap_or(path).to_string();
        by_base.entry(base).or_default().push(path.clone());
    }

    let universe = globals.universe;
    for (base, paths) in by_base {
        if paths.len() != 1 {
            continue;
        }
        if globals.scopes.lookup_local(universe, &base).is_some() {
            continue;
        }
        let typ = globals.types.bin_pkg(&paths[0]);
        let mut sym = Symbol::new(SymKind::Package, &base, universe);
        sym.typ = Some(typ);
        let _ = globals.scopes.declare(sym);
    }
}
