use crate::exec::{call_value, ExecCtx, RuntimeError, TaskState};
use crate::interp::InterpCore;
use crate::types::{self, TypeId, TypeStore};
use crate::value::{FuncVal, HostCall, HostFnVal, HostVal, MapVal, SliceVal, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Portable type tags for host function signatures. Registration converts
/// them into interpreter type descriptors so calls typecheck like any
/// other function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostType {
    Bool,
    Int,
    Uint,
    Float,
    String,
    /// The empty interface: any value.
    Any,
    /// The language's `error` interface.
    Error,
}

impl HostType {
    pub fn type_id(self) -> TypeId {
        match self {
            HostType::Bool => types::BOOL,
            HostType::Int => types::INT,
            HostType::Uint => types::UINT,
            HostType::Float => types::FLOAT64,
            HostType::String => types::STRING,
            HostType::Any => types::EMPTY_IFACE,
            HostType::Error => types::ERROR,
        }
    }
}

/// Builds a host value satisfying one host interface from a table of
/// (method name, callable) pairs. Wrapper builders are preregistered per
/// interface; the bridge instantiates them when an interpreted value must
/// cross as that interface.
pub type WrapBuilder = Arc<dyn Fn(Vec<(String, Value)>) -> Value + Send + Sync>;

/// One exported symbol of a host package.
#[derive(Clone)]
pub enum HostExport {
    Func {
        params: Vec<HostType>,
        results: Vec<HostType>,
        variadic: bool,
        call: HostCall,
    },
    Const(Value),
    Wrapper(WrapBuilder),
}

impl HostExport {
    pub fn func(params: &[HostType], results: &[HostType], call: HostCall) -> HostExport {
        HostExport::Func {
            params: params.to_vec(),
            results: results.to_vec(),
            variadic: false,
            call,
        }
    }

    pub fn variadic_func(params: &[HostType], results: &[HostType], call: HostCall) -> HostExport {
        HostExport::Func {
            params: params.to_vec(),
            results: results.to_vec(),
            variadic: true,
            call,
        }
    }
}

/// The map of host packages per import path.
pub type Exports = HashMap<String, HashMap<String, HostExport>>;

/// A registered host symbol after signature resolution.
#[derive(Clone)]
pub struct BinSym {
    pub value: Option<Value>,
    pub typ: TypeId,
    pub wrapper: Option<WrapBuilder>,
}

/// Registered host packages: path → name → resolved symbol.
pub type BinPkgs = HashMap<String, HashMap<String, BinSym>>;

/// Converts one export into its resolved registry form, creating the
/// signature descriptor in `store`.
pub fn resolve_export(store: &mut TypeStore, name: &str, export: &HostExport) -> BinSym {
    match export {
        HostExport::Func {
            params,
            results,
            variadic,
            call,
        } => {
            let sig = store.func_of(
                params.iter().map(|p| p.type_id()).collect(),
                results.iter().map(|r| r.type_id()).collect(),
                *variadic,
            );
            BinSym {
                value: Some(Value::HostFn(HostFnVal {
                    name: Arc::from(name),
                    sig,
                    call: call.clone(),
                })),
                typ: sig,
                wrapper: None,
            }
        }
        HostExport::Const(value) => {
            let typ = match value {
                Value::Bool(_) => types::BOOL,
                Value::Int(_) => types::INT,
                Value::Uint(_) => types::UINT,
                Value::Float(_) => types::FLOAT64,
                Value::Str(_) => types::STRING,
                _ => types::EMPTY_IFACE,
            };
            BinSym {
                value: Some(value.clone()),
                typ,
                wrapper: None,
            }
        }
        HostExport::Wrapper(builder) => BinSym {
            value: None,
            typ: types::EMPTY_IFACE,
            wrapper: Some(builder.clone()),
        },
    }
}

// ---- value marshalling ----

/// Plain host-side data, the bridge's marshalling target for values that
/// cross by structure rather than by reference.
#[derive(Clone, Debug, PartialEq)]
pub enum HostData {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    List(Vec<HostData>),
    Pairs(Vec<(HostData, HostData)>),
}

/// Marshals an interpreter value out to host data. Interface boxes are
/// transparent; reference values are deep-copied.
pub fn bridge_out(value: &Value) -> HostData {
    match value {
        Value::Nil => HostData::Nil,
        Value::Bool(b) => HostData::Bool(*b),
        Value::Int(v) => HostData::Int(*v),
        Value::Uint(v) => HostData::Uint(*v),
        Value::Float(v) => HostData::Float(*v),
        Value::Float32(v) => HostData::Float(*v as f64),
        Value::Str(s) => HostData::Str(s.to_string()),
        Value::Slice(s) => HostData::List(s.to_vec().iter().map(bridge_out).collect()),
        Value::Array(items) => HostData::List(items.iter().map(bridge_out).collect()),
        Value::Map(m) => {
            let inner = m.map.read();
            let mut pairs: Vec<(HostData, HostData)> = inner
                .iter()
                .map(|(k, v)| (bridge_out(&crate::exec::key_to_value(k)), bridge_out(v)))
                .collect();
            pairs.sort_by(|a, b| format!("{:?}", a.0).cmp(&format!("{:?}", b.0)));
            HostData::Pairs(pairs)
        }
        Value::Struct(s) => HostData::List(s.fields.iter().map(bridge_out).collect()),
        Value::Iface(b) => bridge_out(&b.val),
        _ => HostData::Nil,
    }
}

/// Marshals host data into an interpreter value.
pub fn bridge_in(data: HostData) -> Value {
    match data {
        HostData::Nil => Value::Nil,
        HostData::Bool(b) => Value::Bool(b),
        HostData::Int(v) => Value::Int(v),
        HostData::Uint(v) => Value::Uint(v),
        HostData::Float(v) => Value::Float(v),
        HostData::Str(s) => Value::str(&s),
        HostData::List(items) => {
            Value::Slice(SliceVal::from_vec(items.into_iter().map(bridge_in).collect()))
        }
        HostData::Pairs(pairs) => {
            let map = MapVal::new();
            {
                let mut inner = map.map.write();
                for (k, v) in pairs {
                    if let Ok(key) = bridge_in(k).to_key() {
                        inner.insert(key, bridge_in(v));
                    }
                }
            }
            Value::Map(map)
        }
    }
}

// ---- outbound function wrapper ----

/// Wraps an interpreted function value in a host callable that allocates a
/// frame, drives the CFG to completion, and returns the result slots.
pub fn wrap_function(interp: &Arc<InterpCore>, func: FuncVal) -> HostFnVal {
    let sig = func
        .unit
        .node(func.node)
        .typ
        .unwrap_or(types::EMPTY_IFACE);
    let interp = interp.clone();
    let name: Arc<str> = Arc::from("wrapped");
    HostFnVal {
        name: name.clone(),
        sig,
        call: Arc::new(move |args: &[Value]| {
            let ctx = ExecCtx {
                interp: interp.clone(),
                unit: func.unit.clone(),
                task: Arc::new(TaskState::default()),
                run_id: interp.runid(),
            };
            call_value(&ctx, &Value::Func(func.clone()), args.to_vec())
        }),
    }
}

// ---- interface wrappers ----

/// The host-side form of an interpreted `error` value.
pub struct WrappedError {
    message: Box<dyn Fn() -> String + Send + Sync>,
}

impl fmt::Debug for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (self.message)())
    }
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (self.message)())
    }
}

impl std::error::Error for WrappedError {}

/// The preregistered wrapper for the `error` interface: given the
/// interpreted value's `Error` method, builds a host error object.
pub fn error_wrapper() -> WrapBuilder {
    Arc::new(|methods: Vec<(String, Value)>| {
        let call = methods
            .into_iter()
            .find(|(name, _)| name == "Error")
            .map(|(_, callable)| callable);
        let message: Box<dyn Fn() -> String + Send + Sync> = match call {
            Some(Value::HostFn(f)) => Box::new(move || match (f.call)(&[]) {
                Ok(results) => results
                    .first()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                Err(err) => err.to_string(),
            }),
            _ => Box::new(|| "error".to_string()),
        };
        let wrapped = WrappedError { message };
        let repr: Arc<str> = Arc::from(wrapped.to_string());
        Value::Host(HostVal {
            name: Arc::from("error"),
            obj: Arc::new(wrapped),
            repr,
        })
    })
}

/// Instantiates the wrapper registered for `iface_name`, threading the
/// interpreted receiver's methods as host callables.
pub fn satisfy_interface(
    interp: &Arc<InterpCore>,
    iface_name: &str,
    methods: Vec<(String, FuncVal)>,
) -> Option<Value> {
    let builder = {
        let globals = interp.globals();
        globals
            .bin_pkgs
            .get("")
            .and_then(|pkg| pkg.get(&format!("_{iface_name}")))
            .and_then(|sym| sym.wrapper.clone())
    }?;
    let table: Vec<(String, Value)> = methods
        .into_iter()
        .map(|(name, func)| (name, Value::HostFn(wrap_function(interp, func))))
        .collect();
    Some(builder(table))
}

// ---- stdio virtualisation ----

/// A minimal formatting-verb renderer for the `fmt` host package: handles
/// `%v`, `%d`, `%s`, `%f`, `%t`, `%q` and `%%`.
pub fn format_verbs(spec: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut chars = spec.chars().peekable();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('q') => {
                let arg = args.get(next_arg).cloned().unwrap_or(Value::Nil);
                next_arg += 1;
                out.push_str(&format!("{:?}", arg.to_string()));
            }
            Some('f') => {
                let arg = args.get(next_arg).cloned().unwrap_or(Value::Nil);
                next_arg += 1;
                match arg.concrete() {
                    Value::Float(f) => out.push_str(&format!("{f:.6}")),
                    Value::Float32(f) => out.push_str(&format!("{f:.6}")),
                    other => out.push_str(&other.to_string()),
                }
            }
            Some('v') | Some('d') | Some('s') | Some('t') => {
                let arg = args.get(next_arg).cloned().unwrap_or(Value::Nil);
                next_arg += 1;
                out.push_str(&arg.to_string());
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Redefines the print family of a registered `fmt` package to write to
/// the interpreter's configured streams rather than the process streams.
/// Escaping the virtualised streams by writing to raw file descriptors
/// remains possible.
pub fn fix_stdio(interp: &Arc<InterpCore>) {
    let print = {
        let interp = interp.clone();
        HostExport::variadic_func(&[HostType::Any], &[HostType::Int], {
            Arc::new(move |args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
                let rendered: Vec<String> = spread_args(args).iter().map(|a| a.to_string()).collect();
                let text = rendered.join(" ");
                interp.write_out(&text);
                Ok(vec![Value::Int(text.len() as i64)])
            })
        })
    };
    let println = {
        let interp = interp.clone();
        HostExport::variadic_func(&[HostType::Any], &[HostType::Int], {
            Arc::new(move |args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
                let rendered: Vec<String> = spread_args(args).iter().map(|a| a.to_string()).collect();
                let text = format!("{}\n", rendered.join(" "));
                interp.write_out(&text);
                Ok(vec![Value::Int(text.len() as i64)])
            })
        })
    };
    let printf = {
        let interp = interp.clone();
        HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::Int], {
            Arc::new(move |args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
                let spec = match args.first().cloned().map(Value::concrete) {
                    Some(Value::Str(s)) => s.to_string(),
                    _ => String::new(),
                };
                let rest = spread_args(&args[1.min(args.len())..]);
                let text = format_verbs(&spec, &rest);
                interp.write_out(&text);
                Ok(vec![Value::Int(text.len() as i64)])
            })
        })
    };
    let sprintf = HostExport::variadic_func(&[HostType::String, HostType::Any], &[HostType::String], {
        Arc::new(move |args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
            let spec = match args.first().cloned().map(Value::concrete) {
                Some(Value::Str(s)) => s.to_string(),
                _ => String::new(),
            };
            let rest = spread_args(&args[1.min(args.len())..]);
            Ok(vec![Value::str(&format_verbs(&spec, &rest))])
        })
    });

    let mut globals = interp.globals_mut();
    let resolved: Vec<(&str, BinSym)> = vec![
        ("Print", resolve_export(&mut globals.types, "Print", &print)),
        ("Println", resolve_export(&mut globals.types, "Println", &println)),
        ("Printf", resolve_export(&mut globals.types, "Printf", &printf)),
        ("Sprintf", resolve_export(&mut globals.types, "Sprintf", &sprintf)),
    ];
    let pkg = globals.bin_pkgs.entry("fmt".to_string()).or_default();
    for (name, sym) in resolved {
        pkg.insert(name.to_string(), sym);
    }
}

/// The variadic tail arrives packed in a slice; unpack for formatting.
fn spread_args(args: &[Value]) -> Vec<Value> {
    if args.len() == 1 {
        if let Value::Slice(s) = args[0].clone().concrete() {
            return s.to_vec();
        }
    }
    args.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_round_trips_representable_values() {
        let values = vec![
            Value::Nil,
            Value::Bool(true),
            Value::Int(-3),
            Value::Uint(7),
            Value::Float(1.5),
            Value::str("hello"),
            Value::Slice(SliceVal::from_vec(vec![Value::Int(1), Value::str("x")])),
        ];
        for v in values {
            let out = bridge_out(&v);
            let back = bridge_in(out.clone());
            assert_eq!(bridge_out(&back), out);
        }
    }

    #[test]
    fn format_verbs_render_common_forms() {
        assert_eq!(
            format_verbs("%d + %d = %v", &[Value::Int(1), Value::Int(2), Value::Int(3)]),
            "1 + 2 = 3"
        );
        assert_eq!(format_verbs("100%%", &[]), "100%");
        assert_eq!(format_verbs("%s!", &[Value::str("go")]), "go!");
    }

    #[test]
    fn error_wrapper_builds_a_host_error() {
        let builder = error_wrapper();
        let callable = Value::HostFn(HostFnVal {
            name: Arc::from("Error"),
            sig: types::EMPTY_IFACE,
            call: Arc::new(|_| Ok(vec![Value::str("kaput")])),
        });
        let wrapped = builder(vec![("Error".to_string(), callable)]);
        match wrapped {
            Value::Host(h) => assert_eq!(h.repr.as_ref(), "kaput"),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
