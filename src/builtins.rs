use crate::exec::{coerce, take_recover, ExecCtx, ExecFn, RuntimeError};
use crate::frame::Deferred;
use crate::interp::InterpCore;
use crate::node::NodeId;
use crate::scope::BuiltinId;
use crate::types::TypeId;
use crate::value::{Complex, HostFnVal, MapVal, PtrVal, SliceVal, Value};
use std::sync::Arc;

/// A planned builtin call: argument slots, result slots, and the resolved
/// type operand for `make`/`new`.
#[derive(Clone)]
pub struct BuiltinPlan {
    pub id: BuiltinId,
    pub args: Vec<(usize, Option<TypeId>)>,
    pub spread: bool,
    pub dest: usize,
    pub nret: usize,
    /// Type operand of `make`/`new`.
    pub target: Option<TypeId>,
    /// Zero value of the target's element (make) or of the target (new).
    pub zero: Option<Value>,
    /// Channel capacity semantics for `make(chan T)` vs slices.
    pub target_is_chan: bool,
    pub target_is_map: bool,
}

fn arg_int(args: &[Value], idx: usize) -> i64 {
    match args.get(idx).cloned().map(Value::concrete) {
        Some(Value::Int(v)) => v,
        Some(Value::Uint(v)) => v as i64,
        Some(Value::Float(f)) => f as i64,
        _ => 0,
    }
}

fn arg_float(args: &[Value], idx: usize) -> f64 {
    match args.get(idx).cloned().map(Value::concrete) {
        Some(Value::Float(v)) => v,
        Some(Value::Float32(v)) => v as f64,
        Some(Value::Int(v)) => v as f64,
        Some(Value::Uint(v)) => v as f64,
        _ => 0.0,
    }
}

/// Applies a builtin outside of `recover`, which needs task state and is
/// handled by the generated action directly.
fn apply(
    interp: &Arc<InterpCore>,
    plan: &BuiltinPlan,
    args: Vec<Value>,
) -> Result<Vec<Value>, RuntimeError> {
    match plan.id {
        BuiltinId::Append => {
            let mut iter = args.into_iter();
            let base = iter.next().unwrap_or(Value::Nil).concrete();
            let extra: Vec<Value> = if plan.spread {
                match iter.next().unwrap_or(Value::Nil).concrete() {
                    Value::Slice(s) => s.to_vec(),
                    Value::Nil => Vec::new(),
                    other => vec![other],
                }
            } else {
                iter.collect()
            };
            let out = match base {
                Value::Slice(s) => s.append(extra),
                Value::Nil => SliceVal::from_vec(extra),
                _ => return Err(RuntimeError::internal("append to non-slice")),
            };
            Ok(vec![Value::Slice(out)])
        }
        BuiltinId::Cap => {
            let v = args.first().cloned().unwrap_or(Value::Nil).concrete();
            let n = match v {
                Value::Slice(s) => s.cap(),
                Value::Array(items) => items.len(),
                Value::Chan(c) => c.cap(),
                _ => 0,
            };
            Ok(vec![Value::Int(n as i64)])
        }
        BuiltinId::Close => match args.first().cloned().unwrap_or(Value::Nil).concrete() {
            Value::Chan(c) => {
                c.close()?;
                Ok(vec![])
            }
            Value::Nil => Err(RuntimeError::CloseOfNil),
            _ => Err(RuntimeError::internal("close of non-channel")),
        },
        BuiltinId::Complex => Ok(vec![Value::Complex(Complex::new(
            arg_float(&args, 0),
            arg_float(&args, 1),
        ))]),
        BuiltinId::Copy => {
            let dst = args.first().cloned().unwrap_or(Value::Nil).concrete();
            let src = args.get(1).cloned().unwrap_or(Value::Nil).concrete();
            let n = match (dst, src) {
                (Value::Slice(d), Value::Slice(s)) => {
                    let items = s.to_vec();
                    let n = d.len.min(items.len());
                    for (i, item) in items.into_iter().take(n).enumerate() {
                        d.set(i, item);
                    }
                    n
                }
                (Value::Slice(d), Value::Str(s)) => {
                    let bytes = s.as_bytes();
                    let n = d.len.min(bytes.len());
                    for (i, b) in bytes.iter().take(n).enumerate() {
                        d.set(i, Value::Uint(*b as u64));
                    }
                    n
                }
                _ => 0,
            };
            Ok(vec![Value::Int(n as i64)])
        }
        BuiltinId::Delete => {
            if let Value::Map(m) = args.first().cloned().unwrap_or(Value::Nil).concrete() {
                let key = args.get(1).cloned().unwrap_or(Value::Nil).concrete();
                m.map.write().remove(&key.to_key()?);
            }
            Ok(vec![])
        }
        BuiltinId::Imag => {
            let c = match args.first().cloned().unwrap_or(Value::Nil).concrete() {
                Value::Complex(c) => c,
                _ => Complex::default(),
            };
            Ok(vec![Value::Float(c.im)])
        }
        BuiltinId::Real => {
            let c = match args.first().cloned().unwrap_or(Value::Nil).concrete() {
                Value::Complex(c) => c,
                Value::Float(re) => Complex::new(re, 0.0),
                Value::Int(re) => Complex::new(re as f64, 0.0),
                _ => Complex::default(),
            };
            Ok(vec![Value::Float(c.re)])
        }
        BuiltinId::Len => {
            let v = args.first().cloned().unwrap_or(Value::Nil).concrete();
            let n = match v {
                Value::Str(s) => s.len(),
                Value::Slice(s) => s.len,
                Value::Array(items) => items.len(),
                Value::Map(m) => m.map.read().len(),
                Value::Chan(c) => c.len(),
                _ => 0,
            };
            Ok(vec![Value::Int(n as i64)])
        }
        BuiltinId::Make => {
            if plan.target_is_chan {
                let cap = if args.is_empty() { 0 } else { arg_int(&args, 0) };
                return Ok(vec![Value::Chan(crate::channel::ChanVal::new(
                    cap.max(0) as usize
                ))]);
            }
            if plan.target_is_map {
                return Ok(vec![Value::Map(MapVal::new())]);
            }
            let len = arg_int(&args, 0).max(0) as usize;
            let cap = if args.len() > 1 {
                (arg_int(&args, 1).max(0) as usize).max(len)
            } else {
                len
            };
            let zero = plan.zero.clone().unwrap_or(Value::Nil);
            Ok(vec![Value::Slice(SliceVal::with_capacity(
                vec![zero.clone(); len],
                vec![zero; cap - len],
            ))])
        }
        BuiltinId::New => {
            let zero = plan.zero.clone().unwrap_or(Value::Nil);
            Ok(vec![Value::Ptr(PtrVal::cell(zero))])
        }
        BuiltinId::Panic => Err(RuntimeError::Panicked {
            value: Box::new(args.into_iter().next().unwrap_or(Value::Nil)),
        }),
        BuiltinId::Print => {
            let mut out = String::new();
            for arg in &args {
                out.push_str(&arg.to_string());
            }
            interp.write_out(&out);
            Ok(vec![])
        }
        BuiltinId::Println => {
            let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            interp.write_out(&format!("{}\n", rendered.join(" ")));
            Ok(vec![])
        }
        BuiltinId::Recover => Ok(vec![Value::Nil]),
    }
}

pub fn gen_builtin(plan: BuiltinPlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx: &ExecCtx, frame| {
        if plan.id == BuiltinId::Recover {
            let value = take_recover(ctx);
            frame.set(plan.dest, value);
            return Ok(tnext);
        }
        let args: Vec<Value> = plan
            .args
            .iter()
            .map(|(slot, wrap)| coerce(frame.get(*slot), *wrap))
            .collect();
        let results = apply(&ctx.interp, &plan, args)?;
        let mut data = frame.data.write();
        for (idx, value) in results.into_iter().take(plan.nret).enumerate() {
            let slot = plan.dest + idx;
            if slot < data.len() {
                data[slot] = value;
            }
        }
        Ok(tnext)
    })
}

/// `defer print(...)` and friends: wraps the builtin in a host callable so
/// the deferred-call machinery can run it at function exit.
pub fn gen_defer_builtin(plan: BuiltinPlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx: &ExecCtx, frame| {
        let args: Vec<Value> = plan
            .args
            .iter()
            .map(|(slot, wrap)| coerce(frame.get(*slot), *wrap))
            .collect();
        let interp = ctx.interp.clone();
        let inner = plan.clone();
        let callee = Value::HostFn(HostFnVal {
            name: Arc::from(plan.id.name()),
            sig: crate::types::BUILTIN,
            call: Arc::new(move |args: &[Value]| apply(&interp, &inner, args.to_vec())),
        });
        frame.push_defer(Deferred { callee, args });
        Ok(tnext)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::InterpCore;

    fn test_plan(id: BuiltinId) -> BuiltinPlan {
        BuiltinPlan {
            id,
            args: Vec::new(),
            spread: false,
            dest: 0,
            nret: 1,
            target: None,
            zero: Some(Value::Int(0)),
            target_is_chan: false,
            target_is_map: false,
        }
    }

    #[test]
    fn append_grows_nil_and_existing_slices() {
        let interp = InterpCore::for_tests();
        let out = apply(
            &interp,
            &test_plan(BuiltinId::Append),
            vec![Value::Nil, Value::Int(1), Value::Int(2)],
        )
        .expect("append");
        match &out[0] {
            Value::Slice(s) => assert_eq!(s.len, 2),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn len_and_cap_cover_the_builtin_container_kinds() {
        let interp = InterpCore::for_tests();
        let slice = Value::Slice(SliceVal::with_capacity(
            vec![Value::Int(1)],
            vec![Value::Int(0); 3],
        ));
        let out = apply(&interp, &test_plan(BuiltinId::Len), vec![slice.clone()]).expect("len");
        assert!(out[0].equal(&Value::Int(1)));
        let out = apply(&interp, &test_plan(BuiltinId::Cap), vec![slice]).expect("cap");
        assert!(out[0].equal(&Value::Int(4)));
        let out = apply(&interp, &test_plan(BuiltinId::Len), vec![Value::str("héllo")])
            .expect("len");
        assert!(out[0].equal(&Value::Int(6)));
    }

    #[test]
    fn panic_builtin_carries_its_value() {
        let interp = InterpCore::for_tests();
        let err = apply(
            &interp,
            &test_plan(BuiltinId::Panic),
            vec![Value::str("boom")],
        )
        .expect_err("panic");
        assert!(err.panic_value().equal(&Value::str("boom")));
    }

    #[test]
    fn make_respects_len_and_cap() {
        let interp = InterpCore::for_tests();
        let out = apply(
            &interp,
            &test_plan(BuiltinId::Make),
            vec![Value::Int(2), Value::Int(5)],
        )
        .expect("make");
        match &out[0] {
            Value::Slice(s) => {
                assert_eq!(s.len, 2);
                assert_eq!(s.cap(), 5);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
