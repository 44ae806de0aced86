use crate::ast::{BinaryOp, UnaryOp};
use crate::exec::RuntimeError;
use crate::types::{self, Cat, TypeId, TypeStore};
use crate::value::{Complex, SliceVal, Value};
use std::sync::Arc;

/// A typed binary operation, selected once at CFG time for the operand
/// type so execution performs a single indirect call per step.
pub type BinFn = Arc<dyn Fn(&Value, &Value) -> Result<Value, RuntimeError> + Send + Sync>;

/// A typed unary operation.
pub type UnFn = Arc<dyn Fn(&Value) -> Result<Value, RuntimeError> + Send + Sync>;

/// A typed conversion.
pub type ConvFn = Arc<dyn Fn(&Value) -> Result<Value, RuntimeError> + Send + Sync>;

fn expect_int(v: &Value) -> i64 {
    match v {
        Value::Int(x) => *x,
        Value::Uint(x) => *x as i64,
        Value::Iface(b) => expect_int(&b.val),
        _ => 0,
    }
}

fn expect_uint(v: &Value) -> u64 {
    match v {
        Value::Uint(x) => *x,
        Value::Int(x) => *x as u64,
        Value::Iface(b) => expect_uint(&b.val),
        _ => 0,
    }
}

fn expect_float(v: &Value) -> f64 {
    match v {
        Value::Float(x) => *x,
        Value::Float32(x) => *x as f64,
        Value::Int(x) => *x as f64,
        Value::Uint(x) => *x as f64,
        Value::Iface(b) => expect_float(&b.val),
        _ => 0.0,
    }
}

fn expect_complex(v: &Value) -> Complex {
    match v {
        Value::Complex(c) => *c,
        Value::Float(x) => Complex::new(*x, 0.0),
        Value::Int(x) => Complex::new(*x as f64, 0.0),
        Value::Iface(b) => expect_complex(&b.val),
        _ => Complex::default(),
    }
}

fn expect_str(v: &Value) -> Arc<str> {
    match v {
        Value::Str(s) => s.clone(),
        Value::Iface(b) => expect_str(&b.val),
        _ => Arc::from(""),
    }
}

fn expect_bool(v: &Value) -> bool {
    v.as_bool().unwrap_or(false)
}

/// Sign-extends the low `bits` of `v`, wrapping sized signed arithmetic.
fn trunc_signed(v: i64, bits: Option<u32>) -> i64 {
    match bits {
        Some(b) if b < 64 => (v << (64 - b)) >> (64 - b),
        _ => v,
    }
}

fn trunc_unsigned(v: u64, bits: Option<u32>) -> u64 {
    match bits {
        Some(b) if b < 64 => v & ((1u64 << b) - 1),
        _ => v,
    }
}

fn shift_amount(v: &Value) -> u32 {
    let n = match v {
        Value::Uint(x) => *x,
        Value::Int(x) if *x >= 0 => *x as u64,
        Value::Iface(b) => return shift_amount(&b.val),
        _ => 0,
    };
    n.min(u32::MAX as u64) as u32
}

/// Selects the typed action for `op` on operands of type `ty`. Returns an
/// error string naming the unsupported combination.
pub fn binary_action(store: &TypeStore, op: BinaryOp, ty: TypeId) -> Result<BinFn, String> {
    use BinaryOp::*;

    // Equality works on any comparable operand type.
    if matches!(op, Eq | Ne) {
        let invert = op == Ne;
        return Ok(Arc::new(move |a, b| {
            Ok(Value::Bool(a.equal(b) != invert))
        }));
    }

    if matches!(op, LAnd | LOr) {
        if store.cat(ty) != Cat::Bool {
            return Err(format!("operator requires bool operands, got {}", store.describe(ty)));
        }
        // Short-circuit is in the CFG wiring; the skipped operand's slot is
        // stale but cannot change the result.
        return Ok(match op {
            LAnd => Arc::new(|a, b| Ok(Value::Bool(expect_bool(a) && expect_bool(b)))),
            _ => Arc::new(|a, b| Ok(Value::Bool(expect_bool(a) || expect_bool(b)))),
        });
    }

    let cat = store.cat(ty);

    if cat == Cat::String {
        return match op {
            Add => Ok(Arc::new(|a, b| {
                let (a, b) = (expect_str(a), expect_str(b));
                Ok(Value::Str(Arc::from(format!("{a}{b}"))))
            })),
            Lt => Ok(Arc::new(|a, b| Ok(Value::Bool(expect_str(a) < expect_str(b))))),
            Le => Ok(Arc::new(|a, b| Ok(Value::Bool(expect_str(a) <= expect_str(b))))),
            Gt => Ok(Arc::new(|a, b| Ok(Value::Bool(expect_str(a) > expect_str(b))))),
            Ge => Ok(Arc::new(|a, b| Ok(Value::Bool(expect_str(a) >= expect_str(b))))),
            _ => Err(format!("operator not defined on {}", store.describe(ty))),
        };
    }

    if store.is_signed(ty) {
        let bits = store.int_bits(ty);
        return Ok(match op {
            Add => Arc::new(move |a, b| {
                Ok(Value::Int(trunc_signed(
                    expect_int(a).wrapping_add(expect_int(b)),
                    bits,
                )))
            }),
            Sub => Arc::new(move |a, b| {
                Ok(Value::Int(trunc_signed(
                    expect_int(a).wrapping_sub(expect_int(b)),
                    bits,
                )))
            }),
            Mul => Arc::new(move |a, b| {
                Ok(Value::Int(trunc_signed(
                    expect_int(a).wrapping_mul(expect_int(b)),
                    bits,
                )))
            }),
            Div => Arc::new(move |a, b| {
                let d = expect_int(b);
                if d == 0 {
                    return Err(RuntimeError::DivByZero);
                }
                Ok(Value::Int(trunc_signed(expect_int(a).wrapping_div(d), bits)))
            }),
            Rem => Arc::new(move |a, b| {
                let d = expect_int(b);
                if d == 0 {
                    return Err(RuntimeError::DivByZero);
                }
                Ok(Value::Int(trunc_signed(expect_int(a).wrapping_rem(d), bits)))
            }),
            And => Arc::new(|a, b| Ok(Value::Int(expect_int(a) & expect_int(b)))),
            Or => Arc::new(|a, b| Ok(Value::Int(expect_int(a) | expect_int(b)))),
            Xor => Arc::new(|a, b| Ok(Value::Int(expect_int(a) ^ expect_int(b)))),
            AndNot => Arc::new(|a, b| Ok(Value::Int(expect_int(a) & !expect_int(b)))),
            Shl => Arc::new(move |a, b| {
                let s = shift_amount(b);
                let x = expect_int(a);
                let v = if s >= 64 { 0 } else { x.wrapping_shl(s) };
                Ok(Value::Int(trunc_signed(v, bits)))
            }),
            Shr => Arc::new(move |a, b| {
                let s = shift_amount(b);
                let x = expect_int(a);
                let v = if s >= 64 {
                    if x < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    x.wrapping_shr(s)
                };
                Ok(Value::Int(trunc_signed(v, bits)))
            }),
            Lt => Arc::new(|a, b| Ok(Value::Bool(expect_int(a) < expect_int(b)))),
            Le => Arc::new(|a, b| Ok(Value::Bool(expect_int(a) <= expect_int(b)))),
            Gt => Arc::new(|a, b| Ok(Value::Bool(expect_int(a) > expect_int(b)))),
            Ge => Arc::new(|a, b| Ok(Value::Bool(expect_int(a) >= expect_int(b)))),
            _ => return Err(format!("operator not defined on {}", store.describe(ty))),
        });
    }

    if store.is_unsigned(ty) {
        let bits = store.int_bits(ty);
        return Ok(match op {
            Add => Arc::new(move |a, b| {
                Ok(Value::Uint(trunc_unsigned(
                    expect_uint(a).wrapping_add(expect_uint(b)),
                    bits,
                )))
            }),
            Sub => Arc::new(move |a, b| {
                Ok(Value::Uint(trunc_unsigned(
                    expect_uint(a).wrapping_sub(expect_uint(b)),
                    bits,
                )))
            }),
            Mul => Arc::new(move |a, b| {
                Ok(Value::Uint(trunc_unsigned(
                    expect_uint(a).wrapping_mul(expect_uint(b)),
                    bits,
                )))
            }),
            Div => Arc::new(move |a, b| {
                let d = expect_uint(b);
                if d == 0 {
                    return Err(RuntimeError::DivByZero);
                }
                Ok(Value::Uint(trunc_unsigned(expect_uint(a) / d, bits)))
            }),
            Rem => Arc::new(move |a, b| {
                let d = expect_uint(b);
                if d == 0 {
                    return Err(RuntimeError::DivByZero);
                }
                Ok(Value::Uint(trunc_unsigned(expect_uint(a) % d, bits)))
            }),
            And => Arc::new(|a, b| Ok(Value::Uint(expect_uint(a) & expect_uint(b)))),
            Or => Arc::new(|a, b| Ok(Value::Uint(expect_uint(a) | expect_uint(b)))),
            Xor => Arc::new(|a, b| Ok(Value::Uint(expect_uint(a) ^ expect_uint(b)))),
            AndNot => Arc::new(|a, b| Ok(Value::Uint(expect_uint(a) & !expect_uint(b)))),
            Shl => Arc::new(move |a, b| {
                let s = shift_amount(b);
                let x = expect_uint(a);
                let v = if s >= 64 { 0 } else { x.wrapping_shl(s) };
                Ok(Value::Uint(trunc_unsigned(v, bits)))
            }),
            Shr => Arc::new(move |a, b| {
                let s = shift_amount(b);
                let x = expect_uint(a);
                let v = if s >= 64 { 0 } else { x.wrapping_shr(s) };
                Ok(Value::Uint(trunc_unsigned(v, bits)))
            }),
            Lt => Arc::new(|a, b| Ok(Value::Bool(expect_uint(a) < expect_uint(b)))),
            Le => Arc::new(|a, b| Ok(Value::Bool(expect_uint(a) <= expect_uint(b)))),
            Gt => Arc::new(|a, b| Ok(Value::Bool(expect_uint(a) > expect_uint(b)))),
            Ge => Arc::new(|a, b| Ok(Value::Bool(expect_uint(a) >= expect_uint(b)))),
            _ => return Err(format!("operator not defined on {}", store.describe(ty))),
        });
    }

    if cat == Cat::Float32 {
        let as32 = |v: &Value| expect_float(v) as f32;
        return Ok(match op {
            Add => Arc::new(move |a, b| Ok(Value::Float32(as32(a) + as32(b)))),
            Sub => Arc::new(move |a, b| Ok(Value::Float32(as32(a) - as32(b)))),
            Mul => Arc::new(move |a, b| Ok(Value::Float32(as32(a) * as32(b)))),
            Div => Arc::new(move |a, b| Ok(Value::Float32(as32(a) / as32(b)))),
            Lt => Arc::new(move |a, b| Ok(Value::Bool(as32(a) < as32(b)))),
            Le => Arc::new(move |a, b| Ok(Value::Bool(as32(a) <= as32(b)))),
            Gt => Arc::new(move |a, b| Ok(Value::Bool(as32(a) > as32(b)))),
            Ge => Arc::new(move |a, b| Ok(Value::Bool(as32(a) >= as32(b)))),
            _ => return Err(format!("operator not defined on {}", store.describe(ty))),
        });
    }

    if cat == Cat::Float64 {
        return Ok(match op {
            Add => Arc::new(|a, b| Ok(Value::Float(expect_float(a) + expect_float(b)))),
            Sub => Arc::new(|a, b| Ok(Value::Float(expect_float(a) - expect_float(b)))),
            Mul => Arc::new(|a, b| Ok(Value::Float(expect_float(a) * expect_float(b)))),
            Div => Arc::new(|a, b| Ok(Value::Float(expect_float(a) / expect_float(b)))),
            Lt => Arc::new(|a, b| Ok(Value::Bool(expect_float(a) < expect_float(b)))),
            Le => Arc::new(|a, b| Ok(Value::Bool(expect_float(a) <= expect_float(b)))),
            Gt => Arc::new(|a, b| Ok(Value::Bool(expect_float(a) > expect_float(b)))),
            Ge => Arc::new(|a, b| Ok(Value::Bool(expect_float(a) >= expect_float(b)))),
            _ => return Err(format!("operator not defined on {}", store.describe(ty))),
        });
    }

    if store.is_complex(ty) {
        return Ok(match op {
            Add => Arc::new(|a, b| Ok(Value::Complex(expect_complex(a).add(expect_complex(b))))),
            Sub => Arc::new(|a, b| Ok(Value::Complex(expect_complex(a).sub(expect_complex(b))))),
            Mul => Arc::new(|a, b| Ok(Value::Complex(expect_complex(a).mul(expect_complex(b))))),
            Div => Arc::new(|a, b| Ok(Value::Complex(expect_complex(a).div(expect_complex(b))))),
            _ => return Err(format!("operator not defined on {}", store.describe(ty))),
        });
    }

    Err(format!(
        "operator not defined on {}",
        store.describe(ty)
    ))
}

/// Selects the typed action for a unary operator.
pub fn unary_action(store: &TypeStore, op: UnaryOp, ty: TypeId) -> Result<UnFn, String> {
    match op {
        UnaryOp::Pos => Ok(Arc::new(|v| Ok(v.clone()))),
        UnaryOp::Neg => {
            if store.is_signed(ty) {
                let bits = store.int_bits(ty);
                Ok(Arc::new(move |v| {
                    Ok(Value::Int(trunc_signed(expect_int(v).wrapping_neg(), bits)))
                }))
            } else if store.is_unsigned(ty) {
                let bits = store.int_bits(ty);
                Ok(Arc::new(move |v| {
                    Ok(Value::Uint(trunc_unsigned(
                        expect_uint(v).wrapping_neg(),
                        bits,
                    )))
                }))
            } else if store.cat(ty) == Cat::Float32 {
                Ok(Arc::new(|v| Ok(Value::Float32(-(expect_float(v) as f32)))))
            } else if store.cat(ty) == Cat::Float64 {
                Ok(Arc::new(|v| Ok(Value::Float(-expect_float(v)))))
            } else if store.is_complex(ty) {
                Ok(Arc::new(|v| {
                    let c = expect_complex(v);
                    Ok(Value::Complex(Complex::new(-c.re, -c.im)))
                }))
            } else {
                Err(format!("operator not defined on {}", store.describe(ty)))
            }
        }
        UnaryOp::Not => {
            if store.cat(ty) == Cat::Bool {
                Ok(Arc::new(|v| Ok(Value::Bool(!expect_bool(v)))))
            } else {
                Err(format!("operator requires bool, got {}", store.describe(ty)))
            }
        }
        UnaryOp::BitNot => {
            if store.is_signed(ty) {
                let bits = store.int_bits(ty);
                Ok(Arc::new(move |v| {
                    Ok(Value::Int(trunc_signed(!expect_int(v), bits)))
                }))
            } else if store.is_unsigned(ty) {
                let bits = store.int_bits(ty);
                Ok(Arc::new(move |v| {
                    Ok(Value::Uint(trunc_unsigned(!expect_uint(v), bits)))
                }))
            } else {
                Err(format!("operator not defined on {}", store.describe(ty)))
            }
        }
        // Address, deref and receive get dedicated generators; they are not
        // pure value-to-value operations.
        _ => Err("operator needs a dedicated generator".to_string()),
    }
}

/// Builds a conversion from `src` to `dst` for `T(x)` expressions and
/// implicit untyped-constant contexts.
pub fn convert_action(store: &TypeStore, dst: TypeId, src: TypeId) -> Result<ConvFn, String> {
    let dcat = store.cat(dst);
    let scat = store.cat(src);

    if store.is_numeric(dst) && store.is_numeric(src) {
        if store.is_signed(dst) {
            let bits = store.int_bits(dst);
            return Ok(Arc::new(move |v| {
                let n = match v {
                    Value::Float(f) => *f as i64,
                    Value::Float32(f) => *f as i64,
                    Value::Uint(u) => *u as i64,
                    Value::Complex(c) => c.re as i64,
                    other => expect_int(other),
                };
                Ok(Value::Int(trunc_signed(n, bits)))
            }));
        }
        if store.is_unsigned(dst) {
            let bits = store.int_bits(dst);
            return Ok(Arc::new(move |v| {
                let n = match v {
                    Value::Float(f) => *f as u64,
                    Value::Float32(f) => *f as u64,
                    Value::Int(i) => *i as u64,
                    Value::Complex(c) => c.re as u64,
                    other => expect_uint(other),
                };
                Ok(Value::Uint(trunc_unsigned(n, bits)))
            }));
        }
        if dcat == Cat::Float32 {
            return Ok(Arc::new(|v| Ok(Value::Float32(expect_float(v) as f32))));
        }
        if dcat == Cat::Float64 {
            return Ok(Arc::new(|v| Ok(Value::Float(expect_float(v)))));
        }
        if store.is_complex(dst) {
            return Ok(Arc::new(|v| Ok(Value::Complex(expect_complex(v)))));
        }
    }

    if dcat == Cat::String {
        if store.is_integer(src) {
            return Ok(Arc::new(|v| {
                let code = expect_int(v);
                let ch = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                Ok(Value::str(&ch.to_string()))
            }));
        }
        if scat == Cat::Slice {
            let elem_cat = store.get(src).elem.map(|e| store.cat(e));
            return match elem_cat {
                Some(Cat::Uint8) => Ok(Arc::new(|v| {
                    let bytes: Vec<u8> = match v {
                        Value::Slice(s) => s
                            .to_vec()
                            .iter()
                            .map(|b| expect_uint(b) as u8)
                            .collect(),
                        _ => Vec::new(),
                    };
                    Ok(Value::str(&String::from_utf8_lossy(&bytes)))
                })),
                Some(Cat::Int32) => Ok(Arc::new(|v| {
                    let s: String = match v {
                        Value::Slice(s) => s
                            .to_vec()
                            .iter()
                            .map(|r| {
                                u32::try_from(expect_int(r))
                                    .ok()
                                    .and_then(char::from_u32)
                                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                            })
                            .collect(),
                        _ => String::new(),
                    };
                    Ok(Value::str(&s))
                })),
                _ => Err(format!(
                    "cannot convert {} to string",
                    store.describe(src)
                )),
            };
        }
    }

    if dcat == Cat::Slice && scat == Cat::String {
        let elem_cat = store.get(dst).elem.map(|e| store.cat(e));
        return match elem_cat {
            Some(Cat::Uint8) => Ok(Arc::new(|v| {
                let s = expect_str(v);
                Ok(Value::Slice(SliceVal::from_vec(
                    s.bytes().map(|b| Value::Uint(b as u64)).collect(),
                )))
            })),
            Some(Cat::Int32) => Ok(Arc::new(|v| {
                let s = expect_str(v);
                Ok(Value::Slice(SliceVal::from_vec(
                    s.chars().map(|c| Value::Int(c as i64)).collect(),
                )))
            })),
            _ => Err(format!(
                "cannot convert string to {}",
                store.describe(dst)
            )),
        };
    }

    // Identity conversions: named <-> underlying, pointer reshapes. The
    // runtime representation does not change.
    if store.convertible(dst, src) {
        return Ok(Arc::new(|v| Ok(v.clone())));
    }

    Err(format!(
        "cannot convert {} to {}",
        store.describe(src),
        store.describe(dst)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeStore;

    #[test]
    fn sized_integer_arithmetic_wraps() {
        let store = TypeStore::new();
        let add = binary_action(&store, BinaryOp::Add, types::INT8).expect("action");
        let got = add(&Value::Int(127), &Value::Int(1)).expect("add");
        assert!(got.equal(&Value::Int(-128)));

        let addu = binary_action(&store, BinaryOp::Add, types::UINT8).expect("action");
        let got = addu(&Value::Uint(255), &Value::Uint(1)).expect("add");
        assert!(got.equal(&Value::Uint(0)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let store = TypeStore::new();
        let div = binary_action(&store, BinaryOp::Div, types::INT).expect("action");
        assert!(matches!(
            div(&Value::Int(1), &Value::Int(0)),
            Err(RuntimeError::DivByZero)
        ));
    }

    #[test]
    fn oversized_shifts_zero_out() {
        let store = TypeStore::new();
        let shl = binary_action(&store, BinaryOp::Shl, types::INT).expect("action");
        let got = shl(&Value::Int(1), &Value::Uint(70)).expect("shl");
        assert!(got.equal(&Value::Int(0)));
        let shr = binary_action(&store, BinaryOp::Shr, types::INT).expect("action");
        let got = shr(&Value::Int(-1), &Value::Uint(70)).expect("shr");
        assert!(got.equal(&Value::Int(-1)));
    }

    #[test]
    fn string_conversions_round_trip() {
        let mut store = TypeStore::new();
        let bytes = store.slice_of(types::UINT8);
        let to_bytes = convert_action(&store, bytes, types::STRING).expect("to bytes");
        let back = convert_action(&store, types::STRING, bytes).expect("to string");
        let v = to_bytes(&Value::str("hi")).expect("conv");
        let s = back(&v).expect("conv");
        assert!(s.equal(&Value::str("hi")));
    }

    #[test]
    fn integer_to_string_yields_the_code_point() {
        let store = TypeStore::new();
        let conv = convert_action(&store, types::STRING, types::INT).expect("conv");
        let got = conv(&Value::Int(65)).expect("conv");
        assert!(got.equal(&Value::str("A")));
    }

    #[test]
    fn narrowing_conversions_truncate() {
        let store = TypeStore::new();
        let conv = convert_action(&store, types::INT8, types::INT).expect("conv");
        let got = conv(&Value::Int(300)).expect("conv");
        assert!(got.equal(&Value::Int(44)));
    }
}
