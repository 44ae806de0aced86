use crate::channel::ChanVal;
use crate::exec::RuntimeError;
use crate::frame::Frame;
use crate::node::Unit;
use crate::types::{self, Cat, TypeId, TypeStore};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A complex number. Both complex categories share this representation;
/// the narrow one rounds through `f32` on conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn add(self, o: Complex) -> Complex {
        Complex::new(self.re + o.re, self.im + o.im)
    }

    pub fn sub(self, o: Complex) -> Complex {
        Complex::new(self.re - o.re, self.im - o.im)
    }

    pub fn mul(self, o: Complex) -> Complex {
        Complex::new(
            self.re * o.re - self.im * o.im,
            self.re * o.im + self.im * o.re,
        )
    }

    pub fn div(self, o: Complex) -> Complex {
        let d = o.re * o.re + o.im * o.im;
        Complex::new(
            (self.re * o.re + self.im * o.im) / d,
            (self.im * o.re - self.re * o.im) / d,
        )
    }
}

/// A slice value: a view into a shared backing array. The backing array's
/// length is the slice capacity; aliasing views observe element writes.
#[derive(Clone)]
pub struct SliceVal {
    pub arr: Arc<RwLock<Vec<Value>>>,
    pub off: usize,
    pub len: usize,
}

impl SliceVal {
    pub fn from_vec(values: Vec<Value>) -> Self {
        let len = values.len();
        Self {
            arr: Arc::new(RwLock::new(values)),
            off: 0,
            len,
        }
    }

    pub fn with_capacity(values: Vec<Value>, cap_fill: Vec<Value>) -> Self {
        let len = values.len();
        let mut backing = values;
        backing.extend(cap_fill);
        Self {
            arr: Arc::new(RwLock::new(backing)),
            off: 0,
            len,
        }
    }

    pub fn cap(&self) -> usize {
        self.arr.read().len() - self.off
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        if idx >= self.len {
            return None;
        }
        self.arr.read().get(self.off + idx).cloned()
    }

    pub fn set(&self, idx: usize, value: Value) -> bool {
        if idx >= self.len {
            return false;
        }
        self.arr.write()[self.off + idx] = value;
        true
    }

    pub fn subslice(&self, low: usize, high: usize) -> Option<SliceVal> {
        if low > high || high > self.cap() {
            return None;
        }
        Some(SliceVal {
            arr: self.arr.clone(),
            off: self.off + low,
            len: high - low,
        })
    }

    /// Appends in place when spare capacity exists, else reallocates.
    pub fn append(&self, extra: Vec<Value>) -> SliceVal {
        let mut arr = self.arr.write();
        let cap = arr.len() - self.off;
        if self.len + extra.len() <= cap {
            for (i, v) in extra.iter().enumerate() {
                arr[self.off + self.len + i] = v.clone();
            }
            return SliceVal {
                arr: self.arr.clone(),
                off: self.off,
                len: self.len + extra.len(),
            };
        }
        let mut grown: Vec<Value> =
            Vec::with_capacity((self.len + extra.len()).next_power_of_two());
        grown.extend_from_slice(&arr[self.off..self.off + self.len]);
        grown.extend(extra);
        let len = grown.len();
        SliceVal {
            arr: Arc::new(RwLock::new(grown)),
            off: 0,
            len,
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        let arr = self.arr.read();
        arr[self.off..self.off + self.len].to_vec()
    }

    pub fn ptr_eq(&self, other: &SliceVal) -> bool {
        Arc::ptr_eq(&self.arr, &other.arr) && self.off == other.off && self.len == other.len
    }
}

/// A map value, shared by reference like the source language's maps.
#[derive(Clone)]
pub struct MapVal {
    pub map: Arc<RwLock<HashMap<MapKey, Value>>>,
}

impl MapVal {
    pub fn new() -> Self {
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ptr_eq(&self, other: &MapVal) -> bool {
        Arc::ptr_eq(&self.map, &other.map)
    }
}

impl Default for MapVal {
    fn default() -> Self {
        Self::new()
    }
}

/// A struct value. Assignment copies fields (reference-category fields keep
/// sharing their backing stores, as the language requires).
#[derive(Clone)]
pub struct StructVal {
    pub typ: TypeId,
    pub fields: Vec<Value>,
}

/// One step of a pointer's access path below its base location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathStep {
    /// Struct field or array element index.
    Elem(usize),
}

/// The rooted location a pointer refers to.
#[derive(Clone)]
pub enum PtrBase {
    /// A free-standing cell: `new(T)`, `&T{...}`.
    Cell(Arc<RwLock<Value>>),
    /// A frame slot; holding the frame alive mirrors a captured variable.
    Slot { frame: Arc<Frame>, index: usize },
    /// An element of a slice's backing array.
    SliceElem {
        arr: Arc<RwLock<Vec<Value>>>,
        index: usize,
    },
}

/// A pointer value: a base location plus a path of field/element steps.
#[derive(Clone)]
pub struct PtrVal {
    pub base: PtrBase,
    pub path: Arc<[PathStep]>,
}

impl PtrVal {
    pub fn cell(value: Value) -> Self {
        Self {
            base: PtrBase::Cell(Arc::new(RwLock::new(value))),
            path: Arc::from([]),
        }
    }

    pub fn slot(frame: Arc<Frame>, index: usize) -> Self {
        Self {
            base: PtrBase::Slot { frame, index },
            path: Arc::from([]),
        }
    }

    pub fn slice_elem(arr: Arc<RwLock<Vec<Value>>>, index: usize) -> Self {
        Self {
            base: PtrBase::SliceElem { arr, index },
            path: Arc::from([]),
        }
    }

    pub fn child(&self, step: PathStep) -> PtrVal {
        let mut path: Vec<PathStep> = self.path.to_vec();
        path.push(step);
        PtrVal {
            base: self.base.clone(),
            path: Arc::from(path.as_slice()),
        }
    }

    pub fn load(&self) -> Result<Value, RuntimeError> {
        let root = match &self.base {
            PtrBase::Cell(cell) => cell.read().clone(),
            PtrBase::Slot { frame, index } => frame
                .data
                .read()
                .get(*index)
                .cloned()
                .ok_or(RuntimeError::NilDeref)?,
            PtrBase::SliceElem { arr, index } => arr
                .read()
                .get(*index)
                .cloned()
                .ok_or(RuntimeError::NilDeref)?,
        };
        let mut cur = root;
        for step in self.path.iter() {
            let PathStep::Elem(idx) = step;
            cur = match cur {
                Value::Struct(s) => s.fields.get(*idx).cloned().ok_or(RuntimeError::NilDeref)?,
                Value::Array(items) => items.get(*idx).cloned().ok_or(RuntimeError::NilDeref)?,
                _ => return Err(RuntimeError::NilDeref),
            };
        }
        Ok(cur)
    }

    pub fn store(&self, value: Value) -> Result<(), RuntimeError> {
        let apply = |root: &mut Value| -> Result<(), RuntimeError> {
            let mut cur = root;
            for step in self.path.iter() {
                let PathStep::Elem(idx) = step;
                cur = match cur {
                    Value::Struct(s) => {
                        s.fields.get_mut(*idx).ok_or(RuntimeError::NilDeref)?
                    }
                    Value::Array(items) => items.get_mut(*idx).ok_or(RuntimeError::NilDeref)?,
                    _ => return Err(RuntimeError::NilDeref),
                };
            }
            *cur = value;
            Ok(())
        };
        match &self.base {
            PtrBase::Cell(cell) => apply(&mut cell.write()),
            PtrBase::Slot { frame, index } => {
                let mut data = frame.data.write();
                let root = data.get_mut(*index).ok_or(RuntimeError::NilDeref)?;
                apply(root)
            }
            PtrBase::SliceElem { arr, index } => {
                let mut data = arr.write();
                let root = data.get_mut(*index).ok_or(RuntimeError::NilDeref)?;
                apply(root)
            }
        }
    }

    pub fn ptr_eq(&self, other: &PtrVal) -> bool {
        let base_eq = match (&self.base, &other.base) {
            (PtrBase::Cell(a), PtrBase::Cell(b)) => Arc::ptr_eq(a, b),
            (
                PtrBase::Slot { frame: fa, index: ia },
                PtrBase::Slot { frame: fb, index: ib },
            ) => Arc::ptr_eq(fa, fb) && ia == ib,
            (
                PtrBase::SliceElem { arr: aa, index: ia },
                PtrBase::SliceElem { arr: ab, index: ib },
            ) => Arc::ptr_eq(aa, ab) && ia == ib,
            _ => false,
        };
        base_eq && self.path == other.path
    }
}

/// An interpreted function value: its definition node inside a frozen
/// evaluation unit, the captured frame for closures, and an optional bound
/// receiver for method values.
#[derive(Clone)]
pub struct FuncVal {
    pub unit: Arc<Unit>,
    pub node: u32,
    pub frame: Option<Arc<Frame>>,
    pub recv: Option<Box<Value>>,
}

impl FuncVal {
    pub fn ptr_eq(&self, other: &FuncVal) -> bool {
        Arc::ptr_eq(&self.unit, &other.unit) && self.node == other.node
    }
}

pub type HostCall = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + Send + Sync>;

/// A host callable registered through the bridge, with its declared
/// function type.
#[derive(Clone)]
pub struct HostFnVal {
    pub name: Arc<str>,
    pub sig: TypeId,
    pub call: HostCall,
}

impl HostFnVal {
    pub fn ptr_eq(&self, other: &HostFnVal) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

/// An opaque host object passed through interpreted code unchanged.
#[derive(Clone)]
pub struct HostVal {
    pub name: Arc<str>,
    pub obj: Arc<dyn Any + Send + Sync>,
    /// Display form, captured at wrap time so interpreted code can print
    /// host values without reaching into them.
    pub repr: Arc<str>,
}

impl HostVal {
    pub fn ptr_eq(&self, other: &HostVal) -> bool {
        Arc::ptr_eq(&self.obj, &other.obj)
    }
}

/// An interface value: the dynamic type paired with the concrete value.
#[derive(Clone)]
pub struct IfaceVal {
    pub typ: TypeId,
    pub val: Value,
}

/// A runtime value. The static type lives in the CFG; values carry only
/// what dynamic dispatch needs (struct types, interface pairs).
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float(f64),
    Complex(Complex),
    Str(Arc<str>),
    Array(Vec<Value>),
    Slice(SliceVal),
    Map(MapVal),
    Chan(ChanVal),
    Struct(StructVal),
    Ptr(PtrVal),
    Func(FuncVal),
    HostFn(HostFnVal),
    Host(HostVal),
    Iface(Box<IfaceVal>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Unwraps interface boxes down to the concrete value.
    pub fn concrete(self) -> Value {
        match self {
            Value::Iface(b) => b.val.concrete(),
            other => other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Iface(b) => b.val.as_bool(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => Some(*v as i64),
            Value::Iface(b) => b.val.as_int(),
            _ => None,
        }
    }

    /// Equality as defined by the language's `==`. Reference categories
    /// compare by identity, structs and arrays elementwise.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, other) | (other, Value::Nil) => other.nil_like(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Int(a), Value::Uint(b)) | (Value::Uint(b), Value::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| x.equal(y))
            }
            (Value::Ptr(a), Value::Ptr(b)) => a.ptr_eq(b),
            (Value::Chan(a), Value::Chan(b)) => a.ptr_eq(b),
            (Value::Slice(a), Value::Slice(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::HostFn(a), Value::HostFn(b)) => a.ptr_eq(b),
            (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
            (Value::Iface(a), Value::Iface(b)) => a.typ == b.typ && a.val.equal(&b.val),
            (Value::Iface(a), other) | (other, Value::Iface(a)) => a.val.equal(other),
            _ => false,
        }
    }

    /// True for values that compare equal to nil.
    fn nil_like(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Iface(b) => b.val.nil_like(),
            _ => false,
        }
    }

    /// Projects a value into a map key. Fails for non-comparable values.
    pub fn to_key(&self) -> Result<MapKey, RuntimeError> {
        match self {
            Value::Nil => Ok(MapKey::Nil),
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Int(v) => Ok(MapKey::Int(*v)),
            Value::Uint(v) => Ok(MapKey::Uint(*v)),
            Value::Float32(v) => Ok(MapKey::Float((*v as f64).to_bits())),
            Value::Float(v) => Ok(MapKey::Float(v.to_bits())),
            Value::Complex(c) => Ok(MapKey::Complex(c.re.to_bits(), c.im.to_bits())),
            Value::Str(s) => Ok(MapKey::Str(s.clone())),
            Value::Array(items) => Ok(MapKey::Composite(
                items.iter().map(|v| v.to_key()).collect::<Result<_, _>>()?,
            )),
            Value::Struct(s) => Ok(MapKey::Composite(
                s.fields.iter().map(|v| v.to_key()).collect::<Result<_, _>>()?,
            )),
            Value::Ptr(p) => Ok(MapKey::Addr(match &p.base {
                PtrBase::Cell(cell) => Arc::as_ptr(cell) as usize,
                PtrBase::Slot { frame, index } => Arc::as_ptr(frame) as usize + index,
                PtrBase::SliceElem { arr, index } => Arc::as_ptr(arr) as usize + index,
            })),
            Value::Chan(c) => Ok(MapKey::Addr(c.addr())),
            Value::Iface(b) => Ok(MapKey::Iface(b.typ, Box::new(b.val.to_key()?))),
            _ => Err(RuntimeError::Unhashable),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(u64),
    Complex(u64, u64),
    Str(Arc<str>),
    Addr(usize),
    Iface(TypeId, Box<MapKey>),
    Composite(Vec<MapKey>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<nil>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Complex(c) => write!(f, "({}{:+}i)", c.re, c.im),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Slice(s) => f.debug_list().entries(s.to_vec()).finish(),
            Value::Map(_) => write!(f, "map[..]"),
            Value::Chan(_) => write!(f, "chan"),
            Value::Struct(s) => {
                write!(f, "struct#{}{:?}", s.typ.0, s.fields)
            }
            Value::Ptr(_) => write!(f, "&.."),
            Value::Func(v) => write!(f, "func#{}", v.node),
            Value::HostFn(v) => write!(f, "hostfn {}", v.name),
            Value::Host(v) => write!(f, "host {}", v.name),
            Value::Iface(b) => write!(f, "iface({:?})", b.val),
        }
    }
}

impl fmt::Display for Value {
    /// Renders the way the language's default formatting verb does:
    /// `[1 2 3]`, `{1 2}`, `map[a:1]`, `<nil>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<nil>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Complex(c) => write!(f, "({}{:+}i)", c.re, c.im),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Slice(s) => {
                write!(f, "[")?;
                for (idx, item) in s.to_vec().iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                let map = m.map.read();
                let mut entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}:{v}", display_key(k)))
                    .collect();
                entries.sort();
                write!(f, "map[{}]", entries.join(" "))
            }
            Value::Chan(_) => write!(f, "chan"),
            Value::Struct(s) => {
                write!(f, "{{")?;
                for (idx, field) in s.fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            Value::Ptr(p) => match p.load() {
                Ok(v) => write!(f, "&{v}"),
                Err(_) => write!(f, "<nil>"),
            },
            Value::Func(_) | Value::HostFn(_) => write!(f, "func"),
            Value::Host(v) => write!(f, "{}", v.repr),
            Value::Iface(b) => write!(f, "{}", b.val),
        }
    }
}

fn display_key(key: &MapKey) -> String {
    match key {
        MapKey::Nil => "<nil>".to_string(),
        MapKey::Bool(v) => v.to_string(),
        MapKey::Int(v) => v.to_string(),
        MapKey::Uint(v) => v.to_string(),
        MapKey::Float(bits) => f64::from_bits(*bits).to_string(),
        MapKey::Complex(re, im) => {
            format!("({}{:+}i)", f64::from_bits(*re), f64::from_bits(*im))
        }
        MapKey::Str(s) => s.to_string(),
        MapKey::Addr(a) => format!("{a:#x}"),
        MapKey::Iface(_, inner) => display_key(inner),
        MapKey::Composite(items) => {
            let inner: Vec<String> = items.iter().map(display_key).collect();
            format!("{{{}}}", inner.join(" "))
        }
    }
}

/// The zero value of a type. Reference categories are nil.
pub fn zero_value(store: &TypeStore, ty: TypeId) -> Value {
    match store.cat(ty) {
        Cat::Bool => Value::Bool(false),
        Cat::Int | Cat::Int8 | Cat::Int16 | Cat::Int32 | Cat::Int64 => Value::Int(0),
        Cat::Uint | Cat::Uint8 | Cat::Uint16 | Cat::Uint32 | Cat::Uint64 | Cat::Uintptr => {
            Value::Uint(0)
        }
        Cat::Float32 => Value::Float32(0.0),
        Cat::Float64 => Value::Float(0.0),
        Cat::Complex64 | Cat::Complex128 => Value::Complex(Complex::default()),
        Cat::String => Value::str(""),
        Cat::Array => {
            let elem = store.get(ty).elem.unwrap_or(types::INT);
            let len = store.get(ty).len;
            Value::Array(vec![zero_value(store, elem); len])
        }
        Cat::Struct => {
            let fields = store
                .get(ty)
                .fields
                .iter()
                .map(|f| f.ty)
                .collect::<Vec<_>>();
            Value::Struct(StructVal {
                typ: ty,
                fields: fields.iter().map(|f| zero_value(store, *f)).collect(),
            })
        }
        _ => Value::Nil,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_share_their_backing_array() {
        let a = SliceVal::from_vec(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = a.subslice(1, 3).expect("subslice");
        b.set(0, Value::Int(20));
        assert!(a.get(1).expect("elem").equal(&Value::Int(20)));
    }

    #[test]
    fn append_within_capacity_aliases() {
        let s = SliceVal::with_capacity(vec![Value::Int(1)], vec![Value::Int(0); 3]);
        assert_eq!(s.cap(), 4);
        let t = s.append(vec![Value::Int(9)]);
        assert_eq!(t.len, 2);
        assert!(Arc::ptr_eq(&s.arr, &t.arr));
        let u = t.append(vec![Value::Int(8), Value::Int(7), Value::Int(6)]);
        assert!(!Arc::ptr_eq(&t.arr, &u.arr));
        assert_eq!(u.len, 5);
    }

    #[test]
    fn struct_copies_are_deep_for_fields() {
        let s = StructVal {
            typ: types::INT,
            fields: vec![Value::Int(1), Value::str("a")],
        };
        let mut copy = s.clone();
        copy.fields[0] = Value::Int(2);
        assert!(s.fields[0].equal(&Value::Int(1)));
    }

    #[test]
    fn interface_values_compare_through_the_box() {
        let boxed = Value::Iface(Box::new(IfaceVal {
            typ: types::INT,
            val: Value::Int(3),
        }));
        assert!(boxed.equal(&Value::Int(3)));
        assert!(!boxed.equal(&Value::Int(4)));
        assert!(!boxed.equal(&Value::Nil));
    }

    #[test]
    fn display_matches_the_language_formatting() {
        let slice = Value::Slice(SliceVal::from_vec(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
        ]));
        assert_eq!(slice.to_string(), "[1 2 3]");
        let s = Value::Struct(StructVal {
            typ: types::INT,
            fields: vec![Value::Int(1), Value::Int(2)],
        });
        assert_eq!(s.to_string(), "{1 2}");
        assert_eq!(Value::Nil.to_string(), "<nil>");
    }
}
