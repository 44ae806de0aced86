use crate::ast::ChanDir;
use crate::scope::{ScopeId, SymId};
use crate::source::Span;
use std::collections::BTreeMap;

/// Index of a type descriptor in the interpreter's [`TypeStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

/// Type category. Named types keep the category of their underlying type;
/// identity is the arena index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cat {
    Nil,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    Array,
    Slice,
    Map,
    Chan,
    Struct,
    Interface,
    Func,
    Ptr,
    Error,
    SrcPkg,
    BinPkg,
    HostVal,
    Builtin,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    pub embedded: bool,
    pub tag: Option<String>,
}

/// An interface method requirement: a name plus a func-typed descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct IMethod {
    pub name: String,
    pub sig: TypeId,
}

#[derive(Clone, Debug)]
pub struct Type {
    pub cat: Cat,
    /// Declared name for named types; empty otherwise.
    pub name: String,
    /// Import path of the declaring package, or package name for srcPkg
    /// and binPkg descriptors.
    pub path: String,
    pub untyped: bool,
    /// Element type: array/slice/chan/pointer element, map value.
    pub elem: Option<TypeId>,
    /// Map key type.
    pub key: Option<TypeId>,
    /// Array length, resolved during analysis.
    pub len: usize,
    pub dir: ChanDir,
    pub fields: Vec<Field>,
    /// Interface method requirements (flattened across embeds).
    pub imethods: Vec<IMethod>,
    /// Methods declared on this named type, linked after analysis.
    pub methods: BTreeMap<String, SymId>,
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
    pub variadic: bool,
    pub recv: Option<TypeId>,
    pub scope: Option<ScopeId>,
    pub span: Span,
}

impl Type {
    /// An unresolved named-type shell, filled once its declaration
    /// resolves. Shells let recursive declarations refer to themselves.
    pub fn shell() -> Self {
        Type::new(Cat::Nil)
    }

    fn new(cat: Cat) -> Self {
        Self {
            cat,
            name: String::new(),
            path: String::new(),
            untyped: false,
            elem: None,
            key: None,
            len: 0,
            dir: ChanDir::Both,
            fields: Vec::new(),
            imethods: Vec::new(),
            methods: BTreeMap::new(),
            params: Vec::new(),
            results: Vec::new(),
            variadic: false,
            recv: None,
            scope: None,
            span: Span::default(),
        }
    }
}

/// Result of looking a selector up on a type: the promotion path through
/// embedded fields plus what was found at the end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selected {
    Field { path: Vec<usize>, ty: TypeId },
    Method { path: Vec<usize>, sym: SymId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupError {
    Missing,
    Ambiguous,
}

pub const BOOL: TypeId = TypeId(0);
pub const INT: TypeId = TypeId(1);
pub const INT8: TypeId = TypeId(2);
pub const INT16: TypeId = TypeId(3);
pub const INT32: TypeId = TypeId(4);
pub const INT64: TypeId = TypeId(5);
pub const UINT: TypeId = TypeId(6);
pub const UINT8: TypeId = TypeId(7);
pub const UINT16: TypeId = TypeId(8);
pub const UINT32: TypeId = TypeId(9);
pub const UINT64: TypeId = TypeId(10);
pub const UINTPTR: TypeId = TypeId(11);
pub const FLOAT32: TypeId = TypeId(12);
pub const FLOAT64: TypeId = TypeId(13);
pub const COMPLEX64: TypeId = TypeId(14);
pub const COMPLEX128: TypeId = TypeId(15);
pub const STRING: TypeId = TypeId(16);
pub const ERROR: TypeId = TypeId(17);
pub const UNTYPED_BOOL: TypeId = TypeId(18);
pub const UNTYPED_INT: TypeId = TypeId(19);
pub const UNTYPED_RUNE: TypeId = TypeId(20);
pub const UNTYPED_FLOAT: TypeId = TypeId(21);
pub const UNTYPED_STRING: TypeId = TypeId(22);
pub const UNTYPED_NIL: TypeId = TypeId(23);
pub const EMPTY_IFACE: TypeId = TypeId(24);
pub const BUILTIN: TypeId = TypeId(25);

/// Arena of type descriptors. Cyclic types refer to each other by index.
#[derive(Clone, Debug)]
pub struct TypeStore {
    types: Vec<Type>,
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeStore {
    pub fn new() -> Self {
        let mut store = Self { types: Vec::new() };
        let basic = |cat: Cat, name: &str| {
            let mut t = Type::new(cat);
            t.name = name.to_string();
            t
        };
        let untyped = |cat: Cat| {
            let mut t = Type::new(cat);
            t.untyped = true;
            t
        };
        store.types.push(basic(Cat::Bool, "bool"));
        store.types.push(basic(Cat::Int, "int"));
        store.types.push(basic(Cat::Int8, "int8"));
        store.types.push(basic(Cat::Int16, "int16"));
        store.types.push(basic(Cat::Int32, "int32"));
        store.types.push(basic(Cat::Int64, "int64"));
        store.types.push(basic(Cat::Uint, "uint"));
        store.types.push(basic(Cat::Uint8, "uint8"));
        store.types.push(basic(Cat::Uint16, "uint16"));
        store.types.push(basic(Cat::Uint32, "uint32"));
        store.types.push(basic(Cat::Uint64, "uint64"));
        store.types.push(basic(Cat::Uintptr, "uintptr"));
        store.types.push(basic(Cat::Float32, "float32"));
        store.types.push(basic(Cat::Float64, "float64"));
        store.types.push(basic(Cat::Complex64, "complex64"));
        store.types.push(basic(Cat::Complex128, "complex128"));
        store.types.push(basic(Cat::String, "string"));
        store.types.push(basic(Cat::Error, "error"));
        store.types.push(untyped(Cat::Bool));
        store.types.push(untyped(Cat::Int));
        store.types.push(untyped(Cat::Int32));
        store.types.push(untyped(Cat::Float64));
        store.types.push(untyped(Cat::String));
        store.types.push(untyped(Cat::Nil));
        store.types.push(Type::new(Cat::Interface));
        store.types.push(Type::new(Cat::Builtin));
        store
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.0 as usize]
    }

    pub fn add(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    pub fn cat(&self, id: TypeId) -> Cat {
        self.get(id).cat
    }

    // ---- constructors ----

    pub fn slice_of(&mut self, elem: TypeId) -> TypeId {
        let mut t = Type::new(Cat::Slice);
        t.elem = Some(elem);
        self.add(t)
    }

    pub fn array_of(&mut self, elem: TypeId, len: usize) -> TypeId {
        let mut t = Type::new(Cat::Array);
        t.elem = Some(elem);
        t.len = len;
        self.add(t)
    }

    pub fn map_of(&mut self, key: TypeId, value: TypeId) -> TypeId {
        let mut t = Type::new(Cat::Map);
        t.key = Some(key);
        t.elem = Some(value);
        self.add(t)
    }

    pub fn chan_of(&mut self, dir: ChanDir, elem: TypeId) -> TypeId {
        let mut t = Type::new(Cat::Chan);
        t.dir = dir;
        t.elem = Some(elem);
        self.add(t)
    }

    pub fn ptr_to(&mut self, elem: TypeId) -> TypeId {
        let mut t = Type::new(Cat::Ptr);
        t.elem = Some(elem);
        self.add(t)
    }

    pub fn func_of(&mut self, params: Vec<TypeId>, results: Vec<TypeId>, variadic: bool) -> TypeId {
        let mut t = Type::new(Cat::Func);
        t.params = params;
        t.results = results;
        t.variadic = variadic;
        self.add(t)
    }

    pub fn struct_of(&mut self, fields: Vec<Field>) -> TypeId {
        let mut t = Type::new(Cat::Struct);
        t.fields = fields;
        self.add(t)
    }

    pub fn interface_of(&mut self, imethods: Vec<IMethod>) -> TypeId {
        let mut t = Type::new(Cat::Interface);
        t.imethods = imethods;
        self.add(t)
    }

    /// Creates a defined type: a copy of the underlying descriptor carrying
    /// the new name. Identity is the fresh arena index.
    pub fn named(&mut self, name: &str, path: &str, underlying: TypeId, span: Span) -> TypeId {
        let mut t = self.get(underlying).clone();
        t.name = name.to_string();
        t.path = path.to_string();
        t.untyped = false;
        t.methods = BTreeMap::new();
        t.span = span;
        self.add(t)
    }

    /// Replaces a named shell's structure with `underlying`, keeping the
    /// shell's identity, name and method set. Used to tie recursive type
    /// declarations.
    pub fn fill_named(&mut self, shell: TypeId, underlying: TypeId) {
        let mut filled = self.get(underlying).clone();
        let old = self.get(shell);
        filled.name = old.name.clone();
        filled.path = old.path.clone();
        filled.methods = old.methods.clone();
        filled.span = old.span;
        filled.untyped = false;
        *self.get_mut(shell) = filled;
    }

    pub fn src_pkg(&mut self, path: &str) -> TypeId {
        let mut t = Type::new(Cat::SrcPkg);
        t.path = path.to_string();
        self.add(t)
    }

    pub fn bin_pkg(&mut self, path: &str) -> TypeId {
        let mut t = Type::new(Cat::BinPkg);
        t.path = path.to_string();
        self.add(t)
    }

    pub fn host_val(&mut self, name: &str) -> TypeId {
        let mut t = Type::new(Cat::HostVal);
        t.name = name.to_string();
        self.add(t)
    }

    // ---- predicates ----

    pub fn is_named(&self, id: TypeId) -> bool {
        !self.get(id).name.is_empty()
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(
            self.cat(id),
            Cat::Int
                | Cat::Int8
                | Cat::Int16
                | Cat::Int32
                | Cat::Int64
                | Cat::Uint
                | Cat::Uint8
                | Cat::Uint16
                | Cat::Uint32
                | Cat::Uint64
                | Cat::Uintptr
                | Cat::Float32
                | Cat::Float64
                | Cat::Complex64
                | Cat::Complex128
        )
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(
            self.cat(id),
            Cat::Int
                | Cat::Int8
                | Cat::Int16
                | Cat::Int32
                | Cat::Int64
                | Cat::Uint
                | Cat::Uint8
                | Cat::Uint16
                | Cat::Uint32
                | Cat::Uint64
                | Cat::Uintptr
        )
    }

    pub fn is_signed(&self, id: TypeId) -> bool {
        matches!(
            self.cat(id),
            Cat::Int | Cat::Int8 | Cat::Int16 | Cat::Int32 | Cat::Int64
        )
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        self.is_integer(id) && !self.is_signed(id)
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.cat(id), Cat::Float32 | Cat::Float64)
    }

    pub fn is_complex(&self, id: TypeId) -> bool {
        matches!(self.cat(id), Cat::Complex64 | Cat::Complex128)
    }

    /// Operand types of the ordering operators.
    pub fn is_ordered(&self, id: TypeId) -> bool {
        self.is_integer(id) || self.is_float(id) || self.cat(id) == Cat::String
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.cat(id), Cat::Interface | Cat::Error)
    }

    /// Types whose zero value is nil and which accept an untyped nil.
    pub fn is_nillable(&self, id: TypeId) -> bool {
        matches!(
            self.cat(id),
            Cat::Ptr
                | Cat::Slice
                | Cat::Map
                | Cat::Chan
                | Cat::Func
                | Cat::Interface
                | Cat::Error
                | Cat::HostVal
        )
    }

    pub fn is_comparable(&self, id: TypeId) -> bool {
        match self.cat(id) {
            Cat::Slice | Cat::Map | Cat::Func => false,
            Cat::Struct => self.get(id).fields.iter().all(|f| self.is_comparable(f.ty)),
            Cat::Array => self.get(id).elem.is_some_and(|e| self.is_comparable(e)),
            _ => true,
        }
    }

    /// Bit width of a sized integer category; `None` for `int`/`uint`
    /// (word-sized) and non-integers.
    pub fn int_bits(&self, id: TypeId) -> Option<u32> {
        match self.cat(id) {
            Cat::Int8 | Cat::Uint8 => Some(8),
            Cat::Int16 | Cat::Uint16 => Some(16),
            Cat::Int32 | Cat::Uint32 => Some(32),
            Cat::Int64 | Cat::Uint64 | Cat::Uintptr => Some(64),
            _ => None,
        }
    }

    // ---- relations ----

    /// The typed counterpart of an untyped constant type.
    pub fn default_type(&self, id: TypeId) -> TypeId {
        if !self.get(id).untyped {
            return id;
        }
        match id {
            UNTYPED_BOOL => BOOL,
            UNTYPED_INT => INT,
            UNTYPED_RUNE => INT32,
            UNTYPED_FLOAT => FLOAT64,
            UNTYPED_STRING => STRING,
            _ => id,
        }
    }

    /// Type identity: named types by arena index, unnamed types by
    /// structure.
    pub fn identical(&self, a: TypeId, b: TypeId) -> bool {
        self.identical_seen(a, b, &mut Vec::new())
    }

    fn identical_seen(&self, a: TypeId, b: TypeId, seen: &mut Vec<(TypeId, TypeId)>) -> bool {
        if a == b {
            return true;
        }
        if seen.contains(&(a, b)) {
            return true;
        }
        let (ta, tb) = (self.get(a), self.get(b));
        if self.is_named(a) || self.is_named(b) {
            // Distinct arena entries for named types are distinct types.
            return false;
        }
        if ta.cat != tb.cat {
            return false;
        }
        seen.push((a, b));
        let same_opt = |x: Option<TypeId>, y: Option<TypeId>, seen: &mut Vec<(TypeId, TypeId)>| {
            match (x, y) {
                (None, None) => true,
                (Some(x), Some(y)) => self.identical_seen(x, y, seen),
                _ => false,
            }
        };
        let ok = match ta.cat {
            Cat::Array => ta.len == tb.len && same_opt(ta.elem, tb.elem, seen),
            Cat::Slice | Cat::Ptr => same_opt(ta.elem, tb.elem, seen),
            Cat::Map => same_opt(ta.key, tb.key, seen) && same_opt(ta.elem, tb.elem, seen),
            Cat::Chan => ta.dir == tb.dir && same_opt(ta.elem, tb.elem, seen),
            Cat::Struct => {
                ta.fields.len() == tb.fields.len()
                    && ta.fields.iter().zip(&tb.fields).all(|(fa, fb)| {
                        fa.name == fb.name
                            && fa.embedded == fb.embedded
                            && self.identical_seen(fa.ty, fb.ty, seen)
                    })
            }
            Cat::Interface => {
                ta.imethods.len() == tb.imethods.len()
                    && ta.imethods.iter().zip(&tb.imethods).all(|(ma, mb)| {
                        ma.name == mb.name && self.identical_seen(ma.sig, mb.sig, seen)
                    })
            }
            Cat::Func => {
                ta.variadic == tb.variadic
                    && ta.params.len() == tb.params.len()
                    && ta.results.len() == tb.results.len()
                    && ta
                        .params
                        .iter()
                        .zip(&tb.params)
                        .all(|(x, y)| self.identical_seen(*x, *y, seen))
                    && ta
                        .results
                        .iter()
                        .zip(&tb.results)
                        .all(|(x, y)| self.identical_seen(*x, *y, seen))
            }
            _ => true,
        };
        seen.pop();
        ok
    }

    /// Identity of underlying types (names stripped at the top level only).
    fn underlying_identical(&self, a: TypeId, b: TypeId) -> bool {
        let (ta, tb) = (self.get(a), self.get(b));
        if ta.cat != tb.cat {
            return false;
        }
        // Compare as if both were unnamed: same category plus identical
        // component types.
        let same_opt = |x: Option<TypeId>, y: Option<TypeId>| match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => self.identical(x, y),
            _ => false,
        };
        match ta.cat {
            Cat::Array => ta.len == tb.len && same_opt(ta.elem, tb.elem),
            Cat::Slice | Cat::Ptr => same_opt(ta.elem, tb.elem),
            Cat::Map => same_opt(ta.key, tb.key) && same_opt(ta.elem, tb.elem),
            Cat::Chan => same_opt(ta.elem, tb.elem),
            Cat::Struct => {
                ta.fields.len() == tb.fields.len()
                    && ta
                        .fields
                        .iter()
                        .zip(&tb.fields)
                        .all(|(fa, fb)| fa.name == fb.name && self.identical(fa.ty, fb.ty))
            }
            Cat::Interface => {
                ta.imethods.len() == tb.imethods.len()
                    && ta
                        .imethods
                        .iter()
                        .zip(&tb.imethods)
                        .all(|(ma, mb)| ma.name == mb.name && self.identical(ma.sig, mb.sig))
            }
            Cat::Func => {
                ta.variadic == tb.variadic
                    && ta.params.len() == tb.params.len()
                    && ta.results.len() == tb.results.len()
                    && ta.params.iter().zip(&tb.params).all(|(x, y)| self.identical(*x, *y))
                    && ta
                        .results
                        .iter()
                        .zip(&tb.results)
                        .all(|(x, y)| self.identical(*x, *y))
            }
            _ => true,
        }
    }

    /// Assignability of a `src` value to a `dst` location.
    pub fn assignable(&self, dst: TypeId, src: TypeId) -> bool {
        if self.identical(dst, src) {
            return true;
        }
        let ts = self.get(src);
        if ts.untyped {
            if ts.cat == Cat::Nil {
                return self.is_nillable(dst);
            }
            return self.untyped_convertible(dst, src);
        }
        // Identical underlying types where at least one side is unnamed.
        if (!self.is_named(dst) || !self.is_named(src)) && self.underlying_identical(dst, src) {
            // Bidirectional channels assign to directional ones below; all
            // other categories are fine here.
            if self.cat(dst) != Cat::Chan || self.get(dst).dir == self.get(src).dir {
                return true;
            }
        }
        if self.cat(dst) == Cat::Chan
            && self.cat(src) == Cat::Chan
            && self.get(src).dir == ChanDir::Both
            && !self.is_named(src)
        {
            if let (Some(de), Some(se)) = (self.get(dst).elem, self.get(src).elem) {
                if self.identical(de, se) {
                    return true;
                }
            }
        }
        if self.is_interface(dst) {
            return self.implements(src, dst);
        }
        false
    }

    /// Whether an untyped constant of type `src` fits a `dst` context.
    fn untyped_convertible(&self, dst: TypeId, src: TypeId) -> bool {
        let dst_cat = self.cat(dst);
        let empty_iface = dst_cat == Cat::Interface && self.get(dst).imethods.is_empty();
        match src {
            UNTYPED_BOOL => dst_cat == Cat::Bool || empty_iface,
            UNTYPED_STRING => dst_cat == Cat::String || empty_iface,
            UNTYPED_INT | UNTYPED_RUNE => self.is_numeric(dst) || empty_iface,
            UNTYPED_FLOAT => self.is_float(dst) || self.is_complex(dst) || empty_iface,
            _ => false,
        }
    }

    /// Explicit conversion `T(x)`.
    pub fn convertible(&self, dst: TypeId, src: TypeId) -> bool {
        if self.assignable(dst, src) {
            return true;
        }
        if self.is_numeric(dst) && self.is_numeric(src) {
            return true;
        }
        let (dc, sc) = (self.cat(dst), self.cat(src));
        // string <-> []byte / []rune, integer -> string.
        if dc == Cat::String {
            if self.is_integer(src) {
                return true;
            }
            if sc == Cat::Slice {
                if let Some(e) = self.get(src).elem {
                    return matches!(self.cat(e), Cat::Uint8 | Cat::Int32);
                }
            }
        }
        if sc == Cat::String && dc == Cat::Slice {
            if let Some(e) = self.get(dst).elem {
                return matches!(self.cat(e), Cat::Uint8 | Cat::Int32);
            }
        }
        if self.underlying_identical(dst, src) {
            return true;
        }
        if dc == Cat::Ptr && sc == Cat::Ptr {
            if let (Some(de), Some(se)) = (self.get(dst).elem, self.get(src).elem) {
                return self.underlying_identical(de, se);
            }
        }
        false
    }

    /// Structural method-set containment of `t` in interface `iface`.
    pub fn implements(&self, t: TypeId, iface: TypeId) -> bool {
        if self.cat(iface) == Cat::Error {
            return self.has_method_sig(t, "Error", &[], &[STRING]);
        }
        let reqs = &self.get(iface).imethods;
        reqs.iter().all(|req| {
            match self.select(t, &req.name) {
                Ok(Selected::Method { sym: _, .. }) => {
                    // Signature compatibility is checked when the method
                    // symbol's type is known; the analysis pass performs the
                    // exact comparison via `method_matches`.
                    true
                }
                _ => {
                    // Interface values also satisfy interfaces structurally.
                    self.is_interface(t)
                        && self
                            .get(t)
                            .imethods
                            .iter()
                            .any(|m| m.name == req.name && self.identical(m.sig, req.sig))
                }
            }
        })
    }

    fn has_method_sig(&self, t: TypeId, name: &str, params: &[TypeId], results: &[TypeId]) -> bool {
        if self.is_interface(t) {
            if self.cat(t) == Cat::Error && name == "Error" {
                return true;
            }
            return self.get(t).imethods.iter().any(|m| {
                m.name == name && {
                    let sig = self.get(m.sig);
                    sig.params.iter().map(|p| self.cat(*p)).eq(params.iter().map(|p| self.cat(*p)))
                        && sig
                            .results
                            .iter()
                            .map(|r| self.cat(*r))
                            .eq(results.iter().map(|r| self.cat(*r)))
                }
            });
        }
        matches!(self.select(t, name), Ok(Selected::Method { .. }))
    }

    /// Resolves `name` on `t`: direct fields and methods first, then
    /// promoted ones through embedded fields in breadth-first depth order.
    /// Two hits at the same depth make the selector ambiguous.
    pub fn select(&self, t: TypeId, name: &str) -> Result<Selected, LookupError> {
        // Auto-deref a pointer receiver.
        let base = match self.cat(t) {
            Cat::Ptr => self.get(t).elem.unwrap_or(t),
            _ => t,
        };

        let mut level: Vec<(TypeId, Vec<usize>)> = vec![(base, Vec::new())];
        let mut depth = 0usize;
        while !level.is_empty() && depth < 16 {
            let mut hits: Vec<Selected> = Vec::new();
            let mut next: Vec<(TypeId, Vec<usize>)> = Vec::new();
            for (ty, path) in &level {
                let def = self.get(*ty);
                if let Some(sym) = def.methods.get(name) {
                    hits.push(Selected::Method {
                        path: path.clone(),
                        sym: *sym,
                    });
                    continue;
                }
                let struct_ty = match def.cat {
                    Cat::Struct => *ty,
                    Cat::Ptr => match def.elem {
                        Some(e) if self.cat(e) == Cat::Struct => e,
                        _ => continue,
                    },
                    _ => continue,
                };
                let sdef = self.get(struct_ty);
                for (idx, field) in sdef.fields.iter().enumerate() {
                    if field.name == name {
                        let mut p = path.clone();
                        p.push(idx);
                        hits.push(Selected::Field { path: p, ty: field.ty });
                    } else if field.embedded {
                        let mut p = path.clone();
                        p.push(idx);
                        next.push((field.ty, p));
                    }
                }
            }
            match hits.len() {
                0 => {}
                1 => return Ok(hits.remove(0)),
                _ => return Err(LookupError::Ambiguous),
            }
            level = next;
            depth += 1;
        }
        Err(LookupError::Missing)
    }

    /// Renders a type for diagnostics.
    pub fn describe(&self, id: TypeId) -> String {
        let t = self.get(id);
        if !t.name.is_empty() {
            return t.name.clone();
        }
        match t.cat {
            Cat::Nil => "nil".to_string(),
            Cat::Bool => "bool".to_string(),
            Cat::String => "string".to_string(),
            Cat::Error => "error".to_string(),
            Cat::Array => format!(
                "[{}]{}",
                t.len,
                t.elem.map(|e| self.describe(e)).unwrap_or_default()
            ),
            Cat::Slice => format!(
                "[]{}",
                t.elem.map(|e| self.describe(e)).unwrap_or_default()
            ),
            Cat::Map => format!(
                "map[{}]{}",
                t.key.map(|k| self.describe(k)).unwrap_or_default(),
                t.elem.map(|e| self.describe(e)).unwrap_or_default()
            ),
            Cat::Chan => {
                let elem = t.elem.map(|e| self.describe(e)).unwrap_or_default();
                match t.dir {
                    ChanDir::Both => format!("chan {elem}"),
                    ChanDir::Send => format!("chan<- {elem}"),
                    ChanDir::Recv => format!("<-chan {elem}"),
                }
            }
            Cat::Ptr => format!(
                "*{}",
                t.elem.map(|e| self.describe(e)).unwrap_or_default()
            ),
            Cat::Struct => {
                let fields = t
                    .fields
                    .iter()
                    .map(|f| {
                        if f.embedded {
                            self.describe(f.ty)
                        } else {
                            format!("{} {}", f.name, self.describe(f.ty))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("struct {{ {fields} }}")
            }
            Cat::Interface => {
                if t.imethods.is_empty() {
                    "interface {}".to_string()
                } else {
                    let methods = t
                        .imethods
                        .iter()
                        .map(|m| m.name.clone())
                        .collect::<Vec<_>>()
                        .join("; ");
                    format!("interface {{ {methods} }}")
                }
            }
            Cat::Func => {
                let params = t
                    .params
                    .iter()
                    .map(|p| self.describe(*p))
                    .collect::<Vec<_>>()
                    .join(", ");
                match t.results.len() {
                    0 => format!("func({params})"),
                    1 => format!("func({params}) {}", self.describe(t.results[0])),
                    _ => format!(
                        "func({params}) ({})",
                        t.results
                            .iter()
                            .map(|r| self.describe(*r))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                }
            }
            Cat::SrcPkg | Cat::BinPkg => format!("package {}", t.path),
            Cat::HostVal => "host value".to_string(),
            Cat::Builtin => "builtin".to_string(),
            _ => {
                if t.untyped {
                    format!("untyped {:?}", t.cat).to_lowercase()
                } else {
                    format!("{:?}", t.cat).to_lowercase()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ChanDir;

    #[test]
    fn unnamed_types_compare_structurally() {
        let mut store = TypeStore::new();
        let a = store.slice_of(INT);
        let b = store.slice_of(INT);
        assert!(store.identical(a, b));
        let c = store.slice_of(STRING);
        assert!(!store.identical(a, c));
    }

    #[test]
    fn named_types_compare_by_identity() {
        let mut store = TypeStore::new();
        let a = store.named("Celsius", "main", FLOAT64, Span::default());
        let b = store.named("Fahrenheit", "main", FLOAT64, Span::default());
        assert!(!store.identical(a, b));
        assert!(store.assignable(a, UNTYPED_FLOAT));
        assert!(!store.assignable(a, b));
        assert!(store.convertible(a, b));
    }

    #[test]
    fn untyped_constants_fit_numeric_contexts() {
        let store = TypeStore::new();
        assert!(store.assignable(FLOAT64, UNTYPED_INT));
        assert!(store.assignable(INT8, UNTYPED_INT));
        assert!(!store.assignable(STRING, UNTYPED_INT));
        assert_eq!(store.default_type(UNTYPED_INT), INT);
        assert_eq!(store.default_type(UNTYPED_RUNE), INT32);
    }

    #[test]
    fn nil_assigns_to_reference_categories() {
        let mut store = TypeStore::new();
        let ptr = store.ptr_to(INT);
        let slice = store.slice_of(INT);
        assert!(store.assignable(ptr, UNTYPED_NIL));
        assert!(store.assignable(slice, UNTYPED_NIL));
        assert!(!store.assignable(INT, UNTYPED_NIL));
    }

    #[test]
    fn directional_channels_accept_bidirectional_values() {
        let mut store = TypeStore::new();
        let both = store.chan_of(ChanDir::Both, INT);
        let send = store.chan_of(ChanDir::Send, INT);
        assert!(store.assignable(send, both));
        assert!(!store.assignable(both, send));
    }

    #[test]
    fn embedded_fields_promote_with_ambiguity_detection() {
        let mut store = TypeStore::new();
        let inner_a = store.struct_of(vec![Field {
            name: "x".to_string(),
            ty: INT,
            embedded: false,
            tag: None,
        }]);
        let named_a = store.named("A", "main", inner_a, Span::default());
        let inner_b = store.struct_of(vec![Field {
            name: "x".to_string(),
            ty: INT,
            embedded: false,
            tag: None,
        }]);
        let named_b = store.named("B", "main", inner_b, Span::default());

        let outer = store.struct_of(vec![
            Field {
                name: "A".to_string(),
                ty: named_a,
                embedded: true,
                tag: None,
            },
            Field {
                name: "B".to_string(),
                ty: named_b,
                embedded: true,
                tag: None,
            },
        ]);
        assert_eq!(store.select(outer, "x"), Err(LookupError::Ambiguous));

        let single = store.struct_of(vec![Field {
            name: "A".to_string(),
            ty: named_a,
            embedded: true,
            tag: None,
        }]);
        match store.select(single, "x") {
            Ok(Selected::Field { path, ty }) => {
                assert_eq!(path, vec![0, 0]);
                assert_eq!(ty, INT);
            }
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn string_byte_slice_conversions_are_allowed() {
        let mut store = TypeStore::new();
        let bytes = store.slice_of(UINT8);
        assert!(store.convertible(bytes, STRING));
        assert!(store.convertible(STRING, bytes));
        let ints = store.slice_of(INT);
        assert!(!store.convertible(ints, STRING));
    }
}
