use crate::source::Span;
use crate::types::TypeId;
use crate::value::Value;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymKind {
    Package,
    Type,
    Const,
    Var,
    Func,
    Method,
    Builtin,
    Label,
    Field,
}

/// Predeclared builtin functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinId {
    Append,
    Cap,
    Close,
    Complex,
    Copy,
    Delete,
    Imag,
    Len,
    Make,
    New,
    Panic,
    Print,
    Println,
    Real,
    Recover,
}

impl BuiltinId {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinId::Append => "append",
            BuiltinId::Cap => "cap",
            BuiltinId::Close => "close",
            BuiltinId::Complex => "complex",
            BuiltinId::Copy => "copy",
            BuiltinId::Delete => "delete",
            BuiltinId::Imag => "imag",
            BuiltinId::Len => "len",
            BuiltinId::Make => "make",
            BuiltinId::New => "new",
            BuiltinId::Panic => "panic",
            BuiltinId::Print => "print",
            BuiltinId::Println => "println",
            BuiltinId::Real => "real",
            BuiltinId::Recover => "recover",
        }
    }

    pub const ALL: [BuiltinId; 15] = [
        BuiltinId::Append,
        BuiltinId::Cap,
        BuiltinId::Close,
        BuiltinId::Complex,
        BuiltinId::Copy,
        BuiltinId::Delete,
        BuiltinId::Imag,
        BuiltinId::Len,
        BuiltinId::Make,
        BuiltinId::New,
        BuiltinId::Panic,
        BuiltinId::Print,
        BuiltinId::Println,
        BuiltinId::Real,
        BuiltinId::Recover,
    ];
}

/// A declared name. Method symbols additionally carry their receiver type;
/// function symbols point at their definition node.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub kind: SymKind,
    pub name: String,
    pub scope: ScopeId,
    pub typ: Option<TypeId>,
    /// Constant value for `const` symbols, folded during analysis.
    pub value: Option<Value>,
    /// Frame slot of the symbol's storage, when it has storage.
    pub findex: Option<usize>,
    /// Receiver type for methods.
    pub recv: Option<TypeId>,
    pub builtin: Option<BuiltinId>,
    /// Defining node as (unit index, node index), for funcs and labels.
    pub node: Option<(usize, u32)>,
    /// True when the symbol lives in the package (global) frame.
    pub global: bool,
    pub span: Span,
}

impl Symbol {
    pub fn new(kind: SymKind, name: &str, scope: ScopeId) -> Self {
        Self {
            kind,
            name: name.to_string(),
            scope,
            typ: None,
            value: None,
            findex: None,
            recv: None,
            builtin: None,
            node: None,
            global: false,
            span: Span::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// True for the universe and package-level scopes: symbols declared
    /// here live in the package frame.
    pub global: bool,
    /// The scope owning this scope's frame slots: a function's root scope
    /// or a package scope. Block scopes share their function's frame.
    pub frame_owner: Option<ScopeId>,
    syms: HashMap<String, SymId>,
    /// Slot types of the frame owned by this scope. At package level this
    /// list dictates the package frame layout.
    pub types: Vec<TypeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateError {
    pub name: String,
    pub prev: SymId,
}

/// Arena of scopes and symbols. The universe scope is created first and is
/// the root of every lookup chain.
#[derive(Clone, Debug, Default)]
pub struct ScopeStore {
    scopes: Vec<Scope>,
    syms: Vec<Symbol>,
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a child scope. A scope owning a frame (function root,
    /// package) passes `owns_frame`.
    pub fn enter(&mut self, parent: Option<ScopeId>, global: bool, owns_frame: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let frame_owner = if owns_frame {
            Some(id)
        } else {
            parent.and_then(|p| self.scopes[p.0 as usize].frame_owner)
        };
        self.scopes.push(Scope {
            parent,
            global,
            frame_owner,
            syms: HashMap::new(),
            types: Vec::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scopes[id.0 as usize].parent
    }

    pub fn sym(&self, id: SymId) -> &Symbol {
        &self.syms[id.0 as usize]
    }

    pub fn sym_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.syms[id.0 as usize]
    }

    /// Inserts `sym` into its scope. Duplicate names in the same scope are
    /// rejected except for fields, methods and the blank identifier.
    pub fn declare(&mut self, sym: Symbol) -> Result<SymId, DuplicateError> {
        let scope = sym.scope;
        let reject_dup = !matches!(sym.kind, SymKind::Field | SymKind::Method) && sym.name != "_";
        if reject_dup {
            if let Some(prev) = self.scopes[scope.0 as usize].syms.get(&sym.name) {
                return Err(DuplicateError {
                    name: sym.name.clone(),
                    prev: *prev,
                });
            }
        }
        let id = SymId(self.syms.len() as u32);
        let name = sym.name.clone();
        self.syms.push(sym);
        self.scopes[scope.0 as usize].syms.insert(name, id);
        Ok(id)
    }

    /// Stores a symbol without binding a name in any scope: method and
    /// field symbols, reached through their owner type.
    pub fn declare_detached(&mut self, sym: Symbol) -> SymId {
        let id = SymId(self.syms.len() as u32);
        self.syms.push(sym);
        id
    }

    /// Replaces or inserts without the duplicate check, for REPL
    /// redefinition at global level.
    pub fn redeclare(&mut self, sym: Symbol) -> SymId {
        let scope = sym.scope;
        let id = SymId(self.syms.len() as u32);
        let name = sym.name.clone();
        self.syms.push(sym);
        self.scopes[scope.0 as usize].syms.insert(name, id);
        id
    }

    /// Looks `name` up from `scope` to the root. Returns the first match
    /// and the scope it was found in.
    pub fn lookup(&self, mut scope: ScopeId, name: &str) -> Option<(SymId, ScopeId)> {
        loop {
            let sc = &self.scopes[scope.0 as usize];
            if let Some(sym) = sc.syms.get(name) {
                return Some((*sym, scope));
            }
            scope = sc.parent?;
        }
    }

    /// Looks `name` up in `scope` only.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymId> {
        self.scopes[scope.0 as usize].syms.get(name).copied()
    }

    /// Appends a frame slot of type `ty` to the frame owning `scope` and
    /// returns its index. Indices are never reused within a frame.
    pub fn add_slot(&mut self, scope: ScopeId, ty: TypeId) -> usize {
        let owner = self.scopes[scope.0 as usize]
            .frame_owner
            .unwrap_or(scope);
        let types = &mut self.scopes[owner.0 as usize].types;
        types.push(ty);
        types.len() - 1
    }

    /// Current frame size of the frame owning `scope`.
    pub fn frame_len(&self, scope: ScopeId) -> usize {
        let owner = self.scopes[scope.0 as usize]
            .frame_owner
            .unwrap_or(scope);
        self.scopes[owner.0 as usize].types.len()
    }

    /// Number of ancestor frames between `scope`'s frame and `target`'s
    /// frame, following function nesting. Level 0 means the same frame.
    pub fn frame_level(&self, mut scope: ScopeId, target: ScopeId) -> usize {
        let target_owner = self.scopes[target.0 as usize].frame_owner;
        let mut level = 0;
        loop {
            let owner = self.scopes[scope.0 as usize].frame_owner;
            if owner == target_owner {
                return level;
            }
            let Some(owner_id) = owner else {
                return level;
            };
            let Some(parent) = self.scopes[owner_id.0 as usize].parent else {
                return level;
            };
            level += 1;
            scope = parent;
        }
    }

    /// Iterates the symbols of one scope (package export walks).
    pub fn symbols_in(&self, scope: ScopeId) -> impl Iterator<Item = (&String, SymId)> {
        self.scopes[scope.0 as usize].syms.iter().map(|(k, v)| (k, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;

    #[test]
    fn lookup_walks_to_the_root() {
        let mut store = ScopeStore::new();
        let universe = store.enter(None, true, true);
        let pkg = store.enter(Some(universe), true, true);
        let block = store.enter(Some(pkg), false, false);

        let sym = Symbol::new(SymKind::Var, "x", pkg);
        let id = store.declare(sym).expect("declare");
        let (found, found_in) = store.lookup(block, "x").expect("found");
        assert_eq!(found, id);
        assert_eq!(found_in, pkg);
        assert!(store.lookup(block, "y").is_none());
    }

    #[test]
    fn inner_declarations_shadow_outer_ones() {
        let mut store = ScopeStore::new();
        let universe = store.enter(None, true, true);
        let func = store.enter(Some(universe), false, true);
        let inner = store.enter(Some(func), false, false);

        let outer_sym = store.declare(Symbol::new(SymKind::Var, "x", func)).expect("outer");
        let inner_sym = store
            .declare(Symbol::new(SymKind::Var, "x", inner))
            .expect("inner");
        assert_eq!(store.lookup(inner, "x").map(|(s, _)| s), Some(inner_sym));
        assert_eq!(store.lookup(func, "x").map(|(s, _)| s), Some(outer_sym));
    }

    #[test]
    fn duplicates_in_one_scope_are_rejected() {
        let mut store = ScopeStore::new();
        let universe = store.enter(None, true, true);
        store
            .declare(Symbol::new(SymKind::Var, "x", universe))
            .expect("first");
        assert!(store.declare(Symbol::new(SymKind::Var, "x", universe)).is_err());
        // The blank identifier may repeat.
        store
            .declare(Symbol::new(SymKind::Var, "_", universe))
            .expect("blank 1");
        store
            .declare(Symbol::new(SymKind::Var, "_", universe))
            .expect("blank 2");
    }

    #[test]
    fn block_scopes_share_their_functions_frame() {
        let mut store = ScopeStore::new();
        let universe = store.enter(None, true, true);
        let func = store.enter(Some(universe), false, true);
        let block = store.enter(Some(func), false, false);

        assert_eq!(store.add_slot(func, types::INT), 0);
        assert_eq!(store.add_slot(block, types::STRING), 1);
        assert_eq!(store.frame_len(block), 2);
        assert_eq!(store.frame_len(func), 2);
    }

    #[test]
    fn frame_level_counts_function_nesting() {
        let mut store = ScopeStore::new();
        let universe = store.enter(None, true, true);
        let outer = store.enter(Some(universe), false, true);
        let inner = store.enter(Some(outer), false, true);
        let block = store.enter(Some(inner), false, false);

        assert_eq!(store.frame_level(block, inner), 0);
        assert_eq!(store.frame_level(block, outer), 1);
        assert_eq!(store.frame_level(block, universe), 2);
    }
}
