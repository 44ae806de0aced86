use crate::ast::{AssignOp, BinaryOp, BranchKind, ChanDir, FuncSig, TypeExpr, UnaryOp};
use crate::builtins::BuiltinPlan;
use crate::exec::{
    AssignPlan, Callee, CallPlan, CommPlan, CompositePlan, Loc, OkSource, RangePlan,
    SelectCasePlan, Step,
};
use crate::gta;
use crate::interp::{Globals, InterpCore};
use crate::node::{Action, CommKind, NodeId, NodeKind, RecvInfo, Unit};
use crate::ops::{self, BinFn, ConvFn, UnFn};
use crate::scope::{BuiltinId, ScopeId, SymKind, Symbol};
use crate::source::Span;
use crate::types::{Cat, LookupError, Selected, TypeId};
use crate::value::{zero_value, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

impl CompileError {
    fn new(message: impl Into<String>, span: Span) -> CompileError {
        CompileError {
            message: message.into(),
            span,
        }
    }

    /// Folds the errors of one pass into a single report, keeping the
    /// first position.
    pub fn aggregate(mut errors: Vec<CompileError>) -> CompileError {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        let span = errors.first().map(|e| e.span).unwrap_or_default();
        CompileError {
            message: errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            span,
        }
    }
}

/// Result of the CFG pass over one evaluation unit.
pub struct CfgOutput {
    /// Package initialiser functions, in declaration order.
    pub init_nodes: Vec<NodeId>,
    /// Frame slot of the last top-level expression, the eval result.
    pub result_slot: Option<usize>,
}

/// The generated-action plan recorded per node; turned into closures once
/// the whole unit is wired.
enum Gen {
    Jump,
    Const {
        dest: usize,
        value: Value,
    },
    VarCopy {
        dest: usize,
        level: usize,
        index: usize,
    },
    Binary {
        op: BinFn,
        lhs: usize,
        rhs: usize,
        dest: usize,
    },
    Unary {
        op: UnFn,
        operand: usize,
        dest: usize,
    },
    Convert {
        conv: ConvFn,
        operand: usize,
        dest: usize,
    },
    ReadLoc {
        loc: Loc,
        missing: Value,
        dest: usize,
    },
    IndexString {
        subject: usize,
        index: usize,
        dest: usize,
    },
    SliceExpr {
        subject: usize,
        low: Option<usize>,
        high: Option<usize>,
        dest: usize,
    },
    Addr {
        loc: Loc,
        dest: usize,
    },
    AddrOfValue {
        src: usize,
        dest: usize,
    },
    Assign {
        plans: Vec<AssignPlan>,
    },
    AssignOk {
        source: OkSource,
        value_loc: Loc,
        ok_loc: Loc,
        wrap: Option<TypeId>,
    },
    Recv {
        chan: usize,
        dest: usize,
    },
    Send {
        chan: usize,
        value: usize,
        wrap: Option<TypeId>,
    },
    Call(CallPlan),
    Go(CallPlan),
    DeferCall(CallPlan),
    Builtin(BuiltinPlan),
    DeferBuiltin(BuiltinPlan),
    Return {
        sources: Vec<(usize, Option<TypeId>)>,
    },
    FuncDeclare {
        node: NodeId,
        level: usize,
        index: Option<usize>,
    },
    FuncLit {
        node: NodeId,
        dest: usize,
    },
    Composite {
        plan: CompositePlan,
        dest: usize,
    },
    TypeAssert {
        src: usize,
        accept: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
        want: String,
        keep_iface: bool,
        dest: usize,
    },
    TypeTest {
        src: usize,
        accept: Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>,
        bind: Option<usize>,
    },
    MethodValue {
        recv: Loc,
        recv_is_ptr: bool,
        want_ptr: bool,
        name: String,
        target: Option<(usize, NodeId)>,
        dest: usize,
    },
    Select {
        cases: Vec<SelectCasePlan>,
    },
    RangeInit(RangePlan),
    Range(RangePlan),
}

/// An edge to be wired to the following statement.
#[derive(Clone, Copy, Debug)]
enum Out {
    T(NodeId),
    F(NodeId),
}

/// A wired fragment of CFG: its entry node and dangling exits.
#[derive(Clone, Debug, Default)]
struct Chain {
    start: Option<NodeId>,
    outs: Vec<Out>,
}

impl Chain {
    fn solo(node: NodeId) -> Chain {
        Chain {
            start: Some(node),
            outs: vec![Out::T(node)],
        }
    }
}

/// What an expression denotes besides a plain value.
enum Denot {
    Value,
    Blank,
    Type(TypeId),
    Builtin(BuiltinId),
    Pkg(TypeId),
}

struct ExprInfo {
    chain: Chain,
    typ: TypeId,
    slot: usize,
    /// Folded constant value, when the expression is constant.
    val: Option<Value>,
    /// Location plan when the expression designates storage.
    loc: Option<Loc>,
    /// Whether `&` may be applied (map elements excluded).
    addressable: bool,
    denot: Denot,
}

impl ExprInfo {
    fn value(chain: Chain, typ: TypeId, slot: usize) -> ExprInfo {
        ExprInfo {
            chain,
            typ,
            slot,
            val: None,
            loc: None,
            addressable: false,
            denot: Denot::Value,
        }
    }
}

struct LoopCtx {
    label: Option<String>,
    /// Continue target; `None` marks a breakable non-loop (switch,
    /// select).
    continue_target: Option<NodeId>,
    breaks: Vec<Out>,
}

struct FuncCtx {
    nret: usize,
    results: Vec<TypeId>,
    labels: HashMap<String, NodeId>,
    gotos: Vec<(NodeId, String, Span)>,
    loops: Vec<LoopCtx>,
    pending_label: Option<String>,
    /// Fallthrough nodes awaiting the next case body of the enclosing
    /// switch.
    fallthroughs: Vec<NodeId>,
}

impl FuncCtx {
    fn new(results: Vec<TypeId>) -> FuncCtx {
        FuncCtx {
            nret: results.len(),
            results,
            labels: HashMap::new(),
            gotos: Vec::new(),
            loops: Vec::new(),
            pending_label: None,
            fallthroughs: Vec::new(),
        }
    }
}

pub struct Cfg<'a> {
    globals: &'a mut Globals,
    unit: &'a mut Unit,
    core: Arc<InterpCore>,
    plans: HashMap<NodeId, Gen>,
    init_nodes: Vec<NodeId>,
    result_slot: Option<usize>,
}

/// Builds the control-flow graph of one evaluation unit: resolves
/// identifiers, types expressions, allocates frame slots, selects typed
/// actions, wires `tnext`/`fnext`, and generates the executor closures.
pub fn build(
    globals: &mut Globals,
    unit: &mut Unit,
    root: NodeId,
    pkg_scope: ScopeId,
    core: &Arc<InterpCore>,
) -> Result<CfgOutput, CompileError> {
    let mut cfg = Cfg {
        globals,
        unit,
        core: core.clone(),
        plans: HashMap::new(),
        init_nodes: Vec::new(),
        result_slot: None,
    };
    cfg.file(root, pkg_scope)?;
    cfg.generate();
    Ok(CfgOutput {
        init_nodes: cfg.init_nodes,
        result_slot: cfg.result_slot,
    })
}

impl<'a> Cfg<'a> {
    // ---- plumbing ----

    fn ty(&self, id: TypeId) -> &crate::types::Type {
        self.globals.types.get(id)
    }

    fn cat(&self, id: TypeId) -> Cat {
        self.globals.types.cat(id)
    }

    fn describe(&self, id: TypeId) -> String {
        self.globals.types.describe(id)
    }

    fn temp(&mut self, scope: ScopeId, ty: TypeId) -> usize {
        self.globals.scopes.add_slot(scope, ty)
    }

    fn span(&self, id: NodeId) -> Span {
        self.unit.node(id).span
    }

    fn plan(&mut self, id: NodeId, gen: Gen) {
        self.plans.insert(id, gen);
    }

    fn wire(&mut self, outs: &[Out], target: NodeId) {
        for out in outs {
            match out {
                Out::T(id) => self.unit.node_mut(*id).tnext = Some(target),
                Out::F(id) => self.unit.node_mut(*id).fnext = Some(target),
            }
        }
    }

    fn seq(&mut self, chains: Vec<Chain>) -> Chain {
        let mut merged = Chain::default();
        let mut dangling: Vec<Out> = Vec::new();
        for chain in chains {
            let Some(start) = chain.start else {
                continue;
            };
            if merged.start.is_none() {
                merged.start = Some(start);
            } else {
                self.wire(&dangling, start);
            }
            dangling = chain.outs;
        }
        merged.outs = dangling;
        merged
    }

    /// Ensures an expression ends in a node able to branch on its value,
    /// for condition positions.
    fn as_cond(&mut self, scope: ScopeId, info: &ExprInfo, span: Span) -> Result<Chain, CompileError> {
        if self.cat(info.typ) != Cat::Bool {
            return Err(CompileError::new(
                format!("non-bool condition ({})", self.describe(info.typ)),
                span,
            ));
        }
        let probe = self.unit.synthetic(span);
        let dest = self.temp(scope, crate::types::BOOL);
        self.plan(
            probe,
            Gen::VarCopy {
                dest,
                level: 0,
                index: info.slot,
            },
        );
        let mut chains = vec![info.chain.clone(), Chain::solo(probe)];
        let merged = self.seq(chains.drain(..).collect());
        Ok(Chain {
            start: merged.start,
            outs: vec![Out::T(probe), Out::F(probe)],
        })
    }

    /// The wrap plan for assigning `src` into a `dst` location: interface
    /// destinations box concrete values tagged with their static type.
    fn wrap_for(&mut self, dst: TypeId, src: TypeId) -> Option<TypeId> {
        if self.globals.types.is_interface(dst) && !self.globals.types.is_interface(src) {
            Some(self.globals.types.default_type(src))
        } else {
            None
        }
    }

    /// Checks assignability and converts folded constants into the
    /// destination's representation.
    fn check_assign(
        &mut self,
        dst: TypeId,
        src: &ExprInfo,
        span: Span,
    ) -> Result<Option<TypeId>, CompileError> {
        if !self.globals.types.assignable(dst, src.typ) {
            return Err(CompileError::new(
                format!(
                    "cannot use value of type {} as {}",
                    self.describe(src.typ),
                    self.describe(dst)
                ),
                span,
            ));
        }
        self.coerce_const(dst, src, span)?;
        Ok(self.wrap_for(dst, src.typ))
    }

    /// Rewrites a folded constant's stored value to the destination type's
    /// representation (untyped 1 becomes 1.0 in a float context).
    fn coerce_const(
        &mut self,
        dst: TypeId,
        src: &ExprInfo,
        span: Span,
    ) -> Result<(), CompileError> {
        let Some(value) = &src.val else {
            return Ok(());
        };
        if !self.ty(src.typ).untyped || self.ty(dst).untyped {
            return Ok(());
        }
        if !self.globals.types.is_numeric(dst)
            && !matches!(self.cat(dst), Cat::Bool | Cat::String)
        {
            return Ok(());
        }
        let conv = ops::convert_action(&self.globals.types, dst, self.globals.types.default_type(src.typ))
            .map_err(|message| CompileError::new(message, span))?;
        let converted = conv(value).map_err(|e| CompileError::new(e.to_string(), span))?;
        if let Some(end) = src.chain.start {
            // A folded constant's chain is its single const node.
            if let Some(Gen::Const { value, .. }) = self.plans.get_mut(&end) {
                *value = converted;
            }
        }
        Ok(())
    }

    // ---- file level ----

    fn file(&mut self, root: NodeId, pkg_scope: ScopeId) -> Result<(), CompileError> {
        let mut func = FuncCtx::new(Vec::new());
        let children = self.unit.node(root).children.clone();
        let mut chains = Vec::new();
        let mut errors = Vec::new();
        self.result_slot = None;

        for child in children {
            let result = match self.unit.node(child).kind.clone() {
                NodeKind::Import { .. } | NodeKind::TypeDecl { .. } | NodeKind::ConstDecl { .. } => {
                    Ok(Chain::default())
                }
                NodeKind::FuncDecl { name, recv, .. } => {
                    self.func_decl(child, pkg_scope).map(|chain| {
                        if recv.is_none() && name == "init" {
                            self.init_nodes.push(child);
                        }
                        chain
                    })
                }
                NodeKind::VarDecl { .. } => self.var_decl(&mut func, pkg_scope, child, true),
                _ => {
                    let chain = self.stmt(&mut func, pkg_scope, child);
                    if let Ok(_) = &chain {
                        if let NodeKind::ExprStmt = self.unit.node(child).kind {
                            let expr = self.unit.node(child).children[0];
                            if let Some(slot) = self.unit.node(expr).findex {
                                self.result_slot = Some(slot);
                            }
                        }
                    }
                    chain
                }
            };
            match result {
                Ok(chain) => chains.push(chain),
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(CompileError::aggregate(errors));
        }

        self.resolve_gotos(&mut func)?;
        let chain = self.seq(chains);
        self.unit.node_mut(root).start = chain.start;
        Ok(())
    }

    // ---- functions ----

    /// Compiles a function declaration: opens the function scope, lays out
    /// the frame (results, receiver, parameters), compiles the body, and
    /// plans the declaring action.
    fn func_decl(&mut self, id: NodeId, scope: ScopeId) -> Result<Chain, CompileError> {
        let NodeKind::FuncDecl { name, recv, sig } = self.unit.node(id).kind.clone() else {
            return Err(CompileError::new("expected function declaration", self.span(id)));
        };
        let span = self.span(id);
        let typ = match self.unit.node(id).typ {
            Some(t) => t,
            None => {
                let t = gta::resolve_signature(self.globals, scope, &sig)?;
                self.unit.node_mut(id).typ = Some(t);
                t
            }
        };

        self.compile_func_body(id, scope, &sig, recv.as_ref(), span)?;

        // The declaring action stores the function value in its slot;
        // methods and initialisers have no slot.
        let (level, index) = if recv.is_none() && name != "init" && name != "_" {
            match self.globals.scopes.lookup(scope, &name) {
                Some((sym, found_in)) => {
                    let symbol = self.globals.scopes.sym(sym);
                    let index = symbol.findex;
                    let level = self.globals.scopes.frame_level(scope, found_in);
                    (level, index)
                }
                None => (0, None),
            }
        } else {
            (0, None)
        };

        let _ = typ;
        self.unit.node_mut(id).action = Action::FuncDecl;
        self.plan(
            id,
            Gen::FuncDeclare {
                node: id,
                level,
                index,
            },
        );
        Ok(Chain::solo(id))
    }

    fn compile_func_body(
        &mut self,
        id: NodeId,
        decl_scope: ScopeId,
        sig: &FuncSig,
        recv: Option<&(String, TypeExpr)>,
        span: Span,
    ) -> Result<(), CompileError> {
        let fscope = self.globals.scopes.enter(Some(decl_scope), false, true);
        self.unit.node_mut(id).scope = Some(fscope);

        // Results first, then the receiver, then parameters; locals and
        // temporaries follow.
        let mut results = Vec::new();
        for result in &sig.results {
            let ty = gta::resolve_type_expr(self.globals, decl_scope, &result.ty)?;
            let slot = self.globals.scopes.add_slot(fscope, ty);
            if let Some(name) = &result.name {
                let mut sym = Symbol::new(SymKind::Var, &name.name, fscope);
                sym.typ = Some(ty);
                sym.findex = Some(slot);
                sym.span = name.span;
                let _ = self.globals.scopes.redeclare(sym);
            }
            results.push(ty);
        }

        if let Some((recv_name, recv_ty_expr)) = recv {
            let recv_ty = gta::resolve_type_expr(self.globals, decl_scope, recv_ty_expr)?;
            let slot = self.globals.scopes.add_slot(fscope, recv_ty);
            if !recv_name.is_empty() && recv_name != "_" {
                let mut sym = Symbol::new(SymKind::Var, recv_name, fscope);
                sym.typ = Some(recv_ty);
                sym.findex = Some(slot);
                let _ = self.globals.scopes.redeclare(sym);
            }
        }

        for (idx, param) in sig.params.iter().enumerate() {
            let mut ty = gta::resolve_type_expr(self.globals, decl_scope, &param.ty)?;
            if sig.variadic && idx == sig.params.len() - 1 {
                ty = self.globals.types.slice_of(ty);
            }
            let slot = self.globals.scopes.add_slot(fscope, ty);
            if let Some(name) = &param.name {
                if name.name != "_" {
                    let mut sym = Symbol::new(SymKind::Var, &name.name, fscope);
                    sym.typ = Some(ty);
                    sym.findex = Some(slot);
                    sym.span = name.span;
                    let _ = self.globals.scopes.redeclare(sym);
                }
            }
        }

        let mut func = FuncCtx::new(results);
        let body = self.unit.node(id).children.last().copied();
        let body_chain = match body {
            Some(body) if matches!(self.unit.node(body).kind, NodeKind::BlockStmt) => {
                self.stmt(&mut func, fscope, body)?
            }
            _ => Chain::default(),
        };
        self.resolve_gotos(&mut func)?;

        // Falling off the end returns the (zeroed or named) results.
        self.unit.node_mut(id).start = body_chain.start;

        let frame_types = self.globals.scopes.scope(fscope).types.clone();
        let zeros: Vec<Value> = frame_types
            .iter()
            .map(|t| zero_value(&self.globals.types, *t))
            .collect();
        self.unit.node_mut(id).findex = Some(frame_types.len());
        self.unit.node_mut(id).frame_types = frame_types;
        self.unit.zeros.insert(id, zeros);
        let _ = span;
        Ok(())
    }

    fn resolve_gotos(&mut self, func: &mut FuncCtx) -> Result<(), CompileError> {
        for (node, label, span) in func.gotos.drain(..) {
            let target = func.labels.get(&label).copied().ok_or_else(|| {
                CompileError::new(format!("label {label} not defined"), span)
            })?;
            self.unit.node_mut(node).tnext = Some(target);
        }
        Ok(())
    }

    // ---- statements ----

    fn stmt(&mut self, func: &mut FuncCtx, scope: ScopeId, id: NodeId) -> Result<Chain, CompileError> {
        match self.unit.node(id).kind.clone() {
            NodeKind::EmptyStmt => Ok(Chain::default()),
            NodeKind::BlockStmt => {
                let inner = self.globals.scopes.enter(Some(scope), false, false);
                let children = self.unit.node(id).children.clone();
                let mut chains = Vec::new();
                for child in children {
                    chains.push(self.stmt(func, inner, child)?);
                }
                Ok(self.seq(chains))
            }
            NodeKind::DeclStmt => {
                let children = self.unit.node(id).children.clone();
                let mut chains = Vec::new();
                let mut inherited: Vec<crate::ast::Expr> = Vec::new();
                for child in children {
                    let chain = match self.unit.node(child).kind.clone() {
                        NodeKind::VarDecl { .. } => self.var_decl(func, scope, child, false)?,
                        NodeKind::ConstDecl {
                            names,
                            ty,
                            iota,
                            values,
                        } => {
                            // Specs without values repeat the previous
                            // spec's expressions with their own iota.
                            let values = if values.is_empty() && iota > 0 {
                                inherited.clone()
                            } else {
                                inherited = values.clone();
                                values
                            };
                            self.local_const(scope, &names, &ty, iota, &values, child)?;
                            Chain::default()
                        }
                        NodeKind::TypeDecl { name, alias, ty } => {
                            self.local_type(scope, &name, alias, &ty, child)?;
                            Chain::default()
                        }
                        NodeKind::FuncDecl { .. } => self.func_decl(child, scope)?,
                        _ => Chain::default(),
                    };
                    chains.push(chain);
                }
                Ok(self.seq(chains))
            }
            NodeKind::ExprStmt => {
                let child = self.unit.node(id).children[0];
                let info = self.expr(func, scope, child, None)?;
                Ok(info.chain)
            }
            NodeKind::AssignStmt { op, nleft } => self.assign_stmt(func, scope, id, op, nleft),
            NodeKind::IncDecStmt { inc } => self.incdec_stmt(func, scope, id, inc),
            NodeKind::SendStmt => {
                let children = self.unit.node(id).children.clone();
                let chan = self.expr(func, scope, children[0], None)?;
                if self.cat(chan.typ) != Cat::Chan {
                    return Err(CompileError::new(
                        format!("cannot send to {}", self.describe(chan.typ)),
                        self.span(id),
                    ));
                }
                if self.ty(chan.typ).dir == ChanDir::Recv {
                    return Err(CompileError::new(
                        "cannot send to receive-only channel",
                        self.span(id),
                    ));
                }
                let elem = self.ty(chan.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let value = self.expr(func, scope, children[1], Some(elem))?;
                let wrap = self.check_assign(elem, &value, self.span(id))?;
                self.unit.node_mut(id).action = Action::Send;
                self.plan(
                    id,
                    Gen::Send {
                        chan: chan.slot,
                        value: value.slot,
                        wrap,
                    },
                );
                Ok(self.seq(vec![chan.chain, value.chain, Chain::solo(id)]))
            }
            NodeKind::IfStmt { has_init, has_else } => {
                self.if_stmt(func, scope, id, has_init, has_else)
            }
            NodeKind::ForStmt {
                has_init,
                has_cond,
                has_post,
            } => self.for_stmt(func, scope, id, has_init, has_cond, has_post),
            NodeKind::RangeStmt { key, value, define } => {
                self.range_stmt(func, scope, id, key, value, define)
            }
            NodeKind::SwitchStmt { has_init, has_tag } => {
                self.switch_stmt(func, scope, id, has_init, has_tag)
            }
            NodeKind::TypeSwitchStmt { binding, has_init } => {
                self.type_switch_stmt(func, scope, id, binding, has_init)
            }
            NodeKind::SelectStmt => self.select_stmt(func, scope, id),
            NodeKind::GoStmt => {
                let call = self.unit.node(id).children[0];
                let plan = self.call_plan(func, scope, call)?;
                match plan {
                    PlannedCall::Ordinary(chain, plan) => {
                        self.unit.node_mut(id).action = Action::Call;
                        self.plan(id, Gen::Go(plan));
                        Ok(self.seq(vec![chain, Chain::solo(id)]))
                    }
                    _ => Err(CompileError::new(
                        "go requires a function call",
                        self.span(id),
                    )),
                }
            }
            NodeKind::DeferStmt => {
                let call = self.unit.node(id).children[0];
                let plan = self.call_plan(func, scope, call)?;
                match plan {
                    PlannedCall::Ordinary(chain, plan) => {
                        self.plan(id, Gen::DeferCall(plan));
                        Ok(self.seq(vec![chain, Chain::solo(id)]))
                    }
                    PlannedCall::Builtin(chain, plan) => {
                        self.plan(id, Gen::DeferBuiltin(plan));
                        Ok(self.seq(vec![chain, Chain::solo(id)]))
                    }
                    PlannedCall::Converted(..) => Err(CompileError::new(
                        "defer requires a function call",
                        self.span(id),
                    )),
                }
            }
            NodeKind::ReturnStmt => self.return_stmt(func, scope, id),
            NodeKind::BranchStmt { kind, label } => self.branch_stmt(func, id, kind, label),
            NodeKind::LabeledStmt { label } => {
                let inner = self.unit.node(id).children[0];
                func.pending_label = Some(label.clone());
                let chain = self.stmt(func, scope, inner)?;
                func.pending_label = None;
                if let Some(start) = chain.start {
                    func.labels.insert(label, start);
                }
                Ok(chain)
            }
            other => Err(CompileError::new(
                format!("unsupported statement {other:?}"),
                self.span(id),
            )),
        }
    }

    fn var_decl(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        package_level: bool,
    ) -> Result<Chain, CompileError> {
        let NodeKind::VarDecl { names, ty } = self.unit.node(id).kind.clone() else {
            return Err(CompileError::new("expected var declaration", self.span(id)));
        };
        let span = self.span(id);
        let declared_ty = match &ty {
            Some(texpr) => Some(gta::resolve_type_expr(self.globals, scope, texpr)?),
            None => None,
        };
        let values = self.unit.node(id).children.clone();

        // Multi-value initialisation from one call: `var a, b = f()`.
        if names.len() > 1 && values.len() == 1 {
            return self.multi_value_define(func, scope, &names, declared_ty, values[0], span);
        }

        let mut chains = Vec::new();
        for (idx, name) in names.iter().enumerate() {
            let init = values.get(idx).copied();
            let (value_info, var_ty) = match init {
                Some(value) => {
                    let info = self.expr(func, scope, value, declared_ty)?;
                    let ty = declared_ty
                        .unwrap_or_else(|| self.globals.types.default_type(info.typ));
                    (Some(info), ty)
                }
                None => {
                    let ty = declared_ty.ok_or_else(|| {
                        CompileError::new("missing type or initial value", span)
                    })?;
                    (None, ty)
                }
            };

            let slot = self.declare_var(scope, name, var_ty, package_level, span)?;
            let loc = Loc::slot(0, slot);

            match value_info {
                Some(info) => {
                    let wrap = self.check_assign(var_ty, &info, span)?;
                    let assign = self.unit.synthetic(span);
                    self.plan(
                        assign,
                        Gen::Assign {
                            plans: vec![AssignPlan {
                                loc,
                                src: info.slot,
                                wrap,
                                op: None,
                            }],
                        },
                    );
                    chains.push(self.seq(vec![info.chain, Chain::solo(assign)]));
                }
                None => {
                    // Re-entering a block re-zeroes its locals.
                    let zero = zero_value(&self.globals.types, var_ty);
                    let init = self.unit.synthetic(span);
                    self.plan(init, Gen::Const { dest: slot, value: zero });
                    chains.push(Chain::solo(init));
                }
            }
        }
        Ok(self.seq(chains))
    }

    /// Declares a variable, reusing the slot allocated by global analysis
    /// for package-level names.
    fn declare_var(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
        package_level: bool,
        span: Span,
    ) -> Result<usize, CompileError> {
        if name == "_" {
            return Ok(self.temp(scope, ty));
        }
        if package_level {
            if let Some(sym) = self.globals.scopes.lookup_local(scope, name) {
                let symbol = self.globals.scopes.sym_mut(sym);
                if symbol.typ.is_none() {
                    symbol.typ = Some(ty);
                }
                if let Some(slot) = symbol.findex {
                    return Ok(slot);
                }
            }
        }
        let slot = self.globals.scopes.add_slot(scope, ty);
        let mut sym = Symbol::new(SymKind::Var, name, scope);
        sym.typ = Some(ty);
        sym.findex = Some(slot);
        sym.global = self.globals.scopes.scope(scope).global;
        sym.span = span;
        let _ = self.globals.scopes.redeclare(sym);
        Ok(slot)
    }

    fn multi_value_define(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        names: &[String],
        declared_ty: Option<TypeId>,
        value: NodeId,
        span: Span,
    ) -> Result<Chain, CompileError> {
        let planned = self.call_plan(func, scope, value)?;
        let PlannedCall::Ordinary(chain, mut plan) = planned else {
            return Err(CompileError::new(
                "multi-value initialiser must be a function call",
                span,
            ));
        };
        let results = self.ty_results(value)?;
        if results.len() != names.len() {
            return Err(CompileError::new(
                format!("expected {} values, got {}", names.len(), results.len()),
                span,
            ));
        }
        let mut slots = Vec::new();
        for (name, rty) in names.iter().zip(&results) {
            let ty = declared_ty.unwrap_or(*rty);
            slots.push(self.declare_var(scope, name, ty, false, span)?);
        }
        // Results land in consecutive temporaries, then copy out.
        let base = self.temp(scope, results[0]);
        for rty in results.iter().skip(1) {
            self.temp(scope, *rty);
        }
        plan.dest = base;
        plan.nret = results.len();
        self.plan(value, Gen::Call(plan));
        let assign = self.unit.synthetic(span);
        let plans: Vec<AssignPlan> = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| AssignPlan {
                loc: Loc::slot(0, *slot),
                src: base + idx,
                wrap: None,
                op: None,
            })
            .collect();
        self.plan(assign, Gen::Assign { plans });
        Ok(self.seq(vec![chain, Chain::solo(value), Chain::solo(assign)]))
    }

    /// The declared result types of a planned call node.
    fn ty_results(&self, call: NodeId) -> Result<Vec<TypeId>, CompileError> {
        let typ = self.unit.node(call).typ.ok_or_else(|| {
            CompileError::new("untyped call", self.span(call))
        })?;
        Ok(match self.cat(typ) {
            Cat::Func => self.ty(typ).results.clone(),
            _ => vec![typ],
        })
    }

    fn local_const(
        &mut self,
        scope: ScopeId,
        names: &[String],
        ty: &Option<TypeExpr>,
        iota: usize,
        values: &[crate::ast::Expr],
        id: NodeId,
    ) -> Result<(), CompileError> {
        let declared_ty = match ty {
            Some(texpr) => Some(gta::resolve_type_expr(self.globals, scope, texpr)?),
            None => None,
        };
        let span = self.span(id);
        for (idx, name) in names.iter().enumerate() {
            let expr = values
                .get(idx)
                .ok_or_else(|| CompileError::new("missing constant value", span))?;
            let (value, value_ty) = gta::const_eval(self.globals, scope, expr, iota as i64)?;
            let mut sym = Symbol::new(SymKind::Const, name, scope);
            sym.typ = Some(declared_ty.unwrap_or(value_ty));
            sym.value = Some(value);
            sym.span = span;
            let _ = self.globals.scopes.redeclare(sym);
        }
        Ok(())
    }

    fn local_type(
        &mut self,
        scope: ScopeId,
        name: &str,
        alias: bool,
        ty: &TypeExpr,
        id: NodeId,
    ) -> Result<(), CompileError> {
        let span = self.span(id);
        let typ = if alias {
            gta::resolve_type_expr(self.globals, scope, ty)?
        } else {
            let shell = {
                let mut t = crate::types::Type::shell();
                t.name = name.to_string();
                t.span = span;
                self.globals.types.add(t)
            };
            let mut sym = Symbol::new(SymKind::Type, name, scope);
            sym.typ = Some(shell);
            sym.span = span;
            let _ = self.globals.scopes.redeclare(sym);
            let underlying = gta::resolve_type_expr(self.globals, scope, ty)?;
            self.globals.types.fill_named(shell, underlying);
            shell
        };
        if alias {
            let mut sym = Symbol::new(SymKind::Type, name, scope);
            sym.typ = Some(typ);
            sym.span = span;
            let _ = self.globals.scopes.redeclare(sym);
        }
        self.unit.node_mut(id).typ = Some(typ);
        Ok(())
    }

    fn assign_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        op: AssignOp,
        nleft: usize,
    ) -> Result<Chain, CompileError> {
        let children = self.unit.node(id).children.clone();
        let span = self.span(id);
        let (lhs_nodes, rhs_nodes) = children.split_at(nleft);
        let lhs_nodes = lhs_nodes.to_vec();
        let rhs_nodes = rhs_nodes.to_vec();

        // Comma-ok forms: `v, ok := m[k]`, `v, ok := <-ch`,
        // `v, ok := x.(T)`.
        if nleft == 2 && rhs_nodes.len() == 1 {
            let rhs_kind = self.unit.node(rhs_nodes[0]).kind.clone();
            let comma_ok = matches!(
                rhs_kind,
                NodeKind::UnaryExpr { op: UnaryOp::Recv } | NodeKind::TypeAssertExpr { .. }
            ) || self.is_map_index(func, scope, rhs_nodes[0]);
            if comma_ok {
                return self.assign_ok(func, scope, id, op, &lhs_nodes, rhs_nodes[0]);
            }
        }

        // Multi-value call: `a, b = f()`.
        if nleft > 1 && rhs_nodes.len() == 1 {
            if matches!(self.unit.node(rhs_nodes[0]).kind, NodeKind::CallExpr { .. }) {
                return self.assign_call(func, scope, id, op, &lhs_nodes, rhs_nodes[0]);
            }
        }

        if lhs_nodes.len() != rhs_nodes.len() {
            return Err(CompileError::new(
                format!(
                    "assignment mismatch: {} variables but {} values",
                    lhs_nodes.len(),
                    rhs_nodes.len()
                ),
                span,
            ));
        }

        let mut chains = Vec::new();
        let mut plans = Vec::new();

        if op == AssignOp::Define {
            let mut new_names = 0usize;
            // First type the right sides, then declare.
            let mut rhs_infos = Vec::new();
            for rhs in &rhs_nodes {
                rhs_infos.push(self.expr(func, scope, *rhs, None)?);
            }
            for (lhs, info) in lhs_nodes.iter().zip(rhs_infos.into_iter()) {
                let name = match &self.unit.node(*lhs).kind {
                    NodeKind::Ident => self.unit.node(*lhs).ident.clone(),
                    _ => {
                        return Err(CompileError::new(
                            "non-name on left side of :=",
                            self.span(*lhs),
                        ))
                    }
                };
                let existing = if name == "_" {
                    None
                } else {
                    self.globals.scopes.lookup_local(scope, &name)
                };
                let (loc, var_ty) = match existing {
                    Some(sym) if self.globals.scopes.sym(sym).kind == SymKind::Var => {
                        let symbol = self.globals.scopes.sym(sym);
                        let ty = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                        let index = symbol.findex.unwrap_or(0);
                        let level =
                            self.globals.scopes.frame_level(scope, symbol.scope);
                        (Loc::Slot { level, index, steps: Vec::new() }, ty)
                    }
                    _ => {
                        new_names += 1;
                        let ty = self.globals.types.default_type(info.typ);
                        let slot = self.declare_var(scope, &name, ty, false, span)?;
                        (Loc::slot(0, slot), ty)
                    }
                };
                let loc = if name == "_" { Loc::Blank } else { loc };
                let wrap = self.check_assign(var_ty, &info, span)?;
                chains.push(info.chain.clone());
                plans.push(AssignPlan {
                    loc,
                    src: info.slot,
                    wrap,
                    op: None,
                });
            }
            if new_names == 0 {
                return Err(CompileError::new("no new variables on left side of :=", span));
            }
        } else {
            let bin_op = assign_binary_op(op);
            for (lhs, rhs) in lhs_nodes.iter().zip(rhs_nodes.iter()) {
                let target = self.lvalue(func, scope, *lhs)?;
                let hint = Some(target.typ);
                let info = self.expr(func, scope, *rhs, hint)?;
                let (wrap, op_fn) = match bin_op {
                    Some(bop) => {
                        let operand_ty = target.typ;
                        // Shifts take any integer count on the right.
                        if matches!(bop, BinaryOp::Shl | BinaryOp::Shr) {
                            if !self.globals.types.is_integer(info.typ)
                                && !self.ty(info.typ).untyped
                            {
                                return Err(CompileError::new(
                                    "shift count must be an integer",
                                    span,
                                ));
                            }
                        } else {
                            self.check_assign(operand_ty, &info, span)?;
                        }
                        let action = ops::binary_action(
                            &self.globals.types,
                            bop,
                            self.globals.types.default_type(operand_ty),
                        )
                        .map_err(|m| CompileError::new(m, span))?;
                        (None, Some(action))
                    }
                    None => (self.check_assign(target.typ, &info, span)?, None),
                };
                chains.push(target.chain.clone());
                chains.push(info.chain.clone());
                plans.push(AssignPlan {
                    loc: target.loc,
                    src: info.slot,
                    wrap,
                    op: op_fn,
                });
            }
        }

        self.unit.node_mut(id).action = if op == AssignOp::Define {
            Action::Define
        } else {
            Action::Assign
        };
        self.plan(id, Gen::Assign { plans });
        chains.push(Chain::solo(id));
        Ok(self.seq(chains))
    }

    fn is_map_index(&mut self, _func: &mut FuncCtx, scope: ScopeId, id: NodeId) -> bool {
        if !matches!(self.unit.node(id).kind, NodeKind::IndexExpr) {
            return false;
        }
        // Peek at the subject's type via a scratch resolution of the
        // identifier; a full re-typing happens in the comma-ok path.
        let subject = self.unit.node(id).children[0];
        if let NodeKind::Ident = self.unit.node(subject).kind {
            let name = self.unit.node(subject).ident.clone();
            if let Some((sym, _)) = self.globals.scopes.lookup(scope, &name) {
                if let Some(ty) = self.globals.scopes.sym(sym).typ {
                    return self.cat(ty) == Cat::Map;
                }
            }
        }
        false
    }

    /// `v, ok := <something>` forms.
    fn assign_ok(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        op: AssignOp,
        lhs: &[NodeId],
        rhs: NodeId,
    ) -> Result<Chain, CompileError> {
        let span = self.span(id);
        let mut chains = Vec::new();

        let (source, value_ty, source_chain) = match self.unit.node(rhs).kind.clone() {
            NodeKind::UnaryExpr { op: UnaryOp::Recv } => {
                let chan_node = self.unit.node(rhs).children[0];
                let chan = self.expr(func, scope, chan_node, None)?;
                if self.cat(chan.typ) != Cat::Chan {
                    return Err(CompileError::new(
                        format!("cannot receive from {}", self.describe(chan.typ)),
                        span,
                    ));
                }
                let elem = self.ty(chan.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                (OkSource::ChanRecv { chan: chan.slot }, elem, chan.chain)
            }
            NodeKind::TypeAssertExpr { ty } => {
                let subject_node = self.unit.node(rhs).children[0];
                let subject = self.expr(func, scope, subject_node, None)?;
                let texpr = ty.ok_or_else(|| {
                    CompileError::new("type switch outside switch statement", span)
                })?;
                let target = gta::resolve_type_expr(self.globals, scope, &texpr)?;
                let accept = self.assert_accept(target);
                let keep_iface = self.globals.types.is_interface(target);
                let missing = zero_value(&self.globals.types, target);
                (
                    OkSource::TypeAssert {
                        src: subject.slot,
                        accept,
                        keep_iface,
                        missing,
                    },
                    target,
                    subject.chain,
                )
            }
            NodeKind::IndexExpr => {
                let subject_node = self.unit.node(rhs).children[0];
                let index_node = self.unit.node(rhs).children[1];
                let subject = self.expr(func, scope, subject_node, None)?;
                if self.cat(subject.typ) != Cat::Map {
                    return Err(CompileError::new("comma-ok index requires a map", span));
                }
                let key_ty = self.ty(subject.typ).key.unwrap_or(crate::types::EMPTY_IFACE);
                let key = self.expr(func, scope, index_node, Some(key_ty))?;
                self.check_assign(key_ty, &key, span)?;
                let elem = self.ty(subject.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let missing = zero_value(&self.globals.types, elem);
                let chain = self.seq(vec![subject.chain, key.chain]);
                (
                    OkSource::MapIndex {
                        map: subject.slot,
                        key: key.slot,
                        missing,
                    },
                    elem,
                    chain,
                )
            }
            other => {
                return Err(CompileError::new(
                    format!("unsupported comma-ok source {other:?}"),
                    span,
                ))
            }
        };
        chains.push(source_chain);

        let value_loc = self.ok_target(func, scope, lhs[0], op, value_ty, span)?;
        let ok_loc = self.ok_target(func, scope, lhs[1], op, crate::types::BOOL, span)?;
        let wrap = None;
        self.plan(
            id,
            Gen::AssignOk {
                source,
                value_loc,
                ok_loc,
                wrap,
            },
        );
        chains.push(Chain::solo(id));
        Ok(self.seq(chains))
    }

    fn ok_target(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        lhs: NodeId,
        op: AssignOp,
        ty: TypeId,
        span: Span,
    ) -> Result<Loc, CompileError> {
        if let NodeKind::Ident = self.unit.node(lhs).kind {
            let name = self.unit.node(lhs).ident.clone();
            if name == "_" {
                return Ok(Loc::Blank);
            }
            if op == AssignOp::Define {
                let slot = self.declare_var(scope, &name, ty, false, span)?;
                return Ok(Loc::slot(0, slot));
            }
        }
        let target = self.lvalue(func, scope, lhs)?;
        Ok(target.loc)
    }

    /// `a, b = f()` and `a, b := f()`.
    fn assign_call(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        op: AssignOp,
        lhs: &[NodeId],
        rhs: NodeId,
    ) -> Result<Chain, CompileError> {
        let span = self.span(id);
        let planned = self.call_plan(func, scope, rhs)?;
        let PlannedCall::Ordinary(chain, mut plan) = planned else {
            return Err(CompileError::new("multi-value call expected", span));
        };
        let results = self.ty_results(rhs)?;
        if results.len() != lhs.len() {
            return Err(CompileError::new(
                format!("expected {} values, got {}", lhs.len(), results.len()),
                span,
            ));
        }
        let base = self.temp(scope, results[0]);
        for rty in results.iter().skip(1) {
            self.temp(scope, *rty);
        }
        plan.dest = base;
        plan.nret = results.len();
        self.plan(rhs, Gen::Call(plan));

        let mut plans = Vec::new();
        for (idx, (target, rty)) in lhs.iter().zip(&results).enumerate() {
            let loc = self.ok_target(func, scope, *target, op, *rty, span)?;
            plans.push(AssignPlan {
                loc,
                src: base + idx,
                wrap: None,
                op: None,
            });
        }
        self.plan(id, Gen::Assign { plans });
        Ok(self.seq(vec![chain, Chain::solo(rhs), Chain::solo(id)]))
    }

    fn incdec_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        inc: bool,
    ) -> Result<Chain, CompileError> {
        let span = self.span(id);
        let target_node = self.unit.node(id).children[0];
        let target = self.lvalue(func, scope, target_node)?;
        if !self.globals.types.is_numeric(target.typ) {
            return Err(CompileError::new(
                format!("cannot increment {}", self.describe(target.typ)),
                span,
            ));
        }
        let one = if self.globals.types.is_unsigned(target.typ) {
            Value::Uint(1)
        } else if self.globals.types.is_float(target.typ) {
            Value::Float(1.0)
        } else {
            Value::Int(1)
        };
        let one_node = self.unit.synthetic(span);
        let one_slot = self.temp(scope, target.typ);
        self.plan(
            one_node,
            Gen::Const {
                dest: one_slot,
                value: one,
            },
        );
        let bop = if inc { BinaryOp::Add } else { BinaryOp::Sub };
        let action = ops::binary_action(&self.globals.types, bop, target.typ)
            .map_err(|m| CompileError::new(m, span))?;
        self.plan(
            id,
            Gen::Assign {
                plans: vec![AssignPlan {
                    loc: target.loc,
                    src: one_slot,
                    wrap: None,
                    op: Some(action),
                }],
            },
        );
        Ok(self.seq(vec![target.chain, Chain::solo(one_node), Chain::solo(id)]))
    }

    fn if_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        has_init: bool,
        has_else: bool,
    ) -> Result<Chain, CompileError> {
        let inner = self.globals.scopes.enter(Some(scope), false, false);
        let children = self.unit.node(id).children.clone();
        let mut cursor = 0;
        let init_chain = if has_init {
            cursor += 1;
            self.stmt(func, inner, children[0])?
        } else {
            Chain::default()
        };
        let cond = self.expr(func, inner, children[cursor], None)?;
        let cond_chain = self.as_cond(inner, &cond, self.span(children[cursor]))?;
        cursor += 1;
        let then_chain = self.stmt(func, inner, children[cursor])?;
        cursor += 1;
        let else_chain = if has_else {
            Some(self.stmt(func, inner, children[cursor])?)
        } else {
            None
        };

        // cond true -> then, false -> else or out.
        let mut outs = Vec::new();
        let cond_true: Vec<Out> = cond_chain
            .outs
            .iter()
            .copied()
            .filter(|o| matches!(o, Out::T(_)))
            .collect();
        let cond_false: Vec<Out> = cond_chain
            .outs
            .iter()
            .copied()
            .filter(|o| matches!(o, Out::F(_)))
            .collect();

        match then_chain.start {
            Some(start) => {
                self.wire(&cond_true, start);
                outs.extend(then_chain.outs.iter().copied());
            }
            None => outs.extend(cond_true),
        }
        match &else_chain {
            Some(chain) => match chain.start {
                Some(start) => {
                    self.wire(&cond_false, start);
                    outs.extend(chain.outs.iter().copied());
                }
                None => outs.extend(cond_false),
            },
            None => outs.extend(cond_false),
        }

        let head = self.seq(vec![init_chain, Chain { start: cond_chain.start, outs: Vec::new() }]);
        Ok(Chain {
            start: head.start.or(cond_chain.start),
            outs,
        })
    }

    fn for_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        has_init: bool,
        has_cond: bool,
        has_post: bool,
    ) -> Result<Chain, CompileError> {
        let label = func.pending_label.take();
        let inner = self.globals.scopes.enter(Some(scope), false, false);
        let children = self.unit.node(id).children.clone();
        let mut cursor = 0;
        let init_chain = if has_init {
            cursor += 1;
            self.stmt(func, inner, children[0])?
        } else {
            Chain::default()
        };
        let cond_chain = if has_cond {
            let cond = self.expr(func, inner, children[cursor], None)?;
            let chain = self.as_cond(inner, &cond, self.span(children[cursor]))?;
            cursor += 1;
            Some(chain)
        } else {
            None
        };
        let post_chain = if has_post {
            let chain = self.stmt(func, inner, children[cursor])?;
            cursor += 1;
            Some(chain)
        } else {
            None
        };

        // The loop re-entry point: the condition, or the body for
        // condition-less loops.
        let body_node = children[cursor];
        let continue_target_pre = post_chain
            .as_ref()
            .and_then(|c| c.start)
            .or_else(|| cond_chain.as_ref().and_then(|c| c.start));

        func.loops.push(LoopCtx {
            label,
            continue_target: continue_target_pre,
            breaks: Vec::new(),
        });
        let body_chain = self.stmt(func, inner, body_node)?;
        let ctx = func.loops.pop().expect("loop context");

        let body_start = body_chain.start;
        let head = cond_chain
            .as_ref()
            .and_then(|c| c.start)
            .or(body_start)
            .or_else(|| post_chain.as_ref().and_then(|c| c.start));

        let mut outs: Vec<Out> = Vec::new();

        if let Some(cond) = &cond_chain {
            let cond_true: Vec<Out> = cond
                .outs
                .iter()
                .copied()
                .filter(|o| matches!(o, Out::T(_)))
                .collect();
            let cond_false: Vec<Out> = cond
                .outs
                .iter()
                .copied()
                .filter(|o| matches!(o, Out::F(_)))
                .collect();
            match body_start {
                Some(start) => self.wire(&cond_true, start),
                None => {
                    // Empty body: loop back to the condition.
                    if let Some(start) = cond.start {
                        self.wire(&cond_true, start);
                    }
                }
            }
            outs.extend(cond_false);
        }

        // Body falls through to post, then back to the head.
        let back_target = post_chain.as_ref().and_then(|c| c.start).or(head);
        if let Some(target) = back_target {
            self.wire(&body_chain.outs, target);
        }
        if let Some(post) = &post_chain {
            if let Some(target) = head {
                self.wire(&post.outs, target);
            }
        }
        // Condition-less loop without post: body loops to itself. An
        // entirely empty `for {}` still spins (and still observes
        // cancellation at each step).
        let mut head = head;
        if cond_chain.is_none() && post_chain.is_none() {
            match body_start {
                Some(start) => self.wire(&body_chain.outs, start),
                None => {
                    let spin = self.unit.synthetic(self.span(id));
                    self.plan(spin, Gen::Jump);
                    self.unit.node_mut(spin).tnext = Some(spin);
                    head = Some(spin);
                }
            }
        }

        outs.extend(ctx.breaks);

        // An infinite loop with no breaks has no outs; execution can only
        // leave through return or panic.
        let merged = self.seq(vec![
            init_chain,
            Chain {
                start: head,
                outs: Vec::new(),
            },
        ]);
        Ok(Chain {
            start: merged.start.or(head),
            outs,
        })
    }

    fn range_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        key: Option<String>,
        value: Option<String>,
        define: bool,
    ) -> Result<Chain, CompileError> {
        let label = func.pending_label.take();
        let span = self.span(id);
        let inner = self.globals.scopes.enter(Some(scope), false, false);
        let children = self.unit.node(id).children.clone();
        let subject = self.expr(func, inner, children[0], None)?;

        let subject_cat = self.cat(subject.typ);
        let (key_ty, value_ty) = match subject_cat {
            Cat::Slice | Cat::Array => (
                crate::types::INT,
                self.ty(subject.typ).elem.unwrap_or(crate::types::EMPTY_IFACE),
            ),
            Cat::String => (crate::types::INT, crate::types::INT32),
            Cat::Map => (
                self.ty(subject.typ).key.unwrap_or(crate::types::EMPTY_IFACE),
                self.ty(subject.typ).elem.unwrap_or(crate::types::EMPTY_IFACE),
            ),
            Cat::Chan => {
                if self.ty(subject.typ).dir == ChanDir::Send {
                    return Err(CompileError::new(
                        "cannot range over send-only channel",
                        span,
                    ));
                }
                (
                    self.ty(subject.typ).elem.unwrap_or(crate::types::EMPTY_IFACE),
                    crate::types::EMPTY_IFACE,
                )
            }
            _ => {
                return Err(CompileError::new(
                    format!("cannot range over {}", self.describe(subject.typ)),
                    span,
                ))
            }
        };

        let mut bind = |this: &mut Self, name: &Option<String>, ty: TypeId| -> Result<Option<Loc>, CompileError> {
            match name {
                None => Ok(None),
                Some(n) if n == "_" => Ok(Some(Loc::Blank)),
                Some(n) => {
                    if define {
                        let slot = this.declare_var(inner, n, ty, false, span)?;
                        Ok(Some(Loc::slot(0, slot)))
                    } else {
                        let (sym, found_in) =
                            this.globals.scopes.lookup(inner, n).ok_or_else(|| {
                                CompileError::new(format!("undefined: {n}"), span)
                            })?;
                        let symbol = this.globals.scopes.sym(sym);
                        let index = symbol.findex.unwrap_or(0);
                        let level = this.globals.scopes.frame_level(inner, found_in);
                        Ok(Some(Loc::Slot {
                            level,
                            index,
                            steps: Vec::new(),
                        }))
                    }
                }
            }
        };
        let key_loc = bind(self, &key, key_ty)?;
        let value_loc = bind(self, &value, value_ty)?;
        if subject_cat == Cat::Chan && value.is_some() {
            return Err(CompileError::new(
                "too many variables in range over channel",
                span,
            ));
        }

        let state = self.temp(inner, crate::types::INT);
        let plan = match subject_cat {
            Cat::Slice | Cat::Array | Cat::String => RangePlan::Indexed {
                subject: subject.slot,
                state,
                key_loc,
                value_loc,
            },
            Cat::Map => {
                let keys = {
                    let key_slice = self.globals.types.slice_of(key_ty);
                    self.temp(inner, key_slice)
                };
                RangePlan::Map {
                    subject: subject.slot,
                    state,
                    keys,
                    key_loc,
                    value_loc,
                }
            }
            _ => RangePlan::Chan {
                subject: subject.slot,
                key_loc,
            },
        };

        let init = self.unit.synthetic(span);
        self.plan(init, Gen::RangeInit(plan.clone()));
        self.unit.node_mut(id).action = Action::Range;
        self.plan(id, Gen::Range(plan));

        func.loops.push(LoopCtx {
            label,
            continue_target: Some(id),
            breaks: Vec::new(),
        });
        let body_chain = self.stmt(func, inner, children[1])?;
        let ctx = func.loops.pop().expect("loop context");

        // subject -> init -> range; range tnext -> body, fnext -> exit;
        // body -> range.
        match body_chain.start {
            Some(start) => self.unit.node_mut(id).tnext = Some(start),
            None => self.unit.node_mut(id).tnext = Some(id),
        }
        self.wire(&body_chain.outs, id);

        let head = self.seq(vec![subject.chain, Chain::solo(init), Chain {
            start: Some(id),
            outs: Vec::new(),
        }]);

        let mut outs = vec![Out::F(id)];
        outs.extend(ctx.breaks);
        Ok(Chain {
            start: head.start,
            outs,
        })
    }

    fn switch_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        has_init: bool,
        has_tag: bool,
    ) -> Result<Chain, CompileError> {
        let label = func.pending_label.take();
        let inner = self.globals.scopes.enter(Some(scope), false, false);
        let children = self.unit.node(id).children.clone();
        let span = self.span(id);
        let mut cursor = 0;
        let init_chain = if has_init {
            cursor += 1;
            self.stmt(func, inner, children[0])?
        } else {
            Chain::default()
        };
        let tag = if has_tag {
            let info = self.expr(func, inner, children[cursor], None)?;
            cursor += 1;
            Some(info)
        } else {
            None
        };

        func.loops.push(LoopCtx {
            label,
            continue_target: None,
            breaks: Vec::new(),
        });

        struct CaseData {
            tests: Vec<Chain>,
            body: Chain,
            is_default: bool,
            fallthroughs: Vec<NodeId>,
        }
        let mut cases: Vec<CaseData> = Vec::new();

        let clause_nodes: Vec<NodeId> = children[cursor..].to_vec();
        for clause in &clause_nodes {
            let NodeKind::CaseClause { nexpr, is_default } = self.unit.node(*clause).kind.clone()
            else {
                continue;
            };
            let clause_children = self.unit.node(*clause).children.clone();
            let case_scope = self.globals.scopes.enter(Some(inner), false, false);
            let fallthrough_mark = func.fallthroughs.len();

            let mut tests = Vec::new();
            for expr_node in clause_children.iter().take(nexpr) {
                match &tag {
                    Some(tag_info) => {
                        let case = self.expr(func, case_scope, *expr_node, Some(tag_info.typ))?;
                        self.coerce_const(
                            self.globals.types.default_type(tag_info.typ),
                            &case,
                            self.span(*expr_node),
                        )?;
                        let eq = ops::binary_action(
                            &self.globals.types,
                            BinaryOp::Eq,
                            self.globals.types.default_type(tag_info.typ),
                        )
                        .map_err(|m| CompileError::new(m, span))?;
                        let test = self.unit.synthetic(self.span(*expr_node));
                        let dest = self.temp(case_scope, crate::types::BOOL);
                        self.plan(
                            test,
                            Gen::Binary {
                                op: eq,
                                lhs: tag_info.slot,
                                rhs: case.slot,
                                dest,
                            },
                        );
                        let merged = self.seq(vec![case.chain, Chain::solo(test)]);
                        tests.push(Chain {
                            start: merged.start,
                            outs: vec![Out::T(test), Out::F(test)],
                        });
                    }
                    None => {
                        let cond = self.expr(func, case_scope, *expr_node, None)?;
                        let chain = self.as_cond(case_scope, &cond, self.span(*expr_node))?;
                        tests.push(chain);
                    }
                }
            }

            let mut body_chains = Vec::new();
            for stmt_node in clause_children.iter().skip(nexpr) {
                body_chains.push(self.stmt(func, case_scope, *stmt_node)?);
            }
            let body = self.seq(body_chains);
            let fallthroughs = func.fallthroughs.split_off(fallthrough_mark);
            cases.push(CaseData {
                tests,
                body,
                is_default,
                fallthroughs,
            });
        }

        let ctx = func.loops.pop().expect("switch context");

        // Wire: each test true -> body, false -> next test; all-false ->
        // default body or exit. Fallthrough jumps to the next body.
        let mut outs: Vec<Out> = Vec::new();
        let mut pending_false: Vec<Out> = Vec::new();
        let mut entry: Option<NodeId> = None;
        let default_body: Option<usize> = cases.iter().position(|c| c.is_default);

        let body_starts: Vec<Option<NodeId>> = cases.iter().map(|c| c.body.start).collect();

        for (idx, case) in cases.iter().enumerate() {
            if case.is_default {
                continue;
            }
            for test in &case.tests {
                let Some(start) = test.start else { continue };
                if entry.is_none() {
                    entry = Some(start);
                }
                self.wire(&pending_false, start);
                pending_false = Vec::new();
                let t: Vec<Out> = test
                    .outs
                    .iter()
                    .copied()
                    .filter(|o| matches!(o, Out::T(_)))
                    .collect();
                let f: Vec<Out> = test
                    .outs
                    .iter()
                    .copied()
                    .filter(|o| matches!(o, Out::F(_)))
                    .collect();
                match body_starts[idx] {
                    Some(body) => self.wire(&t, body),
                    None => outs.extend(t),
                }
                pending_false = f;
            }
            outs.extend(case.body.outs.iter().copied());
        }

        // Tests exhausted: default case or exit.
        match default_body.and_then(|idx| body_starts[idx]) {
            Some(body) => {
                self.wire(&pending_false, body);
            }
            None => {
                outs.extend(pending_false.iter().copied());
                if let Some(idx) = default_body {
                    outs.extend(cases[idx].body.outs.iter().copied());
                }
            }
        }
        if let Some(idx) = default_body {
            if body_starts[idx].is_some() {
                outs.extend(cases[idx].body.outs.iter().copied());
            }
        }

        // Fallthrough jumps run the next case's body unconditionally.
        for (idx, case) in cases.iter().enumerate() {
            if case.fallthroughs.is_empty() {
                continue;
            }
            let next_body = body_starts.get(idx + 1).copied().flatten();
            for node in &case.fallthroughs {
                match next_body {
                    Some(start) => self.unit.node_mut(*node).tnext = Some(start),
                    None => outs.push(Out::T(*node)),
                }
            }
        }

        outs.extend(ctx.breaks);

        let tag_chain = tag.map(|t| t.chain).unwrap_or_default();
        let merged = self.seq(vec![
            init_chain,
            tag_chain,
            Chain {
                start: entry.or_else(|| default_body.and_then(|idx| body_starts[idx])),
                outs: Vec::new(),
            },
        ]);
        Ok(Chain {
            start: merged.start,
            outs,
        })
    }

    fn type_switch_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        binding: Option<String>,
        has_init: bool,
    ) -> Result<Chain, CompileError> {
        let label = func.pending_label.take();
        let inner = self.globals.scopes.enter(Some(scope), false, false);
        let children = self.unit.node(id).children.clone();
        let span = self.span(id);
        let mut cursor = 0;
        let init_chain = if has_init {
            cursor += 1;
            self.stmt(func, inner, children[0])?
        } else {
            Chain::default()
        };
        let subject = self.expr(func, inner, children[cursor], None)?;
        if !self.globals.types.is_interface(subject.typ) {
            return Err(CompileError::new(
                "type switch requires an interface value",
                self.span(children[cursor]),
            ));
        }
        cursor += 1;

        func.loops.push(LoopCtx {
            label,
            continue_target: None,
            breaks: Vec::new(),
        });

        let mut outs: Vec<Out> = Vec::new();
        let mut pending_false: Vec<Out> = Vec::new();
        let mut entry: Option<NodeId> = None;
        let mut default_chain: Option<Chain> = None;

        let clause_nodes: Vec<NodeId> = children[cursor..].to_vec();
        for clause in &clause_nodes {
            let NodeKind::TypeCaseClause { types: case_types, is_default } =
                self.unit.node(*clause).kind.clone()
            else {
                continue;
            };
            let case_scope = self.globals.scopes.enter(Some(inner), false, false);

            // The case binding: concretely typed for single-type cases,
            // interface typed otherwise.
            let mut bind_slot = None;
            if let Some(name) = &binding {
                let bound_ty = if case_types.len() == 1 && !is_default {
                    match &case_types[0] {
                        Some(texpr) => gta::resolve_type_expr(self.globals, inner, texpr)?,
                        None => subject.typ,
                    }
                } else {
                    subject.typ
                };
                bind_slot = Some(self.declare_var(case_scope, name, bound_ty, false, span)?);
            }

            let mut body_chains = Vec::new();
            let clause_children = self.unit.node(*clause).children.clone();
            for stmt_node in clause_children {
                body_chains.push(self.stmt(func, case_scope, stmt_node)?);
            }
            let body = self.seq(body_chains);

            if is_default {
                // Default still binds the subject.
                if let (Some(slot), Some(start)) = (bind_slot, body.start) {
                    let copy = self.unit.synthetic(span);
                    self.plan(
                        copy,
                        Gen::VarCopy {
                            dest: slot,
                            level: 0,
                            index: subject.slot,
                        },
                    );
                    self.unit.node_mut(copy).tnext = Some(start);
                    default_chain = Some(Chain {
                        start: Some(copy),
                        outs: body.outs,
                    });
                } else {
                    default_chain = Some(body);
                }
                continue;
            }

            let accept = self.type_case_accept(&case_types, inner, case_types.len() == 1)?;
            let test = self.unit.synthetic(span);
            self.plan(
                test,
                Gen::TypeTest {
                    src: subject.slot,
                    accept,
                    bind: bind_slot,
                },
            );
            if entry.is_none() {
                entry = Some(test);
            }
            self.wire(&pending_false, test);
            pending_false = vec![Out::F(test)];
            match body.start {
                Some(start) => self.unit.node_mut(test).tnext = Some(start),
                None => outs.push(Out::T(test)),
            }
            outs.extend(body.outs.iter().copied());
        }

        match &default_chain {
            Some(chain) => match chain.start {
                Some(start) => {
                    self.wire(&pending_false, start);
                    outs.extend(chain.outs.iter().copied());
                }
                None => outs.extend(pending_false.iter().copied()),
            },
            None => outs.extend(pending_false.iter().copied()),
        }

        let ctx = func.loops.pop().expect("switch context");
        outs.extend(ctx.breaks);

        let merged = self.seq(vec![
            init_chain,
            subject.chain,
            Chain {
                start: entry.or_else(|| default_chain.as_ref().and_then(|c| c.start)),
                outs: Vec::new(),
            },
        ]);
        Ok(Chain {
            start: merged.start,
            outs,
        })
    }

    /// Builds the runtime acceptance test of a type-switch case: yields
    /// the value to bind when the dynamic type matches one of the case
    /// types.
    fn type_case_accept(
        &mut self,
        case_types: &[Option<TypeExpr>],
        scope: ScopeId,
        single: bool,
    ) -> Result<Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>, CompileError> {
        let mut targets: Vec<Option<TypeId>> = Vec::new();
        for case in case_types {
            match case {
                Some(texpr) => {
                    targets.push(Some(gta::resolve_type_expr(self.globals, scope, texpr)?))
                }
                None => targets.push(None),
            }
        }
        let core = self.core.clone();
        Ok(Arc::new(move |subject: &Value| {
            for target in &targets {
                match target {
                    None => {
                        if subject.is_nil() {
                            return Some(Value::Nil);
                        }
                    }
                    Some(target) => {
                        if subject.is_nil() {
                            continue;
                        }
                        let dynamic = match subject {
                            Value::Iface(b) => Some(b.typ),
                            Value::Struct(s) => Some(s.typ),
                            _ => None,
                        };
                        let globals = core.globals();
                        let matched = match dynamic {
                            Some(d) => {
                                d == *target
                                    || globals.types.identical(d, *target)
                                    || (globals.types.is_interface(*target)
                                        && globals.types.implements(d, *target))
                            }
                            None => value_matches_basic(&globals.types, subject, *target),
                        };
                        if matched {
                            let bound = if single && !globals.types.is_interface(*target) {
                                subject.clone().concrete()
                            } else {
                                subject.clone()
                            };
                            return Some(bound);
                        }
                    }
                }
            }
            None
        }))
    }

    fn select_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
    ) -> Result<Chain, CompileError> {
        let label = func.pending_label.take();
        let span = self.span(id);
        let children = self.unit.node(id).children.clone();

        func.loops.push(LoopCtx {
            label,
            continue_target: None,
            breaks: Vec::new(),
        });

        let mut comm_chains = Vec::new();
        let mut case_plans = Vec::new();
        let mut outs: Vec<Out> = Vec::new();

        for clause in &children {
            let NodeKind::CommClauseNode { kind, ncomm } = self.unit.node(*clause).kind.clone()
            else {
                continue;
            };
            let case_scope = self.globals.scopes.enter(Some(scope), false, false);
            let clause_children = self.unit.node(*clause).children.clone();

            let comm = match kind {
                CommKind::Default => CommPlan::Default,
                CommKind::Send => {
                    let chan = self.expr(func, case_scope, clause_children[0], None)?;
                    if self.cat(chan.typ) != Cat::Chan {
                        return Err(CompileError::new("select send requires a channel", span));
                    }
                    let elem = self.ty(chan.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                    let value = self.expr(func, case_scope, clause_children[1], Some(elem))?;
                    let wrap = self.check_assign(elem, &value, span)?;
                    comm_chains.push(chan.chain.clone());
                    comm_chains.push(value.chain.clone());
                    CommPlan::Send {
                        chan: chan.slot,
                        value: value.slot,
                        wrap,
                    }
                }
                CommKind::Recv { value, ok, define } => {
                    let chan = self.expr(func, case_scope, clause_children[0], None)?;
                    if self.cat(chan.typ) != Cat::Chan {
                        return Err(CompileError::new(
                            "select receive requires a channel",
                            span,
                        ));
                    }
                    let elem = self.ty(chan.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                    comm_chains.push(chan.chain.clone());
                    let op = if define { AssignOp::Define } else { AssignOp::Plain };
                    let value_loc = match &value {
                        Some(name) => {
                            let lhs = self.ident_node(*clause, name, span);
                            Some(self.ok_target(func, case_scope, lhs, op, elem, span)?)
                        }
                        None => None,
                    };
                    let ok_loc = match &ok {
                        Some(name) => {
                            let lhs = self.ident_node(*clause, name, span);
                            Some(self.ok_target(func, case_scope, lhs, op, crate::types::BOOL, span)?)
                        }
                        None => None,
                    };
                    CommPlan::Recv {
                        chan: chan.slot,
                        value_loc,
                        ok_loc,
                    }
                }
            };

            let mut body_chains = Vec::new();
            for stmt_node in clause_children.iter().skip(ncomm) {
                body_chains.push(self.stmt(func, case_scope, *stmt_node)?);
            }
            let body = self.seq(body_chains);
            outs.extend(body.outs.iter().copied());
            if body.start.is_none() {
                // Empty bodies fall out of the select.
                outs.push(Out::T(*clause));
                self.plan(*clause, Gen::Jump);
            }
            case_plans.push(SelectCasePlan {
                comm,
                body: body.start.or(Some(*clause)),
            });
        }

        let ctx = func.loops.pop().expect("select context");
        outs.extend(ctx.breaks);

        self.plan(id, Gen::Select { cases: case_plans });
        let mut chains = comm_chains;
        chains.push(Chain {
            start: Some(id),
            outs: Vec::new(),
        });
        let merged = self.seq(chains);
        Ok(Chain {
            start: merged.start,
            outs,
        })
    }

    /// Synthesises an identifier node for select-case bindings, which the
    /// annotator stores by name rather than as child expressions.
    fn ident_node(&mut self, parent: NodeId, name: &str, span: Span) -> NodeId {
        let id = self.unit.synthetic(span);
        self.unit.node_mut(id).kind = NodeKind::Ident;
        self.unit.node_mut(id).ident = name.to_string();
        self.unit.node_mut(id).anc = Some(parent);
        id
    }

    fn return_stmt(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
    ) -> Result<Chain, CompileError> {
        let span = self.span(id);
        let children = self.unit.node(id).children.clone();

        // Bare return: named results already live in their slots.
        if children.is_empty() {
            self.unit.node_mut(id).action = Action::Return;
            self.plan(id, Gen::Return { sources: Vec::new() });
            return Ok(Chain {
                start: Some(id),
                outs: Vec::new(),
            });
        }

        // `return f()` forwarding multiple results.
        if children.len() == 1
            && func.nret > 1
            && matches!(self.unit.node(children[0]).kind, NodeKind::CallExpr { .. })
        {
            let planned = self.call_plan(func, scope, children[0])?;
            let PlannedCall::Ordinary(chain, mut plan) = planned else {
                return Err(CompileError::new("cannot forward builtin results", span));
            };
            let results = self.ty_results(children[0])?;
            if results.len() != func.nret {
                return Err(CompileError::new(
                    format!("expected {} return values, got {}", func.nret, results.len()),
                    span,
                ));
            }
            let base = self.temp(scope, results[0]);
            for rty in results.iter().skip(1) {
                self.temp(scope, *rty);
            }
            plan.dest = base;
            plan.nret = results.len();
            self.plan(children[0], Gen::Call(plan));
            let sources: Vec<(usize, Option<TypeId>)> = func
                .results
                .clone()
                .iter()
                .enumerate()
                .map(|(idx, dst)| {
                    let wrap = self.wrap_for(*dst, results[idx]);
                    (base + idx, wrap)
                })
                .collect();
            self.plan(id, Gen::Return { sources });
            let merged = self.seq(vec![chain, Chain::solo(children[0]), Chain {
                start: Some(id),
                outs: Vec::new(),
            }]);
            return Ok(Chain {
                start: merged.start,
                outs: Vec::new(),
            });
        }

        if children.len() != func.nret {
            return Err(CompileError::new(
                format!("expected {} return values, got {}", func.nret, children.len()),
                span,
            ));
        }

        let mut chains = Vec::new();
        let mut sources = Vec::new();
        let results = func.results.clone();
        for (value, dst) in children.iter().zip(&results) {
            let info = self.expr(func, scope, *value, Some(*dst))?;
            let wrap = self.check_assign(*dst, &info, self.span(*value))?;
            chains.push(info.chain.clone());
            sources.push((info.slot, wrap));
        }
        self.unit.node_mut(id).action = Action::Return;
        self.plan(id, Gen::Return { sources });
        chains.push(Chain {
            start: Some(id),
            outs: Vec::new(),
        });
        let merged = self.seq(chains);
        Ok(Chain {
            start: merged.start,
            outs: Vec::new(),
        })
    }

    fn branch_stmt(
        &mut self,
        func: &mut FuncCtx,
        id: NodeId,
        kind: BranchKind,
        label: Option<String>,
    ) -> Result<Chain, CompileError> {
        let span = self.span(id);
        self.unit.node_mut(id).action = Action::Branch;
        self.plan(id, Gen::Jump);
        match kind {
            BranchKind::Goto => {
                let label = label.ok_or_else(|| CompileError::new("goto requires a label", span))?;
                func.gotos.push((id, label, span));
                Ok(Chain {
                    start: Some(id),
                    outs: Vec::new(),
                })
            }
            BranchKind::Break => {
                let ctx = match &label {
                    Some(name) => func
                        .loops
                        .iter_mut()
                        .rev()
                        .find(|l| l.label.as_deref() == Some(name)),
                    None => func.loops.last_mut(),
                };
                let ctx = ctx.ok_or_else(|| CompileError::new("break outside loop", span))?;
                ctx.breaks.push(Out::T(id));
                Ok(Chain {
                    start: Some(id),
                    outs: Vec::new(),
                })
            }
            BranchKind::Continue => {
                let ctx = match &label {
                    Some(name) => func
                        .loops
                        .iter()
                        .rev()
                        .find(|l| l.label.as_deref() == Some(name) && l.continue_target.is_some()),
                    None => func.loops.iter().rev().find(|l| l.continue_target.is_some()),
                };
                let target = ctx
                    .and_then(|l| l.continue_target)
                    .ok_or_else(|| CompileError::new("continue outside loop", span))?;
                self.unit.node_mut(id).tnext = Some(target);
                Ok(Chain {
                    start: Some(id),
                    outs: Vec::new(),
                })
            }
            BranchKind::Fallthrough => {
                // The enclosing switch wires this jump to the next case's
                // body once that body is known.
                func.fallthroughs.push(id);
                Ok(Chain {
                    start: Some(id),
                    outs: Vec::new(),
                })
            }
        }
    }

    // ---- expressions ----

    fn expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        hint: Option<TypeId>,
    ) -> Result<ExprInfo, CompileError> {
        let info = self.expr_inner(func, scope, id, hint)?;
        self.unit.node_mut(id).typ = Some(info.typ);
        if self.unit.node(id).findex.is_none() {
            self.unit.node_mut(id).findex = Some(info.slot);
        }
        Ok(info)
    }

    fn expr_inner(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        hint: Option<TypeId>,
    ) -> Result<ExprInfo, CompileError> {
        let span = self.span(id);
        match self.unit.node(id).kind.clone() {
            NodeKind::IntLit | NodeKind::FloatLit | NodeKind::StrLit | NodeKind::RuneLit => {
                let value = self.unit.node(id).val.clone().unwrap_or(Value::Nil);
                let typ = match self.unit.node(id).kind {
                    NodeKind::IntLit => crate::types::UNTYPED_INT,
                    NodeKind::FloatLit => crate::types::UNTYPED_FLOAT,
                    NodeKind::StrLit => crate::types::UNTYPED_STRING,
                    _ => crate::types::UNTYPED_RUNE,
                };
                self.const_expr(scope, id, value, typ)
            }
            NodeKind::Ident => self.ident_expr(func, scope, id, span),
            NodeKind::TypeLitExpr { ty } => {
                let typ = gta::resolve_type_expr(self.globals, scope, &ty)?;
                Ok(ExprInfo {
                    chain: Chain::default(),
                    typ,
                    slot: 0,
                    val: None,
                    loc: None,
                    addressable: false,
                    denot: Denot::Type(typ),
                })
            }
            NodeKind::SelectorExpr { field } => self.selector_expr(func, scope, id, &field, span),
            NodeKind::IndexExpr => self.index_expr(func, scope, id, span),
            NodeKind::SliceExprNode { has_low, has_high } => {
                self.slice_expr(func, scope, id, has_low, has_high, span)
            }
            NodeKind::UnaryExpr { op } => self.unary_expr(func, scope, id, op, hint, span),
            NodeKind::BinaryExpr { op } => self.binary_expr(func, scope, id, op, span),
            NodeKind::CallExpr { .. } => {
                let planned = self.call_plan(func, scope, id)?;
                match planned {
                    PlannedCall::Ordinary(chain, plan) => {
                        let results = self.ty_results(id)?;
                        let typ = results.first().copied().unwrap_or(crate::types::EMPTY_IFACE);
                        let dest = plan.dest;
                        self.plan(id, Gen::Call(plan));
                        let chain = self.seq(vec![chain, Chain::solo(id)]);
                        Ok(ExprInfo::value(chain, typ, dest))
                    }
                    PlannedCall::Builtin(chain, plan) => {
                        let typ = self.unit.node(id).typ.unwrap_or(crate::types::EMPTY_IFACE);
                        let dest = plan.dest;
                        self.plan(id, Gen::Builtin(plan));
                        let chain = self.seq(vec![chain, Chain::solo(id)]);
                        Ok(ExprInfo::value(chain, typ, dest))
                    }
                    PlannedCall::Converted(chain, typ, dest) => {
                        Ok(ExprInfo::value(chain, typ, dest))
                    }
                }
            }
            NodeKind::CompositeLitExpr { has_ty } => {
                self.composite_expr(func, scope, id, has_ty, hint, span)
            }
            NodeKind::FuncLitExpr { sig } => {
                self.compile_func_body(id, scope, &sig, None, span)?;
                let typ = gta::resolve_signature(self.globals, scope, &sig)?;
                self.unit.node_mut(id).action = Action::FuncLit;
                let dest = self.temp(scope, typ);
                self.plan(id, Gen::FuncLit { node: id, dest });
                // Order: the node's own typ must stay the signature, not
                // the frame size set by the body pass.
                self.unit.node_mut(id).typ = Some(typ);
                Ok(ExprInfo::value(Chain::solo(id), typ, dest))
            }
            NodeKind::TypeAssertExpr { ty } => {
                let subject_node = self.unit.node(id).children[0];
                let subject = self.expr(func, scope, subject_node, None)?;
                if !self.globals.types.is_interface(subject.typ) {
                    return Err(CompileError::new(
                        "type assertion requires an interface value",
                        span,
                    ));
                }
                let texpr = ty.ok_or_else(|| {
                    CompileError::new("use of .(type) outside type switch", span)
                })?;
                let target = gta::resolve_type_expr(self.globals, scope, &texpr)?;
                let accept = self.assert_accept(target);
                let keep_iface = self.globals.types.is_interface(target);
                let dest = self.temp(scope, target);
                self.unit.node_mut(id).action = Action::TypeAssert;
                self.plan(
                    id,
                    Gen::TypeAssert {
                        src: subject.slot,
                        accept,
                        want: self.describe(target),
                        keep_iface,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, target, dest))
            }
            other => Err(CompileError::new(
                format!("unsupported expression {other:?}"),
                span,
            )),
        }
    }

    /// Emits a constant store. The node's static value is recorded so
    /// reanalysis yields identical foldings.
    fn const_expr(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        value: Value,
        typ: TypeId,
    ) -> Result<ExprInfo, CompileError> {
        let dest = self.temp(scope, typ);
        self.unit.node_mut(id).val = Some(value.clone());
        self.plan(
            id,
            Gen::Const {
                dest,
                value: value.clone(),
            },
        );
        Ok(ExprInfo {
            chain: Chain::solo(id),
            typ,
            slot: dest,
            val: Some(value),
            loc: None,
            addressable: false,
            denot: Denot::Value,
        })
    }

    fn ident_expr(
        &mut self,
        _func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let name = self.unit.node(id).ident.clone();
        if name == "_" {
            return Ok(ExprInfo {
                chain: Chain::default(),
                typ: crate::types::EMPTY_IFACE,
                slot: 0,
                val: None,
                loc: Some(Loc::Blank),
                addressable: false,
                denot: Denot::Blank,
            });
        }
        let (sym, found_in) = self
            .globals
            .scopes
            .lookup(scope, &name)
            .ok_or_else(|| CompileError::new(format!("undefined: {name}"), span))?;
        self.unit.node_mut(id).sym = Some(sym);
        let symbol = self.globals.scopes.sym(sym).clone();
        match symbol.kind {
            SymKind::Const => {
                let value = symbol.value.clone().unwrap_or(Value::Nil);
                let typ = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                self.const_expr(scope, id, value, typ)
            }
            SymKind::Var | SymKind::Func => {
                let typ = symbol.typ.ok_or_else(|| {
                    CompileError::new(format!("{name} used before its type is known"), span)
                })?;
                let index = symbol
                    .findex
                    .ok_or_else(|| CompileError::new(format!("{name} has no storage"), span))?;
                let level = self.globals.scopes.frame_level(scope, found_in);
                self.unit.node_mut(id).level = level;
                if level == 0 {
                    Ok(ExprInfo {
                        chain: Chain::default(),
                        typ,
                        slot: index,
                        val: None,
                        loc: Some(Loc::slot(0, index)),
                        addressable: symbol.kind == SymKind::Var,
                        denot: Denot::Value,
                    })
                } else {
                    let dest = self.temp(scope, typ);
                    self.plan(id, Gen::VarCopy { dest, level, index });
                    Ok(ExprInfo {
                        chain: Chain::solo(id),
                        typ,
                        slot: dest,
                        val: None,
                        loc: Some(Loc::Slot {
                            level,
                            index,
                            steps: Vec::new(),
                        }),
                        addressable: symbol.kind == SymKind::Var,
                        denot: Denot::Value,
                    })
                }
            }
            SymKind::Type => {
                let typ = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                Ok(ExprInfo {
                    chain: Chain::default(),
                    typ,
                    slot: 0,
                    val: None,
                    loc: None,
                    addressable: false,
                    denot: Denot::Type(typ),
                })
            }
            SymKind::Builtin => Ok(ExprInfo {
                chain: Chain::default(),
                typ: crate::types::BUILTIN,
                slot: 0,
                val: None,
                loc: None,
                addressable: false,
                denot: Denot::Builtin(symbol.builtin.unwrap_or(BuiltinId::Len)),
            }),
            SymKind::Package => {
                let typ = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                Ok(ExprInfo {
                    chain: Chain::default(),
                    typ,
                    slot: 0,
                    val: None,
                    loc: None,
                    addressable: false,
                    denot: Denot::Pkg(typ),
                })
            }
            _ => Err(CompileError::new(format!("cannot use {name} here"), span)),
        }
    }

    fn selector_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        field: &str,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let subject_node = self.unit.node(id).children[0];
        let subject = self.expr(func, scope, subject_node, None)?;

        if let Denot::Pkg(pkg_ty) = &subject.denot {
            return self.package_member(scope, id, *pkg_ty, field, span);
        }
        if let Denot::Type(_) = &subject.denot {
            return Err(CompileError::new(
                format!("cannot select {field} from a type"),
                span,
            ));
        }

        // Interface method access: materialise a bound method value,
        // dispatched on the dynamic type at run time.
        if self.globals.types.is_interface(subject.typ) {
            let imethod = self
                .ty(subject.typ)
                .imethods
                .iter()
                .find(|m| m.name == field)
                .cloned();
            let sig = match imethod {
                Some(m) => m.sig,
                None if self.cat(subject.typ) == Cat::Error && field == "Error" => self
                    .globals
                    .types
                    .func_of(vec![], vec![crate::types::STRING], false),
                None => {
                    return Err(CompileError::new(
                        format!(
                            "type {} has no field or method {field}",
                            self.describe(subject.typ)
                        ),
                        span,
                    ));
                }
            };
            let recv_loc = subject.loc.clone().unwrap_or(Loc::slot(0, subject.slot));
            let dest = self.temp(scope, sig);
            self.unit.node_mut(id).action = Action::GetMethod;
            self.plan(
                id,
                Gen::MethodValue {
                    recv: recv_loc,
                    recv_is_ptr: false,
                    want_ptr: false,
                    name: field.to_string(),
                    target: None,
                    dest,
                },
            );
            let chain = self.seq(vec![subject.chain, Chain::solo(id)]);
            return Ok(ExprInfo::value(chain, sig, dest));
        }

        let selected = self
            .globals
            .types
            .select(subject.typ, field)
            .map_err(|err| match err {
                LookupError::Ambiguous => CompileError::new(
                    format!("ambiguous selector {field}"),
                    span,
                ),
                LookupError::Missing => CompileError::new(
                    format!(
                        "undefined field or method {field} on {}",
                        self.describe(subject.typ)
                    ),
                    span,
                ),
            })?;

        match selected {
            Selected::Field { path, ty } => {
                let steps = self.field_steps(subject.typ, &path);
                let subject_is_ptr = self.cat(subject.typ) == Cat::Ptr;
                let loc = self.extend_loc(&subject, subject_is_ptr, steps);
                let dest = self.temp(scope, ty);
                let missing = zero_value(&self.globals.types, ty);
                self.unit.node_mut(id).action = Action::GetField;
                self.plan(
                    id,
                    Gen::ReadLoc {
                        loc: loc.clone(),
                        missing,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, Chain::solo(id)]);
                Ok(ExprInfo {
                    chain,
                    typ: ty,
                    slot: dest,
                    val: None,
                    loc: Some(loc),
                    addressable: subject.addressable || subject_is_ptr,
                    denot: Denot::Value,
                })
            }
            Selected::Method { path, sym } => {
                let symbol = self.globals.scopes.sym(sym).clone();
                let sig = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                let want_ptr = symbol
                    .recv
                    .map(|r| self.cat(r) == Cat::Ptr)
                    .unwrap_or(false);

                // Promoted methods receive the embedded field, so the
                // receiver location follows the promotion path.
                let subject_is_ptr = self.cat(subject.typ) == Cat::Ptr;
                let (recv_loc, recv_ty) = if path.is_empty() {
                    (
                        subject.loc.clone().unwrap_or(Loc::slot(0, subject.slot)),
                        subject.typ,
                    )
                } else {
                    let steps = self.field_steps(subject.typ, &path);
                    let mut cur = match self.cat(subject.typ) {
                        Cat::Ptr => self.ty(subject.typ).elem.unwrap_or(subject.typ),
                        _ => subject.typ,
                    };
                    for idx in &path {
                        if self.cat(cur) == Cat::Ptr {
                            cur = self.ty(cur).elem.unwrap_or(cur);
                        }
                        cur = self.ty(cur).fields.get(*idx).map(|f| f.ty).unwrap_or(cur);
                    }
                    (self.extend_loc(&subject, subject_is_ptr, steps), cur)
                };
                let recv_is_ptr = self.cat(recv_ty) == Cat::Ptr
                    || (path.is_empty() && subject_is_ptr);

                self.unit.node_mut(id).recv = Some(RecvInfo {
                    node: Some(subject_node),
                    path,
                });
                self.unit.node_mut(id).action = Action::GetMethod;
                let dest = self.temp(scope, sig);
                self.plan(
                    id,
                    Gen::MethodValue {
                        recv: recv_loc,
                        recv_is_ptr,
                        want_ptr,
                        name: field.to_string(),
                        target: symbol.node,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, sig, dest))
            }
        }
    }

    /// Steps through promoted embedded fields, dereferencing embedded
    /// pointers along the way.
    fn field_steps(&self, base: TypeId, path: &[usize]) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut cur = match self.cat(base) {
            Cat::Ptr => self.ty(base).elem.unwrap_or(base),
            _ => base,
        };
        for idx in path {
            if self.cat(cur) == Cat::Ptr {
                steps.push(Step::Deref);
                cur = self.ty(cur).elem.unwrap_or(cur);
            }
            steps.push(Step::Field(*idx));
            cur = self
                .ty(cur)
                .fields
                .get(*idx)
                .map(|f| f.ty)
                .unwrap_or(cur);
        }
        steps
    }

    /// Extends the subject's location with further steps, rooting through
    /// the subject's temporary when it has no location of its own.
    fn extend_loc(&self, subject: &ExprInfo, deref_first: bool, steps: Vec<Step>) -> Loc {
        if deref_first {
            let mut all = Vec::new();
            all.extend(steps);
            return Loc::Deref {
                ptr: subject.slot,
                steps: all,
            };
        }
        match subject.loc.clone() {
            Some(Loc::Slot {
                level,
                index,
                steps: mut base,
            }) => {
                base.extend(steps);
                Loc::Slot {
                    level,
                    index,
                    steps: base,
                }
            }
            Some(Loc::SliceElem {
                slice,
                index,
                steps: mut base,
            }) => {
                base.extend(steps);
                Loc::SliceElem {
                    slice,
                    index,
                    steps: base,
                }
            }
            Some(Loc::Deref { ptr, steps: mut base }) => {
                base.extend(steps);
                Loc::Deref { ptr, steps: base }
            }
            _ => Loc::Slot {
                level: 0,
                index: subject.slot,
                steps,
            },
        }
    }

    fn package_member(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        pkg_ty: TypeId,
        field: &str,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let path = self.ty(pkg_ty).path.clone();
        match self.cat(pkg_ty) {
            Cat::BinPkg => {
                let sym = self
                    .globals
                    .bin_pkgs
                    .get(&path)
                    .and_then(|pkg| pkg.get(field))
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::new(format!("undefined: {path}.{field}"), span)
                    })?;
                let value = sym.value.ok_or_else(|| {
                    CompileError::new(format!("{path}.{field} is not a value"), span)
                })?;
                let dest = self.temp(scope, sym.typ);
                self.plan(id, Gen::Const { dest, value });
                Ok(ExprInfo::value(Chain::solo(id), sym.typ, dest))
            }
            Cat::SrcPkg => {
                let pkg_scope = self
                    .globals
                    .pkg_scopes
                    .get(&path)
                    .or_else(|| {
                        self.globals
                            .pkg_names
                            .get(&path)
                            .and_then(|n| self.globals.pkg_scopes.get(n))
                    })
                    .copied()
                    .ok_or_else(|| {
                        CompileError::new(format!("undefined package {path}"), span)
                    })?;
                let sym = self
                    .globals
                    .scopes
                    .lookup_local(pkg_scope, field)
                    .ok_or_else(|| {
                        CompileError::new(format!("undefined: {path}.{field}"), span)
                    })?;
                let symbol = self.globals.scopes.sym(sym).clone();
                match symbol.kind {
                    SymKind::Const => {
                        let typ = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                        self.const_expr(scope, id, symbol.value.unwrap_or(Value::Nil), typ)
                    }
                    SymKind::Var | SymKind::Func => {
                        let typ = symbol.typ.ok_or_else(|| {
                            CompileError::new(format!("undefined: {path}.{field}"), span)
                        })?;
                        let index = symbol.findex.ok_or_else(|| {
                            CompileError::new(format!("{path}.{field} has no storage"), span)
                        })?;
                        let level = self.globals.scopes.frame_level(scope, pkg_scope);
                        if level == 0 {
                            Ok(ExprInfo {
                                chain: Chain::default(),
                                typ,
                                slot: index,
                                val: None,
                                loc: Some(Loc::slot(0, index)),
                                addressable: symbol.kind == SymKind::Var,
                                denot: Denot::Value,
                            })
                        } else {
                            let dest = self.temp(scope, typ);
                            self.plan(id, Gen::VarCopy { dest, level, index });
                            Ok(ExprInfo {
                                chain: Chain::solo(id),
                                typ,
                                slot: dest,
                                val: None,
                                loc: Some(Loc::Slot {
                                    level,
                                    index,
                                    steps: Vec::new(),
                                }),
                                addressable: symbol.kind == SymKind::Var,
                                denot: Denot::Value,
                            })
                        }
                    }
                    SymKind::Type => {
                        let typ = symbol.typ.unwrap_or(crate::types::EMPTY_IFACE);
                        Ok(ExprInfo {
                            chain: Chain::default(),
                            typ,
                            slot: 0,
                            val: None,
                            loc: None,
                            addressable: false,
                            denot: Denot::Type(typ),
                        })
                    }
                    _ => Err(CompileError::new(
                        format!("cannot use {path}.{field} here"),
                        span,
                    )),
                }
            }
            _ => Err(CompileError::new("not a package", span)),
        }
    }

    fn index_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let children = self.unit.node(id).children.clone();
        let subject = self.expr(func, scope, children[0], None)?;
        // Pointer-to-array auto-derefs.
        let (subject_ty, through_ptr) = match self.cat(subject.typ) {
            Cat::Ptr => {
                let elem = self.ty(subject.typ).elem.unwrap_or(subject.typ);
                if self.cat(elem) == Cat::Array {
                    (elem, true)
                } else {
                    (subject.typ, false)
                }
            }
            _ => (subject.typ, false),
        };

        match self.cat(subject_ty) {
            Cat::Map => {
                let key_ty = self.ty(subject_ty).key.unwrap_or(crate::types::EMPTY_IFACE);
                let key = self.expr(func, scope, children[1], Some(key_ty))?;
                self.check_assign(key_ty, &key, span)?;
                let elem = self.ty(subject_ty).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let missing = zero_value(&self.globals.types, elem);
                let loc = Loc::MapElem {
                    map: subject.slot,
                    key: key.slot,
                };
                let dest = self.temp(scope, elem);
                self.unit.node_mut(id).action = Action::GetIndex;
                self.plan(
                    id,
                    Gen::ReadLoc {
                        loc: loc.clone(),
                        missing,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, key.chain, Chain::solo(id)]);
                Ok(ExprInfo {
                    chain,
                    typ: elem,
                    slot: dest,
                    val: None,
                    loc: Some(loc),
                    addressable: false,
                    denot: Denot::Value,
                })
            }
            Cat::Slice => {
                let index = self.index_operand(func, scope, children[1], span)?;
                let elem = self.ty(subject_ty).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let loc = Loc::SliceElem {
                    slice: subject.slot,
                    index: index.slot,
                    steps: Vec::new(),
                };
                let dest = self.temp(scope, elem);
                let missing = zero_value(&self.globals.types, elem);
                self.unit.node_mut(id).action = Action::GetIndex;
                self.plan(
                    id,
                    Gen::ReadLoc {
                        loc: loc.clone(),
                        missing,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, index.chain, Chain::solo(id)]);
                Ok(ExprInfo {
                    chain,
                    typ: elem,
                    slot: dest,
                    val: None,
                    loc: Some(loc),
                    addressable: true,
                    denot: Denot::Value,
                })
            }
            Cat::Array => {
                let index = self.index_operand(func, scope, children[1], span)?;
                let elem = self.ty(subject_ty).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let len = self.ty(subject_ty).len;
                let step = Step::Index {
                    slot: index.slot,
                    len,
                };
                let loc = self.extend_loc(&subject, through_ptr, vec![step]);
                let dest = self.temp(scope, elem);
                let missing = zero_value(&self.globals.types, elem);
                self.unit.node_mut(id).action = Action::GetIndex;
                self.plan(
                    id,
                    Gen::ReadLoc {
                        loc: loc.clone(),
                        missing,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, index.chain, Chain::solo(id)]);
                Ok(ExprInfo {
                    chain,
                    typ: elem,
                    slot: dest,
                    val: None,
                    loc: Some(loc),
                    addressable: subject.addressable || through_ptr,
                    denot: Denot::Value,
                })
            }
            Cat::String => {
                let index = self.index_operand(func, scope, children[1], span)?;
                let dest = self.temp(scope, crate::types::UINT8);
                self.unit.node_mut(id).action = Action::GetIndex;
                self.plan(
                    id,
                    Gen::IndexString {
                        subject: subject.slot,
                        index: index.slot,
                        dest,
                    },
                );
                let chain = self.seq(vec![subject.chain, index.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, crate::types::UINT8, dest))
            }
            _ => Err(CompileError::new(
                format!("cannot index {}", self.describe(subject.typ)),
                span,
            )),
        }
    }

    fn index_operand(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let info = self.expr(func, scope, id, Some(crate::types::INT))?;
        if !self.globals.types.is_integer(info.typ) && !self.ty(info.typ).untyped {
            return Err(CompileError::new(
                format!("index must be an integer, got {}", self.describe(info.typ)),
                span,
            ));
        }
        Ok(info)
    }

    fn slice_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        has_low: bool,
        has_high: bool,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let children = self.unit.node(id).children.clone();
        let subject = self.expr(func, scope, children[0], None)?;
        let mut cursor = 1;
        let low = if has_low {
            let info = self.index_operand(func, scope, children[cursor], span)?;
            cursor += 1;
            Some(info)
        } else {
            None
        };
        let high = if has_high {
            let info = self.index_operand(func, scope, children[cursor], span)?;
            Some(info)
        } else {
            None
        };

        let typ = match self.cat(subject.typ) {
            Cat::Slice => subject.typ,
            Cat::String => crate::types::STRING,
            Cat::Array => {
                let elem = self.ty(subject.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                self.globals.types.slice_of(elem)
            }
            _ => {
                return Err(CompileError::new(
                    format!("cannot slice {}", self.describe(subject.typ)),
                    span,
                ))
            }
        };

        let dest = self.temp(scope, typ);
        self.unit.node_mut(id).action = Action::GetSlice;
        self.plan(
            id,
            Gen::SliceExpr {
                subject: subject.slot,
                low: low.as_ref().map(|l| l.slot),
                high: high.as_ref().map(|h| h.slot),
                dest,
            },
        );
        let mut chains = vec![subject.chain];
        if let Some(l) = low {
            chains.push(l.chain);
        }
        if let Some(h) = high {
            chains.push(h.chain);
        }
        chains.push(Chain::solo(id));
        let chain = self.seq(chains);
        Ok(ExprInfo::value(chain, typ, dest))
    }

    fn unary_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        op: UnaryOp,
        hint: Option<TypeId>,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let operand_node = self.unit.node(id).children[0];
        match op {
            UnaryOp::Recv => {
                let operand = self.expr(func, scope, operand_node, None)?;
                if self.cat(operand.typ) != Cat::Chan {
                    return Err(CompileError::new(
                        format!("cannot receive from {}", self.describe(operand.typ)),
                        span,
                    ));
                }
                if self.ty(operand.typ).dir == ChanDir::Send {
                    return Err(CompileError::new(
                        "cannot receive from send-only channel",
                        span,
                    ));
                }
                let elem = self.ty(operand.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let dest = self.temp(scope, elem);
                self.unit.node_mut(id).action = Action::Recv;
                self.plan(
                    id,
                    Gen::Recv {
                        chan: operand.slot,
                        dest,
                    },
                );
                let chain = self.seq(vec![operand.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, elem, dest))
            }
            UnaryOp::Addr => {
                // `&T{...}` boxes the fresh composite.
                if matches!(
                    self.unit.node(operand_node).kind,
                    NodeKind::CompositeLitExpr { .. }
                ) {
                    let elem_hint = match hint {
                        Some(h) if self.cat(h) == Cat::Ptr => self.ty(h).elem,
                        _ => None,
                    };
                    let operand = self.expr(func, scope, operand_node, elem_hint)?;
                    let typ = self.globals.types.ptr_to(operand.typ);
                    let dest = self.temp(scope, typ);
                    self.unit.node_mut(id).action = Action::Addr;
                    self.plan(
                        id,
                        Gen::AddrOfValue {
                            src: operand.slot,
                            dest,
                        },
                    );
                    let chain = self.seq(vec![operand.chain, Chain::solo(id)]);
                    return Ok(ExprInfo::value(chain, typ, dest));
                }
                let operand = self.expr(func, scope, operand_node, None)?;
                let loc = match (&operand.loc, operand.addressable) {
                    (Some(loc), true) => loc.clone(),
                    _ => {
                        return Err(CompileError::new(
                            "cannot take the address of this expression",
                            span,
                        ))
                    }
                };
                let typ = self.globals.types.ptr_to(operand.typ);
                let dest = self.temp(scope, typ);
                self.unit.node_mut(id).action = Action::Addr;
                self.plan(id, Gen::Addr { loc, dest });
                let chain = self.seq(vec![operand.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, typ, dest))
            }
            UnaryOp::Deref => {
                let operand = self.expr(func, scope, operand_node, None)?;
                // `(*T)(x)` in expression position denotes a pointer type.
                if let Denot::Type(t) = operand.denot {
                    let typ = self.globals.types.ptr_to(t);
                    return Ok(ExprInfo {
                        chain: Chain::default(),
                        typ,
                        slot: 0,
                        val: None,
                        loc: None,
                        addressable: false,
                        denot: Denot::Type(typ),
                    });
                }
                if self.cat(operand.typ) != Cat::Ptr {
                    return Err(CompileError::new(
                        format!("cannot dereference {}", self.describe(operand.typ)),
                        span,
                    ));
                }
                let elem = self.ty(operand.typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let loc = Loc::Deref {
                    ptr: operand.slot,
                    steps: Vec::new(),
                };
                let dest = self.temp(scope, elem);
                let missing = zero_value(&self.globals.types, elem);
                self.unit.node_mut(id).action = Action::Star;
                self.plan(
                    id,
                    Gen::ReadLoc {
                        loc: loc.clone(),
                        missing,
                        dest,
                    },
                );
                let chain = self.seq(vec![operand.chain, Chain::solo(id)]);
                Ok(ExprInfo {
                    chain,
                    typ: elem,
                    slot: dest,
                    val: None,
                    loc: Some(loc),
                    addressable: true,
                    denot: Denot::Value,
                })
            }
            _ => {
                let operand = self.expr(func, scope, operand_node, hint)?;
                // Fold constants.
                if let Some(value) = &operand.val {
                    if self.ty(operand.typ).untyped {
                        let action = ops::unary_action(
                            &self.globals.types,
                            op,
                            self.globals.types.default_type(operand.typ),
                        )
                        .map_err(|m| CompileError::new(m, span))?;
                        let folded = action(value)
                            .map_err(|e| CompileError::new(e.to_string(), span))?;
                        return self.const_expr(scope, id, folded, operand.typ);
                    }
                }
                let action = ops::unary_action(
                    &self.globals.types,
                    op,
                    self.globals.types.default_type(operand.typ),
                )
                .map_err(|m| CompileError::new(m, span))?;
                let dest = self.temp(scope, operand.typ);
                self.unit.node_mut(id).action = Action::Unary(op);
                self.plan(
                    id,
                    Gen::Unary {
                        op: action,
                        operand: operand.slot,
                        dest,
                    },
                );
                let chain = self.seq(vec![operand.chain, Chain::solo(id)]);
                Ok(ExprInfo::value(chain, operand.typ, dest))
            }
        }
    }

    fn binary_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        op: BinaryOp,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let children = self.unit.node(id).children.clone();
        let lhs = self.expr(func, scope, children[0], None)?;
        let rhs = self.expr(func, scope, children[1], Some(lhs.typ))?;

        // Operand type: shifts key off the left side; otherwise typed
        // operands must agree and untyped constants adapt.
        let operand_ty = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            if !self.globals.types.is_integer(rhs.typ) && !self.ty(rhs.typ).untyped {
                return Err(CompileError::new("shift count must be an integer", span));
            }
            lhs.typ
        } else {
            let lu = self.ty(lhs.typ).untyped;
            let ru = self.ty(rhs.typ).untyped;
            match (lu, ru) {
                (true, true) => {
                    // Both untyped: promote.
                    let rank = |t: TypeId| match t {
                        crate::types::UNTYPED_BOOL => 0,
                        crate::types::UNTYPED_STRING => 1,
                        crate::types::UNTYPED_INT => 2,
                        crate::types::UNTYPED_RUNE => 3,
                        crate::types::UNTYPED_FLOAT => 4,
                        _ => 5,
                    };
                    if rank(lhs.typ) >= rank(rhs.typ) {
                        lhs.typ
                    } else {
                        rhs.typ
                    }
                }
                (true, false) => rhs.typ,
                (false, true) => lhs.typ,
                (false, false) => {
                    if self.globals.types.identical(lhs.typ, rhs.typ)
                        || self.globals.types.assignable(lhs.typ, rhs.typ)
                        || self.globals.types.assignable(rhs.typ, lhs.typ)
                    {
                        lhs.typ
                    } else {
                        return Err(CompileError::new(
                            format!(
                                "invalid operation: mismatched types {} and {}",
                                self.describe(lhs.typ),
                                self.describe(rhs.typ)
                            ),
                            span,
                        ));
                    }
                }
            }
        };

        // Adapt untyped constant operands to the operation's type.
        if !self.ty(operand_ty).untyped {
            let default_ty = self.globals.types.default_type(operand_ty);
            if self.ty(lhs.typ).untyped && !matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                self.coerce_const(default_ty, &lhs, span)?;
            }
            if self.ty(rhs.typ).untyped && !matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                self.coerce_const(default_ty, &rhs, span)?;
            }
        }

        let comparison = matches!(
            op,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        );
        if matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
            && !self
                .globals
                .types
                .is_ordered(self.globals.types.default_type(operand_ty))
        {
            return Err(CompileError::new(
                format!("operands of {op:?} must be ordered"),
                span,
            ));
        }

        let result_ty = if comparison {
            if self.ty(lhs.typ).untyped && self.ty(rhs.typ).untyped {
                crate::types::UNTYPED_BOOL
            } else {
                crate::types::BOOL
            }
        } else {
            operand_ty
        };

        // Fold constant operands.
        if let (Some(lv), Some(rv)) = (&lhs.val, &rhs.val) {
            let action = ops::binary_action(
                &self.globals.types,
                op,
                self.globals.types.default_type(operand_ty),
            )
            .map_err(|m| CompileError::new(m, span))?;
            let folded = action(lv, rv).map_err(|e| CompileError::new(e.to_string(), span))?;
            return self.const_expr(scope, id, folded, result_ty);
        }

        let action = ops::binary_action(
            &self.globals.types,
            op,
            self.globals.types.default_type(operand_ty),
        )
        .map_err(|m| CompileError::new(m, span))?;
        let dest = self.temp(scope, result_ty);
        self.unit.node_mut(id).action = Action::Binary(op);
        self.plan(
            id,
            Gen::Binary {
                op: action,
                lhs: lhs.slot,
                rhs: rhs.slot,
                dest,
            },
        );

        // Short-circuit wiring for && and ||: the left side branches
        // around the right side's evaluation; the stale right slot cannot
        // change the result.
        if matches!(op, BinaryOp::LAnd | BinaryOp::LOr) {
            let lhs_cond = self.as_cond(scope, &lhs, span)?;
            let lhs_true: Vec<Out> = lhs_cond
                .outs
                .iter()
                .copied()
                .filter(|o| matches!(o, Out::T(_)))
                .collect();
            let lhs_false: Vec<Out> = lhs_cond
                .outs
                .iter()
                .copied()
                .filter(|o| matches!(o, Out::F(_)))
                .collect();
            let (eval_rhs, skip_rhs) = if op == BinaryOp::LAnd {
                (lhs_true, lhs_false)
            } else {
                (lhs_false, lhs_true)
            };
            match rhs.chain.start {
                Some(start) => {
                    self.wire(&eval_rhs, start);
                    self.wire(&rhs.chain.outs, id);
                }
                None => self.wire(&eval_rhs, id),
            }
            self.wire(&skip_rhs, id);
            return Ok(ExprInfo::value(
                Chain {
                    start: lhs_cond.start.or(Some(id)),
                    outs: vec![Out::T(id)],
                },
                result_ty,
                dest,
            ));
        }

        let chain = self.seq(vec![lhs.chain, rhs.chain, Chain::solo(id)]);
        Ok(ExprInfo::value(chain, result_ty, dest))
    }

    fn composite_expr(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        has_ty: bool,
        hint: Option<TypeId>,
        span: Span,
    ) -> Result<ExprInfo, CompileError> {
        let children = self.unit.node(id).children.clone();
        let mut cursor = 0;
        let typ = if has_ty {
            let head = self.expr(func, scope, children[0], None)?;
            cursor += 1;
            match head.denot {
                Denot::Type(t) => t,
                _ => {
                    return Err(CompileError::new(
                        "composite literal requires a type",
                        span,
                    ))
                }
            }
        } else {
            hint.ok_or_else(|| {
                CompileError::new("untyped composite literal outside a typed context", span)
            })?
        };

        let elems: Vec<NodeId> = children[cursor..].to_vec();
        let mut chains = Vec::new();

        let plan = match self.cat(typ) {
            Cat::Struct => {
                let fields = self.ty(typ).fields.clone();
                let zeros: Vec<Value> = fields
                    .iter()
                    .map(|f| zero_value(&self.globals.types, f.ty))
                    .collect();
                let mut planned = Vec::new();
                let keyed = elems
                    .first()
                    .map(|e| matches!(self.unit.node(*e).kind, NodeKind::KeyValueExpr))
                    .unwrap_or(false);
                for (pos, elem) in elems.iter().enumerate() {
                    let (field_idx, value_node) = if keyed {
                        let NodeKind::KeyValueExpr = self.unit.node(*elem).kind else {
                            return Err(CompileError::new(
                                "mixed keyed and positional fields",
                                self.span(*elem),
                            ));
                        };
                        let key_node = self.unit.node(*elem).children[0];
                        let value_node = self.unit.node(*elem).children[1];
                        let name = match &self.unit.node(key_node).kind {
                            NodeKind::Ident => self.unit.node(key_node).ident.clone(),
                            _ => {
                                return Err(CompileError::new(
                                    "field key must be a name",
                                    self.span(key_node),
                                ))
                            }
                        };
                        let idx = fields
                            .iter()
                            .position(|f| f.name == name)
                            .ok_or_else(|| {
                                CompileError::new(
                                    format!("unknown field {name} in {}", self.describe(typ)),
                                    self.span(key_node),
                                )
                            })?;
                        (idx, value_node)
                    } else {
                        if pos >= fields.len() {
                            return Err(CompileError::new(
                                "too many values in struct literal",
                                self.span(*elem),
                            ));
                        }
                        (pos, *elem)
                    };
                    let field_ty = fields[field_idx].ty;
                    let info = self.expr(func, scope, value_node, Some(field_ty))?;
                    let wrap = self.check_assign(field_ty, &info, self.span(value_node))?;
                    chains.push(info.chain.clone());
                    planned.push((field_idx, info.slot, wrap));
                }
                CompositePlan::Struct {
                    typ,
                    elems: planned,
                    zeros,
                }
            }
            Cat::Array | Cat::Slice => {
                let elem_ty = self.ty(typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let zero = zero_value(&self.globals.types, elem_ty);
                let mut planned = Vec::new();
                let mut next_index = 0usize;
                for elem in &elems {
                    let (index, value_node) = match self.unit.node(*elem).kind.clone() {
                        NodeKind::KeyValueExpr => {
                            let key_node = self.unit.node(*elem).children[0];
                            let value_node = self.unit.node(*elem).children[1];
                            let key_info = self.expr(func, scope, key_node, None)?;
                            let idx = match key_info.val {
                                Some(Value::Int(v)) if v >= 0 => v as usize,
                                Some(Value::Uint(v)) => v as usize,
                                _ => {
                                    return Err(CompileError::new(
                                        "index must be a non-negative constant",
                                        self.span(key_node),
                                    ))
                                }
                            };
                            (idx, value_node)
                        }
                        _ => (next_index, *elem),
                    };
                    next_index = index + 1;
                    let info = self.expr(func, scope, value_node, Some(elem_ty))?;
                    let wrap = self.check_assign(elem_ty, &info, self.span(value_node))?;
                    chains.push(info.chain.clone());
                    planned.push((index, info.slot, wrap));
                }
                if self.cat(typ) == Cat::Array {
                    let len = self.ty(typ).len;
                    for (index, _, _) in &planned {
                        if *index >= len {
                            return Err(CompileError::new(
                                format!("array index {index} out of bounds [0:{len}]"),
                                span,
                            ));
                        }
                    }
                    CompositePlan::Array {
                        len,
                        elems: planned,
                        zero,
                    }
                } else {
                    CompositePlan::Slice {
                        elems: planned,
                        zero,
                    }
                }
            }
            Cat::Map => {
                let key_ty = self.ty(typ).key.unwrap_or(crate::types::EMPTY_IFACE);
                let elem_ty = self.ty(typ).elem.unwrap_or(crate::types::EMPTY_IFACE);
                let mut pairs = Vec::new();
                for elem in &elems {
                    let NodeKind::KeyValueExpr = self.unit.node(*elem).kind else {
                        return Err(CompileError::new(
                            "map literal requires key: value pairs",
                            self.span(*elem),
                        ));
                    };
                    let key_node = self.unit.node(*elem).children[0];
                    let value_node = self.unit.node(*elem).children[1];
                    let key = self.expr(func, scope, key_node, Some(key_ty))?;
                    self.check_assign(key_ty, &key, self.span(key_node))?;
                    let value = self.expr(func, scope, value_node, Some(elem_ty))?;
                    let wrap = self.check_assign(elem_ty, &value, self.span(value_node))?;
                    chains.push(key.chain.clone());
                    chains.push(value.chain.clone());
                    pairs.push((key.slot, value.slot, wrap));
                }
                CompositePlan::Map { pairs }
            }
            _ => {
                return Err(CompileError::new(
                    format!("invalid composite literal type {}", self.describe(typ)),
                    span,
                ))
            }
        };

        let dest = self.temp(scope, typ);
        self.unit.node_mut(id).action = Action::CompositeLit;
        self.plan(id, Gen::Composite { plan, dest });
        chains.push(Chain::solo(id));
        let chain = self.seq(chains);
        Ok(ExprInfo::value(chain, typ, dest))
    }

    /// The runtime acceptance test of a type assertion.
    fn assert_accept(&mut self, target: TypeId) -> Arc<dyn Fn(&Value) -> bool + Send + Sync> {
        let core = self.core.clone();
        Arc::new(move |subject: &Value| {
            let dynamic = match subject {
                Value::Iface(b) => Some(b.typ),
                Value::Struct(s) => Some(s.typ),
                Value::Nil => return false,
                _ => None,
            };
            let globals = core.globals();
            match dynamic {
                Some(d) => {
                    d == target
                        || globals.types.identical(d, target)
                        || (globals.types.is_interface(target)
                            && globals.types.implements(d, target))
                }
                None => value_matches_basic(&globals.types, subject, target),
            }
        })
    }

    // ---- calls ----

    fn call_plan(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
    ) -> Result<PlannedCall, CompileError> {
        let span = self.span(id);
        let NodeKind::CallExpr { spread } = self.unit.node(id).kind.clone() else {
            return Err(CompileError::new("expected call expression", span));
        };
        let children = self.unit.node(id).children.clone();
        let fun_node = children[0];
        let arg_nodes: Vec<NodeId> = children[1..].to_vec();

        let fun = self.expr(func, scope, fun_node, None)?;

        // Conversion: `T(x)`.
        if let Denot::Type(target) = fun.denot {
            let [arg_node] = arg_nodes.as_slice() else {
                return Err(CompileError::new(
                    "conversion takes exactly one argument",
                    span,
                ));
            };
            let arg = self.expr(func, scope, *arg_node, Some(target))?;
            if !self.globals.types.convertible(target, arg.typ) {
                return Err(CompileError::new(
                    format!(
                        "cannot convert {} to {}",
                        self.describe(arg.typ),
                        self.describe(target)
                    ),
                    span,
                ));
            }
            let dest = self.temp(scope, target);
            self.unit.node_mut(id).typ = Some(target);
            self.unit.node_mut(id).action = Action::Convert;
            if self.globals.types.is_interface(target) {
                // Conversion to an interface boxes the value.
                let wrap = self.globals.types.default_type(arg.typ);
                let conv: ConvFn = Arc::new(move |v: &Value| {
                    Ok(crate::exec::coerce(v.clone(), Some(wrap)))
                });
                self.plan(
                    id,
                    Gen::Convert {
                        conv,
                        operand: arg.slot,
                        dest,
                    },
                );
            } else {
                let conv = ops::convert_action(
                    &self.globals.types,
                    target,
                    self.globals.types.default_type(arg.typ),
                )
                .map_err(|m| CompileError::new(m, span))?;
                self.plan(
                    id,
                    Gen::Convert {
                        conv,
                        operand: arg.slot,
                        dest,
                    },
                );
            }
            let chain = self.seq(vec![arg.chain, Chain::solo(id)]);
            return Ok(PlannedCall::Converted(chain, target, dest));
        }

        // Builtin call.
        if let Denot::Builtin(builtin) = fun.denot {
            return self.builtin_call(func, scope, id, builtin, &arg_nodes, spread, span);
        }

        // Ordinary call (method values arrive as bound callables).
        let sig = fun.typ;
        if self.cat(sig) != Cat::Func {
            return Err(CompileError::new(
                format!("cannot call {}", self.describe(sig)),
                span,
            ));
        }
        let params = self.ty(sig).params.clone();
        let results = self.ty(sig).results.clone();
        let variadic = self.ty(sig).variadic;

        let fixed = if variadic { params.len() - 1 } else { params.len() };
        if spread {
            if !variadic {
                return Err(CompileError::new(
                    "cannot spread into non-variadic call",
                    span,
                ));
            }
            if arg_nodes.len() != params.len() {
                return Err(CompileError::new("wrong argument count for spread", span));
            }
        } else if variadic {
            if arg_nodes.len() < fixed {
                return Err(CompileError::new(
                    format!(
                        "not enough arguments: expected at least {fixed}, got {}",
                        arg_nodes.len()
                    ),
                    span,
                ));
            }
        } else if arg_nodes.len() != params.len() {
            return Err(CompileError::new(
                format!(
                    "wrong argument count: expected {}, got {}",
                    params.len(),
                    arg_nodes.len()
                ),
                span,
            ));
        }

        let mut chains = vec![fun.chain.clone()];
        let mut args = Vec::new();
        for (idx, arg_node) in arg_nodes.iter().enumerate() {
            let param_ty = if idx < fixed {
                params[idx]
            } else if spread {
                params[fixed]
            } else {
                // Variadic tail: the element type.
                self.ty(params[fixed]).elem.unwrap_or(crate::types::EMPTY_IFACE)
            };
            let info = self.expr(func, scope, *arg_node, Some(param_ty))?;
            let wrap = self.check_assign(param_ty, &info, self.span(*arg_node))?;
            chains.push(info.chain.clone());
            args.push((info.slot, wrap));
        }

        let nret = results.len();
        let dest = if nret > 0 {
            let base = self.temp(scope, results[0]);
            for rty in results.iter().skip(1) {
                self.temp(scope, *rty);
            }
            base
        } else {
            self.temp(scope, crate::types::EMPTY_IFACE)
        };

        let callee = Callee::Slot { slot: fun.slot };

        self.unit.node_mut(id).typ = Some(sig);
        self.unit.node_mut(id).action = Action::Call;
        let chain = self.seq(chains);
        Ok(PlannedCall::Ordinary(
            chain,
            CallPlan {
                callee,
                args,
                pack_from: variadic.then_some(fixed),
                spread,
                dest,
                nret,
            },
        ))
    }

    fn builtin_call(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
        builtin: BuiltinId,
        arg_nodes: &[NodeId],
        spread: bool,
        span: Span,
    ) -> Result<PlannedCall, CompileError> {
        let mut chains = Vec::new();
        let mut args: Vec<(usize, Option<TypeId>)> = Vec::new();
        let mut target: Option<TypeId> = None;
        let mut zero: Option<Value> = None;
        let mut skip_first = false;

        // `make` and `new` take a type as their first argument.
        if matches!(builtin, BuiltinId::Make | BuiltinId::New) {
            let first = arg_nodes.first().ok_or_else(|| {
                CompileError::new("missing type argument", span)
            })?;
            let info = self.expr(func, scope, *first, None)?;
            let Denot::Type(t) = info.denot else {
                return Err(CompileError::new("first argument must be a type", span));
            };
            target = Some(t);
            skip_first = true;
        }

        for arg_node in arg_nodes.iter().skip(usize::from(skip_first)) {
            let info = self.expr(func, scope, *arg_node, None)?;
            chains.push(info.chain.clone());
            args.push((info.slot, None));
        }

        let typ = match builtin {
            BuiltinId::Len | BuiltinId::Cap | BuiltinId::Copy => crate::types::INT,
            BuiltinId::Append => {
                let first = args.first().map(|(slot, _)| *slot);
                let _ = first;
                self.unit
                    .node(arg_nodes[0])
                    .typ
                    .unwrap_or(crate::types::EMPTY_IFACE)
            }
            BuiltinId::Complex => crate::types::COMPLEX128,
            BuiltinId::Imag | BuiltinId::Real => crate::types::FLOAT64,
            BuiltinId::Make => target.unwrap_or(crate::types::EMPTY_IFACE),
            BuiltinId::New => {
                let t = target.unwrap_or(crate::types::EMPTY_IFACE);
                zero = Some(zero_value(&self.globals.types, t));
                self.globals.types.ptr_to(t)
            }
            BuiltinId::Recover => crate::types::EMPTY_IFACE,
            _ => crate::types::EMPTY_IFACE,
        };

        let mut target_is_chan = false;
        let mut target_is_map = false;
        if builtin == BuiltinId::Make {
            let t = target.unwrap_or(crate::types::EMPTY_IFACE);
            match self.cat(t) {
                Cat::Chan => target_is_chan = true,
                Cat::Map => target_is_map = true,
                Cat::Slice => {
                    let elem = self.ty(t).elem.unwrap_or(crate::types::EMPTY_IFACE);
                    zero = Some(zero_value(&self.globals.types, elem));
                    if args.is_empty() {
                        return Err(CompileError::new("make of slice needs a length", span));
                    }
                }
                _ => {
                    return Err(CompileError::new(
                        format!("cannot make {}", self.describe(t)),
                        span,
                    ))
                }
            }
        }

        let nret = match builtin {
            BuiltinId::Close
            | BuiltinId::Delete
            | BuiltinId::Panic
            | BuiltinId::Print
            | BuiltinId::Println => 0,
            _ => 1,
        };
        let dest = self.temp(scope, typ);

        self.unit.node_mut(id).typ = Some(typ);
        self.unit.node_mut(id).action = Action::CallBuiltin;
        let chain = self.seq(chains);
        Ok(PlannedCall::Builtin(
            chain,
            BuiltinPlan {
                id: builtin,
                args,
                spread,
                dest,
                nret,
                target,
                zero,
                target_is_chan,
                target_is_map,
            },
        ))
    }

    // ---- lvalues ----

    fn lvalue(
        &mut self,
        func: &mut FuncCtx,
        scope: ScopeId,
        id: NodeId,
    ) -> Result<Lvalue, CompileError> {
        let span = self.span(id);
        let info = self.expr(func, scope, id, None)?;
        if matches!(info.denot, Denot::Blank) {
            return Ok(Lvalue {
                chain: Chain::default(),
                loc: Loc::Blank,
                typ: crate::types::EMPTY_IFACE,
            });
        }
        let loc = info.loc.clone().ok_or_else(|| {
            CompileError::new("cannot assign to this expression", span)
        })?;
        // The read half of the planned expression is dead for plain
        // stores, but keeps evaluation order for index computations.
        Ok(Lvalue {
            chain: info.chain,
            loc,
            typ: info.typ,
        })
    }

    // ---- generation ----

    /// Turns every planned node into its executor closure, binding the
    /// final `tnext`/`fnext` wiring.
    fn generate(&mut self) {
        self.unit.exec = Vec::with_capacity(self.unit.nodes.len());
        for _ in 0..self.unit.nodes.len() {
            self.unit.exec.push(None);
        }
        let plans = std::mem::take(&mut self.plans);
        for (id, gen) in plans {
            let tnext = self.unit.node(id).tnext;
            let fnext = self.unit.node(id).fnext;
            let exec = match gen {
                Gen::Jump => crate::exec::gen_jump(tnext),
                Gen::Const { dest, value } => crate::exec::gen_const(dest, value, tnext, fnext),
                Gen::VarCopy { dest, level, index } => {
                    crate::exec::gen_var_copy(dest, level, index, tnext, fnext)
                }
                Gen::Binary { op, lhs, rhs, dest } => {
                    crate::exec::gen_binary(op, lhs, rhs, dest, tnext, fnext)
                }
                Gen::Unary { op, operand, dest } => {
                    crate::exec::gen_unary(op, operand, dest, tnext, fnext)
                }
                Gen::Convert { conv, operand, dest } => {
                    crate::exec::gen_convert(conv, operand, dest, tnext)
                }
                Gen::ReadLoc { loc, missing, dest } => {
                    crate::exec::gen_read_loc(loc, missing, dest, tnext, fnext)
                }
                Gen::IndexString {
                    subject,
                    index,
                    dest,
                } => crate::exec::gen_index_string(subject, index, dest, tnext),
                Gen::SliceExpr {
                    subject,
                    low,
                    high,
                    dest,
                } => crate::exec::gen_slice_expr(subject, low, high, dest, tnext),
                Gen::Addr { loc, dest } => crate::exec::gen_addr(loc, dest, tnext),
                Gen::AddrOfValue { src, dest } => {
                    crate::exec::gen_addr_of_value(src, dest, tnext)
                }
                Gen::Assign { plans } => crate::exec::gen_assign(plans, tnext),
                Gen::AssignOk {
                    source,
                    value_loc,
                    ok_loc,
                    wrap,
                } => crate::exec::gen_assign_ok(source, value_loc, ok_loc, wrap, tnext),
                Gen::Recv { chan, dest } => crate::exec::gen_recv(chan, dest, tnext),
                Gen::Send { chan, value, wrap } => {
                    crate::exec::gen_send(chan, value, wrap, tnext)
                }
                Gen::Call(plan) => crate::exec::gen_call(plan, tnext),
                Gen::Go(plan) => crate::exec::gen_go(plan, tnext),
                Gen::DeferCall(plan) => crate::exec::gen_defer(plan, tnext),
                Gen::Builtin(plan) => crate::builtins::gen_builtin(plan, tnext),
                Gen::DeferBuiltin(plan) => crate::builtins::gen_defer_builtin(plan, tnext),
                Gen::Return { sources } => crate::exec::gen_return(sources),
                Gen::FuncDeclare { node, level, index } => {
                    crate::exec::gen_func_decl(node, level, index, tnext)
                }
                Gen::FuncLit { node, dest } => crate::exec::gen_func_lit(node, dest, tnext),
                Gen::Composite { plan, dest } => {
                    crate::exec::gen_composite(plan, dest, tnext)
                }
                Gen::TypeAssert {
                    src,
                    accept,
                    want,
                    keep_iface,
                    dest,
                } => {
                    let desc: Arc<dyn Fn(&Value) -> String + Send + Sync> =
                        Arc::new(|v: &Value| format!("{v:?}"));
                    crate::exec::gen_type_assert(src, accept, want, desc, keep_iface, dest, tnext)
                }
                Gen::TypeTest { src, accept, bind } => {
                    crate::exec::gen_type_test(src, accept, bind, tnext, fnext)
                }
                Gen::MethodValue {
                    recv,
                    recv_is_ptr,
                    want_ptr,
                    name,
                    target,
                    dest,
                } => crate::exec::gen_method_value(
                    recv,
                    recv_is_ptr,
                    want_ptr,
                    name,
                    target,
                    dest,
                    tnext,
                ),
                Gen::Select { cases } => crate::exec::gen_select(cases, tnext),
                Gen::RangeInit(plan) => crate::exec::gen_range_init(plan, tnext),
                Gen::Range(plan) => crate::exec::gen_range(plan, tnext, fnext),
            };
            self.unit.exec[id as usize] = Some(exec);
        }
    }
}

struct Lvalue {
    chain: Chain,
    loc: Loc,
    typ: TypeId,
}

enum PlannedCall {
    Ordinary(Chain, CallPlan),
    Builtin(Chain, BuiltinPlan),
    /// A conversion in call syntax: already planned; type and slot.
    Converted(Chain, TypeId, usize),
}

fn assign_binary_op(op: AssignOp) -> Option<BinaryOp> {
    match op {
        AssignOp::Add => Some(BinaryOp::Add),
        AssignOp::Sub => Some(BinaryOp::Sub),
        AssignOp::Mul => Some(BinaryOp::Mul),
        AssignOp::Div => Some(BinaryOp::Div),
        AssignOp::Rem => Some(BinaryOp::Rem),
        AssignOp::And => Some(BinaryOp::And),
        AssignOp::Or => Some(BinaryOp::Or),
        AssignOp::Xor => Some(BinaryOp::Xor),
        AssignOp::AndNot => Some(BinaryOp::AndNot),
        AssignOp::Shl => Some(BinaryOp::Shl),
        AssignOp::Shr => Some(BinaryOp::Shr),
        AssignOp::Plain | AssignOp::Define => None,
    }
}

/// Dynamic-type matching for unboxed basic values reaching a type test
/// (results of `recover`, host bridge values).
fn value_matches_basic(store: &crate::types::TypeStore, value: &Value, target: TypeId) -> bool {
    match value {
        Value::Bool(_) => store.cat(target) == Cat::Bool,
        Value::Int(_) => store.is_signed(target),
        Value::Uint(_) => store.is_unsigned(target),
        Value::Float32(_) => store.cat(target) == Cat::Float32,
        Value::Float(_) => store.cat(target) == Cat::Float64,
        Value::Str(_) => store.cat(target) == Cat::String,
        Value::Slice(_) => store.cat(target) == Cat::Slice,
        Value::Map(_) => store.cat(target) == Cat::Map,
        Value::Chan(_) => store.cat(target) == Cat::Chan,
        Value::Ptr(_) => store.cat(target) == Cat::Ptr,
        Value::Func(_) | Value::HostFn(_) => store.cat(target) == Cat::Func,
        _ => false,
    }
}
