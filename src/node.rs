use crate::ast::{
    AssignOp, BinaryOp, BranchKind, CommClause, Decl, Expr, FileAst, FuncSig, Stmt, TypeExpr,
    UnaryOp,
};
use crate::exec::ExecFn;
use crate::scope::{ScopeId, SymId};
use crate::source::Span;
use crate::types::TypeId;
use crate::value::Value;
use std::collections::HashMap;

/// Index of a node in its evaluation unit's arena.
pub type NodeId = u32;

/// Receiver access path for a method call: the receiver expression node
/// plus the promotion path through embedded fields.
#[derive(Clone, Debug, Default)]
pub struct RecvInfo {
    pub node: Option<NodeId>,
    pub path: Vec<usize>,
}

/// Action tag selected by the CFG pass; the generator keys the typed
/// closure off this tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Nop,
    Assign,
    Define,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Call,
    CallBuiltin,
    Convert,
    GetIndex,
    GetSlice,
    GetField,
    GetMethod,
    Recv,
    Send,
    Branch,
    Return,
    Range,
    TypeAssert,
    CompositeLit,
    FuncLit,
    FuncDecl,
    Star,
    Addr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommKind {
    Send,
    Recv {
        value: Option<String>,
        ok: Option<String>,
        define: bool,
    },
    Default,
}

/// Node kind, labelled by the annotator from the syntactic form. Payloads
/// carry the parts of the syntax that analysis needs but which are not
/// themselves executable nodes (names, type expressions, operators).
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    File,
    Import {
        alias: Option<String>,
        path: String,
    },
    TypeDecl {
        name: String,
        alias: bool,
        ty: TypeExpr,
    },
    ConstDecl {
        names: Vec<String>,
        ty: Option<TypeExpr>,
        iota: usize,
        values: Vec<Expr>,
    },
    VarDecl {
        names: Vec<String>,
        ty: Option<TypeExpr>,
    },
    FuncDecl {
        name: String,
        recv: Option<(String, TypeExpr)>,
        sig: FuncSig,
    },
    DeclStmt,
    ExprStmt,
    SendStmt,
    IncDecStmt {
        inc: bool,
    },
    AssignStmt {
        op: AssignOp,
        nleft: usize,
    },
    IfStmt {
        has_init: bool,
        has_else: bool,
    },
    ForStmt {
        has_init: bool,
        has_cond: bool,
        has_post: bool,
    },
    RangeStmt {
        key: Option<String>,
        value: Option<String>,
        define: bool,
    },
    SwitchStmt {
        has_init: bool,
        has_tag: bool,
    },
    CaseClause {
        nexpr: usize,
        is_default: bool,
    },
    TypeSwitchStmt {
        binding: Option<String>,
        has_init: bool,
    },
    TypeCaseClause {
        types: Vec<Option<TypeExpr>>,
        is_default: bool,
    },
    SelectStmt,
    CommClauseNode {
        kind: CommKind,
        ncomm: usize,
    },
    GoStmt,
    DeferStmt,
    ReturnStmt,
    BranchStmt {
        kind: BranchKind,
        label: Option<String>,
    },
    LabeledStmt {
        label: String,
    },
    BlockStmt,
    EmptyStmt,

    Ident,
    IntLit,
    FloatLit,
    StrLit,
    RuneLit,
    TypeLitExpr {
        ty: TypeExpr,
    },
    CompositeLitExpr {
        has_ty: bool,
    },
    KeyValueExpr,
    FuncLitExpr {
        sig: FuncSig,
    },
    UnaryExpr {
        op: UnaryOp,
    },
    BinaryExpr {
        op: BinaryOp,
    },
    CallExpr {
        spread: bool,
    },
    IndexExpr,
    SliceExprNode {
        has_low: bool,
        has_high: bool,
    },
    SelectorExpr {
        field: String,
    },
    TypeAssertExpr {
        ty: Option<TypeExpr>,
    },
}

/// One annotated node: syntax plus the semantic slots the analysis passes
/// fill in. Back-references (ancestor, CFG successors) are arena indices.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub anc: Option<NodeId>,

    /// CFG entry point of the subtree.
    pub start: Option<NodeId>,
    /// True-branch successor.
    pub tnext: Option<NodeId>,
    /// False-branch successor.
    pub fnext: Option<NodeId>,

    /// Frame slot of the node's value, or the frame size for function
    /// definitions.
    pub findex: Option<usize>,
    /// Frame indirection level for closure captures.
    pub level: usize,

    pub span: Span,
    pub sym: Option<SymId>,
    pub typ: Option<TypeId>,
    pub recv: Option<RecvInfo>,
    pub action: Action,
    /// Static value for constants, folded during analysis.
    pub val: Option<Value>,
    pub ident: String,
    /// Frame slot types, set on function definition nodes.
    pub frame_types: Vec<TypeId>,
    /// Scope opened by this node (functions, blocks), for the CFG pass.
    pub scope: Option<ScopeId>,
}

impl Node {
    fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            children: Vec::new(),
            anc: None,
            start: None,
            tnext: None,
            fnext: None,
            findex: None,
            level: 0,
            span,
            sym: None,
            typ: None,
            recv: None,
            action: Action::Nop,
            val: None,
            ident: String::new(),
            frame_types: Vec::new(),
            scope: None,
        }
    }
}

/// One evaluation unit: the annotated node arena for a single parse, plus
/// the generated action closures and per-function frame zero templates.
/// Frozen behind an `Arc` once analysis completes; function values refer
/// into it by index, which keeps earlier units alive across REPL lines.
#[derive(Default)]
pub struct Unit {
    pub nodes: Vec<Node>,
    pub exec: Vec<Option<ExecFn>>,
    pub zeros: HashMap<NodeId, Vec<Value>>,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        id
    }

    /// Adds a synthetic node during CFG construction (branch probes, range
    /// initialisers, switch comparisons).
    pub fn synthetic(&mut self, span: Span) -> NodeId {
        self.push(Node::new(NodeKind::EmptyStmt, span))
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child as usize].anc = Some(parent);
        self.nodes[parent as usize].children.push(child);
    }

    /// Depth-first read-only walk: `pre` may prune a subtree by returning
    /// false; `post` runs at node exit.
    pub fn walk(
        &self,
        root: NodeId,
        pre: &mut impl FnMut(&Unit, NodeId) -> bool,
        post: &mut impl FnMut(&Unit, NodeId),
    ) {
        if !pre(self, root) {
            return;
        }
        let children = self.nodes[root as usize].children.clone();
        for child in children {
            self.walk(child, pre, post);
        }
        post(self, root);
    }
}

/// Builds the annotated node tree for one parsed file. Pure syntax
/// labelling: no resolution happens here.
pub fn annotate(unit: &mut Unit, file: &FileAst) -> NodeId {
    let root = unit.push(Node::new(NodeKind::File, file.span));
    for import in &file.imports {
        let node = unit.push(Node::new(
            NodeKind::Import {
                alias: import.alias.as_ref().map(|a| a.name.clone()),
                path: import.path.clone(),
            },
            import.span,
        ));
        unit.adopt(root, node);
    }
    for decl in &file.decls {
        let nodes = annotate_decl(unit, decl);
        for node in nodes {
            unit.adopt(root, node);
        }
    }
    root
}

fn annotate_decl(unit: &mut Unit, decl: &Decl) -> Vec<NodeId> {
    match decl {
        Decl::Func(f) => {
            let node = unit.push(Node::new(
                NodeKind::FuncDecl {
                    name: f.name.name.clone(),
                    recv: f.recv.as_ref().map(|r| {
                        (
                            r.name.as_ref().map(|n| n.name.clone()).unwrap_or_default(),
                            r.ty.clone(),
                        )
                    }),
                    sig: f.sig.clone(),
                },
                f.span,
            ));
            unit.node_mut(node).ident = f.name.name.clone();
            if let Some(body) = &f.body {
                let body_node = annotate_block(unit, body);
                unit.adopt(node, body_node);
            }
            vec![node]
        }
        Decl::Type(specs) => specs
            .iter()
            .map(|spec| {
                let node = unit.push(Node::new(
                    NodeKind::TypeDecl {
                        name: spec.name.name.clone(),
                        alias: spec.alias,
                        ty: spec.ty.clone(),
                    },
                    spec.span,
                ));
                unit.node_mut(node).ident = spec.name.name.clone();
                node
            })
            .collect(),
        Decl::Const(specs) => specs
            .iter()
            .enumerate()
            .map(|(iota, spec)| {
                unit.push(Node::new(
                    NodeKind::ConstDecl {
                        names: spec.names.iter().map(|n| n.name.clone()).collect(),
                        ty: spec.ty.clone(),
                        iota,
                        values: spec.values.clone(),
                    },
                    spec.span,
                ))
            })
            .collect(),
        Decl::Var(specs) => specs
            .iter()
            .map(|spec| {
                let node = unit.push(Node::new(
                    NodeKind::VarDecl {
                        names: spec.names.iter().map(|n| n.name.clone()).collect(),
                        ty: spec.ty.clone(),
                    },
                    spec.span,
                ));
                for value in &spec.values {
                    let v = annotate_expr(unit, value);
                    unit.adopt(node, v);
                }
                node
            })
            .collect(),
        Decl::Stmt(stmt) => vec![annotate_stmt(unit, stmt)],
    }
}

fn annotate_block(unit: &mut Unit, block: &crate::ast::Block) -> NodeId {
    let node = unit.push(Node::new(NodeKind::BlockStmt, block.span));
    for stmt in &block.stmts {
        let child = annotate_stmt(unit, stmt);
        unit.adopt(node, child);
    }
    node
}

fn annotate_stmt(unit: &mut Unit, stmt: &Stmt) -> NodeId {
    match stmt {
        Stmt::Decl(decl) => {
            let node = unit.push(Node::new(NodeKind::DeclStmt, stmt.span()));
            for child in annotate_decl(unit, decl) {
                unit.adopt(node, child);
            }
            node
        }
        Stmt::Expr(expr) => {
            let node = unit.push(Node::new(NodeKind::ExprStmt, expr.span()));
            let child = annotate_expr(unit, expr);
            unit.adopt(node, child);
            node
        }
        Stmt::Send { chan, value, span } => {
            let node = unit.push(Node::new(NodeKind::SendStmt, *span));
            let c = annotate_expr(unit, chan);
            unit.adopt(node, c);
            let v = annotate_expr(unit, value);
            unit.adopt(node, v);
            node
        }
        Stmt::IncDec { target, inc, span } => {
            let node = unit.push(Node::new(NodeKind::IncDecStmt { inc: *inc }, *span));
            let t = annotate_expr(unit, target);
            unit.adopt(node, t);
            node
        }
        Stmt::Assign { op, lhs, rhs, span } => {
            let node = unit.push(Node::new(
                NodeKind::AssignStmt {
                    op: *op,
                    nleft: lhs.len(),
                },
                *span,
            ));
            for e in lhs.iter().chain(rhs.iter()) {
                let child = annotate_expr(unit, e);
                unit.adopt(node, child);
            }
            node
        }
        Stmt::If {
            init,
            cond,
            then,
            els,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::IfStmt {
                    has_init: init.is_some(),
                    has_else: els.is_some(),
                },
                *span,
            ));
            if let Some(init) = init {
                let child = annotate_stmt(unit, init);
                unit.adopt(node, child);
            }
            let c = annotate_expr(unit, cond);
            unit.adopt(node, c);
            let t = annotate_block(unit, then);
            unit.adopt(node, t);
            if let Some(els) = els {
                let e = annotate_stmt(unit, els);
                unit.adopt(node, e);
            }
            node
        }
        Stmt::For {
            init,
            cond,
            post,
            body,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::ForStmt {
                    has_init: init.is_some(),
                    has_cond: cond.is_some(),
                    has_post: post.is_some(),
                },
                *span,
            ));
            if let Some(init) = init {
                let child = annotate_stmt(unit, init);
                unit.adopt(node, child);
            }
            if let Some(cond) = cond {
                let child = annotate_expr(unit, cond);
                unit.adopt(node, child);
            }
            if let Some(post) = post {
                let child = annotate_stmt(unit, post);
                unit.adopt(node, child);
            }
            let b = annotate_block(unit, body);
            unit.adopt(node, b);
            node
        }
        Stmt::ForRange {
            key,
            value,
            define,
            subject,
            body,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::RangeStmt {
                    key: key.as_ref().map(|k| k.name.clone()),
                    value: value.as_ref().map(|v| v.name.clone()),
                    define: *define,
                },
                *span,
            ));
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            let b = annotate_block(unit, body);
            unit.adopt(node, b);
            node
        }
        Stmt::Switch {
            init,
            tag,
            cases,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::SwitchStmt {
                    has_init: init.is_some(),
                    has_tag: tag.is_some(),
                },
                *span,
            ));
            if let Some(init) = init {
                let child = annotate_stmt(unit, init);
                unit.adopt(node, child);
            }
            if let Some(tag) = tag {
                let child = annotate_expr(unit, tag);
                unit.adopt(node, child);
            }
            for case in cases {
                let clause = unit.push(Node::new(
                    NodeKind::CaseClause {
                        nexpr: case.exprs.len(),
                        is_default: case.exprs.is_empty(),
                    },
                    case.span,
                ));
                for e in &case.exprs {
                    let child = annotate_expr(unit, e);
                    unit.adopt(clause, child);
                }
                for s in &case.body {
                    let child = annotate_stmt(unit, s);
                    unit.adopt(clause, child);
                }
                unit.adopt(node, clause);
            }
            node
        }
        Stmt::TypeSwitch {
            init,
            binding,
            subject,
            cases,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::TypeSwitchStmt {
                    binding: binding.as_ref().map(|b| b.name.clone()),
                    has_init: init.is_some(),
                },
                *span,
            ));
            if let Some(init) = init {
                let child = annotate_stmt(unit, init);
                unit.adopt(node, child);
            }
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            for case in cases {
                let clause = unit.push(Node::new(
                    NodeKind::TypeCaseClause {
                        types: case.types.clone(),
                        is_default: case.is_default,
                    },
                    case.span,
                ));
                for stmt in &case.body {
                    let child = annotate_stmt(unit, stmt);
                    unit.adopt(clause, child);
                }
                unit.adopt(node, clause);
            }
            node
        }
        Stmt::Select { cases, span } => {
            let node = unit.push(Node::new(NodeKind::SelectStmt, *span));
            for case in cases {
                let (kind, comm_children) = match &case.comm {
                    CommClause::Send { chan, value } => {
                        (CommKind::Send, vec![chan.clone(), value.clone()])
                    }
                    CommClause::Recv {
                        value,
                        ok,
                        define,
                        chan,
                    } => (
                        CommKind::Recv {
                            value: value.as_ref().map(|v| v.name.clone()),
                            ok: ok.as_ref().map(|o| o.name.clone()),
                            define: *define,
                        },
                        vec![chan.clone()],
                    ),
                    CommClause::Default => (CommKind::Default, Vec::new()),
                };
                let clause = unit.push(Node::new(
                    NodeKind::CommClauseNode {
                        kind,
                        ncomm: comm_children.len(),
                    },
                    case.span,
                ));
                for e in &comm_children {
                    let child = annotate_expr(unit, e);
                    unit.adopt(clause, child);
                }
                for s in &case.body {
                    let child = annotate_stmt(unit, s);
                    unit.adopt(clause, child);
                }
                unit.adopt(node, clause);
            }
            node
        }
        Stmt::Go { call, span } => {
            let node = unit.push(Node::new(NodeKind::GoStmt, *span));
            let c = annotate_expr(unit, call);
            unit.adopt(node, c);
            node
        }
        Stmt::Defer { call, span } => {
            let node = unit.push(Node::new(NodeKind::DeferStmt, *span));
            let c = annotate_expr(unit, call);
            unit.adopt(node, c);
            node
        }
        Stmt::Return { values, span } => {
            let node = unit.push(Node::new(NodeKind::ReturnStmt, *span));
            for v in values {
                let child = annotate_expr(unit, v);
                unit.adopt(node, child);
            }
            node
        }
        Stmt::Branch { kind, label, span } => unit.push(Node::new(
            NodeKind::BranchStmt {
                kind: *kind,
                label: label.as_ref().map(|l| l.name.clone()),
            },
            *span,
        )),
        Stmt::Labeled { label, stmt, span } => {
            let node = unit.push(Node::new(
                NodeKind::LabeledStmt {
                    label: label.name.clone(),
                },
                *span,
            ));
            unit.node_mut(node).ident = label.name.clone();
            let child = annotate_stmt(unit, stmt);
            unit.adopt(node, child);
            node
        }
        Stmt::Block(block) => annotate_block(unit, block),
        Stmt::Empty(span) => unit.push(Node::new(NodeKind::EmptyStmt, *span)),
    }
}

fn annotate_expr(unit: &mut Unit, expr: &Expr) -> NodeId {
    match expr {
        Expr::Ident(id) => {
            let node = unit.push(Node::new(NodeKind::Ident, id.span));
            unit.node_mut(node).ident = id.name.clone();
            node
        }
        Expr::IntLit { value, span } => {
            let node = unit.push(Node::new(NodeKind::IntLit, *span));
            unit.node_mut(node).val = Some(Value::Int(*value));
            node
        }
        Expr::FloatLit { value, span } => {
            let node = unit.push(Node::new(NodeKind::FloatLit, *span));
            unit.node_mut(node).val = Some(Value::Float(*value));
            node
        }
        Expr::StrLit { value, span } => {
            let node = unit.push(Node::new(NodeKind::StrLit, *span));
            unit.node_mut(node).val = Some(Value::str(value));
            node
        }
        Expr::RuneLit { value, span } => {
            let node = unit.push(Node::new(NodeKind::RuneLit, *span));
            unit.node_mut(node).val = Some(Value::Int(*value as i64));
            node
        }
        Expr::TypeLit(ty) => unit.push(Node::new(
            NodeKind::TypeLitExpr { ty: (**ty).clone() },
            ty.span(),
        )),
        Expr::CompositeLit { ty, elems, span } => {
            let node = unit.push(Node::new(
                NodeKind::CompositeLitExpr { has_ty: ty.is_some() },
                *span,
            ));
            if let Some(ty) = ty {
                let child = annotate_expr(unit, ty);
                unit.adopt(node, child);
            }
            for elem in elems {
                match &elem.key {
                    Some(key) => {
                        let kv = unit.push(Node::new(NodeKind::KeyValueExpr, elem.span));
                        let k = annotate_expr(unit, key);
                        unit.adopt(kv, k);
                        let v = annotate_expr(unit, &elem.value);
                        unit.adopt(kv, v);
                        unit.adopt(node, kv);
                    }
                    None => {
                        let v = annotate_expr(unit, &elem.value);
                        unit.adopt(node, v);
                    }
                }
            }
            node
        }
        Expr::FuncLit { sig, body, span } => {
            let node = unit.push(Node::new(
                NodeKind::FuncLitExpr { sig: (**sig).clone() },
                *span,
            ));
            let b = annotate_block(unit, body);
            unit.adopt(node, b);
            node
        }
        Expr::Unary { op, operand, span } => {
            let node = unit.push(Node::new(NodeKind::UnaryExpr { op: *op }, *span));
            let child = annotate_expr(unit, operand);
            unit.adopt(node, child);
            node
        }
        Expr::Binary { op, lhs, rhs, span } => {
            let node = unit.push(Node::new(NodeKind::BinaryExpr { op: *op }, *span));
            let l = annotate_expr(unit, lhs);
            unit.adopt(node, l);
            let r = annotate_expr(unit, rhs);
            unit.adopt(node, r);
            node
        }
        Expr::Call {
            fun,
            args,
            spread,
            span,
        } => {
            let node = unit.push(Node::new(NodeKind::CallExpr { spread: *spread }, *span));
            let f = annotate_expr(unit, fun);
            unit.adopt(node, f);
            for arg in args {
                let child = annotate_expr(unit, arg);
                unit.adopt(node, child);
            }
            node
        }
        Expr::Index { subject, index, span } => {
            let node = unit.push(Node::new(NodeKind::IndexExpr, *span));
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            let i = annotate_expr(unit, index);
            unit.adopt(node, i);
            node
        }
        Expr::SliceExpr {
            subject,
            low,
            high,
            span,
        } => {
            let node = unit.push(Node::new(
                NodeKind::SliceExprNode {
                    has_low: low.is_some(),
                    has_high: high.is_some(),
                },
                *span,
            ));
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            if let Some(low) = low {
                let l = annotate_expr(unit, low);
                unit.adopt(node, l);
            }
            if let Some(high) = high {
                let h = annotate_expr(unit, high);
                unit.adopt(node, h);
            }
            node
        }
        Expr::Selector { subject, field, span } => {
            let node = unit.push(Node::new(
                NodeKind::SelectorExpr {
                    field: field.name.clone(),
                },
                *span,
            ));
            unit.node_mut(node).ident = field.name.clone();
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            node
        }
        Expr::TypeAssert { subject, ty, span } => {
            let node = unit.push(Node::new(
                NodeKind::TypeAssertExpr {
                    ty: ty.as_ref().map(|t| (**t).clone()),
                },
                *span,
            ));
            let s = annotate_expr(unit, subject);
            unit.adopt(node, s);
            node
        }
        Expr::Paren { inner, .. } => annotate_expr(unit, inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn annotation_labels_kinds_and_positions() {
        let file = parser::parse("x := 1 + 2\n", 0).expect("parse");
        let mut unit = Unit::new();
        let root = annotate(&mut unit, &file);
        assert_eq!(unit.node(root).kind, NodeKind::File);

        let mut kinds = Vec::new();
        unit.walk(
            root,
            &mut |_, _| true,
            &mut |u, id| kinds.push(u.node(id).kind.clone()),
        );
        assert!(kinds.iter().any(|k| matches!(k, NodeKind::IntLit)));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, NodeKind::BinaryExpr { op: BinaryOp::Add })));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, NodeKind::AssignStmt { op: AssignOp::Define, nleft: 1 })));
    }

    #[test]
    fn annotation_performs_no_resolution() {
        let file = parser::parse("y\n", 0).expect("parse");
        let mut unit = Unit::new();
        let root = annotate(&mut unit, &file);
        let expr_stmt = unit.node(root).children[0];
        let ident = unit.node(expr_stmt).children[0];
        assert_eq!(unit.node(ident).ident, "y");
        assert!(unit.node(ident).sym.is_none());
        assert!(unit.node(ident).typ.is_none());
    }

    #[test]
    fn ancestors_link_back_to_parents() {
        let file = parser::parse("f(1)\n", 0).expect("parse");
        let mut unit = Unit::new();
        let root = annotate(&mut unit, &file);
        let expr_stmt = unit.node(root).children[0];
        let call = unit.node(expr_stmt).children[0];
        for child in &unit.node(call).children {
            assert_eq!(unit.node(*child).anc, Some(call));
        }
    }
}
