use crate::source::Span;

/// A parsed source file (or REPL fragment). The package clause is optional
/// so incremental input can mix declarations and statements at top level.
#[derive(Clone, Debug, PartialEq)]
pub struct FileAst {
    pub package: Option<Ident>,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportDecl {
    pub alias: Option<Ident>,
    pub path: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    Func(FuncDecl),
    Type(Vec<TypeSpec>),
    Const(Vec<ValueSpec>),
    Var(Vec<ValueSpec>),
    /// A bare statement at top level (incremental input only).
    Stmt(Stmt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncDecl {
    pub name: Ident,
    /// Method receiver, when declared as `func (r T) name(...)`.
    pub recv: Option<Param>,
    pub sig: FuncSig,
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncSig {
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub variadic: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Option<Ident>,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeSpec {
    pub name: Ident,
    /// `type A = B` declares an alias rather than a defined type.
    pub alias: bool,
    pub ty: TypeExpr,
    pub span: Span,
}

/// One `name[, name...] [type] [= value...]` group of a const or var decl.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueSpec {
    pub names: Vec<Ident>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExpr {
    /// `name` or `pkg.name`.
    Name {
        pkg: Option<Ident>,
        name: Ident,
    },
    Ptr {
        elem: Box<TypeExpr>,
        span: Span,
    },
    Slice {
        elem: Box<TypeExpr>,
        span: Span,
    },
    Array {
        len: Box<Expr>,
        elem: Box<TypeExpr>,
        span: Span,
    },
    Map {
        key: Box<TypeExpr>,
        value: Box<TypeExpr>,
        span: Span,
    },
    Chan {
        dir: ChanDir,
        elem: Box<TypeExpr>,
        span: Span,
    },
    Struct {
        fields: Vec<FieldDecl>,
        span: Span,
    },
    Interface {
        methods: Vec<MethodDecl>,
        embeds: Vec<Ident>,
        span: Span,
    },
    Func {
        sig: Box<FuncSig>,
        span: Span,
    },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Name { pkg, name } => match pkg {
                Some(p) => p.span.merge(name.span),
                None => name.span,
            },
            TypeExpr::Ptr { span, .. }
            | TypeExpr::Slice { span, .. }
            | TypeExpr::Array { span, .. }
            | TypeExpr::Map { span, .. }
            | TypeExpr::Chan { span, .. }
            | TypeExpr::Struct { span, .. }
            | TypeExpr::Interface { span, .. }
            | TypeExpr::Func { span, .. } => *span,
        }
    }
}

/// A struct field group: `a, b T` or an embedded `T`.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub names: Vec<Ident>,
    pub ty: TypeExpr,
    pub tag: Option<String>,
    pub embedded: bool,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDecl {
    pub name: Ident,
    pub sig: FuncSig,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Plain,
    Define,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    Break,
    Continue,
    Goto,
    Fallthrough,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Decl(Box<Decl>),
    Expr(Expr),
    Send {
        chan: Expr,
        value: Expr,
        span: Span,
    },
    IncDec {
        target: Expr,
        inc: bool,
        span: Span,
    },
    Assign {
        op: AssignOp,
        lhs: Vec<Expr>,
        rhs: Vec<Expr>,
        span: Span,
    },
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        els: Option<Box<Stmt>>,
        span: Span,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
        span: Span,
    },
    ForRange {
        key: Option<Ident>,
        value: Option<Ident>,
        define: bool,
        subject: Expr,
        body: Block,
        span: Span,
    },
    Switch {
        init: Option<Box<Stmt>>,
        tag: Option<Expr>,
        cases: Vec<SwitchCase>,
        span: Span,
    },
    TypeSwitch {
        init: Option<Box<Stmt>>,
        binding: Option<Ident>,
        subject: Expr,
        cases: Vec<TypeSwitchCase>,
        span: Span,
    },
    Select {
        cases: Vec<SelectCase>,
        span: Span,
    },
    Go {
        call: Expr,
        span: Span,
    },
    Defer {
        call: Expr,
        span: Span,
    },
    Return {
        values: Vec<Expr>,
        span: Span,
    },
    Branch {
        kind: BranchKind,
        label: Option<Ident>,
        span: Span,
    },
    Labeled {
        label: Ident,
        stmt: Box<Stmt>,
        span: Span,
    },
    Block(Block),
    Empty(Span),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// Empty for `default`.
    pub exprs: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeSwitchCase {
    /// Empty for `default`; `None` entries are the `nil` case.
    pub types: Vec<Option<TypeExpr>>,
    pub is_default: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommClause {
    Send {
        chan: Expr,
        value: Expr,
    },
    Recv {
        value: Option<Ident>,
        ok: Option<Ident>,
        define: bool,
        chan: Expr,
    },
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectCase {
    pub comm: CommClause,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
    BitNot,
    Addr,
    Deref,
    Recv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    LAnd,
    LOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Ident(Ident),
    IntLit {
        value: i64,
        span: Span,
    },
    FloatLit {
        value: f64,
        span: Span,
    },
    StrLit {
        value: String,
        span: Span,
    },
    RuneLit {
        value: char,
        span: Span,
    },
    /// A type in expression position: conversions, `make`/`new` arguments,
    /// composite literal heads.
    TypeLit(Box<TypeExpr>),
    CompositeLit {
        ty: Option<Box<Expr>>,
        elems: Vec<CompositeElem>,
        span: Span,
    },
    FuncLit {
        sig: Box<FuncSig>,
        body: Box<Block>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Call {
        fun: Box<Expr>,
        args: Vec<Expr>,
        spread: bool,
        span: Span,
    },
    Index {
        subject: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    SliceExpr {
        subject: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        span: Span,
    },
    Selector {
        subject: Box<Expr>,
        field: Ident,
        span: Span,
    },
    /// `x.(T)`; `ty` is `None` for the `x.(type)` form in type switches.
    TypeAssert {
        subject: Box<Expr>,
        ty: Option<Box<TypeExpr>>,
        span: Span,
    },
    Paren {
        inner: Box<Expr>,
        span: Span,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompositeElem {
    pub key: Option<Expr>,
    pub value: Expr,
    pub span: Span,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(id) => id.span,
            Expr::IntLit { span, .. }
            | Expr::FloatLit { span, .. }
            | Expr::StrLit { span, .. }
            | Expr::RuneLit { span, .. }
            | Expr::CompositeLit { span, .. }
            | Expr::FuncLit { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::SliceExpr { span, .. }
            | Expr::Selector { span, .. }
            | Expr::TypeAssert { span, .. }
            | Expr::Paren { span, .. } => *span,
            Expr::TypeLit(ty) => ty.span(),
        }
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Decl(decl) => decl.span(),
            Stmt::Expr(e) => e.span(),
            Stmt::Send { span, .. }
            | Stmt::IncDec { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::ForRange { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::TypeSwitch { span, .. }
            | Stmt::Select { span, .. }
            | Stmt::Go { span, .. }
            | Stmt::Defer { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Branch { span, .. }
            | Stmt::Labeled { span, .. } => *span,
            Stmt::Block(b) => b.span,
            Stmt::Empty(span) => *span,
        }
    }
}

impl Decl {
    pub fn span(&self) -> Span {
        match self {
            Decl::Func(f) => f.span,
            Decl::Type(specs) => specs
                .first()
                .map(|s| s.span)
                .unwrap_or_default()
                .merge(specs.last().map(|s| s.span).unwrap_or_default()),
            Decl::Const(specs) | Decl::Var(specs) => specs
                .first()
                .map(|s| s.span)
                .unwrap_or_default()
                .merge(specs.last().map(|s| s.span).unwrap_or_default()),
            Decl::Stmt(stmt) => stmt.span(),
        }
    }
}
