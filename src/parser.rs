use crate::ast::*;
use crate::lexer::{LexError, Lexer, Token, TokenKind};
use crate::source::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    /// True when the error indicates input that stopped mid-construct, so an
    /// interactive reader should collect one more line before retrying.
    /// `line` is the most recent input line.
    pub fn is_incomplete(&self, line: &str) -> bool {
        if self.message.ends_with("found 'EOF'") {
            return true;
        }
        if self.message == "raw string literal not terminated" {
            return true;
        }
        if self.message.starts_with("expected operand, found '}'") && !line.ends_with('}') {
            return true;
        }
        false
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            span: err.span,
        }
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
    /// Suppresses bare composite literals while parsing if/for/switch
    /// headers, where `ident {` opens the statement body instead.
    no_lit: bool,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, base: usize) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src, base);
        let lookahead = lexer.next_token()?;
        Ok(Self {
            lexer,
            lookahead,
            no_lit: false,
        })
    }

    /// Parses a whole file or REPL fragment. The package clause is optional;
    /// bare statements are accepted at top level so incremental input works.
    pub fn parse_file(&mut self) -> Result<FileAst, ParseError> {
        let start = self.lookahead.span;
        let mut package = None;
        if self.at(TokenKind::KwPackage) {
            self.bump()?;
            package = Some(self.expect_ident()?);
            self.skip_semis()?;
        }

        let mut imports = Vec::new();
        while self.at(TokenKind::KwImport) {
            self.parse_import_decl(&mut imports)?;
            self.skip_semis()?;
        }

        let mut decls = Vec::new();
        self.skip_semis()?;
        while !self.at(TokenKind::Eof) {
            decls.push(self.parse_top_decl()?);
            self.skip_semis()?;
        }

        let span = start.merge(self.lookahead.span);
        Ok(FileAst {
            package,
            imports,
            decls,
            span,
        })
    }

    fn parse_import_decl(&mut self, out: &mut Vec<ImportDecl>) -> Result<(), ParseError> {
        let start = self.expect(TokenKind::KwImport)?.span;
        if self.at(TokenKind::LParen) {
            self.bump()?;
            self.skip_semis()?;
            while !self.at(TokenKind::RParen) {
                out.push(self.parse_import_spec(start)?);
                self.skip_semis()?;
            }
            self.bump()?;
            return Ok(());
        }
        out.push(self.parse_import_spec(start)?);
        Ok(())
    }

    fn parse_import_spec(&mut self, start: Span) -> Result<ImportDecl, ParseError> {
        let alias = if let TokenKind::Ident(_) = self.lookahead.kind {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let tok = self.bump()?;
        let TokenKind::Str(path) = tok.kind else {
            return Err(self.error_at(tok.span, "expected import path string"));
        };
        Ok(ImportDecl {
            alias,
            path,
            span: start.merge(tok.span),
        })
    }

    fn parse_top_decl(&mut self) -> Result<Decl, ParseError> {
        match self.lookahead.kind {
            TokenKind::KwFunc => {
                // `func (recv) name(...)` and `func name(...)` are
                // declarations; a bare `func(...) {...}` is a statement
                // carrying a function literal.
                let second = self.peek_second()?;
                let is_decl = matches!(second, TokenKind::Ident(_))
                    || (second == TokenKind::LParen && self.func_head_is_method()?);
                if is_decl {
                    Ok(Decl::Func(self.parse_func_decl()?))
                } else {
                    Ok(Decl::Stmt(self.parse_stmt()?))
                }
            }
            TokenKind::KwType => Ok(Decl::Type(self.parse_type_specs()?)),
            TokenKind::KwConst => Ok(Decl::Const(self.parse_value_specs(TokenKind::KwConst)?)),
            TokenKind::KwVar => Ok(Decl::Var(self.parse_value_specs(TokenKind::KwVar)?)),
            _ => Ok(Decl::Stmt(self.parse_stmt()?)),
        }
    }

    /// Distinguishes `func (r T) name(..)` from `func (params...) {..}`.
    fn func_head_is_method(&self) -> Result<bool, ParseError> {
        let mut lexer = self.lexer.clone();
        // lookahead is `func`, second is `(`: scan past the parenthesized
        // group and check for an identifier (method name) after it.
        let mut tok = lexer.next_token()?; // consumes `(`
        debug_assert_eq!(tok.kind, TokenKind::LParen);
        let mut depth = 1usize;
        while depth > 0 {
            tok = lexer.next_token()?;
            match tok.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                TokenKind::Eof => return Ok(false),
                _ => {}
            }
        }
        Ok(matches!(lexer.next_token()?.kind, TokenKind::Ident(_)))
    }

    fn parse_func_decl(&mut self) -> Result<FuncDecl, ParseError> {
        let start = self.expect(TokenKind::KwFunc)?.span;
        let recv = if self.at(TokenKind::LParen) {
            self.bump()?;
            let name = self.expect_ident()?;
            let ty = self.parse_type()?;
            let span = name.span.merge(ty.span());
            self.expect(TokenKind::RParen)?;
            Some(Param {
                name: Some(name),
                ty,
                span,
            })
        } else {
            None
        };
        let name = self.expect_ident()?;
        let sig = self.parse_func_sig()?;
        let body = if self.at(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };
        let end = body
            .as_ref()
            .map(|b| b.span)
            .unwrap_or(self.lookahead.span);
        Ok(FuncDecl {
            name,
            recv,
            sig,
            body,
            span: start.merge(end),
        })
    }

    fn parse_func_sig(&mut self) -> Result<FuncSig, ParseError> {
        self.expect(TokenKind::LParen)?;
        let (params, variadic) = self.parse_param_list()?;
        self.expect(TokenKind::RParen)?;

        let results = if self.at(TokenKind::LParen) {
            self.bump()?;
            let (results, res_variadic) = self.parse_param_list()?;
            let close = self.expect(TokenKind::RParen)?;
            if res_variadic {
                return Err(self.error_at(close.span, "cannot use ... in results"));
            }
            results
        } else if self.starts_type() {
            let ty = self.parse_type()?;
            let span = ty.span();
            vec![Param {
                name: None,
                ty,
                span,
            }]
        } else {
            Vec::new()
        };

        Ok(FuncSig {
            params,
            results,
            variadic,
        })
    }

    /// Parses a parenthesized parameter or result list body (the caller eats
    /// the parens). Returns the flattened params plus the variadic flag.
    fn parse_param_list(&mut self) -> Result<(Vec<Param>, bool), ParseError> {
        enum Raw {
            // A bare identifier: either an unnamed named-type param or the
            // name part of a `a, b T` group. Resolved after the whole list.
            Name(Ident),
            Typed(Ident, TypeExpr, bool),
            Bare(TypeExpr),
            BareVariadic(TypeExpr, Span),
        }

        let mut raw = Vec::new();
        while !self.at(TokenKind::RParen) {
            if self.at(TokenKind::Ellipsis) {
                let span = self.bump()?.span;
                let ty = self.parse_type()?;
                raw.push(Raw::BareVariadic(ty, span));
            } else if matches!(self.lookahead.kind, TokenKind::Ident(_))
                && matches!(
                    self.peek_second()?,
                    TokenKind::Comma | TokenKind::RParen
                )
            {
                raw.push(Raw::Name(self.expect_ident()?));
            } else if matches!(self.lookahead.kind, TokenKind::Ident(_))
                && self.second_starts_type()?
            {
                let name = self.expect_ident()?;
                let variadic = if self.at(TokenKind::Ellipsis) {
                    self.bump()?;
                    true
                } else {
                    false
                };
                let ty = self.parse_type()?;
                raw.push(Raw::Typed(name, ty, variadic));
            } else {
                raw.push(Raw::Bare(self.parse_type()?));
            }
            if self.at(TokenKind::Comma) {
                self.bump()?;
            } else {
                break;
            }
        }

        let named = raw.iter().any(|r| matches!(r, Raw::Typed(..)));
        let mut params = Vec::new();
        let mut variadic = false;
        let mut pending: Vec<Ident> = Vec::new();
        let last = raw.len().saturating_sub(1);
        for (idx, item) in raw.into_iter().enumerate() {
            match item {
                Raw::Name(id) if named => pending.push(id),
                Raw::Name(id) => {
                    let span = id.span;
                    params.push(Param {
                        name: None,
                        ty: TypeExpr::Name {
                            pkg: None,
                            name: id,
                        },
                        span,
                    });
                }
                Raw::Typed(name, ty, is_var) => {
                    if is_var {
                        if idx != last {
                            return Err(
                                self.error_at(ty.span(), "can only use ... with final parameter")
                            );
                        }
                        variadic = true;
                    }
                    for prev in pending.drain(..) {
                        let span = prev.span.merge(ty.span());
                        params.push(Param {
                            name: Some(prev),
                            ty: ty.clone(),
                            span,
                        });
                    }
                    let span = name.span.merge(ty.span());
                    params.push(Param {
                        name: Some(name),
                        ty,
                        span,
                    });
                }
                Raw::Bare(ty) => {
                    if named {
                        return Err(self.error_at(ty.span(), "mixed named and unnamed parameters"));
                    }
                    let span = ty.span();
                    params.push(Param {
                        name: None,
                        ty,
                        span,
                    });
                }
                Raw::BareVariadic(ty, span) => {
                    if idx != last {
                        return Err(self.error_at(span, "can only use ... with final parameter"));
                    }
                    variadic = true;
                    let span = span.merge(ty.span());
                    params.push(Param {
                        name: None,
                        ty,
                        span,
                    });
                }
            }
        }
        if !pending.is_empty() {
            let span = pending[0].span;
            return Err(self.error_at(span, "missing parameter type"));
        }
        Ok((params, variadic))
    }

    fn parse_type_specs(&mut self) -> Result<Vec<TypeSpec>, ParseError> {
        self.expect(TokenKind::KwType)?;
        let mut specs = Vec::new();
        if self.at(TokenKind::LParen) {
            self.bump()?;
            self.skip_semis()?;
            while !self.at(TokenKind::RParen) {
                specs.push(self.parse_type_spec()?);
                self.skip_semis()?;
            }
            self.bump()?;
        } else {
            specs.push(self.parse_type_spec()?);
        }
        Ok(specs)
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, ParseError> {
        let name = self.expect_ident()?;
        let alias = if self.at(TokenKind::Assign) {
            self.bump()?;
            true
        } else {
            false
        };
        let ty = self.parse_type()?;
        let span = name.span.merge(ty.span());
        Ok(TypeSpec {
            name,
            alias,
            ty,
            span,
        })
    }

    fn parse_value_specs(&mut self, kw: TokenKind) -> Result<Vec<ValueSpec>, ParseError> {
        self.expect(kw)?;
        let mut specs = Vec::new();
        if self.at(TokenKind::LParen) {
            self.bump()?;
            self.skip_semis()?;
            while !self.at(TokenKind::RParen) {
                specs.push(self.parse_value_spec()?);
                self.skip_semis()?;
            }
            self.bump()?;
        } else {
            specs.push(self.parse_value_spec()?);
        }
        Ok(specs)
    }

    fn parse_value_spec(&mut self) -> Result<ValueSpec, ParseError> {
        let mut names = vec![self.expect_ident()?];
        while self.at(TokenKind::Comma) {
            self.bump()?;
            names.push(self.expect_ident()?);
        }
        let ty = if self.starts_type() && !self.at(TokenKind::Assign) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let mut values = Vec::new();
        if self.at(TokenKind::Assign) {
            self.bump()?;
            values.push(self.parse_expr()?);
            while self.at(TokenKind::Comma) {
                self.bump()?;
                values.push(self.parse_expr()?);
            }
        }
        let start = names[0].span;
        let end = values
            .last()
            .map(|v| v.span())
            .or(ty.as_ref().map(|t| t.span()))
            .unwrap_or(names[names.len() - 1].span);
        Ok(ValueSpec {
            names,
            ty,
            values,
            span: start.merge(end),
        })
    }

    // ---- types ----

    fn starts_type(&self) -> bool {
        matches!(
            self.lookahead.kind,
            TokenKind::Ident(_)
                | TokenKind::Star
                | TokenKind::LBracket
                | TokenKind::KwMap
                | TokenKind::KwChan
                | TokenKind::KwStruct
                | TokenKind::KwInterface
                | TokenKind::KwFunc
                | TokenKind::Arrow
                | TokenKind::LParen
        )
    }

    fn second_starts_type(&self) -> Result<bool, ParseError> {
        Ok(matches!(
            self.peek_second()?,
            TokenKind::Ident(_)
                | TokenKind::Star
                | TokenKind::LBracket
                | TokenKind::KwMap
                | TokenKind::KwChan
                | TokenKind::KwStruct
                | TokenKind::KwInterface
                | TokenKind::KwFunc
                | TokenKind::Arrow
                | TokenKind::Ellipsis
                | TokenKind::Dot
        ))
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        match self.lookahead.kind.clone() {
            TokenKind::Ident(_) => {
                let first = self.expect_ident()?;
                if self.at(TokenKind::Dot) {
                    self.bump()?;
                    let name = self.expect_ident()?;
                    Ok(TypeExpr::Name {
                        pkg: Some(first),
                        name,
                    })
                } else {
                    Ok(TypeExpr::Name {
                        pkg: None,
                        name: first,
                    })
                }
            }
            TokenKind::Star => {
                let start = self.bump()?.span;
                let elem = self.parse_type()?;
                let span = start.merge(elem.span());
                Ok(TypeExpr::Ptr {
                    elem: Box::new(elem),
                    span,
                })
            }
            TokenKind::LBracket => {
                let start = self.bump()?.span;
                if self.at(TokenKind::RBracket) {
                    self.bump()?;
                    let elem = self.parse_type()?;
                    let span = start.merge(elem.span());
                    Ok(TypeExpr::Slice {
                        elem: Box::new(elem),
                        span,
                    })
                } else {
                    let len = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let elem = self.parse_type()?;
                    let span = start.merge(elem.span());
                    Ok(TypeExpr::Array {
                        len: Box::new(len),
                        elem: Box::new(elem),
                        span,
                    })
                }
            }
            TokenKind::KwMap => {
                let start = self.bump()?.span;
                self.expect(TokenKind::LBracket)?;
                let key = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                let value = self.parse_type()?;
                let span = start.merge(value.span());
                Ok(TypeExpr::Map {
                    key: Box::new(key),
                    value: Box::new(value),
                    span,
                })
            }
            TokenKind::KwChan => {
                let start = self.bump()?.span;
                let dir = if self.at(TokenKind::Arrow) {
                    self.bump()?;
                    ChanDir::Send
                } else {
                    ChanDir::Both
                };
                let elem = self.parse_type()?;
                let span = start.merge(elem.span());
                Ok(TypeExpr::Chan {
                    dir,
                    elem: Box::new(elem),
                    span,
                })
            }
            TokenKind::Arrow => {
                let start = self.bump()?.span;
                self.expect(TokenKind::KwChan)?;
                let elem = self.parse_type()?;
                let span = start.merge(elem.span());
                Ok(TypeExpr::Chan {
                    dir: ChanDir::Recv,
                    elem: Box::new(elem),
                    span,
                })
            }
            TokenKind::KwStruct => self.parse_struct_type(),
            TokenKind::KwInterface => self.parse_interface_type(),
            TokenKind::KwFunc => {
                let start = self.bump()?.span;
                let sig = self.parse_func_sig()?;
                let span = start.merge(self.lookahead.span);
                Ok(TypeExpr::Func {
                    sig: Box::new(sig),
                    span,
                })
            }
            TokenKind::LParen => {
                self.bump()?;
                let inner = self.parse_type()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error_here("expected type")),
        }
    }

    fn parse_struct_type(&mut self) -> Result<TypeExpr, ParseError> {
        let start = self.expect(TokenKind::KwStruct)?.span;
        self.expect(TokenKind::LBrace)?;
        self.skip_semis()?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            fields.push(self.parse_field_decl()?);
            self.skip_semis()?;
        }
        let end = self.bump()?.span;
        Ok(TypeExpr::Struct {
            fields,
            span: start.merge(end),
        })
    }

    fn parse_field_decl(&mut self) -> Result<FieldDecl, ParseError> {
        // Embedded field: `T`, `*T` or `pkg.T` directly followed by a
        // terminator or tag.
        let embedded = match &self.lookahead.kind {
            TokenKind::Star => true,
            TokenKind::Ident(_) => matches!(
                self.peek_second()?,
                TokenKind::Semi | TokenKind::RBrace | TokenKind::Str(_) | TokenKind::Dot
            ),
            _ => false,
        };

        if embedded {
            let ty = self.parse_type()?;
            let span = ty.span();
            let tag = self.parse_field_tag()?;
            return Ok(FieldDecl {
                names: Vec::new(),
                ty,
                tag,
                embedded: true,
                span,
            });
        }

        let mut names = vec![self.expect_ident()?];
        while self.at(TokenKind::Comma) {
            self.bump()?;
            names.push(self.expect_ident()?);
        }
        let ty = self.parse_type()?;
        let tag = self.parse_field_tag()?;
        let span = names[0].span.merge(ty.span());
        Ok(FieldDecl {
            names,
            ty,
            tag,
            embedded: false,
            span,
        })
    }

    fn parse_field_tag(&mut self) -> Result<Option<String>, ParseError> {
        if let TokenKind::Str(tag) = self.lookahead.kind.clone() {
            self.bump()?;
            Ok(Some(tag))
        } else {
            Ok(None)
        }
    }

    fn parse_interface_type(&mut self) -> Result<TypeExpr, ParseError> {
        let start = self.expect(TokenKind::KwInterface)?.span;
        self.expect(TokenKind::LBrace)?;
        self.skip_semis()?;
        let mut methods = Vec::new();
        let mut embeds = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let name = self.expect_ident()?;
            if self.at(TokenKind::LParen) {
                let sig = self.parse_func_sig()?;
                let span = name.span.merge(self.lookahead.span);
                methods.push(MethodDecl { name, sig, span });
            } else {
                embeds.push(name);
            }
            self.skip_semis()?;
        }
        let end = self.bump()?.span;
        Ok(TypeExpr::Interface {
            methods,
            embeds,
            span: start.merge(end),
        })
    }

    // ---- statements ----

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let stmts = self.parse_stmt_list(&[TokenKind::RBrace])?;
        let end = self.expect(TokenKind::RBrace)?.span;
        Ok(Block {
            stmts,
            span: start.merge(end),
        })
    }

    fn parse_stmt_list(&mut self, stops: &[TokenKind]) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        self.skip_semis()?;
        while !stops.contains(&self.lookahead.kind) && !self.at(TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
            self.skip_semis()?;
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.lookahead.kind.clone() {
            TokenKind::KwVar => Ok(Stmt::Decl(Box::new(Decl::Var(
                self.parse_value_specs(TokenKind::KwVar)?,
            )))),
            TokenKind::KwConst => Ok(Stmt::Decl(Box::new(Decl::Const(
                self.parse_value_specs(TokenKind::KwConst)?,
            )))),
            TokenKind::KwType => Ok(Stmt::Decl(Box::new(Decl::Type(self.parse_type_specs()?)))),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwSwitch => self.parse_switch(),
            TokenKind::KwSelect => self.parse_select(),
            TokenKind::KwGo => {
                let start = self.bump()?.span;
                let call = self.parse_expr()?;
                let span = start.merge(call.span());
                Ok(Stmt::Go { call, span })
            }
            TokenKind::KwDefer => {
                let start = self.bump()?.span;
                let call = self.parse_expr()?;
                let span = start.merge(call.span());
                Ok(Stmt::Defer { call, span })
            }
            TokenKind::KwReturn => {
                let start = self.bump()?.span;
                let mut values = Vec::new();
                if !matches!(
                    self.lookahead.kind,
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
                ) {
                    values.push(self.parse_expr()?);
                    while self.at(TokenKind::Comma) {
                        self.bump()?;
                        values.push(self.parse_expr()?);
                    }
                }
                let span = values
                    .last()
                    .map(|v| start.merge(v.span()))
                    .unwrap_or(start);
                Ok(Stmt::Return { values, span })
            }
            TokenKind::KwBreak | TokenKind::KwContinue | TokenKind::KwGoto => {
                let tok = self.bump()?;
                let kind = match tok.kind {
                    TokenKind::KwBreak => BranchKind::Break,
                    TokenKind::KwContinue => BranchKind::Continue,
                    _ => BranchKind::Goto,
                };
                let label = if matches!(self.lookahead.kind, TokenKind::Ident(_)) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                if kind == BranchKind::Goto && label.is_none() {
                    return Err(self.error_at(tok.span, "goto requires a label"));
                }
                let span = label.as_ref().map(|l| tok.span.merge(l.span)).unwrap_or(tok.span);
                Ok(Stmt::Branch { kind, label, span })
            }
            TokenKind::KwFallthrough => {
                let span = self.bump()?.span;
                Ok(Stmt::Branch {
                    kind: BranchKind::Fallthrough,
                    label: None,
                    span,
                })
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semi => {
                let span = self.bump()?.span;
                Ok(Stmt::Empty(span))
            }
            TokenKind::Ident(_) if self.peek_second()? == TokenKind::Colon => {
                let label = self.expect_ident()?;
                self.bump()?; // colon
                self.skip_semis()?;
                let stmt = self.parse_stmt()?;
                let span = label.span.merge(stmt.span());
                Ok(Stmt::Labeled {
                    label,
                    stmt: Box::new(stmt),
                    span,
                })
            }
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let first = self.parse_expr()?;
        let start = first.span();

        if self.at(TokenKind::Arrow) {
            self.bump()?;
            let value = self.parse_expr()?;
            let span = start.merge(value.span());
            return Ok(Stmt::Send {
                chan: first,
                value,
                span,
            });
        }

        if self.at(TokenKind::Inc) || self.at(TokenKind::Dec) {
            let tok = self.bump()?;
            let span = start.merge(tok.span);
            return Ok(Stmt::IncDec {
                target: first,
                inc: tok.kind == TokenKind::Inc,
                span,
            });
        }

        let mut lhs = vec![first];
        while self.at(TokenKind::Comma) {
            self.bump()?;
            lhs.push(self.parse_expr()?);
        }

        let op = match self.lookahead.kind {
            TokenKind::Define => Some(AssignOp::Define),
            TokenKind::Assign => Some(AssignOp::Plain),
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            TokenKind::PercentAssign => Some(AssignOp::Rem),
            TokenKind::AmpAssign => Some(AssignOp::And),
            TokenKind::PipeAssign => Some(AssignOp::Or),
            TokenKind::CaretAssign => Some(AssignOp::Xor),
            TokenKind::AmpCaretAssign => Some(AssignOp::AndNot),
            TokenKind::ShlAssign => Some(AssignOp::Shl),
            TokenKind::ShrAssign => Some(AssignOp::Shr),
            _ => None,
        };

        if let Some(op) = op {
            self.bump()?;
            let mut rhs = vec![self.parse_expr()?];
            while self.at(TokenKind::Comma) {
                self.bump()?;
                rhs.push(self.parse_expr()?);
            }
            let span = start.merge(rhs[rhs.len() - 1].span());
            return Ok(Stmt::Assign { op, lhs, rhs, span });
        }

        if lhs.len() != 1 {
            return Err(self.error_here("expected assignment after expression list"));
        }
        let expr = lhs.into_iter().next().expect("one element");
        Ok(Stmt::Expr(expr))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwIf)?.span;
        let (init, cond) = self.parse_header_cond()?;
        let Some(cond) = cond else {
            return Err(self.error_here("missing condition in if statement"));
        };
        let then = self.parse_block()?;
        let els = if self.at(TokenKind::KwElse) {
            self.bump()?;
            if self.at(TokenKind::KwIf) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(Stmt::Block(self.parse_block()?)))
            }
        } else {
            None
        };
        let end = els
            .as_ref()
            .map(|e| e.span())
            .unwrap_or(then.span);
        Ok(Stmt::If {
            init,
            cond,
            then,
            els,
            span: start.merge(end),
        })
    }

    /// Parses `[init;] [expr]` up to an opening brace, with composite
    /// literals suppressed.
    fn parse_header_cond(&mut self) -> Result<(Option<Box<Stmt>>, Option<Expr>), ParseError> {
        let saved = self.no_lit;
        self.no_lit = true;
        let result = (|| {
            if self.at(TokenKind::LBrace) {
                return Ok((None, None));
            }
            let first = self.parse_simple_stmt()?;
            if self.at(TokenKind::Semi) {
                self.bump()?;
                if self.at(TokenKind::LBrace) {
                    return Ok((Some(Box::new(first)), None));
                }
                let second = self.parse_simple_stmt()?;
                match second {
                    Stmt::Expr(cond) => Ok((Some(Box::new(first)), Some(cond))),
                    other => Err(self.error_at(other.span(), "expected condition expression")),
                }
            } else {
                match first {
                    Stmt::Expr(cond) => Ok((None, Some(cond))),
                    other => Ok((Some(Box::new(other)), None)),
                }
            }
        })();
        self.no_lit = saved;
        result
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwFor)?.span;

        if self.at(TokenKind::LBrace) {
            let body = self.parse_block()?;
            let span = start.merge(body.span);
            return Ok(Stmt::For {
                init: None,
                cond: None,
                post: None,
                body,
                span,
            });
        }

        if self.at(TokenKind::KwRange) {
            self.bump()?;
            let subject = self.parse_header_expr()?;
            let body = self.parse_block()?;
            let span = start.merge(body.span);
            return Ok(Stmt::ForRange {
                key: None,
                value: None,
                define: false,
                subject,
                body,
                span,
            });
        }

        let saved = self.no_lit;
        self.no_lit = true;
        let head = self.parse_for_header(start);
        self.no_lit = saved;
        let (init, cond, post, range) = head?;

        if let Some((key, value, define, subject)) = range {
            let body = self.parse_block()?;
            let span = start.merge(body.span);
            return Ok(Stmt::ForRange {
                key,
                value,
                define,
                subject,
                body,
                span,
            });
        }

        let body = self.parse_block()?;
        let span = start.merge(body.span);
        Ok(Stmt::For {
            init,
            cond,
            post,
            body,
            span,
        })
    }

    #[allow(clippy::type_complexity)]
    fn parse_for_header(
        &mut self,
        start: Span,
    ) -> Result<
        (
            Option<Box<Stmt>>,
            Option<Expr>,
            Option<Box<Stmt>>,
            Option<(Option<Ident>, Option<Ident>, bool, Expr)>,
        ),
        ParseError,
    > {
        // Range with bindings: `k[, v] :=|= range subject`.
        let first = self.parse_expr()?;
        let mut lhs = vec![first];
        while self.at(TokenKind::Comma) {
            self.bump()?;
            lhs.push(self.parse_expr()?);
        }

        if self.at(TokenKind::Define) || self.at(TokenKind::Assign) {
            let define = self.at(TokenKind::Define);
            if self.peek_second()? == TokenKind::KwRange {
                self.bump()?; // := or =
                self.bump()?; // range
                let subject = self.parse_expr()?;
                let mut idents = Vec::new();
                for e in &lhs {
                    match e {
                        Expr::Ident(id) => idents.push(id.clone()),
                        other => {
                            return Err(
                                self.error_at(other.span(), "range bindings must be identifiers")
                            )
                        }
                    }
                }
                let (key, value) = match idents.len() {
                    1 => (Some(idents.remove(0)), None),
                    2 => {
                        let v = idents.pop();
                        (Some(idents.remove(0)), v)
                    }
                    n => {
                        return Err(self.error_at(
                            start,
                            &format!("expected at most 2 range bindings, got {n}"),
                        ))
                    }
                };
                return Ok((None, None, None, Some((key, value, define, subject))));
            }
        }

        // Ordinary three-clause or condition-only form. Re-assemble the
        // statement we already started parsing.
        let first_stmt = self.finish_simple_stmt(lhs)?;
        if self.at(TokenKind::LBrace) {
            let Stmt::Expr(cond) = first_stmt else {
                return Err(self.error_at(first_stmt.span(), "expected loop condition"));
            };
            return Ok((None, Some(cond), None, None));
        }

        self.expect(TokenKind::Semi)?;
        let cond = if self.at(TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semi)?;
        let post = if self.at(TokenKind::LBrace) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        Ok((Some(Box::new(first_stmt)), cond, post, None))
    }

    /// Completes a simple statement whose expression list is already parsed.
    fn finish_simple_stmt(&mut self, mut lhs: Vec<Expr>) -> Result<Stmt, ParseError> {
        let start = lhs[0].span();

        if lhs.len() == 1 && self.at(TokenKind::Arrow) {
            self.bump()?;
            let value = self.parse_expr()?;
            let span = start.merge(value.span());
            let chan = lhs.remove(0);
            return Ok(Stmt::Send { chan, value, span });
        }

        if lhs.len() == 1 && (self.at(TokenKind::Inc) || self.at(TokenKind::Dec)) {
            let tok = self.bump()?;
            let span = start.merge(tok.span);
            return Ok(Stmt::IncDec {
                target: lhs.remove(0),
                inc: tok.kind == TokenKind::Inc,
                span,
            });
        }

        let op = match self.lookahead.kind {
            TokenKind::Define => Some(AssignOp::Define),
            TokenKind::Assign => Some(AssignOp::Plain),
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            TokenKind::PercentAssign => Some(AssignOp::Rem),
            TokenKind::AmpAssign => Some(AssignOp::And),
            TokenKind::PipeAssign => Some(AssignOp::Or),
            TokenKind::CaretAssign => Some(AssignOp::Xor),
            TokenKind::AmpCaretAssign => Some(AssignOp::AndNot),
            TokenKind::ShlAssign => Some(AssignOp::Shl),
            TokenKind::ShrAssign => Some(AssignOp::Shr),
            _ => None,
        };
        if let Some(op) = op {
            self.bump()?;
            let mut rhs = vec![self.parse_expr()?];
            while self.at(TokenKind::Comma) {
                self.bump()?;
                rhs.push(self.parse_expr()?);
            }
            let span = start.merge(rhs[rhs.len() - 1].span());
            return Ok(Stmt::Assign { op, lhs, rhs, span });
        }

        if lhs.len() != 1 {
            return Err(self.error_here("expected assignment after expression list"));
        }
        Ok(Stmt::Expr(lhs.remove(0)))
    }

    fn parse_header_expr(&mut self) -> Result<Expr, ParseError> {
        let saved = self.no_lit;
        self.no_lit = true;
        let result = self.parse_expr();
        self.no_lit = saved;
        result
    }

    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwSwitch)?.span;

        let saved = self.no_lit;
        self.no_lit = true;
        let header = (|| -> Result<(Option<Box<Stmt>>, Option<Stmt>), ParseError> {
            if self.at(TokenKind::LBrace) {
                return Ok((None, None));
            }
            let first = self.parse_simple_stmt()?;
            if self.at(TokenKind::Semi) {
                self.bump()?;
                if self.at(TokenKind::LBrace) {
                    return Ok((Some(Box::new(first)), None));
                }
                let second = self.parse_simple_stmt()?;
                Ok((Some(Box::new(first)), Some(second)))
            } else {
                Ok((None, Some(first)))
            }
        })();
        self.no_lit = saved;
        let (init, tag_stmt) = header?;

        // A tag of form `x.(type)` (or `v := x.(type)`) selects the type
        // switch form.
        let type_switch = match &tag_stmt {
            Some(Stmt::Expr(Expr::TypeAssert { ty: None, .. })) => true,
            Some(Stmt::Assign { op: AssignOp::Define, rhs, .. }) => {
                matches!(rhs.as_slice(), [Expr::TypeAssert { ty: None, .. }])
            }
            _ => false,
        };

        if type_switch {
            let (binding, subject) = match tag_stmt.expect("checked above") {
                Stmt::Expr(Expr::TypeAssert { subject, .. }) => (None, *subject),
                Stmt::Assign { mut lhs, mut rhs, .. } => {
                    let binding = match lhs.remove(0) {
                        Expr::Ident(id) => id,
                        other => {
                            return Err(self
                                .error_at(other.span(), "type switch binding must be an identifier"))
                        }
                    };
                    match rhs.remove(0) {
                        Expr::TypeAssert { subject, .. } => (Some(binding), *subject),
                        _ => unreachable!("checked above"),
                    }
                }
                _ => unreachable!("checked above"),
            };

            self.expect(TokenKind::LBrace)?;
            let mut cases = Vec::new();
            self.skip_semis()?;
            while !self.at(TokenKind::RBrace) {
                cases.push(self.parse_type_switch_case()?);
            }
            let end = self.bump()?.span;
            return Ok(Stmt::TypeSwitch {
                init,
                binding,
                subject,
                cases,
                span: start.merge(end),
            });
        }

        let tag = match tag_stmt {
            None => None,
            Some(Stmt::Expr(e)) => Some(e),
            Some(other) => {
                return Err(self.error_at(other.span(), "expected switch tag expression"))
            }
        };

        self.expect(TokenKind::LBrace)?;
        let mut cases = Vec::new();
        self.skip_semis()?;
        while !self.at(TokenKind::RBrace) {
            cases.push(self.parse_switch_case()?);
        }
        let end = self.bump()?.span;
        Ok(Stmt::Switch {
            init,
            tag,
            cases,
            span: start.merge(end),
        })
    }

    fn parse_switch_case(&mut self) -> Result<SwitchCase, ParseError> {
        let start = self.lookahead.span;
        let mut exprs = Vec::new();
        if self.at(TokenKind::KwCase) {
            self.bump()?;
            exprs.push(self.parse_expr()?);
            while self.at(TokenKind::Comma) {
                self.bump()?;
                exprs.push(self.parse_expr()?);
            }
        } else {
            self.expect(TokenKind::KwDefault)?;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_stmt_list(&[TokenKind::KwCase, TokenKind::KwDefault, TokenKind::RBrace])?;
        let end = body.last().map(|s| s.span()).unwrap_or(start);
        Ok(SwitchCase {
            exprs,
            body,
            span: start.merge(end),
        })
    }

    fn parse_type_switch_case(&mut self) -> Result<TypeSwitchCase, ParseError> {
        let start = self.lookahead.span;
        let mut types = Vec::new();
        let mut is_default = false;
        if self.at(TokenKind::KwCase) {
            self.bump()?;
            types.push(self.parse_type_or_nil()?);
            while self.at(TokenKind::Comma) {
                self.bump()?;
                types.push(self.parse_type_or_nil()?);
            }
        } else {
            self.expect(TokenKind::KwDefault)?;
            is_default = true;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_stmt_list(&[TokenKind::KwCase, TokenKind::KwDefault, TokenKind::RBrace])?;
        let end = body.last().map(|s| s.span()).unwrap_or(start);
        Ok(TypeSwitchCase {
            types,
            is_default,
            body,
            span: start.merge(end),
        })
    }

    fn parse_type_or_nil(&mut self) -> Result<Option<TypeExpr>, ParseError> {
        if let TokenKind::Ident(name) = &self.lookahead.kind {
            if name == "nil" {
                self.bump()?;
                return Ok(None);
            }
        }
        Ok(Some(self.parse_type()?))
    }

    fn parse_select(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwSelect)?.span;
        self.expect(TokenKind::LBrace)?;
        let mut cases = Vec::new();
        self.skip_semis()?;
        while !self.at(TokenKind::RBrace) {
            cases.push(self.parse_select_case()?);
        }
        let end = self.bump()?.span;
        Ok(Stmt::Select {
            cases,
            span: start.merge(end),
        })
    }

    fn parse_select_case(&mut self) -> Result<SelectCase, ParseError> {
        let start = self.lookahead.span;
        let comm = if self.at(TokenKind::KwDefault) {
            self.bump()?;
            CommClause::Default
        } else {
            self.expect(TokenKind::KwCase)?;
            self.parse_comm_clause()?
        };
        self.expect(TokenKind::Colon)?;
        let body = self.parse_stmt_list(&[TokenKind::KwCase, TokenKind::KwDefault, TokenKind::RBrace])?;
        let end = body.last().map(|s| s.span()).unwrap_or(start);
        Ok(SelectCase {
            comm,
            body,
            span: start.merge(end),
        })
    }

    fn parse_comm_clause(&mut self) -> Result<CommClause, ParseError> {
        // `case <-ch:` — receive with no binding.
        if self.at(TokenKind::Arrow) {
            self.bump()?;
            let chan = self.parse_expr()?;
            return Ok(CommClause::Recv {
                value: None,
                ok: None,
                define: false,
                chan,
            });
        }

        let first = self.parse_expr()?;

        if self.at(TokenKind::Arrow) {
            self.bump()?;
            let value = self.parse_expr()?;
            return Ok(CommClause::Send { chan: first, value });
        }

        // Receive with bindings: `v := <-ch`, `v, ok := <-ch`, `v = <-ch`.
        let mut idents = vec![match first {
            Expr::Ident(id) => id,
            other => {
                return Err(self.error_at(other.span(), "receive bindings must be identifiers"))
            }
        }];
        if self.at(TokenKind::Comma) {
            self.bump()?;
            idents.push(self.expect_ident()?);
        }
        let define = match self.lookahead.kind {
            TokenKind::Define => true,
            TokenKind::Assign => false,
            _ => return Err(self.error_here("expected := or = in receive case")),
        };
        self.bump()?;
        self.expect(TokenKind::Arrow)?;
        let chan = self.parse_expr()?;
        let ok = if idents.len() == 2 { idents.pop() } else { None };
        Ok(CommClause::Recv {
            value: Some(idents.remove(0)),
            ok,
            define,
            chan,
        })
    }

    // ---- expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, prec) = match self.lookahead.kind {
                TokenKind::OrOr => (BinaryOp::LOr, 1),
                TokenKind::AndAnd => (BinaryOp::LAnd, 2),
                TokenKind::EqEq => (BinaryOp::Eq, 3),
                TokenKind::NotEq => (BinaryOp::Ne, 3),
                TokenKind::Lt => (BinaryOp::Lt, 3),
                TokenKind::LtEq => (BinaryOp::Le, 3),
                TokenKind::Gt => (BinaryOp::Gt, 3),
                TokenKind::GtEq => (BinaryOp::Ge, 3),
                TokenKind::Plus => (BinaryOp::Add, 4),
                TokenKind::Minus => (BinaryOp::Sub, 4),
                TokenKind::Pipe => (BinaryOp::Or, 4),
                TokenKind::Caret => (BinaryOp::Xor, 4),
                TokenKind::Star => (BinaryOp::Mul, 5),
                TokenKind::Slash => (BinaryOp::Div, 5),
                TokenKind::Percent => (BinaryOp::Rem, 5),
                TokenKind::Shl => (BinaryOp::Shl, 5),
                TokenKind::Shr => (BinaryOp::Shr, 5),
                TokenKind::Amp => (BinaryOp::And, 5),
                TokenKind::AmpCaret => (BinaryOp::AndNot, 5),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.lookahead.kind {
            TokenKind::Plus => Some(UnaryOp::Pos),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Caret => Some(UnaryOp::BitNot),
            TokenKind::Amp => Some(UnaryOp::Addr),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::Arrow => Some(UnaryOp::Recv),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.bump()?.span;
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span());
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.lookahead.kind {
                TokenKind::LParen => {
                    let mut args = Vec::new();
                    let mut spread = false;
                    self.bump()?;
                    let saved = self.no_lit;
                    self.no_lit = false;
                    while !self.at(TokenKind::RParen) {
                        args.push(self.parse_expr_or_type()?);
                        if self.at(TokenKind::Ellipsis) {
                            self.bump()?;
                            spread = true;
                            break;
                        }
                        if self.at(TokenKind::Comma) {
                            self.bump()?;
                        } else {
                            break;
                        }
                    }
                    self.no_lit = saved;
                    let end = self.expect(TokenKind::RParen)?.span;
                    let span = expr.span().merge(end);
                    expr = Expr::Call {
                        fun: Box::new(expr),
                        args,
                        spread,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let saved = self.no_lit;
                    self.no_lit = false;
                    let result = (|this: &mut Self| -> Result<Expr, ParseError> {
                        if this.at(TokenKind::Colon) {
                            this.bump()?;
                            let high = if this.at(TokenKind::RBracket) {
                                None
                            } else {
                                Some(Box::new(this.parse_expr()?))
                            };
                            let end = this.expect(TokenKind::RBracket)?.span;
                            let span = expr.span().merge(end);
                            return Ok(Expr::SliceExpr {
                                subject: Box::new(expr.clone()),
                                low: None,
                                high,
                                span,
                            });
                        }
                        let index = this.parse_expr()?;
                        if this.at(TokenKind::Colon) {
                            this.bump()?;
                            let high = if this.at(TokenKind::RBracket) {
                                None
                            } else {
                                Some(Box::new(this.parse_expr()?))
                            };
                            let end = this.expect(TokenKind::RBracket)?.span;
                            let span = expr.span().merge(end);
                            Ok(Expr::SliceExpr {
                                subject: Box::new(expr.clone()),
                                low: Some(Box::new(index)),
                                high,
                                span,
                            })
                        } else {
                            let end = this.expect(TokenKind::RBracket)?.span;
                            let span = expr.span().merge(end);
                            Ok(Expr::Index {
                                subject: Box::new(expr.clone()),
                                index: Box::new(index),
                                span,
                            })
                        }
                    })(self);
                    self.no_lit = saved;
                    expr = result?;
                }
                TokenKind::Dot => {
                    self.bump()?;
                    if self.at(TokenKind::LParen) {
                        self.bump()?;
                        let ty = if matches!(self.lookahead.kind, TokenKind::KwType) {
                            self.bump()?;
                            None
                        } else {
                            Some(Box::new(self.parse_type()?))
                        };
                        let end = self.expect(TokenKind::RParen)?.span;
                        let span = expr.span().merge(end);
                        expr = Expr::TypeAssert {
                            subject: Box::new(expr),
                            ty,
                            span,
                        };
                    } else {
                        let field = self.expect_ident()?;
                        let span = expr.span().merge(field.span);
                        expr = Expr::Selector {
                            subject: Box::new(expr),
                            field,
                            span,
                        };
                    }
                }
                TokenKind::LBrace => {
                    let allowed = match &expr {
                        Expr::TypeLit(_) => true,
                        Expr::Ident(_) | Expr::Selector { .. } => !self.no_lit,
                        _ => false,
                    };
                    if !allowed {
                        break;
                    }
                    expr = self.parse_composite_body(Some(Box::new(expr)))?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Parses a call argument, accepting type literals (`make([]int, 3)`,
    /// `[]byte(s)`) in addition to expressions.
    fn parse_expr_or_type(&mut self) -> Result<Expr, ParseError> {
        match self.lookahead.kind {
            TokenKind::LBracket
            | TokenKind::KwMap
            | TokenKind::KwChan
            | TokenKind::KwStruct
            | TokenKind::KwInterface => {
                let ty = self.parse_type()?;
                let lit = Expr::TypeLit(Box::new(ty));
                // A type literal argument may itself open a composite
                // literal or conversion.
                self.continue_postfix(lit)
            }
            _ => self.parse_expr(),
        }
    }

    fn continue_postfix(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        match self.lookahead.kind {
            TokenKind::LBrace => {
                let lit = self.parse_composite_body(Some(Box::new(expr)))?;
                self.continue_postfix_tail(lit)
            }
            TokenKind::LParen => {
                self.bump()?;
                let arg = self.parse_expr()?;
                let end = self.expect(TokenKind::RParen)?.span;
                let span = expr.span().merge(end);
                let call = Expr::Call {
                    fun: Box::new(expr),
                    args: vec![arg],
                    spread: false,
                    span,
                };
                self.continue_postfix_tail(call)
            }
            _ => Ok(expr),
        }
    }

    fn continue_postfix_tail(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        // After a composite literal or conversion, ordinary postfix
        // operators may continue: `[]int{1,2}[0]`.
        let mut out = expr;
        loop {
            match self.lookahead.kind {
                TokenKind::LBracket | TokenKind::Dot | TokenKind::LParen => {
                    // Re-enter the main postfix loop by faking a primary.
                    out = self.postfix_step(out)?;
                }
                _ => return Ok(out),
            }
        }
    }

    fn postfix_step(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        match self.lookahead.kind {
            TokenKind::LParen => {
                self.bump()?;
                let mut args = Vec::new();
                let mut spread = false;
                while !self.at(TokenKind::RParen) {
                    args.push(self.parse_expr_or_type()?);
                    if self.at(TokenKind::Ellipsis) {
                        self.bump()?;
                        spread = true;
                        break;
                    }
                    if self.at(TokenKind::Comma) {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RParen)?.span;
                let span = expr.span().merge(end);
                Ok(Expr::Call {
                    fun: Box::new(expr),
                    args,
                    spread,
                    span,
                })
            }
            TokenKind::LBracket => {
                self.bump()?;
                let index = self.parse_expr()?;
                let end = self.expect(TokenKind::RBracket)?.span;
                let span = expr.span().merge(end);
                Ok(Expr::Index {
                    subject: Box::new(expr),
                    index: Box::new(index),
                    span,
                })
            }
            TokenKind::Dot => {
                self.bump()?;
                let field = self.expect_ident()?;
                let span = expr.span().merge(field.span);
                Ok(Expr::Selector {
                    subject: Box::new(expr),
                    field,
                    span,
                })
            }
            _ => Ok(expr),
        }
    }

    fn parse_composite_body(&mut self, ty: Option<Box<Expr>>) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let saved = self.no_lit;
        self.no_lit = false;
        let mut elems = Vec::new();
        let result = (|this: &mut Self| -> Result<(), ParseError> {
            this.skip_semis()?;
            while !this.at(TokenKind::RBrace) {
                let first = if this.at(TokenKind::LBrace) {
                    // Nested untyped composite literal.
                    this.parse_composite_body(None)?
                } else {
                    this.parse_expr()?
                };
                let elem = if this.at(TokenKind::Colon) {
                    this.bump()?;
                    let value = if this.at(TokenKind::LBrace) {
                        this.parse_composite_body(None)?
                    } else {
                        this.parse_expr()?
                    };
                    let span = first.span().merge(value.span());
                    CompositeElem {
                        key: Some(first),
                        value,
                        span,
                    }
                } else {
                    let span = first.span();
                    CompositeElem {
                        key: None,
                        value: first,
                        span,
                    }
                };
                elems.push(elem);
                if this.at(TokenKind::Comma) {
                    this.bump()?;
                    this.skip_semis()?;
                } else {
                    this.skip_semis()?;
                    break;
                }
            }
            Ok(())
        })(self);
        self.no_lit = saved;
        result?;
        let end = self.expect(TokenKind::RBrace)?.span;
        let span = ty.as_ref().map(|t| t.span()).unwrap_or(start).merge(end);
        Ok(Expr::CompositeLit { ty, elems, span })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.lookahead.kind.clone() {
            TokenKind::Int(value) => {
                let span = self.bump()?.span;
                Ok(Expr::IntLit { value, span })
            }
            TokenKind::Float(value) => {
                let span = self.bump()?.span;
                Ok(Expr::FloatLit { value, span })
            }
            TokenKind::Str(value) => {
                let span = self.bump()?.span;
                Ok(Expr::StrLit { value, span })
            }
            TokenKind::Rune(value) => {
                let span = self.bump()?.span;
                Ok(Expr::RuneLit { value, span })
            }
            TokenKind::Ident(_) => Ok(Expr::Ident(self.expect_ident()?)),
            TokenKind::LParen => {
                let start = self.bump()?.span;
                let saved = self.no_lit;
                self.no_lit = false;
                let inner = self.parse_expr();
                self.no_lit = saved;
                let inner = inner?;
                let end = self.expect(TokenKind::RParen)?.span;
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    span: start.merge(end),
                })
            }
            TokenKind::KwFunc => {
                let start = self.bump()?.span;
                let sig = self.parse_func_sig()?;
                if self.at(TokenKind::LBrace) {
                    let saved = self.no_lit;
                    self.no_lit = false;
                    let body = self.parse_block();
                    self.no_lit = saved;
                    let body = body?;
                    let span = start.merge(body.span);
                    Ok(Expr::FuncLit {
                        sig: Box::new(sig),
                        body: Box::new(body),
                        span,
                    })
                } else {
                    let span = start.merge(self.lookahead.span);
                    Ok(Expr::TypeLit(Box::new(TypeExpr::Func {
                        sig: Box::new(sig),
                        span,
                    })))
                }
            }
            TokenKind::LBracket
            | TokenKind::KwMap
            | TokenKind::KwChan
            | TokenKind::KwStruct
            | TokenKind::KwInterface => {
                let ty = self.parse_type()?;
                Ok(Expr::TypeLit(Box::new(ty)))
            }
            _ => Err(self.error_here(&format!(
                "expected operand, found {}",
                self.lookahead.kind.describe()
            ))),
        }
    }

    // ---- plumbing ----

    fn at(&self, kind: TokenKind) -> bool {
        self.lookahead.kind == kind
    }

    fn bump(&mut self) -> Result<Token, ParseError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn peek_second(&self) -> Result<TokenKind, ParseError> {
        let mut lexer = self.lexer.clone();
        Ok(lexer.next_token()?.kind)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.lookahead.kind == kind {
            self.bump()
        } else {
            Err(self.error_here(&format!(
                "expected {}, found {}",
                kind.describe(),
                self.lookahead.kind.describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        match self.lookahead.kind.clone() {
            TokenKind::Ident(name) => {
                let span = self.bump()?.span;
                Ok(Ident { name, span })
            }
            other => Err(self.error_here(&format!(
                "expected identifier, found {}",
                other.describe()
            ))),
        }
    }

    fn skip_semis(&mut self) -> Result<(), ParseError> {
        while self.at(TokenKind::Semi) {
            self.bump()?;
        }
        Ok(())
    }

    fn error_here(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.lookahead.span,
        }
    }

    fn error_at(&self, span: Span, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            span,
        }
    }
}

/// Parses one source file. `base` is the file's offset in the interpreter's
/// file set.
pub fn parse(src: &str, base: usize) -> Result<FileAst, ParseError> {
    let mut parser = Parser::new(src, base)?;
    parser.parse_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(src: &str) -> FileAst {
        parse(src, 0).expect("parse")
    }

    #[test]
    fn parses_package_and_func() {
        let f = file("package main\n\nfunc main() {\n\tx := 1\n\t_ = x\n}\n");
        assert_eq!(f.package.as_ref().map(|p| p.name.as_str()), Some("main"));
        assert_eq!(f.decls.len(), 1);
        assert!(matches!(f.decls[0], Decl::Func(_)));
    }

    #[test]
    fn parses_top_level_statements() {
        let f = file("x := 2\nx * x\n");
        assert_eq!(f.decls.len(), 2);
        assert!(matches!(f.decls[1], Decl::Stmt(Stmt::Expr(_))));
    }

    #[test]
    fn parses_method_declaration() {
        let f = file("func (p *Point) Norm() float64 { return 0 }\n");
        let Decl::Func(decl) = &f.decls[0] else {
            panic!("expected func decl");
        };
        assert!(decl.recv.is_some());
        assert_eq!(decl.name.name, "Norm");
    }

    #[test]
    fn composite_literals_are_suppressed_in_headers() {
        let f = file("if x { y() }\n");
        let Decl::Stmt(Stmt::If { cond, .. }) = &f.decls[0] else {
            panic!("expected if");
        };
        assert!(matches!(cond, Expr::Ident(_)));
    }

    #[test]
    fn parses_for_range_with_bindings() {
        let f = file("for i, v := range xs { _ = i; _ = v }\n");
        assert!(matches!(f.decls[0], Decl::Stmt(Stmt::ForRange { .. })));
    }

    #[test]
    fn parses_select_cases() {
        let f = file("select {\ncase v := <-ch:\n\t_ = v\ncase out <- 1:\ndefault:\n}\n");
        let Decl::Stmt(Stmt::Select { cases, .. }) = &f.decls[0] else {
            panic!("expected select");
        };
        assert_eq!(cases.len(), 3);
        assert!(matches!(cases[0].comm, CommClause::Recv { .. }));
        assert!(matches!(cases[1].comm, CommClause::Send { .. }));
        assert!(matches!(cases[2].comm, CommClause::Default));
    }

    #[test]
    fn parses_type_switch() {
        let f = file("switch v := x.(type) {\ncase int:\n\t_ = v\ndefault:\n}\n");
        assert!(matches!(f.decls[0], Decl::Stmt(Stmt::TypeSwitch { .. })));
    }

    #[test]
    fn unfinished_block_reports_eof_signature() {
        let err = parse("func f() {\n", 0).expect_err("error");
        assert!(err.message.ends_with("found 'EOF'"), "{}", err.message);
        assert!(err.is_incomplete("func f() {"));
    }

    #[test]
    fn variadic_parameters_parse() {
        let f = file("func f(xs ...int) int { return len(xs) }\n");
        let Decl::Func(decl) = &f.decls[0] else {
            panic!("expected func");
        };
        assert!(decl.sig.variadic);
    }

    #[test]
    fn grouped_parameters_share_their_type() {
        let f = file("func add(a, b int) int { return a + b }\n");
        let Decl::Func(decl) = &f.decls[0] else {
            panic!("expected func");
        };
        assert_eq!(decl.sig.params.len(), 2);
        assert_eq!(decl.sig.params[0].name.as_ref().map(|n| n.name.as_str()), Some("a"));
        assert_eq!(decl.sig.params[0].ty, decl.sig.params[1].ty);
    }
}
