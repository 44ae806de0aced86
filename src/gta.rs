use crate::ast::{BinaryOp, Expr, TypeExpr, UnaryOp};
use crate::cfg::CompileError;
use crate::interp::Globals;
use crate::node::{NodeId, NodeKind, Unit};
use crate::ops;
use crate::scope::{ScopeId, SymKind, Symbol};
use crate::source::Span;
use crate::types::{self, Cat, Field, IMethod, TypeId};
use crate::value::Value;
use std::collections::HashSet;

/// Number of consecutive iterations without progress before the pass
/// gives up and reports the first blocked declaration.
const MAX_STAGNANT: usize = 2;

/// Global type analysis: a bounded fixed-point pass over the package-level
/// declarations of one evaluation unit. Declarations blocked on forward or
/// cyclic references are retried until no iteration makes progress.
pub fn run(
    globals: &mut Globals,
    unit: &mut Unit,
    root: NodeId,
    pkg_scope: ScopeId,
    unit_idx: usize,
) -> Result<(), CompileError> {
    let pkg_path = globals
        .pkg_scopes
        .iter()
        .find(|(_, scope)| **scope == pkg_scope)
        .map(|(path, _)| path.clone())
        .unwrap_or_default();

    let decls: Vec<NodeId> = unit
        .node(root)
        .children
        .iter()
        .copied()
        .filter(|id| {
            matches!(
                unit.node(*id).kind,
                NodeKind::TypeDecl { .. }
                    | NodeKind::ConstDecl { .. }
                    | NodeKind::VarDecl { .. }
                    | NodeKind::FuncDecl { .. }
                    | NodeKind::Import { .. }
            )
        })
        .collect();

    // Names declared by this unit, to catch duplicates inside one source
    // while still allowing interactive redefinition across evals.
    let mut declared_here: HashSet<String> = HashSet::new();

    // Imports and named-type shells land first so later declarations can
    // refer to them.
    for id in &decls {
        match unit.node(*id).kind.clone() {
            NodeKind::Import { alias, path } => {
                declare_import(globals, pkg_scope, &alias, &path, unit.node(*id).span)?;
            }
            NodeKind::TypeDecl { name, alias, .. } if !alias => {
                let span = unit.node(*id).span;
                let shell = {
                    let mut t = crate::types::Type::shell();
                    t.name = name.clone();
                    t.path = pkg_path.clone();
                    t.span = span;
                    globals.types.add(t)
                };
                let mut sym = Symbol::new(SymKind::Type, &name, pkg_scope);
                sym.typ = Some(shell);
                sym.global = true;
                sym.span = span;
                redeclare_checked(globals, &mut declared_here, sym, span)?;
            }
            _ => {}
        }
    }

    // Constant groups: specs without values repeat the previous spec's
    // expressions with their own iota.
    let mut inherited: Vec<Expr> = Vec::new();
    for id in &decls {
        let spec = match &unit.node(*id).kind {
            NodeKind::ConstDecl { iota, values, .. } => Some((*iota, values.clone())),
            _ => None,
        };
        let Some((iota, values)) = spec else {
            continue;
        };
        if iota == 0 || !values.is_empty() {
            inherited = values;
        } else if let NodeKind::ConstDecl { values, .. } = &mut unit.node_mut(*id).kind {
            *values = inherited.clone();
        }
    }

    let mut pending: Vec<NodeId> = decls
        .iter()
        .copied()
        .filter(|id| !matches!(unit.node(*id).kind, NodeKind::Import { .. }))
        .collect();
    let mut stagnant = 0usize;

    while !pending.is_empty() {
        let mut next = Vec::new();
        let mut first_err: Option<CompileError> = None;
        let mut progress = false;

        for id in pending {
            let result = resolve_decl(
                globals,
                unit,
                id,
                pkg_scope,
                &pkg_path,
                unit_idx,
                &mut declared_here,
            );
            match result {
                Ok(()) => progress = true,
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                    next.push(id);
                }
            }
        }

        if next.is_empty() {
            break;
        }
        if progress {
            stagnant = 0;
        } else {
            stagnant += 1;
            if stagnant >= MAX_STAGNANT {
                return Err(first_err.unwrap_or(CompileError {
                    message: "unresolved package declarations".to_string(),
                    span: unit.node(root).span,
                }));
            }
        }
        pending = next;
    }

    Ok(())
}

fn redeclare_checked(
    globals: &mut Globals,
    declared_here: &mut HashSet<String>,
    sym: Symbol,
    span: Span,
) -> Result<crate::scope::SymId, CompileError> {
    if sym.name != "_" && declared_here.contains(&sym.name) {
        return Err(CompileError {
            message: format!("{} redeclared in this block", sym.name),
            span,
        });
    }
    declared_here.insert(sym.name.clone());
    Ok(globals.scopes.redeclare(sym))
}

fn declare_import(
    globals: &mut Globals,
    pkg_scope: ScopeId,
    alias: &Option<String>,
    path: &str,
    span: Span,
) -> Result<(), CompileError> {
    let base = path.rsplit('/').next().unwrap_or(path).to_string();
    let name = alias.clone().unwrap_or(base);

    let typ = if globals.bin_pkgs.contains_key(path) {
        globals.types.bin_pkg(path)
    } else if globals.pkg_scopes.contains_key(path)
        || globals.pkg_scopes.contains_key(&name)
    {
        globals.types.src_pkg(path)
    } else {
        return Err(CompileError {
            message: format!("package not found: {path}"),
            span,
        });
    };

    let mut sym = Symbol::new(SymKind::Package, &name, pkg_scope);
    sym.typ = Some(typ);
    sym.span = span;
    globals.scopes.redeclare(sym);
    Ok(())
}

fn resolve_decl(
    globals: &mut Globals,
    unit: &mut Unit,
    id: NodeId,
    pkg_scope: ScopeId,
    _pkg_path: &str,
    unit_idx: usize,
    declared_here: &mut HashSet<String>,
) -> Result<(), CompileError> {
    let span = unit.node(id).span;
    match unit.node(id).kind.clone() {
        NodeKind::TypeDecl { name, alias, ty } => {
            if alias {
                let target = resolve_type_expr(globals, pkg_scope, &ty)?;
                let mut sym = Symbol::new(SymKind::Type, &name, pkg_scope);
                sym.typ = Some(target);
                sym.global = true;
                sym.span = span;
                redeclare_checked(globals, declared_here, sym, span)?;
                unit.node_mut(id).typ = Some(target);
                return Ok(());
            }
            let shell = globals
                .scopes
                .lookup_local(pkg_scope, &name)
                .and_then(|s| globals.scopes.sym(s).typ)
                .ok_or_else(|| CompileError {
                    message: format!("undefined type shell: {name}"),
                    span,
                })?;
            if globals.types.cat(shell) != Cat::Nil {
                // Already filled by an earlier iteration.
                unit.node_mut(id).typ = Some(shell);
                return Ok(());
            }
            let underlying = resolve_type_expr(globals, pkg_scope, &ty)?;
            globals.types.fill_named(shell, underlying);
            unit.node_mut(id).typ = Some(shell);
            Ok(())
        }
        NodeKind::ConstDecl {
            names,
            ty,
            iota,
            values,
        } => {
            let declared_ty = match &ty {
                Some(texpr) => Some(resolve_type_expr(globals, pkg_scope, texpr)?),
                None => None,
            };
            // Evaluate every value before declaring any name, so a blocked
            // reference leaves the declaration cleanly retryable.
            let mut folded = Vec::with_capacity(names.len());
            for (idx, _) in names.iter().enumerate() {
                let expr = values.get(idx).ok_or_else(|| CompileError {
                    message: "missing value in constant declaration".to_string(),
                    span,
                })?;
                folded.push(const_eval(globals, pkg_scope, expr, iota as i64)?);
            }
            for (name, (value, value_ty)) in names.iter().zip(folded) {
                let typ = declared_ty.unwrap_or(value_ty);
                let mut sym = Symbol::new(SymKind::Const, name, pkg_scope);
                sym.typ = Some(typ);
                sym.value = Some(value);
                sym.global = true;
                sym.span = span;
                redeclare_checked(globals, declared_here, sym, span)?;
            }
            Ok(())
        }
        NodeKind::VarDecl { names, ty } => {
            let declared_ty = match &ty {
                Some(texpr) => Some(resolve_type_expr(globals, pkg_scope, texpr)?),
                None => None,
            };
            for name in &names {
                let mut sym = Symbol::new(SymKind::Var, name, pkg_scope);
                // Untyped declarations are typed by the CFG pass at their
                // initialisation site.
                sym.typ = declared_ty;
                sym.findex = Some(
                    globals
                        .scopes
                        .add_slot(pkg_scope, declared_ty.unwrap_or(types::EMPTY_IFACE)),
                );
                sym.global = true;
                sym.span = span;
                redeclare_checked(globals, declared_here, sym, span)?;
            }
            Ok(())
        }
        NodeKind::FuncDecl { name, recv, sig } => {
            let typ = resolve_signature(globals, pkg_scope, &sig)?;
            unit.node_mut(id).typ = Some(typ);
            match recv {
                None => {
                    // Initialisers are collected by the CFG pass and the
                    // blank name declares nothing.
                    if name == "_" || name == "init" {
                        return Ok(());
                    }
                    let mut sym = Symbol::new(SymKind::Func, &name, pkg_scope);
                    sym.typ = Some(typ);
                    sym.node = Some((unit_idx, id));
                    sym.findex = Some(globals.scopes.add_slot(pkg_scope, typ));
                    sym.global = true;
                    sym.span = span;
                    let sid = redeclare_checked(globals, declared_here, sym, span)?;
                    unit.node_mut(id).sym = Some(sid);
                    Ok(())
                }
                Some((_, recv_ty_expr)) => {
                    let recv_ty = resolve_type_expr(globals, pkg_scope, &recv_ty_expr)?;
                    let base = match globals.types.cat(recv_ty) {
                        Cat::Ptr => globals.types.get(recv_ty).elem.unwrap_or(recv_ty),
                        _ => recv_ty,
                    };
                    if !globals.types.is_named(base) {
                        return Err(CompileError {
                            message: "invalid receiver type".to_string(),
                            span,
                        });
                    }
                    let mut sym = Symbol::new(SymKind::Method, &name, pkg_scope);
                    sym.typ = Some(typ);
                    sym.recv = Some(recv_ty);
                    sym.node = Some((unit_idx, id));
                    sym.span = span;
                    let sid = globals.scopes.declare_detached(sym);
                    globals.types.get_mut(base).methods.insert(name, sid);
                    unit.node_mut(id).sym = Some(sid);
                    unit.node_mut(id).recv = Some(crate::node::RecvInfo::default());
                    Ok(())
                }
            }
        }
        _ => Ok(()),
    }
}

/// Builds the function type of a signature.
pub fn resolve_signature(
    globals: &mut Globals,
    scope: ScopeId,
    sig: &crate::ast::FuncSig,
) -> Result<TypeId, CompileError> {
    let mut params = Vec::with_capacity(sig.params.len());
    for param in &sig.params {
        let ty = resolve_type_expr(globals, scope, &param.ty)?;
        params.push(if sig.variadic && params.len() == sig.params.len() - 1 {
            globals.types.slice_of(ty)
        } else {
            ty
        });
    }
    let mut results = Vec::with_capacity(sig.results.len());
    for result in &sig.results {
        results.push(resolve_type_expr(globals, scope, &result.ty)?);
    }
    Ok(globals.types.func_of(params, results, sig.variadic))
}

/// Resolves a syntactic type expression to a type descriptor.
pub fn resolve_type_expr(
    globals: &mut Globals,
    scope: ScopeId,
    texpr: &TypeExpr,
) -> Result<TypeId, CompileError> {
    match texpr {
        TypeExpr::Name { pkg: None, name } => {
            let (sym, _) = globals
                .scopes
                .lookup(scope, &name.name)
                .ok_or_else(|| CompileError {
                    message: format!("undefined: {}", name.name),
                    span: name.span,
                })?;
            let symbol = globals.scopes.sym(sym);
            if symbol.kind != SymKind::Type {
                return Err(CompileError {
                    message: format!("{} is not a type", name.name),
                    span: name.span,
                });
            }
            symbol.typ.ok_or_else(|| CompileError {
                message: format!("undefined: {}", name.name),
                span: name.span,
            })
        }
        TypeExpr::Name {
            pkg: Some(pkg),
            name,
        } => {
            let (sym, _) = globals
                .scopes
                .lookup(scope, &pkg.name)
                .ok_or_else(|| CompileError {
                    message: format!("undefined: {}", pkg.name),
                    span: pkg.span,
                })?;
            let typ = globals.scopes.sym(sym).typ.ok_or_else(|| CompileError {
                message: format!("undefined: {}", pkg.name),
                span: pkg.span,
            })?;
            match globals.types.cat(typ) {
                Cat::SrcPkg => {
                    let path = globals.types.get(typ).path.clone();
                    let pkg_scope = globals
                        .pkg_scopes
                        .get(&path)
                        .or_else(|| {
                            globals
                                .pkg_names
                                .get(&path)
                                .and_then(|n| globals.pkg_scopes.get(n))
                        })
                        .copied()
                        .ok_or_else(|| CompileError {
                            message: format!("undefined package: {path}"),
                            span: pkg.span,
                        })?;
                    let (tsym, _) = globals
                        .scopes
                        .lookup(pkg_scope, &name.name)
                        .ok_or_else(|| CompileError {
                            message: format!("undefined: {}.{}", pkg.name, name.name),
                            span: name.span,
                        })?;
                    globals.scopes.sym(tsym).typ.ok_or_else(|| CompileError {
                        message: format!("undefined: {}.{}", pkg.name, name.name),
                        span: name.span,
                    })
                }
                _ => Err(CompileError {
                    message: format!("{} is not a source package", pkg.name),
                    span: pkg.span,
                }),
            }
        }
        TypeExpr::Ptr { elem, .. } => {
            let inner = resolve_type_expr(globals, scope, elem)?;
            Ok(globals.types.ptr_to(inner))
        }
        TypeExpr::Slice { elem, .. } => {
            let inner = resolve_type_expr(globals, scope, elem)?;
            Ok(globals.types.slice_of(inner))
        }
        TypeExpr::Array { len, elem, span } => {
            let (value, _) = const_eval(globals, scope, len, 0)?;
            let n = match value {
                Value::Int(v) if v >= 0 => v as usize,
                Value::Uint(v) => v as usize,
                _ => {
                    return Err(CompileError {
                        message: "array length must be a non-negative constant".to_string(),
                        span: *span,
                    })
                }
            };
            let inner = resolve_type_expr(globals, scope, elem)?;
            Ok(globals.types.array_of(inner, n))
        }
        TypeExpr::Map { key, value, .. } => {
            let k = resolve_type_expr(globals, scope, key)?;
            if !globals.types.is_comparable(k) {
                return Err(CompileError {
                    message: format!("invalid map key type {}", globals.types.describe(k)),
                    span: key.span(),
                });
            }
            let v = resolve_type_expr(globals, scope, value)?;
            Ok(globals.types.map_of(k, v))
        }
        TypeExpr::Chan { dir, elem, .. } => {
            let inner = resolve_type_expr(globals, scope, elem)?;
            Ok(globals.types.chan_of(*dir, inner))
        }
        TypeExpr::Struct { fields, span: _ } => {
            let mut out = Vec::new();
            for decl in fields {
                let ty = resolve_type_expr(globals, scope, &decl.ty)?;
                if decl.embedded {
                    let name = embedded_name(&decl.ty).ok_or_else(|| CompileError {
                        message: "invalid embedded field".to_string(),
                        span: decl.span,
                    })?;
                    out.push(Field {
                        name,
                        ty,
                        embedded: true,
                        tag: decl.tag.clone(),
                    });
                } else {
                    for name in &decl.names {
                        out.push(Field {
                            name: name.name.clone(),
                            ty,
                            embedded: false,
                            tag: decl.tag.clone(),
                        });
                    }
                }
            }
            Ok(globals.types.struct_of(out))
        }
        TypeExpr::Interface {
            methods,
            embeds,
            span,
        } => {
            let mut imethods = Vec::new();
            for embed in embeds {
                let embedded = resolve_type_expr(
                    globals,
                    scope,
                    &TypeExpr::Name {
                        pkg: None,
                        name: embed.clone(),
                    },
                )?;
                if !globals.types.is_interface(embedded) {
                    return Err(CompileError {
                        message: format!("{} is not an interface", embed.name),
                        span: *span,
                    });
                }
                imethods.extend(globals.types.get(embedded).imethods.clone());
            }
            for method in methods {
                let sig = resolve_signature(globals, scope, &method.sig)?;
                imethods.push(IMethod {
                    name: method.name.name.clone(),
                    sig,
                });
            }
            imethods.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(globals.types.interface_of(imethods))
        }
        TypeExpr::Func { sig, .. } => resolve_signature(globals, scope, sig),
    }
}

fn embedded_name(texpr: &TypeExpr) -> Option<String> {
    match texpr {
        TypeExpr::Name { name, .. } => Some(name.name.clone()),
        TypeExpr::Ptr { elem, .. } => embedded_name(elem),
        _ => None,
    }
}

/// Evaluates a constant expression at analysis time. Returns the folded
/// value and its (possibly untyped) type.
pub fn const_eval(
    globals: &mut Globals,
    scope: ScopeId,
    expr: &Expr,
    iota: i64,
) -> Result<(Value, TypeId), CompileError> {
    match expr {
        Expr::IntLit { value, .. } => Ok((Value::Int(*value), types::UNTYPED_INT)),
        Expr::FloatLit { value, .. } => Ok((Value::Float(*value), types::UNTYPED_FLOAT)),
        Expr::StrLit { value, .. } => Ok((Value::str(value), types::UNTYPED_STRING)),
        Expr::RuneLit { value, .. } => Ok((Value::Int(*value as i64), types::UNTYPED_RUNE)),
        Expr::Paren { inner, .. } => const_eval(globals, scope, inner, iota),
        Expr::Ident(id) => {
            if id.name == "iota" {
                return Ok((Value::Int(iota), types::UNTYPED_INT));
            }
            let (sym, _) = globals
                .scopes
                .lookup(scope, &id.name)
                .ok_or_else(|| CompileError {
                    message: format!("undefined: {}", id.name),
                    span: id.span,
                })?;
            let symbol = globals.scopes.sym(sym);
            match (&symbol.kind, &symbol.value, symbol.typ) {
                (SymKind::Const, Some(value), Some(typ)) => Ok((value.clone(), typ)),
                _ => Err(CompileError {
                    message: format!("{} is not a constant", id.name),
                    span: id.span,
                }),
            }
        }
        Expr::Unary { op, operand, span } => {
            let (value, typ) = const_eval(globals, scope, operand, iota)?;
            let op_ty = globals.types.default_type(typ);
            let action = ops::unary_action(&globals.types, *op, op_ty).map_err(|message| {
                CompileError {
                    message,
                    span: *span,
                }
            })?;
            let out = action(&value).map_err(|e| CompileError {
                message: e.to_string(),
                span: *span,
            })?;
            Ok((out, typ))
        }
        Expr::Binary { op, lhs, rhs, span } => {
            let (lv, lt) = const_eval(globals, scope, lhs, iota)?;
            let (rv, rt) = const_eval(globals, scope, rhs, iota)?;
            let out_ty = merge_const_types(globals, lt, rt).ok_or_else(|| CompileError {
                message: "mismatched constant types".to_string(),
                span: *span,
            })?;
            let op_ty = globals.types.default_type(out_ty);
            let action = ops::binary_action(&globals.types, *op, op_ty).map_err(|message| {
                CompileError {
                    message,
                    span: *span,
                }
            })?;
            let out = action(&lv, &rv).map_err(|e| CompileError {
                message: e.to_string(),
                span: *span,
            })?;
            let result_ty = if matches!(
                op,
                BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::LAnd
                    | BinaryOp::LOr
            ) {
                types::UNTYPED_BOOL
            } else {
                out_ty
            };
            Ok((out, result_ty))
        }
        Expr::Call { fun, args, span, .. } => {
            // Constant conversions: `T(x)` where T names a type.
            let Expr::Ident(name) = fun.as_ref() else {
                return Err(non_const(*span));
            };
            let Some((sym, _)) = globals.scopes.lookup(scope, &name.name) else {
                return Err(non_const(*span));
            };
            let symbol = globals.scopes.sym(sym);
            if symbol.kind != SymKind::Type {
                return Err(non_const(*span));
            }
            let target = symbol.typ.ok_or_else(|| non_const(*span))?;
            let [arg] = args.as_slice() else {
                return Err(non_const(*span));
            };
            let (value, vt) = const_eval(globals, scope, arg, iota)?;
            let src_ty = globals.types.default_type(vt);
            let conv =
                ops::convert_action(&globals.types, target, src_ty).map_err(|message| {
                    CompileError {
                        message,
                        span: *span,
                    }
                })?;
            let out = conv(&value).map_err(|e| CompileError {
                message: e.to_string(),
                span: *span,
            })?;
            Ok((out, target))
        }
        other => Err(non_const(other.span())),
    }
}

fn non_const(span: Span) -> CompileError {
    CompileError {
        message: "constant expression required".to_string(),
        span,
    }
}

/// The operand type of a constant binary operation: typed operands
/// dominate untyped ones, floats dominate integers.
fn merge_const_types(globals: &Globals, a: TypeId, b: TypeId) -> Option<TypeId> {
    let ua = globals.types.get(a).untyped;
    let ub = globals.types.get(b).untyped;
    match (ua, ub) {
        (false, false) => {
            if globals.types.identical(a, b) {
                Some(a)
            } else {
                None
            }
        }
        (false, true) => Some(a),
        (true, false) => Some(b),
        (true, true) => {
            let rank = |t: TypeId| match t {
                types::UNTYPED_BOOL => 0,
                types::UNTYPED_STRING => 1,
                types::UNTYPED_INT => 2,
                types::UNTYPED_RUNE => 3,
                types::UNTYPED_FLOAT => 4,
                _ => 5,
            };
            Some(if rank(a) >= rank(b) { a } else { b })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn eval_const(src: &str) -> (Value, TypeId) {
        let core = crate::interp::InterpCore::for_tests();
        let mut globals = core.globals_mut();
        let file = parser::parse(src, 0).expect("parse");
        let crate::ast::Decl::Stmt(crate::ast::Stmt::Expr(expr)) = &file.decls[0] else {
            panic!("expected expression");
        };
        let universe = globals.universe;
        const_eval(&mut globals, universe, expr, 0).expect("const")
    }

    #[test]
    fn constants_fold_arithmetic() {
        let (value, typ) = eval_const("2*3 + 10/2\n");
        assert!(value.equal(&Value::Int(11)));
        assert_eq!(typ, types::UNTYPED_INT);
    }

    #[test]
    fn float_contamination_promotes() {
        let (value, typ) = eval_const("1 + 2.5\n");
        assert!(value.equal(&Value::Float(3.5)));
        assert_eq!(typ, types::UNTYPED_FLOAT);
    }

    #[test]
    fn string_constants_concatenate() {
        let (value, typ) = eval_const("\"a\" + \"b\"\n");
        assert!(value.equal(&Value::str("ab")));
        assert_eq!(typ, types::UNTYPED_STRING);
    }

    #[test]
    fn comparisons_yield_untyped_bool() {
        let (value, typ) = eval_const("3 > 2\n");
        assert!(value.equal(&Value::Bool(true)));
        assert_eq!(typ, types::UNTYPED_BOOL);
    }

    #[test]
    fn constant_folding_is_idempotent() {
        let (first, _) = eval_const("(1 << 4) - 3\n");
        let (second, _) = eval_const("(1 << 4) - 3\n");
        assert!(first.equal(&second));
        assert!(first.equal(&Value::Int(13)));
    }
}
