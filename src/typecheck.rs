//! The bidirectional subtyping type checker: resolves pretypes, annotates
//! every node with its type and an environment snapshot, and enforces the
//! structural subtyping discipline (coinductive over recursive aliases).

use crate::ast::{
    ArithOp, Expr, FieldInit, FileSpan, MatchCase, Node, Pretype, PretypeType, Spanned,
    UntypedNode,
};
use crate::log::TYPECHECK_LOG;
use crate::syscall;
use crate::ty::{expand_type, free_type_vars, StructField, Type, TypingEnv, UnionCase};
use slog::debug;
use std::collections::HashSet;

pub type TypedNode = Node<TypingEnv, Type>;
pub type TypeErrors = Vec<TypeError>;
pub type Result<T> = std::result::Result<T, TypeErrors>;

#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub span: FileSpan,
    pub kind: TypeErrorKind,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: FileSpan) -> TypeError {
        TypeError { span, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeErrorKind {
    TypeMismatch { expected: Type, actual: Type },
    OperandMismatch { op: String, lhs: Type, rhs: Type },
    UndefinedVar(String),
    UndefinedType(String),
    PrimitiveRedefinition(String),
    TypeRedefinition(String),
    InvalidRecursion(String),
    EscapingAlias(String),
    DuplicateField(String),
    DuplicateLabel(String),
    DuplicateParam(String),
    ImmutableAssignment(String),
    InvalidAssignTarget,
    UndefinedField { field: String, ty: Type },
    NotAStruct(Type),
    NotAUnion(Type),
    NotAnArray(Type),
    NotAFunction(Type),
    ArityMismatch { expected: usize, actual: usize },
    UnknownSyscall(i32),
    UnhandledMatchLabel { label: String, union: Type },
    BranchMismatch { then: Type, els: Type },
    InvalidIncrement,
    InvalidPrintable(Type),
    PointerInSource,
}

impl std::fmt::Display for TypeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use TypeErrorKind::*;
        match self {
            TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {}, found {}", expected, actual)
            }
            OperandMismatch { op, lhs, rhs } => {
                write!(f, "invalid operands for `{}`: {} and {}", op, lhs, rhs)
            }
            UndefinedVar(name) => write!(f, "undefined variable {}", name),
            UndefinedType(name) => write!(f, "undefined type {}", name),
            PrimitiveRedefinition(name) => {
                write!(f, "cannot redefine primitive type {}", name)
            }
            TypeRedefinition(name) => write!(f, "type {} is already defined", name),
            InvalidRecursion(name) => {
                write!(f, "invalid recursive definition for type {}", name)
            }
            EscapingAlias(name) => write!(f, "type {} escapes its scope", name),
            DuplicateField(name) => write!(f, "duplicate field name {}", name),
            DuplicateLabel(name) => write!(f, "duplicate label {}", name),
            DuplicateParam(name) => write!(f, "duplicate argument name {}", name),
            ImmutableAssignment(name) => write!(f, "cannot assign to immutable {}", name),
            InvalidAssignTarget => write!(f, "invalid assignment target"),
            UndefinedField { field, ty } => write!(f, "no field {} on type {}", field, ty),
            NotAStruct(ty) => write!(f, "expected a struct type, found {}", ty),
            NotAUnion(ty) => write!(f, "expected a union type, found {}", ty),
            NotAnArray(ty) => write!(f, "expected an array type, found {}", ty),
            NotAFunction(ty) => write!(f, "expected a function type, found {}", ty),
            ArityMismatch { expected, actual } => {
                write!(f, "expected {} arguments, found {}", expected, actual)
            }
            UnknownSyscall(number) => write!(f, "unknown syscall {}", number),
            UnhandledMatchLabel { label, union } => {
                write!(f, "label {} is not a case of {}", label, union)
            }
            BranchMismatch { then, els } => {
                write!(f, "mismatched branches: {} and {}", then, els)
            }
            InvalidIncrement => write!(f, "increment requires a mutable numeric variable"),
            InvalidPrintable(ty) => write!(f, "cannot print a value of type {}", ty),
            PointerInSource => write!(f, "pointers cannot appear in source programs"),
        }
    }
}

fn err<T>(kind: TypeErrorKind, span: FileSpan) -> Result<T> {
    Err(vec![TypeError::new(kind, span)])
}

/// Check both results, keeping the diagnostics of both sides so that errors
/// in one sibling subtree do not hide errors in the other.
fn merge<A, B>(a: Result<A>, b: Result<B>) -> Result<(A, B)> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(mut ea), Err(eb)) => {
            ea.extend(eb);
            Err(ea)
        }
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
    }
}

fn collect_results<T>(results: impl IntoIterator<Item = Result<T>>) -> Result<Vec<T>> {
    let mut oks = vec![];
    let mut errors = vec![];
    for result in results {
        match result {
            Ok(v) => oks.push(v),
            Err(e) => errors.extend(e),
        }
    }
    if errors.is_empty() {
        Ok(oks)
    } else {
        Err(errors)
    }
}

/// The structural subtyping relation `t1 <: t2`.
pub fn is_subtype(env: &TypingEnv, t1: &Type, t2: &Type) -> bool {
    subtype_with(env, &mut HashSet::new(), t1, t2)
}

/// `assumptions` holds the pairs currently being checked: finding the pair
/// again closes the loop of a recursive alias (greatest fixed point), so it
/// must be consulted before any alias is expanded.
fn subtype_with(
    env: &TypingEnv,
    assumptions: &mut HashSet<(Type, Type)>,
    t1: &Type,
    t2: &Type,
) -> bool {
    if t1 == t2 {
        return true;
    }
    let pair = (t1.clone(), t2.clone());
    if assumptions.contains(&pair) {
        return true;
    }
    match (t1, t2) {
        (Type::Var(_), _) | (_, Type::Var(_)) => {
            let step = |ty: &Type| -> Option<Type> {
                match ty {
                    Type::Var(name) => env.type_aliases.get(name).cloned(),
                    _ => Some(ty.clone()),
                }
            };
            let e1 = match step(t1) {
                Some(ty) => ty,
                None => return false,
            };
            let e2 = match step(t2) {
                Some(ty) => ty,
                None => return false,
            };
            assumptions.insert(pair);
            subtype_with(env, assumptions, &e1, &e2)
        }
        (Type::Struct(sub), Type::Struct(sup)) => {
            // Width subtyping: the subtype may append extra fields, but the
            // shared prefix must line up by position and name. Mutable
            // fields are invariant, immutable fields covariant.
            if sub.len() < sup.len() {
                return false;
            }
            sub.iter().zip(sup.iter()).all(|(sub_f, sup_f)| {
                if sub_f.id != sup_f.id {
                    return false;
                }
                if sup_f.mutable {
                    sub_f.mutable
                        && subtype_with(env, assumptions, &sub_f.ty, &sup_f.ty)
                        && subtype_with(env, assumptions, &sup_f.ty, &sub_f.ty)
                } else {
                    subtype_with(env, assumptions, &sub_f.ty, &sup_f.ty)
                }
            })
        }
        (Type::Union(sub), Type::Union(sup)) => sub.iter().all(|sub_case| {
            match sup.iter().find(|sup_case| sup_case.label == sub_case.label) {
                Some(sup_case) => subtype_with(env, assumptions, &sub_case.ty, &sup_case.ty),
                None => false,
            }
        }),
        (Type::Array(e1), Type::Array(e2)) => {
            // Invariant in the element type.
            subtype_with(env, assumptions, e1, e2) && subtype_with(env, assumptions, e2, e1)
        }
        _ => false,
    }
}

/// Resolve a syntactic type under the current environment.
pub fn resolve_pretype(env: &TypingEnv, pretype: &Pretype) -> Result<Type> {
    match &pretype.t {
        PretypeType::Id(name) => match name.as_str() {
            "bool" => Ok(Type::Bool),
            "int" => Ok(Type::Int),
            "float" => Ok(Type::Float),
            "string" => Ok(Type::String),
            "unit" => Ok(Type::Unit),
            _ => {
                if env.type_aliases.contains_key(name) {
                    Ok(Type::Var(name.clone()))
                } else {
                    err(TypeErrorKind::UndefinedType(name.clone()), pretype.span)
                }
            }
        },
        PretypeType::Fn(args, ret) => {
            let args = collect_results(args.iter().map(|arg| resolve_pretype(env, arg)));
            let ret = resolve_pretype(env, ret);
            let (args, ret) = merge(args, ret)?;
            Ok(Type::Fn(args, Box::new(ret)))
        }
        PretypeType::Struct(fields) => {
            check_unique(
                fields.iter().map(|f| &f.id),
                |name| TypeErrorKind::DuplicateField(name),
            )?;
            let fields = collect_results(fields.iter().map(|field| {
                resolve_pretype(env, &field.ty).map(|ty| StructField {
                    mutable: field.mutable,
                    id: field.id.t.clone(),
                    ty,
                })
            }))?;
            Ok(Type::Struct(fields))
        }
        PretypeType::Union(cases) => {
            check_unique(
                cases.iter().map(|c| &c.label),
                |name| TypeErrorKind::DuplicateLabel(name),
            )?;
            let cases = collect_results(cases.iter().map(|case| {
                resolve_pretype(env, &case.ty).map(|ty| UnionCase {
                    label: case.label.t.clone(),
                    ty,
                })
            }))?;
            Ok(Type::Union(cases))
        }
        PretypeType::Array(elem) => {
            let elem = resolve_pretype(env, elem)?;
            Ok(Type::Array(Box::new(elem)))
        }
    }
}

fn check_unique<'a>(
    names: impl Iterator<Item = &'a Spanned<String>>,
    mk_error: impl Fn(String) -> TypeErrorKind,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut errors = vec![];
    for name in names {
        if !seen.insert(name.t.clone()) {
            errors.push(TypeError::new(mk_error(name.t.clone()), name.span));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn expand(env: &TypingEnv, ty: &Type, span: FileSpan) -> Result<Type> {
    match expand_type(env, ty) {
        Some(ty) => Ok(ty),
        None => err(TypeErrorKind::UndefinedType(ty.to_string()), span),
    }
}

/// Type-check a whole program starting from the empty environment.
pub fn typecheck(node: &UntypedNode) -> Result<TypedNode> {
    let typed = typecheck_node(&TypingEnv::default(), node)?;
    debug!(TYPECHECK_LOG, "program typechecked"; "type" => %typed.ty);
    Ok(typed)
}

fn arith_result(
    env: &TypingEnv,
    op: ArithOp,
    lhs: &TypedNode,
    rhs: &TypedNode,
    span: FileSpan,
) -> Result<Type> {
    if is_subtype(env, &lhs.ty, &Type::Int) && is_subtype(env, &rhs.ty, &Type::Int) {
        return Ok(Type::Int);
    }
    // Remainder is integer-only.
    if op != ArithOp::Rem
        && is_subtype(env, &lhs.ty, &Type::Float)
        && is_subtype(env, &rhs.ty, &Type::Float)
    {
        return Ok(Type::Float);
    }
    err(
        TypeErrorKind::OperandMismatch {
            op: op.to_string(),
            lhs: lhs.ty.clone(),
            rhs: rhs.ty.clone(),
        },
        span,
    )
}

/// Validates that a typed node is an admissible assignment target: a mutable
/// variable, a mutable field, or an array element.
fn check_assign_target(env: &TypingEnv, target: &TypedNode) -> Result<()> {
    match &target.expr {
        Expr::Var(name) => {
            if env.is_mutable(name) {
                Ok(())
            } else {
                err(TypeErrorKind::ImmutableAssignment(name.clone()), target.span)
            }
        }
        Expr::FieldSelect(obj, field) => {
            let obj_ty = expand(&obj.env, &obj.ty, obj.span)?;
            match &obj_ty {
                Type::Struct(fields) => {
                    match fields.iter().find(|f| f.id == field.t) {
                        Some(f) if f.mutable => Ok(()),
                        Some(_) => {
                            err(TypeErrorKind::ImmutableAssignment(field.t.clone()), field.span)
                        }
                        None => err(
                            TypeErrorKind::UndefinedField {
                                field: field.t.clone(),
                                ty: obj_ty.clone(),
                            },
                            field.span,
                        ),
                    }
                }
                _ => err(TypeErrorKind::NotAStruct(obj_ty.clone()), obj.span),
            }
        }
        Expr::ArrayElem(..) => Ok(()),
        _ => err(TypeErrorKind::InvalidAssignTarget, target.span),
    }
}

pub fn typecheck_node(env: &TypingEnv, node: &UntypedNode) -> Result<TypedNode> {
    let span = node.span;
    let tc = |n: &UntypedNode| typecheck_node(env, n);
    let done = |expr: Expr<TypingEnv, Type>, ty: Type| -> Result<TypedNode> {
        Ok(Node::new(expr, span, env.clone(), ty))
    };
    match &node.expr {
        Expr::UnitVal => done(Expr::UnitVal, Type::Unit),
        Expr::BoolVal(b) => done(Expr::BoolVal(*b), Type::Bool),
        Expr::IntVal(n) => done(Expr::IntVal(*n), Type::Int),
        Expr::FloatVal(x) => done(Expr::FloatVal(*x), Type::Float),
        Expr::StringVal(s) => done(Expr::StringVal(s.clone()), Type::String),
        Expr::Pointer(_) => err(TypeErrorKind::PointerInSource, span),
        Expr::Var(name) => match env.vars.get(name) {
            Some(ty) => done(Expr::Var(name.clone()), ty.clone()),
            None => err(TypeErrorKind::UndefinedVar(name.clone()), span),
        },
        Expr::Arith(l, op, r) => {
            let (l, r) = merge(tc(l), tc(r))?;
            let ty = arith_result(env, *op, &l, &r, span)?;
            done(Expr::Arith(Box::new(l), *op, Box::new(r)), ty)
        }
        Expr::ArithAssign(target, op, rhs) => {
            let (target, rhs) = merge(tc(target), tc(rhs))?;
            check_assign_target(env, &target)?;
            let ty = arith_result(env, *op, &target, &rhs, span)?;
            done(Expr::ArithAssign(Box::new(target), *op, Box::new(rhs)), ty)
        }
        Expr::Bitwise(l, op, r) => {
            let (l, r) = merge(tc(l), tc(r))?;
            if is_subtype(env, &l.ty, &Type::Int) && is_subtype(env, &r.ty, &Type::Int) {
                done(Expr::Bitwise(Box::new(l), *op, Box::new(r)), Type::Int)
            } else {
                err(
                    TypeErrorKind::OperandMismatch {
                        op: op.to_string(),
                        lhs: l.ty.clone(),
                        rhs: r.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::BNot(e) => {
            let e = tc(e)?;
            if is_subtype(env, &e.ty, &Type::Int) {
                done(Expr::BNot(Box::new(e)), Type::Int)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Int,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Logical(l, op, r) => {
            let (l, r) = merge(tc(l), tc(r))?;
            if is_subtype(env, &l.ty, &Type::Bool) && is_subtype(env, &r.ty, &Type::Bool) {
                done(Expr::Logical(Box::new(l), *op, Box::new(r)), Type::Bool)
            } else {
                err(
                    TypeErrorKind::OperandMismatch {
                        op: op.to_string(),
                        lhs: l.ty.clone(),
                        rhs: r.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Not(e) => {
            let e = tc(e)?;
            if is_subtype(env, &e.ty, &Type::Bool) {
                done(Expr::Not(Box::new(e)), Type::Bool)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Bool,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::ScAnd(l, r) | Expr::ScOr(l, r) => {
            let (l, r) = merge(tc(l), tc(r))?;
            if is_subtype(env, &l.ty, &Type::Bool) && is_subtype(env, &r.ty, &Type::Bool) {
                let expr = match &node.expr {
                    Expr::ScAnd(..) => Expr::ScAnd(Box::new(l), Box::new(r)),
                    _ => Expr::ScOr(Box::new(l), Box::new(r)),
                };
                done(expr, Type::Bool)
            } else {
                err(
                    TypeErrorKind::OperandMismatch {
                        op: match &node.expr {
                            Expr::ScAnd(..) => "&&".to_owned(),
                            _ => "||".to_owned(),
                        },
                        lhs: l.ty.clone(),
                        rhs: r.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Neg(e) => {
            // Integer negation only; float negation is not admitted.
            let e = tc(e)?;
            if is_subtype(env, &e.ty, &Type::Int) {
                done(Expr::Neg(Box::new(e)), Type::Int)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Int,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Compare(l, op, r) => {
            let (l, r) = merge(tc(l), tc(r))?;
            let both_int =
                is_subtype(env, &l.ty, &Type::Int) && is_subtype(env, &r.ty, &Type::Int);
            let both_float =
                is_subtype(env, &l.ty, &Type::Float) && is_subtype(env, &r.ty, &Type::Float);
            if both_int || both_float {
                done(Expr::Compare(Box::new(l), *op, Box::new(r)), Type::Bool)
            } else {
                err(
                    TypeErrorKind::OperandMismatch {
                        op: op.to_string(),
                        lhs: l.ty.clone(),
                        rhs: r.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Sqrt(e) => {
            let e = tc(e)?;
            if is_subtype(env, &e.ty, &Type::Float) {
                done(Expr::Sqrt(Box::new(e)), Type::Float)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Float,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::ReadInt => done(Expr::ReadInt, Type::Int),
        Expr::ReadFloat => done(Expr::ReadFloat, Type::Float),
        Expr::Print(e) | Expr::PrintLn(e) => {
            let e = tc(e)?;
            match expand(env, &e.ty, e.span)? {
                Type::Bool | Type::Int | Type::Float | Type::String => {
                    let expr = match &node.expr {
                        Expr::Print(_) => Expr::Print(Box::new(e)),
                        _ => Expr::PrintLn(Box::new(e)),
                    };
                    done(expr, Type::Unit)
                }
                ty => err(TypeErrorKind::InvalidPrintable(ty), e.span),
            }
        }
        Expr::Assertion(e) => {
            let e = tc(e)?;
            if is_subtype(env, &e.ty, &Type::Bool) {
                done(Expr::Assertion(Box::new(e)), Type::Unit)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Bool,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Syscall(number, args) => {
            let signature = match syscall::lookup(*number) {
                Some(signature) => signature,
                None => return err(TypeErrorKind::UnknownSyscall(*number), span),
            };
            let args = collect_results(args.iter().map(tc))?;
            if args.len() != signature.args.len() {
                return err(
                    TypeErrorKind::ArityMismatch {
                        expected: signature.args.len(),
                        actual: args.len(),
                    },
                    span,
                );
            }
            let mut errors = vec![];
            for (arg, expected) in args.iter().zip(&signature.args) {
                if !is_subtype(env, &arg.ty, expected) {
                    errors.push(TypeError::new(
                        TypeErrorKind::TypeMismatch {
                            expected: expected.clone(),
                            actual: arg.ty.clone(),
                        },
                        arg.span,
                    ));
                }
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            done(Expr::Syscall(*number, args), signature.ret.clone())
        }
        Expr::PreInc(e) | Expr::PostInc(e) => {
            let e = tc(e)?;
            let numeric = {
                let ty = expand(env, &e.ty, e.span)?;
                ty == Type::Int || ty == Type::Float
            };
            let is_mutable_var = match &e.expr {
                Expr::Var(name) => env.is_mutable(name),
                _ => false,
            };
            if !numeric || !is_mutable_var {
                return err(TypeErrorKind::InvalidIncrement, span);
            }
            let ty = e.ty.clone();
            let expr = match &node.expr {
                Expr::PreInc(_) => Expr::PreInc(Box::new(e)),
                _ => Expr::PostInc(Box::new(e)),
            };
            done(expr, ty)
        }
        Expr::If(cond, then_branch, else_branch) => {
            let (cond, (then_branch, else_branch)) =
                merge(tc(cond), merge(tc(then_branch), tc(else_branch)))?;
            if !is_subtype(env, &cond.ty, &Type::Bool) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Bool,
                        actual: cond.ty.clone(),
                    },
                    cond.span,
                );
            }
            // The join is the less specific of the two branch types.
            let ty = if is_subtype(env, &then_branch.ty, &else_branch.ty) {
                else_branch.ty.clone()
            } else if is_subtype(env, &else_branch.ty, &then_branch.ty) {
                then_branch.ty.clone()
            } else {
                return err(
                    TypeErrorKind::BranchMismatch {
                        then: then_branch.ty.clone(),
                        els: else_branch.ty.clone(),
                    },
                    span,
                );
            };
            done(
                Expr::If(
                    Box::new(cond),
                    Box::new(then_branch),
                    Box::new(else_branch),
                ),
                ty,
            )
        }
        Expr::Seq(nodes) => {
            let nodes = collect_results(nodes.iter().map(tc))?;
            let ty = nodes.last().map(|n| n.ty.clone()).unwrap_or(Type::Unit);
            done(Expr::Seq(nodes), ty)
        }
        Expr::Type(name, def, scope) => {
            if Type::is_primitive_name(&name.t) {
                return err(TypeErrorKind::PrimitiveRedefinition(name.t.clone()), name.span);
            }
            if let PretypeType::Id(id) = &def.t {
                if *id == name.t {
                    return err(TypeErrorKind::InvalidRecursion(name.t.clone()), span);
                }
            }
            if env.type_aliases.contains_key(&name.t) {
                return err(TypeErrorKind::TypeRedefinition(name.t.clone()), name.span);
            }
            // Insert a placeholder so the definition may refer to itself,
            // then rebind to the resolved definition.
            let env_placeholder = env.bind_alias(&name.t, Type::Unit);
            let def_ty = resolve_pretype(&env_placeholder, def)?;
            let inner_env = env_placeholder.bind_alias(&name.t, def_ty);
            let scope = typecheck_node(&inner_env, scope)?;
            let expanded = expand(&inner_env, &scope.ty, scope.span)?;
            if free_type_vars(&expanded).contains(&name.t) {
                return err(TypeErrorKind::EscapingAlias(name.t.clone()), span);
            }
            let ty = scope.ty.clone();
            // The node snapshots the extended environment so the alias stays
            // resolvable from this node in later passes.
            Ok(Node::new(
                Expr::Type(name.clone(), def.clone(), Box::new(scope)),
                span,
                inner_env,
                ty,
            ))
        }
        Expr::Ascription(pretype, e) => {
            let ty = resolve_pretype(env, pretype);
            let e = tc(e);
            let (ty, e) = merge(ty, e)?;
            if is_subtype(env, &e.ty, &ty) {
                done(Expr::Ascription(pretype.clone(), Box::new(e)), ty)
            } else {
                err(
                    TypeErrorKind::TypeMismatch {
                        expected: ty,
                        actual: e.ty.clone(),
                    },
                    span,
                )
            }
        }
        Expr::Copy(e) => {
            let e = tc(e)?;
            match expand(env, &e.ty, e.span)? {
                Type::Struct(_) => {
                    let ty = e.ty.clone();
                    done(Expr::Copy(Box::new(e)), ty)
                }
                ty => err(TypeErrorKind::NotAStruct(ty), e.span),
            }
        }
        Expr::Let(name, init, scope) => {
            let init = tc(init)?;
            let inner_env = env.bind_var(&name.t, init.ty.clone());
            let scope = typecheck_node(&inner_env, scope)?;
            let ty = scope.ty.clone();
            done(Expr::Let(name.clone(), Box::new(init), Box::new(scope)), ty)
        }
        Expr::LetT(name, pretype, init, scope) => {
            let declared = resolve_pretype(env, pretype)?;
            let init = tc(init);
            let inner_env = env.bind_var(&name.t, declared.clone());
            let scope = typecheck_node(&inner_env, scope);
            let (init, scope) = merge(init, scope)?;
            if !is_subtype(env, &init.ty, &declared) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: declared,
                        actual: init.ty.clone(),
                    },
                    init.span,
                );
            }
            let ty = scope.ty.clone();
            done(
                Expr::LetT(name.clone(), pretype.clone(), Box::new(init), Box::new(scope)),
                ty,
            )
        }
        Expr::LetMut(name, init, scope) => {
            let init = tc(init)?;
            let inner_env = env.bind_mutable_var(&name.t, init.ty.clone());
            let scope = typecheck_node(&inner_env, scope)?;
            let ty = scope.ty.clone();
            done(
                Expr::LetMut(name.clone(), Box::new(init), Box::new(scope)),
                ty,
            )
        }
        Expr::Assign(target, rhs) => {
            let (target, rhs) = merge(tc(target), tc(rhs))?;
            check_assign_target(env, &target)?;
            if !is_subtype(env, &rhs.ty, &target.ty) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: target.ty.clone(),
                        actual: rhs.ty.clone(),
                    },
                    rhs.span,
                );
            }
            let ty = rhs.ty.clone();
            done(Expr::Assign(Box::new(target), Box::new(rhs)), ty)
        }
        Expr::While(cond, body) => {
            let (cond, body) = merge(tc(cond), tc(body))?;
            if !is_subtype(env, &cond.ty, &Type::Bool) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Bool,
                        actual: cond.ty.clone(),
                    },
                    cond.span,
                );
            }
            done(Expr::While(Box::new(cond), Box::new(body)), Type::Unit)
        }
        Expr::For(var, init, cond, update, body) => {
            let init = tc(init)?;
            let inner_env = env.bind_mutable_var(&var.t, init.ty.clone());
            let cond_r = typecheck_node(&inner_env, cond);
            let update_r = typecheck_node(&inner_env, update);
            let body_r = typecheck_node(&inner_env, body);
            let (cond, (update, body)) = merge(cond_r, merge(update_r, body_r))?;
            if !is_subtype(&inner_env, &cond.ty, &Type::Bool) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Bool,
                        actual: cond.ty.clone(),
                    },
                    cond.span,
                );
            }
            done(
                Expr::For(
                    var.clone(),
                    Box::new(init),
                    Box::new(cond),
                    Box::new(update),
                    Box::new(body),
                ),
                Type::Unit,
            )
        }
        Expr::Lambda(params, body) => {
            check_unique(
                params.iter().map(|p| &p.id),
                |name| TypeErrorKind::DuplicateParam(name),
            )?;
            let param_tys = collect_results(
                params.iter().map(|param| resolve_pretype(env, &param.ty)),
            )?;
            let mut inner_env = env.clone();
            for (param, ty) in params.iter().zip(&param_tys) {
                inner_env = inner_env.bind_var(&param.id.t, ty.clone());
            }
            let body = typecheck_node(&inner_env, body)?;
            let ty = Type::Fn(param_tys, Box::new(body.ty.clone()));
            done(Expr::Lambda(params.clone(), Box::new(body)), ty)
        }
        Expr::App(f, args) => {
            let f = tc(f)?;
            let (params, ret) = match expand(env, &f.ty, f.span)? {
                Type::Fn(params, ret) => (params, ret),
                ty => return err(TypeErrorKind::NotAFunction(ty), f.span),
            };
            let args = collect_results(args.iter().map(tc))?;
            if args.len() != params.len() {
                return err(
                    TypeErrorKind::ArityMismatch {
                        expected: params.len(),
                        actual: args.len(),
                    },
                    span,
                );
            }
            let mut errors = vec![];
            for (arg, param) in args.iter().zip(&params) {
                if !is_subtype(env, &arg.ty, param) {
                    errors.push(TypeError::new(
                        TypeErrorKind::TypeMismatch {
                            expected: param.clone(),
                            actual: arg.ty.clone(),
                        },
                        arg.span,
                    ));
                }
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            done(Expr::App(Box::new(f), args), *ret)
        }
        Expr::StructCons(fields) => {
            check_unique(
                fields.iter().map(|f| &f.id),
                |name| TypeErrorKind::DuplicateField(name),
            )?;
            let typed_fields = collect_results(fields.iter().map(|field| {
                typecheck_node(env, &field.init).map(|init| FieldInit {
                    mutable: field.mutable,
                    id: field.id.clone(),
                    init,
                })
            }))?;
            let ty = Type::Struct(
                typed_fields
                    .iter()
                    .map(|field| StructField {
                        mutable: field.mutable,
                        id: field.id.t.clone(),
                        ty: field.init.ty.clone(),
                    })
                    .collect(),
            );
            done(Expr::StructCons(typed_fields), ty)
        }
        Expr::FieldSelect(obj, field) => {
            let obj = tc(obj)?;
            match expand(env, &obj.ty, obj.span)? {
                Type::Struct(fields) => match fields.iter().find(|f| f.id == field.t) {
                    Some(f) => {
                        let ty = f.ty.clone();
                        done(Expr::FieldSelect(Box::new(obj), field.clone()), ty)
                    }
                    None => err(
                        TypeErrorKind::UndefinedField {
                            field: field.t.clone(),
                            ty: Type::Struct(fields),
                        },
                        field.span,
                    ),
                },
                ty => err(TypeErrorKind::NotAStruct(ty), obj.span),
            }
        }
        Expr::UnionCons(label, e) => {
            let e = tc(e)?;
            let ty = Type::Union(vec![UnionCase {
                label: label.t.clone(),
                ty: e.ty.clone(),
            }]);
            done(Expr::UnionCons(label.clone(), Box::new(e)), ty)
        }
        Expr::Match(scrutinee, cases) => {
            check_unique(
                cases.iter().map(|c| &c.label),
                |name| TypeErrorKind::DuplicateLabel(name),
            )?;
            let scrutinee = tc(scrutinee)?;
            let union_cases = match expand(env, &scrutinee.ty, scrutinee.span)? {
                Type::Union(cases) => cases,
                ty => return err(TypeErrorKind::NotAUnion(ty), scrutinee.span),
            };
            let typed_cases = collect_results(cases.iter().map(|case| {
                let case_ty = match union_cases.iter().find(|u| u.label == case.label.t) {
                    Some(u) => u.ty.clone(),
                    None => {
                        return err(
                            TypeErrorKind::UnhandledMatchLabel {
                                label: case.label.t.clone(),
                                union: Type::Union(union_cases.clone()),
                            },
                            case.label.span,
                        )
                    }
                };
                let case_env = env.bind_var(&case.var.t, case_ty);
                typecheck_node(&case_env, &case.cont).map(|cont| MatchCase {
                    label: case.label.clone(),
                    var: case.var.clone(),
                    cont,
                })
            }))?;
            // The first continuation's type is the lower bound the rest
            // must fit under.
            let first_ty = typed_cases[0].cont.ty.clone();
            let mut errors = vec![];
            for case in &typed_cases[1..] {
                if !is_subtype(env, &case.cont.ty, &first_ty) {
                    errors.push(TypeError::new(
                        TypeErrorKind::TypeMismatch {
                            expected: first_ty.clone(),
                            actual: case.cont.ty.clone(),
                        },
                        case.cont.span,
                    ));
                }
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            done(Expr::Match(Box::new(scrutinee), typed_cases), first_ty)
        }
        Expr::ArrayCons(length, init) => {
            let (length, init) = merge(tc(length), tc(init))?;
            if !is_subtype(env, &length.ty, &Type::Int) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Int,
                        actual: length.ty.clone(),
                    },
                    length.span,
                );
            }
            let ty = Type::Array(Box::new(init.ty.clone()));
            done(Expr::ArrayCons(Box::new(length), Box::new(init)), ty)
        }
        Expr::ArrayElem(arr, index) => {
            let (arr, index) = merge(tc(arr), tc(index))?;
            let elem_ty = match expand(env, &arr.ty, arr.span)? {
                Type::Array(elem) => *elem,
                ty => return err(TypeErrorKind::NotAnArray(ty), arr.span),
            };
            if !is_subtype(env, &index.ty, &Type::Int) {
                return err(
                    TypeErrorKind::TypeMismatch {
                        expected: Type::Int,
                        actual: index.ty.clone(),
                    },
                    index.span,
                );
            }
            done(Expr::ArrayElem(Box::new(arr), Box::new(index)), elem_ty)
        }
        Expr::ArrayLength(arr) => {
            let arr = tc(arr)?;
            match expand(env, &arr.ty, arr.span)? {
                Type::Array(_) => done(Expr::ArrayLength(Box::new(arr)), Type::Int),
                ty => err(TypeErrorKind::NotAnArray(ty), arr.span),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::Sourcemap;
    use pretty_assertions::assert_eq;

    fn check(src: &str) -> Result<TypedNode> {
        let mut sourcemap = Sourcemap::default();
        let (_, result) = sourcemap.add_file("test.hyg", src);
        typecheck(&result.expect("failed to parse"))
    }

    fn check_ty(src: &str) -> Type {
        check(src).expect("failed to typecheck").ty
    }

    fn check_err(src: &str) -> TypeErrors {
        check(src).expect_err("expected a type error")
    }

    #[test]
    fn test_literals_and_arith() {
        assert_eq!(check_ty("2 + 3 * 4"), Type::Int);
        assert_eq!(check_ty("1.5f * 2.0f"), Type::Float);
        assert_eq!(check_ty("\"hi\""), Type::String);
        assert_eq!(check_ty("let x = 2 + 3 * 4; println(x)"), Type::Unit);
    }

    #[test]
    fn test_arith_operand_mismatch() {
        let errors = check_err("1 + true");
        assert!(matches!(
            errors[0].kind,
            TypeErrorKind::OperandMismatch { .. }
        ));
        // Mixed int/float operands are rejected too.
        check_err("1 + 2.0f");
    }

    #[test]
    fn test_rem_is_integer_only() {
        assert_eq!(check_ty("7 % 3"), Type::Int);
        check_err("7.0f % 3.0f");
    }

    #[test]
    fn test_neg_rejects_float() {
        assert_eq!(check_ty("-3"), Type::Int);
        let errors = check_err("-3.0f");
        assert!(matches!(
            errors[0].kind,
            TypeErrorKind::TypeMismatch { expected: Type::Int, .. }
        ));
    }

    #[test]
    fn test_errors_accumulate_across_siblings() {
        let errors = check_err("{ 1 + true; false * 2 }");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_subtype_reflexive_and_width() {
        let env = TypingEnv::default();
        let narrow = Type::Struct(vec![StructField {
            mutable: true,
            id: "a".to_owned(),
            ty: Type::Int,
        }]);
        let wide = Type::Struct(vec![
            StructField {
                mutable: true,
                id: "a".to_owned(),
                ty: Type::Int,
            },
            StructField {
                mutable: true,
                id: "b".to_owned(),
                ty: Type::Bool,
            },
        ]);
        assert!(is_subtype(&env, &narrow, &narrow));
        assert!(is_subtype(&env, &wide, &narrow));
        assert!(!is_subtype(&env, &narrow, &wide));
    }

    #[test]
    fn test_subtype_mutable_fields_are_invariant() {
        let env = TypingEnv::default();
        let mutable = |ty| {
            Type::Struct(vec![StructField {
                mutable: true,
                id: "a".to_owned(),
                ty,
            }])
        };
        let immutable = |ty| {
            Type::Struct(vec![StructField {
                mutable: false,
                id: "a".to_owned(),
                ty,
            }])
        };
        // A mutable field satisfies an immutable one, not vice versa.
        assert!(is_subtype(&env, &mutable(Type::Int), &immutable(Type::Int)));
        assert!(!is_subtype(&env, &immutable(Type::Int), &mutable(Type::Int)));
        // Depth subtyping only through immutable fields.
        let wide = Type::Struct(vec![
            StructField {
                mutable: true,
                id: "x".to_owned(),
                ty: Type::Int,
            },
            StructField {
                mutable: true,
                id: "y".to_owned(),
                ty: Type::Int,
            },
        ]);
        let narrow = Type::Struct(vec![StructField {
            mutable: true,
            id: "x".to_owned(),
            ty: Type::Int,
        }]);
        assert!(is_subtype(&env, &immutable(wide.clone()), &immutable(narrow.clone())));
        assert!(!is_subtype(&env, &mutable(wide), &mutable(narrow)));
    }

    #[test]
    fn test_subtype_union_labels() {
        let env = TypingEnv::default();
        let small = Type::Union(vec![UnionCase {
            label: "A".to_owned(),
            ty: Type::Int,
        }]);
        let big = Type::Union(vec![
            UnionCase {
                label: "A".to_owned(),
                ty: Type::Int,
            },
            UnionCase {
                label: "B".to_owned(),
                ty: Type::Bool,
            },
        ]);
        assert!(is_subtype(&env, &small, &big));
        assert!(!is_subtype(&env, &big, &small));
    }

    #[test]
    fn test_subtype_transitivity_sample() {
        let env = TypingEnv::default();
        let f = |id: &str| StructField {
            mutable: false,
            id: id.to_owned(),
            ty: Type::Int,
        };
        let t1 = Type::Struct(vec![f("a"), f("b"), f("c")]);
        let t2 = Type::Struct(vec![f("a"), f("b")]);
        let t3 = Type::Struct(vec![f("a")]);
        assert!(is_subtype(&env, &t1, &t2));
        assert!(is_subtype(&env, &t2, &t3));
        assert!(is_subtype(&env, &t1, &t3));
    }

    #[test]
    fn test_subtype_recursive_aliases() {
        // Two structurally identical recursive list types relate through
        // the assumption set instead of diverging.
        let list = |name: &str| {
            Type::Union(vec![
                UnionCase {
                    label: "End".to_owned(),
                    ty: Type::Int,
                },
                UnionCase {
                    label: "Next".to_owned(),
                    ty: Type::Var(name.to_owned()),
                },
            ])
        };
        let env = TypingEnv::default()
            .bind_alias("L1", list("L1"))
            .bind_alias("L2", list("L2"));
        assert!(is_subtype(
            &env,
            &Type::Var("L1".to_owned()),
            &Type::Var("L2".to_owned())
        ));
    }

    #[test]
    fn test_struct_field_assignment_mutability() {
        // Scenario: assigning through a mutable field is fine, through an
        // immutable one is a type error at the assignment.
        let src_ok = "let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; \
                      p.b <- 5; println(p.a + p.b)";
        assert_eq!(check_ty(src_ok), Type::Unit);
        let src_bad = "let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; \
                       p.a <- 5; println(p.a + p.b)";
        let errors = check_err(src_bad);
        assert_eq!(
            errors[0].kind,
            TypeErrorKind::ImmutableAssignment("a".to_owned())
        );
    }

    #[test]
    fn test_assignment_requires_mutable_var() {
        let errors = check_err("let x = 1; x <- 2");
        assert_eq!(
            errors[0].kind,
            TypeErrorKind::ImmutableAssignment("x".to_owned())
        );
        assert_eq!(check_ty("let mutable x = 1; x <- 2"), Type::Int);
    }

    #[test]
    fn test_trivial_recursive_type_is_rejected() {
        let errors = check_err("type T = T; let x = 0; x");
        assert_eq!(errors[0].kind, TypeErrorKind::InvalidRecursion("T".to_owned()));
        assert!(errors[0].kind.to_string().contains("invalid recursive definition"));
    }

    #[test]
    fn test_recursive_union_type_checks() {
        let src = "type L = union { End: int; Next: L }; \
                   fun isEnd(x: L): bool = match x with { End{v} -> true; Next{rest} -> false }; \
                   assert(isEnd(End{3}))";
        assert_eq!(check_ty(src), Type::Unit);
    }

    #[test]
    fn test_alias_escape_is_rejected() {
        let errors = check_err("type L = union { End: int; Next: L }; (End{0} : L)");
        assert_eq!(errors[0].kind, TypeErrorKind::EscapingAlias("L".to_owned()));
        // A non-recursive alias expands away and may leave its scope.
        assert_eq!(check_ty("type T = int; (1 : T)"), Type::Var("T".to_owned()));
    }

    #[test]
    fn test_primitive_redefinition_and_redefinition() {
        assert_eq!(
            check_err("type int = bool; 0")[0].kind,
            TypeErrorKind::PrimitiveRedefinition("int".to_owned())
        );
        assert_eq!(
            check_err("type T = int; type T = bool; 0")[0].kind,
            TypeErrorKind::TypeRedefinition("T".to_owned())
        );
    }

    #[test]
    fn test_if_join_picks_less_specific_branch() {
        let env = TypingEnv::default();
        let src = "if true then struct { a = 1; b = 2 } else struct { a = 3 }";
        let ty = check_ty(src);
        // struct { a; b } <: struct { a }, so the join is the one-field type.
        assert!(is_subtype(&env, &ty, &Type::Struct(vec![StructField {
            mutable: true,
            id: "a".to_owned(),
            ty: Type::Int,
        }])));
        check_err("if true then 1 else false");
        check_err("if 1 then 2 else 3");
    }

    #[test]
    fn test_match_cases() {
        let src = "type L = union { End: int; Next: L }; \
                   let n = (Next{End{1}} : L); \
                   assert(match n with { End{v} -> false; Next{rest} -> true })";
        assert_eq!(check_ty(src), Type::Unit);
        let bad = "type U = union { A: int }; \
                   let u = (A{1} : U); \
                   match u with { B{x} -> 0 }";
        assert!(matches!(
            check_err(bad)[0].kind,
            TypeErrorKind::UnhandledMatchLabel { .. }
        ));
    }

    #[test]
    fn test_application() {
        assert_eq!(
            check_ty("fun add(x: int, y: int): int = x + y; add(1, 2)"),
            Type::Int
        );
        assert!(matches!(
            check_err("fun f(x: int): int = x; f(1, 2)")[0].kind,
            TypeErrorKind::ArityMismatch { expected: 1, actual: 2 }
        ));
        assert!(matches!(
            check_err("fun f(x: int): int = x; f(true)")[0].kind,
            TypeErrorKind::TypeMismatch { .. }
        ));
        assert!(matches!(
            check_err("let x = 1; x(2)")[0].kind,
            TypeErrorKind::NotAFunction(_)
        ));
    }

    #[test]
    fn test_duplicate_names() {
        assert!(matches!(
            check_err("struct { a = 1; a = 2 }")[0].kind,
            TypeErrorKind::DuplicateField(_)
        ));
        assert!(matches!(
            check_err("fun f(x: int, x: int): int = x; 0")[0].kind,
            TypeErrorKind::DuplicateParam(_)
        ));
        assert!(matches!(
            check_err("type U = union { A: int; A: bool }; 0")[0].kind,
            TypeErrorKind::DuplicateLabel(_)
        ));
    }

    #[test]
    fn test_syscalls() {
        assert_eq!(check_ty("syscall(1, 42)"), Type::Unit);
        assert_eq!(check_ty("syscall(9, 16)"), Type::Int);
        assert!(matches!(
            check_err("syscall(999)")[0].kind,
            TypeErrorKind::UnknownSyscall(999)
        ));
        assert!(matches!(
            check_err("syscall(1, true)")[0].kind,
            TypeErrorKind::TypeMismatch { .. }
        ));
        assert!(matches!(
            check_err("syscall(1)")[0].kind,
            TypeErrorKind::ArityMismatch { .. }
        ));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            check_ty("let a = array(3, 7); arrayElem(a, 1)"),
            Type::Int
        );
        assert_eq!(check_ty("let a = array(3, 7); arrayLength(a)"), Type::Int);
        assert_eq!(check_ty("let a = array(3, 7); a[1] <- 9"), Type::Int);
        assert!(matches!(
            check_err("arrayLength(3)")[0].kind,
            TypeErrorKind::NotAnArray(_)
        ));
        assert!(matches!(
            check_err("array(true, 7)")[0].kind,
            TypeErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_increment_requires_mutable_numeric_var() {
        assert_eq!(check_ty("let mutable x = 1; x++"), Type::Int);
        assert_eq!(check_ty("let mutable x = 1.0f; ++x"), Type::Float);
        assert_eq!(
            check_err("let x = 1; x++")[0].kind,
            TypeErrorKind::InvalidIncrement
        );
        assert_eq!(
            check_err("let mutable b = true; b++")[0].kind,
            TypeErrorKind::InvalidIncrement
        );
    }

    #[test]
    fn test_undefined_names() {
        assert_eq!(
            check_err("missing")[0].kind,
            TypeErrorKind::UndefinedVar("missing".to_owned())
        );
        assert_eq!(
            check_err("let x: Nope = 1; x")[0].kind,
            TypeErrorKind::UndefinedType("Nope".to_owned())
        );
    }

    #[test]
    fn test_every_node_snapshots_its_environment() {
        let typed = check("let x = 1; x + 2").unwrap();
        if let Expr::Let(_, _, scope) = &typed.expr {
            assert_eq!(scope.env.vars.get("x"), Some(&Type::Int));
        } else {
            panic!("expected a let");
        }
    }

    #[test]
    fn test_union_cons_widens_by_ascription() {
        let src = "type U = union { A: int; B: bool }; assert(match (A{1} : U) with { A{x} -> true; B{y} -> y })";
        assert_eq!(check_ty(src), Type::Unit);
    }
}
