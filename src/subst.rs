//! Substitution and variable analyses over the shared tree shape. These are
//! generic in the node annotations so they serve both the untyped and the
//! typed tree.

use crate::ast::{Expr, FieldInit, MatchCase, Node};
use std::collections::HashSet;

/// Replace every free occurrence of `x` in `node` with `value`, respecting
/// the shadowing introduced by `let` forms, lambda parameters, `match` case
/// binders, and the `for` iteration variable.
pub fn subst<E: Clone, T: Clone>(node: &Node<E, T>, x: &str, value: &Node<E, T>) -> Node<E, T> {
    let sub = |n: &Node<E, T>| Box::new(subst(n, x, value));
    let sub_vec = |ns: &[Node<E, T>]| ns.iter().map(|n| subst(n, x, value)).collect::<Vec<_>>();
    let expr = match &node.expr {
        Expr::UnitVal
        | Expr::BoolVal(_)
        | Expr::IntVal(_)
        | Expr::FloatVal(_)
        | Expr::StringVal(_)
        | Expr::ReadInt
        | Expr::ReadFloat
        | Expr::Pointer(_) => node.expr.clone(),
        Expr::Var(name) => {
            if name == x {
                return value.clone();
            }
            node.expr.clone()
        }
        Expr::Arith(l, op, r) => Expr::Arith(sub(l), *op, sub(r)),
        Expr::ArithAssign(l, op, r) => Expr::ArithAssign(sub(l), *op, sub(r)),
        Expr::Bitwise(l, op, r) => Expr::Bitwise(sub(l), *op, sub(r)),
        Expr::BNot(e) => Expr::BNot(sub(e)),
        Expr::Logical(l, op, r) => Expr::Logical(sub(l), *op, sub(r)),
        Expr::Not(e) => Expr::Not(sub(e)),
        Expr::ScAnd(l, r) => Expr::ScAnd(sub(l), sub(r)),
        Expr::ScOr(l, r) => Expr::ScOr(sub(l), sub(r)),
        Expr::Neg(e) => Expr::Neg(sub(e)),
        Expr::Compare(l, op, r) => Expr::Compare(sub(l), *op, sub(r)),
        Expr::Sqrt(e) => Expr::Sqrt(sub(e)),
        Expr::Print(e) => Expr::Print(sub(e)),
        Expr::PrintLn(e) => Expr::PrintLn(sub(e)),
        Expr::Syscall(num, args) => Expr::Syscall(*num, sub_vec(args)),
        Expr::PreInc(e) => Expr::PreInc(sub(e)),
        Expr::PostInc(e) => Expr::PostInc(sub(e)),
        Expr::If(cond, t, f) => Expr::If(sub(cond), sub(t), sub(f)),
        Expr::Seq(nodes) => Expr::Seq(sub_vec(nodes)),
        Expr::Type(name, def, scope) => Expr::Type(name.clone(), def.clone(), sub(scope)),
        Expr::Ascription(pt, e) => Expr::Ascription(pt.clone(), sub(e)),
        Expr::Assertion(e) => Expr::Assertion(sub(e)),
        Expr::Copy(e) => Expr::Copy(sub(e)),
        Expr::Let(name, init, scope) => {
            let scope = if name.t == x { scope.clone() } else { sub(scope) };
            Expr::Let(name.clone(), sub(init), scope)
        }
        Expr::LetT(name, pt, init, scope) => {
            let scope = if name.t == x { scope.clone() } else { sub(scope) };
            Expr::LetT(name.clone(), pt.clone(), sub(init), scope)
        }
        Expr::LetMut(name, init, scope) => {
            let scope = if name.t == x { scope.clone() } else { sub(scope) };
            Expr::LetMut(name.clone(), sub(init), scope)
        }
        Expr::Assign(target, e) => Expr::Assign(sub(target), sub(e)),
        Expr::While(cond, body) => Expr::While(sub(cond), sub(body)),
        Expr::For(var, init, cond, update, body) => {
            let init = sub(init);
            if var.t == x {
                Expr::For(var.clone(), init, cond.clone(), update.clone(), body.clone())
            } else {
                Expr::For(var.clone(), init, sub(cond), sub(update), sub(body))
            }
        }
        Expr::Lambda(params, body) => {
            if params.iter().any(|p| p.id.t == x) {
                node.expr.clone()
            } else {
                Expr::Lambda(params.clone(), sub(body))
            }
        }
        Expr::App(f, args) => Expr::App(sub(f), sub_vec(args)),
        Expr::StructCons(fields) => Expr::StructCons(
            fields
                .iter()
                .map(|field| FieldInit {
                    mutable: field.mutable,
                    id: field.id.clone(),
                    init: subst(&field.init, x, value),
                })
                .collect(),
        ),
        Expr::FieldSelect(target, field) => Expr::FieldSelect(sub(target), field.clone()),
        Expr::UnionCons(label, e) => Expr::UnionCons(label.clone(), sub(e)),
        Expr::Match(e, cases) => Expr::Match(
            sub(e),
            cases
                .iter()
                .map(|case| MatchCase {
                    label: case.label.clone(),
                    var: case.var.clone(),
                    cont: if case.var.t == x {
                        case.cont.clone()
                    } else {
                        subst(&case.cont, x, value)
                    },
                })
                .collect(),
        ),
        Expr::ArrayCons(len, init) => Expr::ArrayCons(sub(len), sub(init)),
        Expr::ArrayElem(arr, idx) => Expr::ArrayElem(sub(arr), sub(idx)),
        Expr::ArrayLength(arr) => Expr::ArrayLength(sub(arr)),
    };
    node.with_expr(expr)
}

/// The free variables of `node`: every `Var` occurrence not enclosed by a
/// binder of the same name.
pub fn free_vars<E: Clone, T: Clone>(node: &Node<E, T>) -> HashSet<String> {
    vars(node, false)
}

/// Like `free_vars`, except that a bare variable occurrence is not captured
/// by itself: only variables appearing free under a lambda count, since a
/// lambda is itself a value and carries its environment with it.
pub fn captured_vars<E: Clone, T: Clone>(node: &Node<E, T>) -> HashSet<String> {
    vars(node, true)
}

fn vars<E: Clone, T: Clone>(node: &Node<E, T>, captured: bool) -> HashSet<String> {
    let one = |n: &Node<E, T>| vars(n, captured);
    let two = |a: &Node<E, T>, b: &Node<E, T>| {
        let mut set = vars(a, captured);
        set.extend(vars(b, captured));
        set
    };
    match &node.expr {
        Expr::UnitVal
        | Expr::BoolVal(_)
        | Expr::IntVal(_)
        | Expr::FloatVal(_)
        | Expr::StringVal(_)
        | Expr::ReadInt
        | Expr::ReadFloat
        | Expr::Pointer(_) => HashSet::new(),
        Expr::Var(name) => {
            if captured {
                HashSet::new()
            } else {
                let mut set = HashSet::new();
                set.insert(name.clone());
                set
            }
        }
        Expr::Arith(l, _, r)
        | Expr::ArithAssign(l, _, r)
        | Expr::Bitwise(l, _, r)
        | Expr::Logical(l, _, r)
        | Expr::Compare(l, _, r)
        | Expr::ScAnd(l, r)
        | Expr::ScOr(l, r)
        | Expr::Assign(l, r)
        | Expr::While(l, r)
        | Expr::ArrayCons(l, r)
        | Expr::ArrayElem(l, r) => two(l, r),
        Expr::BNot(e)
        | Expr::Not(e)
        | Expr::Neg(e)
        | Expr::Sqrt(e)
        | Expr::Print(e)
        | Expr::PrintLn(e)
        | Expr::PreInc(e)
        | Expr::PostInc(e)
        | Expr::Ascription(_, e)
        | Expr::Assertion(e)
        | Expr::Copy(e)
        | Expr::Type(_, _, e)
        | Expr::FieldSelect(e, _)
        | Expr::UnionCons(_, e)
        | Expr::ArrayLength(e) => one(e),
        Expr::Syscall(_, args) => {
            let mut set = HashSet::new();
            for arg in args {
                set.extend(one(arg));
            }
            set
        }
        Expr::If(cond, t, f) => {
            let mut set = two(cond, t);
            set.extend(one(f));
            set
        }
        Expr::Seq(nodes) => {
            let mut set = HashSet::new();
            for n in nodes {
                set.extend(one(n));
            }
            set
        }
        Expr::Let(name, init, scope)
        | Expr::LetT(name, _, init, scope)
        | Expr::LetMut(name, init, scope) => {
            let mut scope_vars = one(scope);
            scope_vars.remove(&name.t);
            scope_vars.extend(one(init));
            scope_vars
        }
        Expr::For(var, init, cond, update, body) => {
            let mut inner = one(cond);
            inner.extend(one(update));
            inner.extend(one(body));
            inner.remove(&var.t);
            inner.extend(one(init));
            inner
        }
        // A lambda is a value: everything free in it is captured, so both
        // analyses coincide below this point.
        Expr::Lambda(params, body) => {
            let mut set = vars(body, false);
            for param in params {
                set.remove(&param.id.t);
            }
            set
        }
        Expr::App(f, args) => {
            let mut set = one(f);
            for arg in args {
                set.extend(one(arg));
            }
            set
        }
        Expr::StructCons(fields) => {
            let mut set = HashSet::new();
            for field in fields {
                set.extend(one(&field.init));
            }
            set
        }
        Expr::Match(e, cases) => {
            let mut set = one(e);
            for case in cases {
                let mut case_vars = one(&case.cont);
                case_vars.remove(&case.var.t);
                set.extend(case_vars);
            }
            set
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use maplit::hashset;
    use pretty_assertions::assert_eq;

    fn var(name: &str) -> UntypedNode {
        enode!(Expr::Var(name.to_owned()))
    }

    fn int(n: i32) -> UntypedNode {
        enode!(Expr::IntVal(n))
    }

    #[test]
    fn test_subst_var() {
        assert_eq!(subst(&var("x"), "x", &int(1)), int(1));
        assert_eq!(subst(&var("y"), "x", &int(1)), var("y"));
    }

    #[test]
    fn test_subst_respects_let_shadowing() {
        // let x = x; x  --[x := 1]-->  let x = 1; x
        let node = enode!(Expr::Let(
            zspan!("x".to_owned()),
            Box::new(var("x")),
            Box::new(var("x"))
        ));
        let expected = enode!(Expr::Let(
            zspan!("x".to_owned()),
            Box::new(int(1)),
            Box::new(var("x"))
        ));
        assert_eq!(subst(&node, "x", &int(1)), expected);
    }

    #[test]
    fn test_subst_respects_lambda_shadowing() {
        let node = enode!(Expr::Lambda(
            vec![LambdaParam {
                id: zspan!("x".to_owned()),
                ty: zspan!(PretypeType::Id("int".to_owned())),
            }],
            Box::new(var("x"))
        ));
        assert_eq!(subst(&node, "x", &int(1)), node);
    }

    #[test]
    fn test_subst_respects_match_binders() {
        let node = enode!(Expr::Match(
            Box::new(var("u")),
            vec![
                MatchCase {
                    label: zspan!("Some".to_owned()),
                    var: zspan!("x".to_owned()),
                    cont: var("x"),
                },
                MatchCase {
                    label: zspan!("None".to_owned()),
                    var: zspan!("y".to_owned()),
                    cont: var("x"),
                },
            ]
        ));
        let substituted = subst(&node, "x", &int(1));
        if let Expr::Match(_, cases) = &substituted.expr {
            assert_eq!(cases[0].cont, var("x"));
            assert_eq!(cases[1].cont, int(1));
        } else {
            panic!("expected a match");
        }
    }

    #[test]
    fn test_subst_respects_for_binder() {
        let node = enode!(Expr::For(
            zspan!("i".to_owned()),
            Box::new(var("i")),
            Box::new(var("i")),
            Box::new(var("i")),
            Box::new(var("i"))
        ));
        let substituted = subst(&node, "i", &int(0));
        if let Expr::For(_, init, cond, ..) = &substituted.expr {
            assert_eq!(**init, int(0));
            assert_eq!(**cond, var("i"));
        } else {
            panic!("expected a for loop");
        }
    }

    #[test]
    fn test_free_vars() {
        let node = enode!(Expr::Let(
            zspan!("x".to_owned()),
            Box::new(var("y")),
            Box::new(enode!(Expr::Arith(
                Box::new(var("x")),
                ArithOp::Add,
                Box::new(var("z"))
            )))
        ));
        assert_eq!(free_vars(&node), hashset! { "y".to_owned(), "z".to_owned() });
    }

    #[test]
    fn test_captured_vars_ignores_bare_occurrences() {
        let node = enode!(Expr::Arith(
            Box::new(var("x")),
            ArithOp::Add,
            Box::new(var("y"))
        ));
        assert_eq!(free_vars(&node), hashset! { "x".to_owned(), "y".to_owned() });
        assert_eq!(captured_vars(&node), hashset! {});
    }

    #[test]
    fn test_captured_vars_of_lambda() {
        let lambda = enode!(Expr::Lambda(
            vec![LambdaParam {
                id: zspan!("x".to_owned()),
                ty: zspan!(PretypeType::Id("int".to_owned())),
            }],
            Box::new(enode!(Expr::Arith(
                Box::new(var("x")),
                ArithOp::Add,
                Box::new(var("y"))
            )))
        ));
        assert_eq!(captured_vars(&lambda), hashset! { "y".to_owned() });
        assert_eq!(free_vars(&lambda), hashset! { "y".to_owned() });
    }
}
