#[macro_use]
pub mod utils;

pub mod asm;
pub mod ast;
pub mod codegen;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod log;
pub mod parser;
pub mod rv;
pub mod sourcemap;
pub mod subst;
pub mod syscall;
pub mod ty;
pub mod typecheck;

#[cfg(test)]
mod tests {
    use crate::ast::{Expr, UntypedNode};
    use crate::codegen::codegen_program;
    use crate::interpreter::{is_value, HeapDescriptor, RuntimeEnv};
    use crate::sourcemap::Sourcemap;
    use crate::subst::subst;
    use crate::ty::Type;
    use crate::typecheck::{typecheck, TypedNode};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn parse(src: &str) -> UntypedNode {
        let mut sourcemap = Sourcemap::default();
        let (_, result) = sourcemap.add_file("test.hyg", src);
        result.expect("failed to parse")
    }

    fn eval(src: &str) -> (String, TypedNode, RuntimeEnv<crate::ty::TypingEnv, Type>) {
        let typed = typecheck(&parse(src)).expect("failed to typecheck");
        let buf = SharedBuf::default();
        let mut env = RuntimeEnv::new(None, Some(Box::new(buf.clone())));
        let value = env.eval(typed);
        let output = String::from_utf8(buf.0.borrow().clone()).unwrap();
        (output, value, env)
    }

    fn eval_output(src: &str) -> String {
        let (output, value, env) = eval(src);
        assert!(
            env.exit_code.is_some() || is_value(&value),
            "program got stuck: {:?}",
            value.expr
        );
        output
    }

    /// If `Γ, x: T ⊢ e : U` and `⊢ v : T`, then `Γ ⊢ e[x := v] : U`.
    #[test]
    fn test_substitution_preserves_types() {
        let e = parse("x + 1");
        let v = parse("41");
        let substituted = subst(&e, "x", &v);
        assert_eq!(typecheck(&substituted).unwrap().ty, Type::Int);

        let e = parse("if x then 1 else 2");
        let substituted = subst(&e, "x", &parse("true"));
        assert_eq!(typecheck(&substituted).unwrap().ty, Type::Int);
    }

    /// `a && b` behaves exactly like `if a then b else false`, side effects
    /// included; `a || b` like `if a then true else b`.
    #[test]
    fn test_short_circuit_equivalence() {
        for &a in &[true, false] {
            for &b in &[true, false] {
                let sc_and = eval_output(&format!(
                    "println({{ print(0); {} }} && {{ print(1); {} }})",
                    a, b
                ));
                let if_and = eval_output(&format!(
                    "println(if {{ print(0); {} }} then {{ print(1); {} }} else false)",
                    a, b
                ));
                assert_eq!(sc_and, if_and);

                let sc_or = eval_output(&format!(
                    "println({{ print(0); {} }} || {{ print(1); {} }})",
                    a, b
                ));
                let if_or = eval_output(&format!(
                    "println(if {{ print(0); {} }} then true else {{ print(1); {} }})",
                    a, b
                ));
                assert_eq!(sc_or, if_or);
            }
        }
    }

    /// Run-time value shapes match the static types.
    #[test]
    fn test_typing_soundness_value_shapes() {
        let (_, value, _) = eval("2 + 3");
        assert_eq!(value.ty, Type::Int);
        assert!(matches!(value.expr, Expr::IntVal(5)));

        let (_, value, env) = eval("struct { a = 1; b = 2 }");
        let fields = match &value.ty {
            Type::Struct(fields) => fields,
            ty => panic!("expected a struct type, got {}", ty),
        };
        let addr = match value.expr {
            Expr::Pointer(addr) => addr,
            ref expr => panic!("expected a pointer, got {:?}", expr),
        };
        let names: Vec<String> = fields.iter().map(|f| f.id.clone()).collect();
        assert_eq!(
            env.descriptors.get(&addr),
            Some(&HeapDescriptor::Struct(names))
        );

        let (_, value, env) = eval("array(3, 0)");
        let addr = match value.expr {
            Expr::Pointer(addr) => addr,
            ref expr => panic!("expected a pointer, got {:?}", expr),
        };
        assert_eq!(env.descriptors.get(&addr), Some(&HeapDescriptor::Array(3)));
        assert!(matches!(env.heap.get(&addr).unwrap().expr, Expr::IntVal(3)));

        let (_, value, env) = eval("(A{1} : union { A: int; B: bool })");
        let labels = match &value.ty {
            Type::Union(cases) => cases.iter().map(|c| c.label.clone()).collect::<Vec<_>>(),
            ty => panic!("expected a union type, got {}", ty),
        };
        let addr = match value.expr {
            Expr::Pointer(addr) => addr,
            ref expr => panic!("expected a pointer, got {:?}", expr),
        };
        match &env.heap.get(&addr).unwrap().expr {
            Expr::StringVal(tag) => assert!(labels.contains(tag)),
            expr => panic!("expected a label tag, got {:?}", expr),
        }
    }

    /// The concrete behaviour scenarios, end to end through the evaluator.
    #[test]
    fn test_scenarios() {
        assert_eq!(eval_output("let x = 2 + 3 * 4; println(x)"), "14\n");
        assert_eq!(
            eval_output("let mutable i = 0; while i < 3 do { print(i); i <- i + 1 }"),
            "012"
        );
        assert_eq!(
            eval_output(
                "let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; \
                 p.b <- 5; println(p.a + p.b)"
            ),
            "6\n"
        );
        assert_eq!(
            eval_output(
                "let a = array(3, 7); println(arrayLength(a)); a[1] <- 9; \
                 println(arrayElem(a, 1))"
            ),
            "3\n9\n"
        );
    }

    /// The same scenarios also make it through the code generator.
    #[test]
    fn test_scenarios_compile() {
        for src in &[
            "let x = 2 + 3 * 4; println(x)",
            "let mutable i = 0; while i < 3 do { print(i); i <- i + 1 }",
            "let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; \
             p.b <- 5; println(p.a + p.b)",
            "fun square(x: int): int = x * x; assert(square(7) == 49)",
            "let a = array(3, 7); println(arrayLength(a)); a[1] <- 9; \
             println(arrayElem(a, 1))",
        ] {
            let typed = typecheck(&parse(src)).expect("failed to typecheck");
            let rendered = codegen_program(&typed).to_string();
            assert!(rendered.contains("ecall"), "no syscall emitted for {}", src);
        }
    }
}
