//! The register-allocated RISC-V code generator. Every snippet writes its
//! result into the environment's target register (integer) or float target
//! register, and may only scratch registers above them; subexpressions get
//! `target + 1`, which stands in for a real register allocator.
//!
//! Type correctness is assumed: any shape mismatch found here is a compiler
//! bug and aborts with a panic naming the construct.

use crate::asm::{Asm, Data};
use crate::ast::{ArithOp, BitwiseOp, CompareOp, Expr, LambdaParam, LogicalOp};
use crate::log::CODEGEN_LOG;
use crate::rv::{FReg, Instr, Reg};
use crate::ty::{expand_type, StructField, Type, TypingEnv};
use crate::typecheck::TypedNode;
use slog::debug;
use std::collections::HashMap;

/// Where a variable's runtime value lives: an integer target register, a
/// float target register, a label (function bodies, globals), or a positive
/// offset from `sp` (stack-passed arguments).
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Reg(u8),
    FReg(u8),
    Label(String),
    Frame(i32),
}

#[derive(Debug, Clone, Default)]
pub struct CodegenEnv {
    target: u8,
    fp_target: u8,
    storage: HashMap<String, Storage>,
}

impl CodegenEnv {
    fn reg(&self) -> Reg {
        Reg::target(self.target)
    }

    fn freg(&self) -> FReg {
        FReg::target(self.fp_target)
    }

    fn bump(&self) -> CodegenEnv {
        let mut env = self.clone();
        env.target += 1;
        env
    }

    fn bump_fp(&self) -> CodegenEnv {
        let mut env = self.clone();
        env.fp_target += 1;
        env
    }

    fn bind(&self, name: &str, storage: Storage) -> CodegenEnv {
        let mut env = self.clone();
        env.storage.insert(name.to_owned(), storage);
        env
    }
}

/// Process-wide monotonic label source, threaded through the generator so
/// two emitted labels never collide within one run.
#[derive(Debug, Default)]
pub struct LabelGenerator {
    count: usize,
}

impl LabelGenerator {
    pub fn new_label(&mut self, prefix: &str) -> String {
        let count = self.count;
        self.count += 1;
        format!("{}_{}", prefix, count)
    }
}

/// The assertion-violation exit code delivered through Exit2.
const ASSERT_EXIT_CODE: i32 = 42;

/// Callee-saved registers spilled by every function prologue: ra, fp,
/// s1-s11, then fs0-fs11.
const CALLEE_SAVED_INTS: u8 = 13;
const CALLEE_SAVED_FLOATS: u8 = 12;
const FRAME_SAVE_BYTES: i32 = 4 * (CALLEE_SAVED_INTS as i32 + CALLEE_SAVED_FLOATS as i32);

fn callee_saved_ints() -> Vec<Reg> {
    let mut regs = vec![Reg::Ra, Reg::Fp];
    for i in 1..=11 {
        regs.push(Reg::S(i));
    }
    regs
}

fn callee_saved_floats() -> Vec<FReg> {
    (0..12).map(FReg::Fs).collect()
}

fn real_ty(node: &TypedNode) -> Type {
    expand_type(&node.env, &node.ty)
        .unwrap_or_else(|| panic!("unresolvable type {} in code generator", node.ty))
}

fn is_float(node: &TypedNode) -> bool {
    real_ty(node) == Type::Float
}

fn struct_fields(node: &TypedNode) -> Vec<StructField> {
    match real_ty(node) {
        Type::Struct(fields) => fields,
        ty => panic!("expected a struct type in code generator, found {}", ty),
    }
}

fn field_offset(fields: &[StructField], name: &str) -> i32 {
    let index = fields
        .iter()
        .position(|f| f.id == name)
        .unwrap_or_else(|| panic!("missing struct field {} in code generator", name));
    4 * index as i32
}

#[derive(Debug, Default)]
pub struct Codegen {
    labels: LabelGenerator,
}

/// Compile a typed program into a complete RARS assembly document: frame
/// pointer initialisation, the program text, an exit syscall, and every
/// compiled function in post-text.
pub fn codegen_program(node: &TypedNode) -> Asm {
    let mut codegen = Codegen::default();
    let body = codegen.gen(&CodegenEnv::default(), node);
    debug!(CODEGEN_LOG, "program compiled";
           "text" => body.text.len(), "post_text" => body.post_text.len());
    Asm::new()
        .instr(Instr::Mv(Reg::Fp, Reg::Sp), "initialise frame pointer")
        .concat(body)
        .instr(Instr::Li(Reg::A(7), 10), "exit")
        .instr(Instr::Ecall, "")
}

impl Codegen {
    fn gen(&mut self, env: &CodegenEnv, node: &TypedNode) -> Asm {
        match &node.expr {
            Expr::UnitVal => Asm::new(),
            Expr::BoolVal(b) => {
                Asm::new().instr(Instr::Li(env.reg(), *b as i32), "bool literal")
            }
            Expr::IntVal(n) => Asm::new().instr(Instr::Li(env.reg(), *n), ""),
            Expr::FloatVal(x) => {
                let label = self.labels.new_label("float");
                Asm::new()
                    .data(label.clone(), Data::Float(*x))
                    .instr(Instr::La(env.reg(), label), "float literal")
                    .instr(Instr::Flw(env.freg(), 0, env.reg()), "")
            }
            Expr::StringVal(s) => {
                let label = self.labels.new_label("string");
                Asm::new()
                    .data(label.clone(), Data::Asciz(s.clone()))
                    .instr(Instr::La(env.reg(), label), "string literal")
            }
            Expr::Var(name) => {
                let storage = env
                    .storage
                    .get(name)
                    .unwrap_or_else(|| panic!("unknown variable {} in code generator", name))
                    .clone();
                let float = is_float(node);
                match (storage, float) {
                    (Storage::Reg(i), _) => {
                        Asm::new().instr(Instr::Mv(env.reg(), Reg::target(i)), name)
                    }
                    (Storage::FReg(i), _) => {
                        Asm::new().instr(Instr::FmvS(env.freg(), FReg::target(i)), name)
                    }
                    (Storage::Label(label), false) => {
                        Asm::new().instr(Instr::La(env.reg(), label), name)
                    }
                    (Storage::Label(label), true) => Asm::new()
                        .instr(Instr::La(env.reg(), label), name)
                        .instr(Instr::Flw(env.freg(), 0, env.reg()), ""),
                    (Storage::Frame(offset), false) => {
                        Asm::new().instr(Instr::Lw(env.reg(), offset, Reg::Sp), name)
                    }
                    (Storage::Frame(offset), true) => {
                        Asm::new().instr(Instr::Flw(env.freg(), offset, Reg::Sp), name)
                    }
                }
            }
            Expr::Arith(l, op, r) => {
                if is_float(node) {
                    let asm = self.gen(env, l).concat(self.gen(&env.bump_fp(), r));
                    let (fd, fs1, fs2) = (env.freg(), env.freg(), env.bump_fp().freg());
                    let instr = match op {
                        ArithOp::Add => Instr::FaddS(fd, fs1, fs2),
                        ArithOp::Sub => Instr::FsubS(fd, fs1, fs2),
                        ArithOp::Mul => Instr::FmulS(fd, fs1, fs2),
                        ArithOp::Div => Instr::FdivS(fd, fs1, fs2),
                        ArithOp::Rem => panic!("float remainder in code generator"),
                    };
                    asm.instr(instr, &op.to_string())
                } else {
                    let asm = self.gen(env, l).concat(self.gen(&env.bump(), r));
                    let (rd, rs1, rs2) = (env.reg(), env.reg(), env.bump().reg());
                    let instr = match op {
                        ArithOp::Add => Instr::Add(rd, rs1, rs2),
                        ArithOp::Sub => Instr::Sub(rd, rs1, rs2),
                        ArithOp::Mul => Instr::Mul(rd, rs1, rs2),
                        ArithOp::Div => Instr::Div(rd, rs1, rs2),
                        ArithOp::Rem => Instr::Rem(rd, rs1, rs2),
                    };
                    asm.instr(instr, &op.to_string())
                }
            }
            Expr::ArithAssign(target, op, rhs) => {
                // Compiles exactly like the desugared assignment.
                let op_node = node.with_expr(Expr::Arith(target.clone(), *op, rhs.clone()));
                let assign = node.with_expr(Expr::Assign(target.clone(), Box::new(op_node)));
                self.gen(env, &assign)
            }
            Expr::Bitwise(l, op, r) => {
                let asm = self.gen(env, l).concat(self.gen(&env.bump(), r));
                let (rd, rs1, rs2) = (env.reg(), env.reg(), env.bump().reg());
                let instr = match op {
                    BitwiseOp::And => Instr::And(rd, rs1, rs2),
                    BitwiseOp::Or => Instr::Or(rd, rs1, rs2),
                    BitwiseOp::Xor => Instr::Xor(rd, rs1, rs2),
                    BitwiseOp::Shl => Instr::Sll(rd, rs1, rs2),
                    BitwiseOp::Shr => Instr::Srl(rd, rs1, rs2),
                };
                asm.instr(instr, &op.to_string())
            }
            Expr::BNot(e) => self
                .gen(env, e)
                .instr(Instr::Not(env.reg(), env.reg()), "~"),
            Expr::Logical(l, op, r) => {
                let asm = self.gen(env, l).concat(self.gen(&env.bump(), r));
                let (rd, rs1, rs2) = (env.reg(), env.reg(), env.bump().reg());
                let instr = match op {
                    LogicalOp::And => Instr::And(rd, rs1, rs2),
                    LogicalOp::Or => Instr::Or(rd, rs1, rs2),
                    LogicalOp::Xor => Instr::Xor(rd, rs1, rs2),
                };
                asm.instr(instr, &op.to_string())
            }
            Expr::Not(e) => self
                .gen(env, e)
                .instr(Instr::Seqz(env.reg(), env.reg()), "logical not"),
            Expr::ScAnd(l, r) => {
                let end = self.labels.new_label("sc_end");
                self.gen(env, l)
                    .instr(
                        Instr::Beqz(env.reg(), end.clone()),
                        "short-circuit: false stays",
                    )
                    .concat(self.gen(env, r))
                    .label(end)
            }
            Expr::ScOr(l, r) => {
                let end = self.labels.new_label("sc_end");
                self.gen(env, l)
                    .instr(
                        Instr::Bnez(env.reg(), end.clone()),
                        "short-circuit: true stays",
                    )
                    .concat(self.gen(env, r))
                    .label(end)
            }
            Expr::Neg(e) => self
                .gen(env, e)
                .instr(Instr::Neg(env.reg(), env.reg()), "negation"),
            Expr::Compare(l, op, r) => {
                if is_float(l) {
                    let asm = self.gen(env, l).concat(self.gen(&env.bump_fp(), r));
                    let (rd, f1, f2) = (env.reg(), env.freg(), env.bump_fp().freg());
                    let instr = match op {
                        CompareOp::Eq => Instr::FeqS(rd, f1, f2),
                        CompareOp::Less => Instr::FltS(rd, f1, f2),
                        CompareOp::LessEq => Instr::FleS(rd, f1, f2),
                        CompareOp::Greater => Instr::FltS(rd, f2, f1),
                        CompareOp::GreaterEq => Instr::FleS(rd, f2, f1),
                    };
                    asm.instr(instr, &op.to_string())
                } else {
                    let asm = self.gen(env, l).concat(self.gen(&env.bump(), r));
                    let true_label = self.labels.new_label("cmp_true");
                    let end_label = self.labels.new_label("cmp_end");
                    let (rs1, rs2) = (env.reg(), env.bump().reg());
                    let branch = match op {
                        CompareOp::Eq => Instr::Beq(rs1, rs2, true_label.clone()),
                        CompareOp::Less => Instr::Blt(rs1, rs2, true_label.clone()),
                        CompareOp::LessEq => Instr::Ble(rs1, rs2, true_label.clone()),
                        CompareOp::Greater => Instr::Bgt(rs1, rs2, true_label.clone()),
                        CompareOp::GreaterEq => Instr::Bge(rs1, rs2, true_label.clone()),
                    };
                    asm.instr(branch, &op.to_string())
                        .instr(Instr::Li(env.reg(), 0), "")
                        .instr(Instr::J(end_label.clone()), "")
                        .label(true_label)
                        .instr(Instr::Li(env.reg(), 1), "")
                        .label(end_label)
                }
            }
            Expr::Sqrt(e) => self
                .gen(env, e)
                .instr(Instr::FsqrtS(env.freg(), env.freg()), "sqrt"),
            Expr::ReadInt => Asm::new()
                .instr(Instr::Li(Reg::A(7), 5), "read int")
                .instr(Instr::Ecall, "")
                .instr(Instr::Mv(env.reg(), Reg::A(0)), ""),
            Expr::ReadFloat => Asm::new()
                .instr(Instr::Li(Reg::A(7), 6), "read float")
                .instr(Instr::Ecall, "")
                .instr(Instr::FmvS(env.freg(), FReg::Fa(0)), ""),
            Expr::Print(e) => self.gen_print(env, e),
            Expr::PrintLn(e) => self
                .gen_print(env, e)
                .instr(Instr::Li(Reg::A(0), 10), "newline")
                .instr(Instr::Li(Reg::A(7), 11), "print char")
                .instr(Instr::Ecall, ""),
            Expr::Syscall(number, args) => {
                let mut asm = Asm::new();
                let mut int_index = 0;
                let mut float_index = 0;
                for arg in args {
                    asm = asm.concat(self.gen(env, arg));
                    if is_float(arg) {
                        asm = asm.instr(
                            Instr::FmvS(FReg::Fa(float_index), env.freg()),
                            "syscall argument",
                        );
                        float_index += 1;
                    } else {
                        asm = asm.instr(
                            Instr::Mv(Reg::A(int_index), env.reg()),
                            "syscall argument",
                        );
                        int_index += 1;
                    }
                }
                asm = asm
                    .instr(
                        Instr::Li(Reg::A(7), *number),
                        &crate::syscall::name(*number),
                    )
                    .instr(Instr::Ecall, "");
                match real_ty(node) {
                    Type::Unit => asm,
                    Type::Float => asm.instr(Instr::FmvS(env.freg(), FReg::Fa(0)), "result"),
                    _ => asm.instr(Instr::Mv(env.reg(), Reg::A(0)), "result"),
                }
            }
            Expr::PreInc(e) | Expr::PostInc(e) => {
                let pre = matches!(node.expr, Expr::PreInc(_));
                let name = match &e.expr {
                    Expr::Var(name) => name,
                    _ => panic!("increment target must be a variable in code generator"),
                };
                match env.storage.get(name) {
                    Some(Storage::Reg(i)) => {
                        let var = Reg::target(*i);
                        if pre {
                            Asm::new()
                                .instr(Instr::Addi(var, var, 1), "pre-increment")
                                .instr(Instr::Mv(env.reg(), var), "")
                        } else {
                            Asm::new()
                                .instr(Instr::Mv(env.reg(), var), "post-increment")
                                .instr(Instr::Addi(var, var, 1), "")
                        }
                    }
                    Some(Storage::FReg(i)) => {
                        let var = FReg::target(*i);
                        let one = |asm: Asm, freg: FReg, env: &CodegenEnv| {
                            asm.instr(Instr::Li(env.reg(), 1), "")
                                .instr(Instr::FcvtSW(freg, env.reg()), "1.0")
                        };
                        if pre {
                            let asm = one(Asm::new(), env.freg(), env);
                            asm.instr(Instr::FaddS(var, var, env.freg()), "pre-increment")
                                .instr(Instr::FmvS(env.freg(), var), "")
                        } else {
                            let scratch = env.bump_fp().freg();
                            let asm = Asm::new()
                                .instr(Instr::FmvS(env.freg(), var), "post-increment");
                            one(asm, scratch, env)
                                .instr(Instr::FaddS(var, var, scratch), "")
                        }
                    }
                    storage => panic!(
                        "increment target {} has non-register storage {:?}",
                        name, storage
                    ),
                }
            }
            Expr::If(cond, then_branch, else_branch) => {
                let true_label = self.labels.new_label("then");
                let false_label = self.labels.new_label("else");
                let end_label = self.labels.new_label("endif");
                self.gen(env, cond)
                    .instr(Instr::Bnez(env.reg(), true_label.clone()), "if")
                    .instr(Instr::La(env.reg(), false_label.clone()), "")
                    .instr(Instr::Jr(env.reg()), "far jump to else")
                    .label(true_label)
                    .concat(self.gen(env, then_branch))
                    .instr(Instr::J(end_label.clone()), "")
                    .label(false_label)
                    .concat(self.gen(env, else_branch))
                    .label(end_label)
            }
            Expr::Seq(nodes) => nodes
                .iter()
                .fold(Asm::new(), |asm, n| asm.concat(self.gen(env, n))),
            Expr::Type(_, _, scope) => self.gen(env, scope),
            Expr::Ascription(_, e) => self.gen(env, e),
            Expr::Assertion(e) => {
                let ok_label = self.labels.new_label("assert_ok");
                self.gen(env, e)
                    .instr(Instr::Addi(env.reg(), env.reg(), -1), "assertion")
                    .instr(Instr::Beqz(env.reg(), ok_label.clone()), "")
                    .instr(
                        Instr::Li(Reg::A(0), ASSERT_EXIT_CODE),
                        "assertion violation exit code",
                    )
                    .instr(Instr::Li(Reg::A(7), 93), "exit2")
                    .instr(Instr::Ecall, "")
                    .label(ok_label)
            }
            Expr::Copy(e) => {
                let fields = struct_fields(e);
                let src = self.gen(env, e);
                src.concat(self.gen_copy_struct(env, &node.env, &fields))
            }
            Expr::Let(name, init, scope)
            | Expr::LetT(name, _, init, scope)
            | Expr::LetMut(name, init, scope) => {
                if let Expr::Lambda(params, body) = &init.expr {
                    let label = self.labels.new_label(&format!("fun_{}", name.t));
                    let inner_env = env.bind(&name.t, Storage::Label(label.clone()));
                    let function = self.compile_function(&inner_env, &label, init, params, body);
                    return function.concat(self.gen(&inner_env, scope));
                }
                if is_float(init) {
                    let init_asm = self.gen(env, init);
                    let inner_env = env
                        .bind(&name.t, Storage::FReg(env.fp_target))
                        .bump_fp();
                    let scope_asm = self.gen(&inner_env, scope);
                    let asm = init_asm.concat(scope_asm);
                    if is_float(scope) {
                        asm.instr(
                            Instr::FmvS(env.freg(), inner_env.freg()),
                            "let result",
                        )
                    } else {
                        asm
                    }
                } else {
                    let init_asm = self.gen(env, init);
                    let inner_env = env.bind(&name.t, Storage::Reg(env.target)).bump();
                    let scope_asm = self.gen(&inner_env, scope);
                    let asm = init_asm.concat(scope_asm);
                    if is_float(scope) {
                        asm
                    } else {
                        asm.instr(Instr::Mv(env.reg(), inner_env.reg()), "let result")
                    }
                }
            }
            Expr::Assign(target, rhs) => self.gen_assign(env, target, rhs),
            Expr::While(cond, body) => {
                let begin_label = self.labels.new_label("while_begin");
                let body_label = self.labels.new_label("while_body");
                let end_label = self.labels.new_label("while_end");
                Asm::new()
                    .label(begin_label.clone())
                    .concat(self.gen(env, cond))
                    .instr(Instr::Bnez(env.reg(), body_label.clone()), "while")
                    .instr(Instr::La(env.reg(), end_label.clone()), "")
                    .instr(Instr::Jr(env.reg()), "far jump out of loop")
                    .label(body_label)
                    .concat(self.gen(env, body))
                    .instr(Instr::J(begin_label), "")
                    .label(end_label)
            }
            Expr::For(var, init, cond, update, body) => {
                // Same desugaring as the evaluator: a mutable binding over a
                // while loop running body then update.
                let seq = node.with_expr(Expr::Seq(vec![(**body).clone(), (**update).clone()]));
                let while_node = node.with_expr(Expr::While(cond.clone(), Box::new(seq)));
                let desugared = node.with_expr(Expr::LetMut(
                    var.clone(),
                    init.clone(),
                    Box::new(while_node),
                ));
                self.gen(env, &desugared)
            }
            Expr::Lambda(params, body) => {
                let label = self.labels.new_label("lambda");
                let function = self.compile_function(env, &label, node, params, body);
                function.instr(Instr::La(env.reg(), label), "lambda value")
            }
            Expr::App(f, args) => self.gen_app(env, node, f, args),
            Expr::StructCons(fields) => {
                let mut asm = Asm::new()
                    .instr(
                        Instr::Li(Reg::A(0), 4 * fields.len() as i32),
                        "allocate struct",
                    )
                    .instr(Instr::Li(Reg::A(7), 9), "sbrk")
                    .instr(Instr::Ecall, "")
                    .instr(Instr::Mv(env.reg(), Reg::A(0)), "struct base pointer");
                for (i, field) in fields.iter().enumerate() {
                    asm = asm.concat(self.gen(&env.bump(), &field.init));
                    let instr = if is_float(&field.init) {
                        Instr::Fsw(env.freg(), 4 * i as i32, env.reg())
                    } else {
                        Instr::Sw(env.bump().reg(), 4 * i as i32, env.reg())
                    };
                    asm = asm.instr(instr, &field.id.t);
                }
                asm
            }
            Expr::FieldSelect(obj, field) => {
                let fields = struct_fields(obj);
                let offset = field_offset(&fields, &field.t);
                let asm = self.gen(env, obj);
                if is_float(node) {
                    asm.instr(Instr::Flw(env.freg(), offset, env.reg()), &field.t)
                } else {
                    asm.instr(Instr::Lw(env.reg(), offset, env.reg()), &field.t)
                }
            }
            Expr::UnionCons(..) => {
                unimplemented!("code generation for union constructors")
            }
            Expr::Match(..) => unimplemented!("code generation for match expressions"),
            Expr::ArrayCons(length, init) => {
                let n = match &length.expr {
                    Expr::IntVal(n) if *n >= 0 => *n,
                    Expr::IntVal(n) => panic!("negative array length {}", n),
                    _ => panic!("array length must be an integer literal"),
                };
                let mut asm = Asm::new()
                    .instr(Instr::Li(Reg::A(0), 4 * (n + 1)), "allocate array")
                    .instr(Instr::Li(Reg::A(7), 9), "sbrk")
                    .instr(Instr::Ecall, "")
                    .instr(Instr::Mv(env.reg(), Reg::A(0)), "array base pointer")
                    .instr(Instr::Li(env.bump().reg(), n), "")
                    .instr(Instr::Sw(env.bump().reg(), 0, env.reg()), "length slot");
                asm = asm.concat(self.gen(&env.bump(), init));
                for i in 0..n {
                    let instr = if is_float(init) {
                        Instr::Fsw(env.freg(), 4 * (i + 1), env.reg())
                    } else {
                        Instr::Sw(env.bump().reg(), 4 * (i + 1), env.reg())
                    };
                    asm = asm.instr(instr, "");
                }
                asm
            }
            Expr::ArrayElem(arr, index) => {
                let asm = self
                    .gen(env, arr)
                    .concat(self.gen(&env.bump(), index))
                    .concat(self.gen_elem_address(env));
                if is_float(node) {
                    asm.instr(Instr::Flw(env.freg(), 0, env.reg()), "array element")
                } else {
                    asm.instr(Instr::Lw(env.reg(), 0, env.reg()), "array element")
                }
            }
            Expr::ArrayLength(arr) => self
                .gen(env, arr)
                .instr(Instr::Lw(env.reg(), 0, env.reg()), "array length"),
            Expr::Pointer(_) => {
                unreachable!("heap pointers cannot appear in source programs")
            }
        }
    }

    /// With the array base in `target` and the index in `target + 1`,
    /// collapses the element address into `target`: skip the length slot,
    /// then scale the index by the word size.
    fn gen_elem_address(&mut self, env: &CodegenEnv) -> Asm {
        let index = env.bump().reg();
        Asm::new()
            .instr(Instr::Slli(index, index, 2), "scale index")
            .instr(Instr::Addi(index, index, 4), "skip length slot")
            .instr(Instr::Add(env.reg(), env.reg(), index), "element address")
    }

    fn gen_print(&mut self, env: &CodegenEnv, arg: &TypedNode) -> Asm {
        let asm = self.gen(env, arg);
        match real_ty(arg) {
            Type::Int => asm
                .instr(Instr::Mv(Reg::A(0), env.reg()), "")
                .instr(Instr::Li(Reg::A(7), 1), "print int")
                .instr(Instr::Ecall, ""),
            Type::Float => asm
                .instr(Instr::FmvS(FReg::Fa(0), env.freg()), "")
                .instr(Instr::Li(Reg::A(7), 2), "print float")
                .instr(Instr::Ecall, ""),
            Type::String => asm
                .instr(Instr::Mv(Reg::A(0), env.reg()), "")
                .instr(Instr::Li(Reg::A(7), 4), "print string")
                .instr(Instr::Ecall, ""),
            Type::Bool => {
                let true_data = self.labels.new_label("bool_true");
                let false_data = self.labels.new_label("bool_false");
                let false_label = self.labels.new_label("print_false");
                let end_label = self.labels.new_label("print_end");
                asm.data(true_data.clone(), Data::Asciz("true".to_owned()))
                    .data(false_data.clone(), Data::Asciz("false".to_owned()))
                    .instr(Instr::Beqz(env.reg(), false_label.clone()), "print bool")
                    .instr(Instr::La(Reg::A(0), true_data), "")
                    .instr(Instr::J(end_label.clone()), "")
                    .label(false_label)
                    .instr(Instr::La(Reg::A(0), false_data), "")
                    .label(end_label)
                    .instr(Instr::Li(Reg::A(7), 4), "print string")
                    .instr(Instr::Ecall, "")
            }
            ty => panic!("cannot print a value of type {} in code generator", ty),
        }
    }

    fn gen_assign(&mut self, env: &CodegenEnv, target: &TypedNode, rhs: &TypedNode) -> Asm {
        match &target.expr {
            Expr::Var(name) => {
                let storage = env
                    .storage
                    .get(name)
                    .unwrap_or_else(|| panic!("unknown variable {} in code generator", name))
                    .clone();
                let asm = self.gen(env, rhs);
                match (storage, is_float(rhs)) {
                    (Storage::Reg(i), _) => {
                        asm.instr(Instr::Mv(Reg::target(i), env.reg()), name)
                    }
                    (Storage::FReg(i), _) => {
                        asm.instr(Instr::FmvS(FReg::target(i), env.freg()), name)
                    }
                    (Storage::Frame(offset), false) => {
                        asm.instr(Instr::Sw(env.reg(), offset, Reg::Sp), name)
                    }
                    (Storage::Frame(offset), true) => {
                        asm.instr(Instr::Fsw(env.freg(), offset, Reg::Sp), name)
                    }
                    (Storage::Label(label), false) => asm
                        .instr(Instr::La(env.bump().reg(), label), name)
                        .instr(Instr::Sw(env.reg(), 0, env.bump().reg()), ""),
                    (Storage::Label(label), true) => asm
                        .instr(Instr::La(env.reg(), label), name)
                        .instr(Instr::Fsw(env.freg(), 0, env.reg()), ""),
                }
            }
            Expr::FieldSelect(obj, field) => {
                let fields = struct_fields(obj);
                let offset = field_offset(&fields, &field.t);
                let asm = self.gen(env, obj).concat(self.gen(&env.bump(), rhs));
                if is_float(rhs) {
                    asm.instr(Instr::Fsw(env.freg(), offset, env.reg()), &field.t)
                } else {
                    asm.instr(Instr::Sw(env.bump().reg(), offset, env.reg()), &field.t)
                        .instr(Instr::Mv(env.reg(), env.bump().reg()), "assigned value")
                }
            }
            Expr::ArrayElem(arr, index) => {
                let asm = self
                    .gen(env, arr)
                    .concat(self.gen(&env.bump(), index))
                    .concat(self.gen_elem_address(env))
                    .concat(self.gen(&env.bump(), rhs));
                if is_float(rhs) {
                    asm.instr(Instr::Fsw(env.freg(), 0, env.reg()), "element assign")
                } else {
                    asm.instr(Instr::Sw(env.bump().reg(), 0, env.reg()), "element assign")
                        .instr(Instr::Mv(env.reg(), env.bump().reg()), "assigned value")
                }
            }
            _ => panic!("invalid assignment target in code generator"),
        }
    }

    fn gen_app(
        &mut self,
        env: &CodegenEnv,
        node: &TypedNode,
        f: &TypedNode,
        args: &[TypedNode],
    ) -> Asm {
        // Caller-saved banks, minus the registers that will receive the
        // result (they are overwritten anyway).
        let mut int_saves: Vec<Reg> = (0..8).map(Reg::A).collect();
        for i in 0..7 {
            if env.target != i {
                int_saves.push(Reg::T(i));
            }
        }
        let mut float_saves: Vec<FReg> = (0..8).map(FReg::Fa).collect();
        for i in 0..12 {
            if env.fp_target != i {
                float_saves.push(FReg::Ft(i));
            }
        }
        let save_bytes = 4 * (int_saves.len() + float_saves.len()) as i32;

        let mut asm = self
            .gen(env, f)
            .instr(Instr::Addi(Reg::Sp, Reg::Sp, -save_bytes), "save caller-saved");
        for (i, reg) in int_saves.iter().enumerate() {
            asm = asm.instr(Instr::Sw(*reg, 4 * i as i32, Reg::Sp), "");
        }
        for (i, freg) in float_saves.iter().enumerate() {
            asm = asm.instr(
                Instr::Fsw(*freg, 4 * (int_saves.len() + i) as i32, Reg::Sp),
                "",
            );
        }

        // Arguments past the eighth of each bank go on the stack.
        let int_args = args.iter().filter(|a| !is_float(a)).count();
        let float_args = args.len() - int_args;
        let stack_slots =
            int_args.saturating_sub(8) as i32 + float_args.saturating_sub(8) as i32;
        if stack_slots > 0 {
            asm = asm.instr(
                Instr::Addi(Reg::Sp, Reg::Sp, -4 * stack_slots),
                "stack-passed arguments",
            );
        }

        let arg_env = env.bump();
        let mut int_index = 0u8;
        let mut float_index = 0u8;
        let mut stack_slot = 0i32;
        for arg in args {
            asm = asm.concat(self.gen(&arg_env, arg));
            if is_float(arg) {
                if float_index < 8 {
                    asm = asm.instr(
                        Instr::FmvS(FReg::Fa(float_index), arg_env.freg()),
                        "argument",
                    );
                } else {
                    asm = asm.instr(
                        Instr::Fsw(arg_env.freg(), 4 * stack_slot, Reg::Sp),
                        "stack argument",
                    );
                    stack_slot += 1;
                }
                float_index += 1;
            } else {
                if int_index < 8 {
                    asm = asm.instr(Instr::Mv(Reg::A(int_index), arg_env.reg()), "argument");
                } else {
                    asm = asm.instr(
                        Instr::Sw(arg_env.reg(), 4 * stack_slot, Reg::Sp),
                        "stack argument",
                    );
                    stack_slot += 1;
                }
                int_index += 1;
            }
        }

        asm = asm.instr(Instr::Jalr(env.reg()), "call");
        asm = match real_ty(node) {
            Type::Unit => asm,
            Type::Float => asm.instr(Instr::FmvS(env.freg(), FReg::Fa(0)), "return value"),
            _ => asm.instr(Instr::Mv(env.reg(), Reg::A(0)), "return value"),
        };

        if stack_slots > 0 {
            asm = asm.instr(Instr::Addi(Reg::Sp, Reg::Sp, 4 * stack_slots), "");
        }
        for (i, reg) in int_saves.iter().enumerate() {
            asm = asm.instr(Instr::Lw(*reg, 4 * i as i32, Reg::Sp), "");
        }
        for (i, freg) in float_saves.iter().enumerate() {
            asm = asm.instr(
                Instr::Flw(*freg, 4 * (int_saves.len() + i) as i32, Reg::Sp),
                "",
            );
        }
        asm.instr(Instr::Addi(Reg::Sp, Reg::Sp, save_bytes), "restore caller-saved")
    }

    fn compile_function(
        &mut self,
        env: &CodegenEnv,
        label: &str,
        lambda: &TypedNode,
        params: &[LambdaParam],
        body: &TypedNode,
    ) -> Asm {
        debug!(CODEGEN_LOG, "compiling function"; "label" => label);
        let param_tys = match real_ty(lambda) {
            Type::Fn(params, _) => params,
            ty => panic!("lambda with non-function type {} in code generator", ty),
        };

        let mut asm = Asm::new().label(label.to_owned()).instr(
            Instr::Addi(Reg::Sp, Reg::Sp, -FRAME_SAVE_BYTES),
            "prologue: save callee-saved",
        );
        for (i, reg) in callee_saved_ints().iter().enumerate() {
            asm = asm.instr(Instr::Sw(*reg, 4 * i as i32, Reg::Sp), "");
        }
        for (i, freg) in callee_saved_floats().iter().enumerate() {
            asm = asm.instr(
                Instr::Fsw(
                    *freg,
                    4 * (CALLEE_SAVED_INTS as usize + i) as i32,
                    Reg::Sp,
                ),
                "",
            );
        }

        // Move arguments into the function's local target registers;
        // arguments past the eighth of each bank stay in their stack slots.
        let mut body_env = CodegenEnv {
            target: 0,
            fp_target: 0,
            storage: env.storage.clone(),
        };
        let mut int_index = 0u8;
        let mut float_index = 0u8;
        let mut stack_slot = 0i32;
        for (param, ty) in params.iter().zip(&param_tys) {
            let float = expand_type(&body.env, ty)
                .unwrap_or_else(|| panic!("unresolvable parameter type {}", ty))
                == Type::Float;
            if float {
                if float_index < 8 {
                    asm = asm.instr(
                        Instr::FmvS(FReg::target(body_env.fp_target), FReg::Fa(float_index)),
                        &param.id.t,
                    );
                    body_env = body_env.bind(
                        &param.id.t,
                        Storage::FReg(body_env.fp_target),
                    );
                    body_env.fp_target += 1;
                } else {
                    body_env = body_env.bind(
                        &param.id.t,
                        Storage::Frame(FRAME_SAVE_BYTES + 4 * stack_slot),
                    );
                    stack_slot += 1;
                }
                float_index += 1;
            } else {
                if int_index < 8 {
                    asm = asm.instr(
                        Instr::Mv(Reg::target(body_env.target), Reg::A(int_index)),
                        &param.id.t,
                    );
                    body_env = body_env.bind(&param.id.t, Storage::Reg(body_env.target));
                    body_env.target += 1;
                } else {
                    body_env = body_env.bind(
                        &param.id.t,
                        Storage::Frame(FRAME_SAVE_BYTES + 4 * stack_slot),
                    );
                    stack_slot += 1;
                }
                int_index += 1;
            }
        }

        asm = asm.concat(self.gen(&body_env, body));

        asm = match real_ty(body) {
            Type::Unit => asm,
            Type::Float => asm.instr(
                Instr::FmvS(FReg::Fa(0), body_env.freg()),
                "epilogue: return value",
            ),
            _ => asm.instr(
                Instr::Mv(Reg::A(0), body_env.reg()),
                "epilogue: return value",
            ),
        };
        for (i, reg) in callee_saved_ints().iter().enumerate() {
            asm = asm.instr(Instr::Lw(*reg, 4 * i as i32, Reg::Sp), "");
        }
        for (i, freg) in callee_saved_floats().iter().enumerate() {
            asm = asm.instr(
                Instr::Flw(
                    *freg,
                    4 * (CALLEE_SAVED_INTS as usize + i) as i32,
                    Reg::Sp,
                ),
                "",
            );
        }
        asm.instr(
            Instr::Addi(Reg::Sp, Reg::Sp, FRAME_SAVE_BYTES),
            "restore callee-saved",
        )
        .instr(Instr::Jr(Reg::Ra), "")
        .text_to_post_text()
    }

    /// Unrolls a deep copy of the struct whose base pointer sits in the
    /// target register, leaving the copy's pointer there. Record-typed
    /// fields recurse; arrays copy the pointer only.
    fn gen_copy_struct(
        &mut self,
        env: &CodegenEnv,
        tyenv: &TypingEnv,
        fields: &[StructField],
    ) -> Asm {
        let dst = env.bump();
        let tmp = dst.bump();
        let mut asm = Asm::new()
            .instr(
                Instr::Li(Reg::A(0), 4 * fields.len() as i32),
                "allocate copy",
            )
            .instr(Instr::Li(Reg::A(7), 9), "sbrk")
            .instr(Instr::Ecall, "")
            .instr(Instr::Mv(dst.reg(), Reg::A(0)), "copy base pointer");
        for (i, field) in fields.iter().enumerate() {
            let offset = 4 * i as i32;
            let field_ty = expand_type(tyenv, &field.ty)
                .unwrap_or_else(|| panic!("unresolvable field type {}", field.ty));
            match field_ty {
                Type::Float => {
                    asm = asm
                        .instr(Instr::Flw(env.freg(), offset, env.reg()), &field.id)
                        .instr(Instr::Fsw(env.freg(), offset, dst.reg()), "");
                }
                Type::Struct(inner) => {
                    asm = asm
                        .instr(Instr::Lw(tmp.reg(), offset, env.reg()), &field.id)
                        .concat(self.gen_copy_struct(&tmp, tyenv, &inner))
                        .instr(Instr::Sw(tmp.reg(), offset, dst.reg()), "");
                }
                _ => {
                    asm = asm
                        .instr(Instr::Lw(tmp.reg(), offset, env.reg()), &field.id)
                        .instr(Instr::Sw(tmp.reg(), offset, dst.reg()), "");
                }
            }
        }
        asm.instr(Instr::Mv(env.reg(), dst.reg()), "copied pointer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::TextItem;
    use crate::sourcemap::Sourcemap;
    use crate::typecheck::typecheck;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn compile(src: &str) -> Asm {
        let mut sourcemap = Sourcemap::default();
        let (_, result) = sourcemap.add_file("test.hyg", src);
        let typed = typecheck(&result.expect("failed to parse")).expect("failed to typecheck");
        codegen_program(&typed)
    }

    /// The index of a register in the integer target bank, if it is in it.
    fn int_bank_index(reg: Reg) -> Option<u8> {
        match reg {
            Reg::T(i) => Some(i),
            Reg::S(i) => Some(i + 6),
            _ => None,
        }
    }

    fn float_bank_index(freg: FReg) -> Option<u8> {
        match freg {
            FReg::Ft(i) => Some(i),
            FReg::Fs(i) => Some(i + 12),
            _ => None,
        }
    }

    #[test]
    fn test_register_safety() {
        // A snippet generated at target n never writes a bank register
        // below n.
        let mut sourcemap = Sourcemap::default();
        let (_, result) =
            sourcemap.add_file("test.hyg", "{ println((2 + 3 * 4) < 20); println(1.5f + 2.5f) }");
        let typed = typecheck(&result.unwrap()).unwrap();
        let env = CodegenEnv {
            target: 3,
            fp_target: 2,
            storage: HashMap::new(),
        };
        let mut codegen = Codegen::default();
        let asm = codegen.gen(&env, &typed);
        for item in asm.all_text() {
            if let TextItem::Instr(instr, _) = item {
                if let Some(index) = instr.int_dest().and_then(int_bank_index) {
                    assert!(index >= 3, "wrote below target: {}", instr);
                }
                if let Some(index) = instr.float_dest().and_then(float_bank_index) {
                    assert!(index >= 2, "wrote below float target: {}", instr);
                }
            }
        }
    }

    #[test]
    fn test_labels_are_unique() {
        let asm = compile(
            "let mutable i = 0; \
             while i < 3 do { println(i); i <- i + 1 }; \
             if i == 3 then println(true) else println(false); \
             assert(i == 3)",
        );
        let mut seen = HashSet::new();
        for item in asm.all_text() {
            if let TextItem::Label(label) = item {
                assert!(seen.insert(label.clone()), "duplicate label {}", label);
            }
        }
        for item in &asm.data {
            assert!(seen.insert(item.label.clone()), "duplicate label {}", item.label);
        }
    }

    #[test]
    fn test_program_skeleton() {
        let asm = compile("println(42)");
        let rendered = asm.to_string();
        assert!(rendered.starts_with(".text\n    mv fp, sp"));
        assert!(rendered.contains("li a7, 1"));
        assert!(rendered.contains("li a7, 11"));
        assert!(rendered.trim_end().ends_with("ecall"));
        assert!(rendered.contains("li a7, 10"));
    }

    #[test]
    fn test_string_and_float_literals_land_in_data() {
        let asm = compile("{ print(\"hi\"); print(2.5f) }");
        let rendered = asm.to_string();
        assert!(rendered.contains(".data"));
        assert!(rendered.contains(".string \"hi\""));
        assert!(rendered.contains(".float 2.5"));
        assert!(rendered.contains("flw"));
    }

    #[test]
    fn test_bool_print_uses_two_strings() {
        let rendered = compile("println(true)").to_string();
        assert!(rendered.contains(".string \"true\""));
        assert!(rendered.contains(".string \"false\""));
        assert!(rendered.contains("li a7, 4"));
    }

    #[test]
    fn test_functions_go_to_post_text() {
        let asm = compile("fun add(x: int, y: int): int = x + y; println(add(1, 2))");
        assert!(asm
            .post_text
            .iter()
            .any(|item| matches!(item, TextItem::Label(l) if l.starts_with("fun_add"))));
        let rendered = asm.to_string();
        assert!(rendered.contains("jalr"));
        assert!(rendered.contains(&format!("addi sp, sp, -{}", FRAME_SAVE_BYTES)));
        // The exit syscall comes before the function body.
        let exit_at = rendered.find("li a7, 10").unwrap();
        let fun_at = rendered.find("fun_add").unwrap();
        assert!(exit_at < fun_at);
    }

    #[test]
    fn test_struct_and_array_allocate_with_sbrk() {
        let rendered =
            compile("let s = struct { a = 1; b = 2 }; println(s.a)").to_string();
        assert!(rendered.contains("li a0, 8"));
        assert!(rendered.contains("li a7, 9"));
        let rendered = compile("let a = array(3, 7); println(a[0])").to_string();
        assert!(rendered.contains("li a0, 16"));
        assert!(rendered.contains("slli"));
    }

    #[test]
    fn test_while_emits_far_jump_shape() {
        let rendered =
            compile("let mutable i = 0; while i < 2 do i <- i + 1").to_string();
        assert!(rendered.contains("while_begin"));
        assert!(rendered.contains("jr t"));
    }

    #[test]
    #[should_panic(expected = "integer literal")]
    fn test_non_literal_array_length_is_rejected() {
        compile("let n = 3; let a = array(n, 0); println(arrayLength(a))");
    }

    #[test]
    #[should_panic(expected = "match expressions")]
    fn test_match_is_unimplemented() {
        compile(
            "type U = union { A: int }; \
             println(match (A{1} : U) with { A{x} -> x })",
        );
    }

    #[test]
    fn test_assertion_exits_with_42() {
        let rendered = compile("assert(true)").to_string();
        assert!(rendered.contains("li a0, 42"));
        assert!(rendered.contains("li a7, 93"));
        assert!(rendered.contains("assert_ok"));
    }

    #[test]
    fn test_branch_targets_exist() {
        let asm = compile(
            "let mutable i = 0; \
             for (j = 0; j < 4; j <- j + 1) i <- i + j; \
             if i > 3 && i < 10 then println(i) else println(0)",
        );
        let mut labels = HashSet::new();
        for item in asm.all_text() {
            if let TextItem::Label(label) = item {
                labels.insert(label.clone());
            }
        }
        for item in asm.all_text() {
            if let TextItem::Instr(instr, _) = item {
                let target = match instr {
                    Instr::Beq(_, _, l)
                    | Instr::Bne(_, _, l)
                    | Instr::Blt(_, _, l)
                    | Instr::Ble(_, _, l)
                    | Instr::Bgt(_, _, l)
                    | Instr::Bge(_, _, l)
                    | Instr::Beqz(_, l)
                    | Instr::Bnez(_, l)
                    | Instr::J(l) => Some(l),
                    _ => None,
                };
                if let Some(label) = target {
                    assert!(labels.contains(label), "dangling branch target {}", label);
                }
            }
        }
    }
}
