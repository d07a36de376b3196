//! The reference semantics: a small-step reducer over a runtime environment
//! holding the mutable-variable map, the heap, and the I/O hooks. A node
//! that is not a value and cannot be reduced is *stuck*, which is the
//! run-time error signal.

use crate::ast::{ArithOp, BitwiseOp, CompareOp, Expr, LogicalOp, Node};
use crate::subst::subst;
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// What a heap base address holds: a struct with these ordered field names,
/// or an array of this length (the base cell stores the length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapDescriptor {
    Struct(Vec<String>),
    Array(usize),
}

pub struct RuntimeEnv<E, T> {
    reader: Option<Box<dyn BufRead>>,
    printer: Option<Box<dyn Write>>,
    pub mutables: HashMap<String, Node<E, T>>,
    pub heap: HashMap<usize, Node<E, T>>,
    pub descriptors: HashMap<usize, HeapDescriptor>,
    next_addr: usize,
    /// Set by the `Exit`/`Exit2` syscalls; stops the driver loop.
    pub exit_code: Option<i32>,
}

/// A node is a value iff it is a literal, a lambda, or a heap pointer.
pub fn is_value<E, T>(node: &Node<E, T>) -> bool {
    match &node.expr {
        Expr::UnitVal
        | Expr::BoolVal(_)
        | Expr::IntVal(_)
        | Expr::FloatVal(_)
        | Expr::StringVal(_)
        | Expr::Lambda(..)
        | Expr::Pointer(_) => true,
        _ => false,
    }
}

impl<E: Clone, T: Clone> RuntimeEnv<E, T> {
    pub fn new(reader: Option<Box<dyn BufRead>>, printer: Option<Box<dyn Write>>) -> Self {
        RuntimeEnv {
            reader,
            printer,
            mutables: HashMap::new(),
            heap: HashMap::new(),
            descriptors: HashMap::new(),
            // Heap addresses are dense and non-zero.
            next_addr: 1,
            exit_code: None,
        }
    }

    fn alloc(&mut self, cells: Vec<Node<E, T>>) -> usize {
        let base = self.next_addr;
        self.next_addr += cells.len().max(1);
        for (i, cell) in cells.into_iter().enumerate() {
            self.heap.insert(base + i, cell);
        }
        base
    }

    fn read_line(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    fn write_str(&mut self, s: &str) {
        if let Some(printer) = self.printer.as_mut() {
            let _ = printer.write_all(s.as_bytes());
        }
    }

    fn format_value(node: &Node<E, T>) -> Option<String> {
        match &node.expr {
            Expr::BoolVal(b) => Some(if *b { "true".to_owned() } else { "false".to_owned() }),
            Expr::IntVal(n) => Some(n.to_string()),
            Expr::FloatVal(x) => Some(x.to_string()),
            Expr::StringVal(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn read_int(&mut self) -> Expr<E, T> {
        // A line that does not parse yields unit.
        match self.read_line().and_then(|line| line.trim().parse::<i32>().ok()) {
            Some(n) => Expr::IntVal(n),
            None => Expr::UnitVal,
        }
    }

    fn read_float(&mut self) -> Expr<E, T> {
        match self.read_line().and_then(|line| line.trim().parse::<f32>().ok()) {
            Some(x) => Expr::FloatVal(x),
            None => Expr::UnitVal,
        }
    }

    /// Deep-copy the struct at `addr`: record-typed fields are copied
    /// recursively, everything else (arrays included) cell by cell.
    fn copy_struct(&mut self, addr: usize) -> Option<usize> {
        let names = match self.descriptors.get(&addr) {
            Some(HeapDescriptor::Struct(names)) => names.clone(),
            _ => return None,
        };
        let mut cells = vec![];
        for i in 0..names.len() {
            let cell = self.heap.get(&(addr + i))?.clone();
            let cell = match cell.expr {
                Expr::Pointer(p)
                    if matches!(self.descriptors.get(&p), Some(HeapDescriptor::Struct(_))) =>
                {
                    let copied = self.copy_struct(p)?;
                    cell.with_expr(Expr::Pointer(copied))
                }
                _ => cell,
            };
            cells.push(cell);
        }
        let base = self.alloc(cells);
        self.descriptors
            .insert(base, HeapDescriptor::Struct(names));
        Some(base)
    }

    /// Reduce by one step. `None` means no step applies: either `node` is a
    /// value, or it is stuck.
    pub fn reduce(&mut self, node: &Node<E, T>) -> Option<Node<E, T>> {
        if is_value(node) {
            return None;
        }
        match &node.expr {
            Expr::UnitVal
            | Expr::BoolVal(_)
            | Expr::IntVal(_)
            | Expr::FloatVal(_)
            | Expr::StringVal(_)
            | Expr::Lambda(..)
            | Expr::Pointer(_) => None,
            Expr::Var(name) => self.mutables.get(name).cloned(),
            Expr::Arith(l, op, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::Arith(Box::new(l), *op, r.clone())));
                }
                if !is_value(r) {
                    let r = self.reduce(r)?;
                    return Some(node.with_expr(Expr::Arith(l.clone(), *op, Box::new(r))));
                }
                let expr = match (&l.expr, op, &r.expr) {
                    (Expr::IntVal(a), ArithOp::Add, Expr::IntVal(b)) => {
                        Expr::IntVal(a.wrapping_add(*b))
                    }
                    (Expr::IntVal(a), ArithOp::Sub, Expr::IntVal(b)) => {
                        Expr::IntVal(a.wrapping_sub(*b))
                    }
                    (Expr::IntVal(a), ArithOp::Mul, Expr::IntVal(b)) => {
                        Expr::IntVal(a.wrapping_mul(*b))
                    }
                    (Expr::IntVal(a), ArithOp::Div, Expr::IntVal(b)) => Expr::IntVal(a / b),
                    (Expr::IntVal(a), ArithOp::Rem, Expr::IntVal(b)) => Expr::IntVal(a % b),
                    (Expr::FloatVal(a), ArithOp::Add, Expr::FloatVal(b)) => Expr::FloatVal(a + b),
                    (Expr::FloatVal(a), ArithOp::Sub, Expr::FloatVal(b)) => Expr::FloatVal(a - b),
                    (Expr::FloatVal(a), ArithOp::Mul, Expr::FloatVal(b)) => Expr::FloatVal(a * b),
                    (Expr::FloatVal(a), ArithOp::Div, Expr::FloatVal(b)) => Expr::FloatVal(a / b),
                    _ => return None,
                };
                Some(node.with_expr(expr))
            }
            Expr::ArithAssign(target, op, rhs) => {
                // x += e  ~~>  x <- x + e
                let op_node = node.with_expr(Expr::Arith(target.clone(), *op, rhs.clone()));
                Some(node.with_expr(Expr::Assign(target.clone(), Box::new(op_node))))
            }
            Expr::Bitwise(l, op, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::Bitwise(Box::new(l), *op, r.clone())));
                }
                if !is_value(r) {
                    let r = self.reduce(r)?;
                    return Some(node.with_expr(Expr::Bitwise(l.clone(), *op, Box::new(r))));
                }
                let expr = match (&l.expr, op, &r.expr) {
                    (Expr::IntVal(a), BitwiseOp::And, Expr::IntVal(b)) => Expr::IntVal(a & b),
                    (Expr::IntVal(a), BitwiseOp::Or, Expr::IntVal(b)) => Expr::IntVal(a | b),
                    (Expr::IntVal(a), BitwiseOp::Xor, Expr::IntVal(b)) => Expr::IntVal(a ^ b),
                    (Expr::IntVal(a), BitwiseOp::Shl, Expr::IntVal(b)) => {
                        Expr::IntVal(a.wrapping_shl(*b as u32))
                    }
                    (Expr::IntVal(a), BitwiseOp::Shr, Expr::IntVal(b)) => {
                        Expr::IntVal(a.wrapping_shr(*b as u32))
                    }
                    _ => return None,
                };
                Some(node.with_expr(expr))
            }
            Expr::BNot(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::BNot(Box::new(e))));
                }
                match &e.expr {
                    Expr::IntVal(a) => Some(node.with_expr(Expr::IntVal(!a))),
                    _ => None,
                }
            }
            Expr::Logical(l, op, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::Logical(Box::new(l), *op, r.clone())));
                }
                if !is_value(r) {
                    let r = self.reduce(r)?;
                    return Some(node.with_expr(Expr::Logical(l.clone(), *op, Box::new(r))));
                }
                let expr = match (&l.expr, op, &r.expr) {
                    (Expr::BoolVal(a), LogicalOp::And, Expr::BoolVal(b)) => Expr::BoolVal(*a && *b),
                    (Expr::BoolVal(a), LogicalOp::Or, Expr::BoolVal(b)) => Expr::BoolVal(*a || *b),
                    (Expr::BoolVal(a), LogicalOp::Xor, Expr::BoolVal(b)) => Expr::BoolVal(a ^ b),
                    _ => return None,
                };
                Some(node.with_expr(expr))
            }
            Expr::Not(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::Not(Box::new(e))));
                }
                match &e.expr {
                    Expr::BoolVal(b) => Some(node.with_expr(Expr::BoolVal(!b))),
                    _ => None,
                }
            }
            Expr::ScAnd(l, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::ScAnd(Box::new(l), r.clone())));
                }
                match &l.expr {
                    Expr::BoolVal(false) => Some(node.with_expr(Expr::BoolVal(false))),
                    Expr::BoolVal(true) => Some((**r).clone()),
                    _ => None,
                }
            }
            Expr::ScOr(l, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::ScOr(Box::new(l), r.clone())));
                }
                match &l.expr {
                    Expr::BoolVal(true) => Some(node.with_expr(Expr::BoolVal(true))),
                    Expr::BoolVal(false) => Some((**r).clone()),
                    _ => None,
                }
            }
            Expr::Neg(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::Neg(Box::new(e))));
                }
                match &e.expr {
                    Expr::IntVal(n) => Some(node.with_expr(Expr::IntVal(n.wrapping_neg()))),
                    _ => None,
                }
            }
            Expr::Compare(l, op, r) => {
                if !is_value(l) {
                    let l = self.reduce(l)?;
                    return Some(node.with_expr(Expr::Compare(Box::new(l), *op, r.clone())));
                }
                if !is_value(r) {
                    let r = self.reduce(r)?;
                    return Some(node.with_expr(Expr::Compare(l.clone(), *op, Box::new(r))));
                }
                let result = match (&l.expr, &r.expr) {
                    (Expr::IntVal(a), Expr::IntVal(b)) => match op {
                        CompareOp::Eq => a == b,
                        CompareOp::Less => a < b,
                        CompareOp::LessEq => a <= b,
                        CompareOp::Greater => a > b,
                        CompareOp::GreaterEq => a >= b,
                    },
                    (Expr::FloatVal(a), Expr::FloatVal(b)) => match op {
                        CompareOp::Eq => a == b,
                        CompareOp::Less => a < b,
                        CompareOp::LessEq => a <= b,
                        CompareOp::Greater => a > b,
                        CompareOp::GreaterEq => a >= b,
                    },
                    _ => return None,
                };
                Some(node.with_expr(Expr::BoolVal(result)))
            }
            Expr::Sqrt(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::Sqrt(Box::new(e))));
                }
                match &e.expr {
                    Expr::FloatVal(x) => Some(node.with_expr(Expr::FloatVal(x.sqrt()))),
                    _ => None,
                }
            }
            Expr::ReadInt => {
                let expr = self.read_int();
                Some(node.with_expr(expr))
            }
            Expr::ReadFloat => {
                let expr = self.read_float();
                Some(node.with_expr(expr))
            }
            Expr::Print(e) | Expr::PrintLn(e) => {
                let newline = matches!(node.expr, Expr::PrintLn(_));
                if !is_value(e) {
                    let e = Box::new(self.reduce(e)?);
                    let expr = if newline {
                        Expr::PrintLn(e)
                    } else {
                        Expr::Print(e)
                    };
                    return Some(node.with_expr(expr));
                }
                let text = Self::format_value(e)?;
                self.write_str(&text);
                if newline {
                    self.write_str("\n");
                }
                Some(node.with_expr(Expr::UnitVal))
            }
            Expr::Syscall(number, args) => {
                for (i, arg) in args.iter().enumerate() {
                    if !is_value(arg) {
                        let arg = self.reduce(arg)?;
                        let mut args = args.clone();
                        args[i] = arg;
                        return Some(node.with_expr(Expr::Syscall(*number, args)));
                    }
                }
                let expr = match (*number, args.as_slice()) {
                    (1, [arg]) | (2, [arg]) | (4, [arg]) => {
                        let text = Self::format_value(arg)?;
                        self.write_str(&text);
                        Expr::UnitVal
                    }
                    (11, [arg]) => match &arg.expr {
                        Expr::IntVal(n) => {
                            let ch = std::char::from_u32(*n as u32)?;
                            self.write_str(&ch.to_string());
                            Expr::UnitVal
                        }
                        _ => return None,
                    },
                    (5, []) => self.read_int(),
                    (6, []) => self.read_float(),
                    (10, []) => {
                        self.exit_code = Some(0);
                        Expr::UnitVal
                    }
                    (93, [arg]) => match &arg.expr {
                        Expr::IntVal(code) => {
                            self.exit_code = Some(*code);
                            Expr::UnitVal
                        }
                        _ => return None,
                    },
                    _ => return None,
                };
                Some(node.with_expr(expr))
            }
            Expr::PreInc(e) | Expr::PostInc(e) => {
                let pre = matches!(node.expr, Expr::PreInc(_));
                let name = match &e.expr {
                    Expr::Var(name) => name.clone(),
                    _ => return None,
                };
                let old = self.mutables.get(&name)?.clone();
                let new_expr = match &old.expr {
                    Expr::IntVal(n) => Expr::IntVal(n.wrapping_add(1)),
                    Expr::FloatVal(x) => Expr::FloatVal(x + 1.0),
                    _ => return None,
                };
                let new = old.with_expr(new_expr);
                self.mutables.insert(name, new.clone());
                Some(if pre { new } else { old })
            }
            Expr::If(cond, then_branch, else_branch) => {
                if !is_value(cond) {
                    let cond = self.reduce(cond)?;
                    return Some(node.with_expr(Expr::If(
                        Box::new(cond),
                        then_branch.clone(),
                        else_branch.clone(),
                    )));
                }
                match &cond.expr {
                    Expr::BoolVal(true) => Some((**then_branch).clone()),
                    Expr::BoolVal(false) => Some((**else_branch).clone()),
                    _ => None,
                }
            }
            Expr::Seq(nodes) => match nodes.as_slice() {
                [] => Some(node.with_expr(Expr::UnitVal)),
                [single] => Some(single.clone()),
                [first, rest @ ..] => {
                    if is_value(first) {
                        Some(node.with_expr(Expr::Seq(rest.to_vec())))
                    } else {
                        let first = self.reduce(first)?;
                        let mut nodes = vec![first];
                        nodes.extend(rest.iter().cloned());
                        Some(node.with_expr(Expr::Seq(nodes)))
                    }
                }
            },
            Expr::Type(_, _, scope) => Some((**scope).clone()),
            Expr::Ascription(_, e) => Some((**e).clone()),
            Expr::Assertion(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::Assertion(Box::new(e))));
                }
                match &e.expr {
                    Expr::BoolVal(true) => Some(node.with_expr(Expr::UnitVal)),
                    _ => None,
                }
            }
            Expr::Copy(e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::Copy(Box::new(e))));
                }
                match &e.expr {
                    Expr::Pointer(addr) => {
                        let copied = self.copy_struct(*addr)?;
                        Some(node.with_expr(Expr::Pointer(copied)))
                    }
                    _ => None,
                }
            }
            Expr::Let(name, init, scope) | Expr::LetT(name, _, init, scope) => {
                if !is_value(init) {
                    let init = Box::new(self.reduce(init)?);
                    let expr = match &node.expr {
                        Expr::Let(..) => Expr::Let(name.clone(), init, scope.clone()),
                        Expr::LetT(_, pt, ..) => {
                            Expr::LetT(name.clone(), pt.clone(), init, scope.clone())
                        }
                        _ => unreachable!(),
                    };
                    return Some(node.with_expr(expr));
                }
                Some(subst(scope, &name.t, init))
            }
            Expr::LetMut(name, init, scope) => {
                if !is_value(init) {
                    let init = Box::new(self.reduce(init)?);
                    return Some(node.with_expr(Expr::LetMut(name.clone(), init, scope.clone())));
                }
                if is_value(scope) {
                    return Some((**scope).clone());
                }
                // The init slot carries the mutable's current value between
                // steps; assignments inside the scope update the map entry.
                let prev = self.mutables.insert(name.t.clone(), (**init).clone());
                let scope_step = self.reduce(scope);
                let current = self
                    .mutables
                    .get(&name.t)
                    .cloned()
                    .unwrap_or_else(|| (**init).clone());
                match prev {
                    Some(prev) => self.mutables.insert(name.t.clone(), prev),
                    None => self.mutables.remove(&name.t),
                };
                let scope = scope_step?;
                Some(node.with_expr(Expr::LetMut(
                    name.clone(),
                    Box::new(current),
                    Box::new(scope),
                )))
            }
            Expr::Assign(target, rhs) => match &target.expr {
                Expr::Var(name) => {
                    if !is_value(rhs) {
                        let rhs = self.reduce(rhs)?;
                        return Some(
                            node.with_expr(Expr::Assign(target.clone(), Box::new(rhs))),
                        );
                    }
                    if self.mutables.contains_key(name) {
                        self.mutables.insert(name.clone(), (**rhs).clone());
                        Some((**rhs).clone())
                    } else {
                        None
                    }
                }
                Expr::FieldSelect(obj, field) => {
                    if !is_value(obj) {
                        let obj = self.reduce(obj)?;
                        let target =
                            target.with_expr(Expr::FieldSelect(Box::new(obj), field.clone()));
                        return Some(
                            node.with_expr(Expr::Assign(Box::new(target), rhs.clone())),
                        );
                    }
                    if !is_value(rhs) {
                        let rhs = self.reduce(rhs)?;
                        return Some(
                            node.with_expr(Expr::Assign(target.clone(), Box::new(rhs))),
                        );
                    }
                    let addr = match &obj.expr {
                        Expr::Pointer(addr) => *addr,
                        _ => return None,
                    };
                    let offset = match self.descriptors.get(&addr) {
                        Some(HeapDescriptor::Struct(names)) => {
                            names.iter().position(|n| n == &field.t)?
                        }
                        _ => return None,
                    };
                    self.heap.insert(addr + offset, (**rhs).clone());
                    Some((**rhs).clone())
                }
                Expr::ArrayElem(arr, index) => {
                    if !is_value(arr) {
                        let arr = self.reduce(arr)?;
                        let target =
                            target.with_expr(Expr::ArrayElem(Box::new(arr), index.clone()));
                        return Some(
                            node.with_expr(Expr::Assign(Box::new(target), rhs.clone())),
                        );
                    }
                    if !is_value(index) {
                        let index = self.reduce(index)?;
                        let target =
                            target.with_expr(Expr::ArrayElem(arr.clone(), Box::new(index)));
                        return Some(
                            node.with_expr(Expr::Assign(Box::new(target), rhs.clone())),
                        );
                    }
                    if !is_value(rhs) {
                        let rhs = self.reduce(rhs)?;
                        return Some(
                            node.with_expr(Expr::Assign(target.clone(), Box::new(rhs))),
                        );
                    }
                    let (addr, i) = match (&arr.expr, &index.expr) {
                        (Expr::Pointer(addr), Expr::IntVal(i)) => (*addr, *i),
                        _ => return None,
                    };
                    let len = match self.descriptors.get(&addr) {
                        Some(HeapDescriptor::Array(len)) => *len,
                        _ => return None,
                    };
                    if i < 0 || i as usize >= len {
                        return None;
                    }
                    // The base cell holds the length.
                    self.heap.insert(addr + 1 + i as usize, (**rhs).clone());
                    Some((**rhs).clone())
                }
                _ => None,
            },
            Expr::While(cond, body) => {
                // while c do b  ~~>  if c then { b; while c do b } else ()
                let again = node.clone();
                let seq = node.with_expr(Expr::Seq(vec![(**body).clone(), again]));
                let unit = node.with_expr(Expr::UnitVal);
                Some(node.with_expr(Expr::If(
                    cond.clone(),
                    Box::new(seq),
                    Box::new(unit),
                )))
            }
            Expr::For(var, init, cond, update, body) => {
                // for (x = e1; c; u) b  ~~>  let mutable x = e1; while c do { b; u }
                let seq = node.with_expr(Expr::Seq(vec![(**body).clone(), (**update).clone()]));
                let while_node = node.with_expr(Expr::While(cond.clone(), Box::new(seq)));
                Some(node.with_expr(Expr::LetMut(
                    var.clone(),
                    init.clone(),
                    Box::new(while_node),
                )))
            }
            Expr::App(f, args) => {
                if !is_value(f) {
                    let f = self.reduce(f)?;
                    return Some(node.with_expr(Expr::App(Box::new(f), args.clone())));
                }
                for (i, arg) in args.iter().enumerate() {
                    if !is_value(arg) {
                        let arg = self.reduce(arg)?;
                        let mut args = args.clone();
                        args[i] = arg;
                        return Some(node.with_expr(Expr::App(f.clone(), args)));
                    }
                }
                let (params, body) = match &f.expr {
                    Expr::Lambda(params, body) => (params, body),
                    _ => return None,
                };
                if params.len() != args.len() {
                    return None;
                }
                let mut result = (**body).clone();
                for (param, arg) in params.iter().zip(args) {
                    result = subst(&result, &param.id.t, arg);
                }
                Some(result)
            }
            Expr::StructCons(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if !is_value(&field.init) {
                        let init = self.reduce(&field.init)?;
                        let mut fields = fields.clone();
                        fields[i].init = init;
                        return Some(node.with_expr(Expr::StructCons(fields)));
                    }
                }
                let names: Vec<String> = fields.iter().map(|f| f.id.t.clone()).collect();
                let cells: Vec<Node<E, T>> = fields.iter().map(|f| f.init.clone()).collect();
                let base = self.alloc(cells);
                self.descriptors
                    .insert(base, HeapDescriptor::Struct(names));
                Some(node.with_expr(Expr::Pointer(base)))
            }
            Expr::FieldSelect(obj, field) => {
                if !is_value(obj) {
                    let obj = self.reduce(obj)?;
                    return Some(
                        node.with_expr(Expr::FieldSelect(Box::new(obj), field.clone())),
                    );
                }
                let addr = match &obj.expr {
                    Expr::Pointer(addr) => *addr,
                    _ => return None,
                };
                let offset = match self.descriptors.get(&addr) {
                    Some(HeapDescriptor::Struct(names)) => {
                        names.iter().position(|n| n == &field.t)?
                    }
                    _ => return None,
                };
                self.heap.get(&(addr + offset)).cloned()
            }
            Expr::UnionCons(label, e) => {
                if !is_value(e) {
                    let e = self.reduce(e)?;
                    return Some(node.with_expr(Expr::UnionCons(label.clone(), Box::new(e))));
                }
                // A union instance is a two-cell allocation: label, value.
                let label_cell = node.with_expr(Expr::StringVal(label.t.clone()));
                let base = self.alloc(vec![label_cell, (**e).clone()]);
                self.descriptors.insert(
                    base,
                    HeapDescriptor::Struct(vec!["label".to_owned(), "value".to_owned()]),
                );
                Some(node.with_expr(Expr::Pointer(base)))
            }
            Expr::Match(scrutinee, cases) => {
                if !is_value(scrutinee) {
                    let scrutinee = self.reduce(scrutinee)?;
                    return Some(
                        node.with_expr(Expr::Match(Box::new(scrutinee), cases.clone())),
                    );
                }
                let addr = match &scrutinee.expr {
                    Expr::Pointer(addr) => *addr,
                    _ => return None,
                };
                let label = match &self.heap.get(&addr)?.expr {
                    Expr::StringVal(label) => label.clone(),
                    _ => return None,
                };
                let value = self.heap.get(&(addr + 1))?.clone();
                let case = cases.iter().find(|case| case.label.t == label)?;
                Some(subst(&case.cont, &case.var.t, &value))
            }
            Expr::ArrayCons(length, init) => {
                if !is_value(length) {
                    let length = self.reduce(length)?;
                    return Some(
                        node.with_expr(Expr::ArrayCons(Box::new(length), init.clone())),
                    );
                }
                if !is_value(init) {
                    let init = self.reduce(init)?;
                    return Some(
                        node.with_expr(Expr::ArrayCons(length.clone(), Box::new(init))),
                    );
                }
                let n = match &length.expr {
                    Expr::IntVal(n) if *n >= 0 => *n as usize,
                    _ => return None,
                };
                let mut cells = vec![(**length).clone()];
                cells.extend(std::iter::repeat((**init).clone()).take(n));
                let base = self.alloc(cells);
                self.descriptors.insert(base, HeapDescriptor::Array(n));
                Some(node.with_expr(Expr::Pointer(base)))
            }
            Expr::ArrayElem(arr, index) => {
                if !is_value(arr) {
                    let arr = self.reduce(arr)?;
                    return Some(
                        node.with_expr(Expr::ArrayElem(Box::new(arr), index.clone())),
                    );
                }
                if !is_value(index) {
                    let index = self.reduce(index)?;
                    return Some(
                        node.with_expr(Expr::ArrayElem(arr.clone(), Box::new(index))),
                    );
                }
                let (addr, i) = match (&arr.expr, &index.expr) {
                    (Expr::Pointer(addr), Expr::IntVal(i)) => (*addr, *i),
                    _ => return None,
                };
                let len = match self.descriptors.get(&addr) {
                    Some(HeapDescriptor::Array(len)) => *len,
                    _ => return None,
                };
                if i < 0 || i as usize >= len {
                    return None;
                }
                self.heap.get(&(addr + 1 + i as usize)).cloned()
            }
            Expr::ArrayLength(arr) => {
                if !is_value(arr) {
                    let arr = self.reduce(arr)?;
                    return Some(node.with_expr(Expr::ArrayLength(Box::new(arr))));
                }
                let addr = match &arr.expr {
                    Expr::Pointer(addr) => *addr,
                    _ => return None,
                };
                match self.descriptors.get(&addr) {
                    Some(HeapDescriptor::Array(_)) => self.heap.get(&addr).cloned(),
                    _ => None,
                }
            }
        }
    }

    /// Drive `reduce` to completion: stops on a value, on a stuck term, or
    /// once an exit syscall has set the exit code.
    pub fn eval(&mut self, node: Node<E, T>) -> Node<E, T> {
        let mut current = node;
        while self.exit_code.is_none() && !is_value(&current) {
            match self.reduce(&current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UntypedNode;
    use crate::sourcemap::Sourcemap;
    use crate::typecheck::typecheck;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::io::Cursor;
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

    struct Run {
        output: String,
        value: crate::typecheck::TypedNode,
        exit_code: Option<i32>,
        stuck: bool,
    }

    fn run_with_input(src: &str, input: &str) -> Run {
        let typed = typecheck(&parse(src)).expect("failed to typecheck");
        let buf = SharedBuf::default();
        let mut env = RuntimeEnv::new(
            Some(Box::new(Cursor::new(input.to_owned()))),
            Some(Box::new(buf.clone())),
        );
        let value = env.eval(typed);
        let output = String::from_utf8(buf.0.borrow().clone()).unwrap();
        Run {
            output,
            stuck: env.exit_code.is_none() && !is_value(&value),
            exit_code: env.exit_code,
            value,
        }
    }

    fn run(src: &str) -> Run {
        run_with_input(src, "")
    }

    fn output_of(src: &str) -> String {
        let run = run(src);
        assert!(!run.stuck, "program got stuck: {:?}", run.value.expr);
        run.output
    }

    #[test]
    fn test_arithmetic_prints() {
        // Scenario: precedence and printing.
        assert_eq!(output_of("let x = 2 + 3 * 4; println(x)"), "14\n");
    }

    #[test]
    fn test_while_loop_counts() {
        assert_eq!(
            output_of("let mutable i = 0; while i < 3 do { print(i); i <- i + 1 }"),
            "012"
        );
    }

    #[test]
    fn test_struct_field_update() {
        let src = "let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; \
                   p.b <- 5; println(p.a + p.b)";
        assert_eq!(output_of(src), "6\n");
    }

    #[test]
    fn test_union_match_assertion() {
        let src = "type L = union { End: int; Next: L }; \
                   fun isEnd(x: L): bool = match x with { End{v} -> true; Next{rest} -> false }; \
                   assert(isEnd(End{3}))";
        let first_run = run(src);
        assert!(!first_run.stuck);
        assert_eq!(first_run.value.expr, Expr::UnitVal);

        let failing = "type L = union { End: int; Next: L }; \
                       fun isEnd(x: L): bool = match x with { End{v} -> true; Next{rest} -> false }; \
                       assert(isEnd(Next{End{1}}))";
        assert!(run(failing).stuck);
    }

    #[test]
    fn test_arrays() {
        let src = "let a = array(3, 7); println(arrayLength(a)); a[1] <- 9; \
                   println(arrayElem(a, 1))";
        assert_eq!(output_of(src), "3\n9\n");
    }

    #[test]
    fn test_array_out_of_bounds_is_stuck() {
        assert!(run("let a = array(2, 0); println(arrayElem(a, 5))").stuck);
        assert!(run("let a = array(2, 0); a[-1] <- 3").stuck);
    }

    #[test]
    fn test_short_circuit_skips_rhs() {
        // The right operand would trap if evaluated.
        let run_and = run("assert(!(false && 1 / 0 == 0))");
        assert!(!run_and.stuck);
        let run_or = run("assert(true || 1 / 0 == 0)");
        assert!(!run_or.stuck);
    }

    #[test]
    fn test_strict_logicals_and_bitwise() {
        assert_eq!(output_of("println(true and false)"), "false\n");
        assert_eq!(output_of("println(true xor false)"), "true\n");
        assert_eq!(output_of("println(6 & 3)"), "2\n");
        assert_eq!(output_of("println(6 | 3)"), "7\n");
        assert_eq!(output_of("println(1 << 4)"), "16\n");
        assert_eq!(output_of("println(~0)"), "-1\n");
    }

    #[test]
    fn test_floats() {
        assert_eq!(output_of("println(sqrt(4.0f))"), "2\n");
        assert_eq!(output_of("println(1.5f + 2.5f)"), "4\n");
        assert_eq!(output_of("println(1.0f < 2.0f)"), "true\n");
    }

    #[test]
    fn test_read_int() {
        let run = run_with_input("println(readInt() + 1)", "41\n");
        assert_eq!(run.output, "42\n");
        // A malformed line reduces to unit, leaving the addition stuck.
        assert!(run_with_input("println(readInt() + 1)", "nope\n").stuck);
        let alone = run_with_input("readInt()", "nope\n");
        assert_eq!(alone.value.expr, Expr::UnitVal);
    }

    #[test]
    fn test_for_loop() {
        assert_eq!(
            output_of("for (i = 0; i < 3; i <- i + 1) print(i)"),
            "012"
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(output_of("let mutable x = 2; x *= 3; println(x)"), "6\n");
        assert_eq!(output_of("let mutable x = 7; x %= 4; println(x)"), "3\n");
    }

    #[test]
    fn test_increments() {
        assert_eq!(
            output_of("let mutable x = 1; println(x++); println(x)"),
            "1\n2\n"
        );
        assert_eq!(
            output_of("let mutable x = 1; println(++x); println(x)"),
            "2\n2\n"
        );
        assert_eq!(
            output_of("let mutable x = 1.0f; println(x++); println(x)"),
            "1\n2\n"
        );
    }

    #[test]
    fn test_copy_is_deep_for_structs_shallow_for_arrays() {
        let deep = "let s = struct { inner = struct { v = 1 } }; \
                    let c = copy(s); c.inner.v <- 9; println(s.inner.v)";
        assert_eq!(output_of(deep), "1\n");
        let shallow = "let s = struct { a = array(2, 5) }; \
                       let c = copy(s); c.a[0] <- 9; println(s.a[0])";
        assert_eq!(output_of(shallow), "9\n");
    }

    #[test]
    fn test_exit_syscall_stops_evaluation() {
        let run = run("{ syscall(93, 7); println(1) }");
        assert_eq!(run.exit_code, Some(7));
        assert_eq!(run.output, "");
    }

    #[test]
    fn test_print_syscalls() {
        assert_eq!(output_of("syscall(1, 42)"), "42");
        assert_eq!(output_of("{ syscall(11, 10); syscall(4, \"x\") }"), "\nx");
    }

    #[test]
    fn test_unhandled_syscall_is_stuck() {
        assert!(run("syscall(31, 60, 1000, 0, 100)").stuck);
    }

    #[test]
    fn test_assignment_to_non_mutable_is_stuck() {
        // Evaluating the untyped tree directly bypasses the type checker.
        let node = parse("x <- 1");
        let mut env: RuntimeEnv<(), ()> = RuntimeEnv::new(None, None);
        let result = env.eval(node);
        assert!(!is_value(&result));
    }

    #[test]
    fn test_shadowing_restores_previous_mutable() {
        let src = "let mutable x = 1; \
                   { let mutable x = 10; x <- 20; print(x) }; \
                   println(x)";
        assert_eq!(output_of(src), "201\n");
    }

    #[test]
    fn test_ascription_and_type_scope_reduce_away() {
        assert_eq!(output_of("type T = int; println((2 : T))"), "2\n");
    }

    #[test]
    fn test_descriptor_mismatch_is_stuck() {
        // An ill-typed tree (array primitive applied to a struct) runs into
        // a descriptor mismatch at the heap; evaluate untyped to get there.
        let node = parse("arrayLength(struct { a = 1 })");
        let mut env: RuntimeEnv<(), ()> = RuntimeEnv::new(None, None);
        let result = env.eval(node);
        assert!(!is_value(&result));
    }
}
