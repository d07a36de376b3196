use codespan::{FileId, Span};
use std::ops::{Deref, DerefMut};

/// A span paired with the file it came from, so diagnostics can be rendered
/// against the right source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file_id: FileId,
    pub span: Span,
}

impl FileSpan {
    pub fn new(file_id: FileId, span: Span) -> FileSpan {
        FileSpan { file_id, span }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Spanned<T> {
    pub t: T,
    pub span: FileSpan,
}

impl<T> Spanned<T> {
    pub fn new(t: T, span: FileSpan) -> Spanned<T> {
        Spanned { t, span }
    }

    pub fn map<F, U>(self, f: F) -> Spanned<U>
    where
        F: FnOnce(T) -> U,
    {
        Spanned::new(f(self.t), self.span)
    }
}

/// Spans never participate in equality: two trees are equal when they have
/// the same structure, wherever they were parsed from.
impl<T: PartialEq> PartialEq for Spanned<T> {
    fn eq(&self, other: &Spanned<T>) -> bool {
        self.t == other.t
    }
}

impl<T: Eq> Eq for Spanned<T> {}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.t
    }
}

impl<T> DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.t
    }
}

pub type Pretype = Spanned<PretypeType>;

/// Syntactic type, exactly as written in the source. Resolved to a
/// `ty::Type` by the type checker.
#[derive(Debug, Clone, PartialEq)]
pub enum PretypeType {
    Id(String),
    Fn(Vec<Pretype>, Box<Pretype>),
    Struct(Vec<PretypeField>),
    Union(Vec<PretypeCase>),
    Array(Box<Pretype>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PretypeField {
    pub mutable: bool,
    pub id: Spanned<String>,
    pub ty: Pretype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PretypeCase {
    pub label: Spanned<String>,
    pub ty: Pretype,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Strict boolean connectives; the short-circuiting forms are separate
/// `Expr` variants so the code generator can emit their early-out branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
        }
    }
}

impl std::fmt::Display for BitwiseOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BitwiseOp::And => write!(f, "&"),
            BitwiseOp::Or => write!(f, "|"),
            BitwiseOp::Xor => write!(f, "^"),
            BitwiseOp::Shl => write!(f, "<<"),
            BitwiseOp::Shr => write!(f, ">>"),
        }
    }
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LogicalOp::And => write!(f, "and"),
            LogicalOp::Or => write!(f, "or"),
            LogicalOp::Xor => write!(f, "xor"),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Less => write!(f, "<"),
            CompareOp::LessEq => write!(f, "<="),
            CompareOp::Greater => write!(f, ">"),
            CompareOp::GreaterEq => write!(f, ">="),
        }
    }
}

/// One tree node. The two extra slots are what distinguishes an untyped tree
/// from a typed one: the untyped tree carries `()` in both, the typed tree a
/// full typing environment snapshot and a resolved type, so that later
/// passes can inspect scope-local bindings at any node.
#[derive(Debug, Clone)]
pub struct Node<E, T> {
    pub span: FileSpan,
    pub expr: Expr<E, T>,
    pub env: E,
    pub ty: T,
}

pub type UntypedNode = Node<(), ()>;

impl<E, T> Node<E, T> {
    pub fn new(expr: Expr<E, T>, span: FileSpan, env: E, ty: T) -> Node<E, T> {
        Node { span, expr, env, ty }
    }
}

impl UntypedNode {
    pub fn untyped(expr: Expr<(), ()>, span: FileSpan) -> UntypedNode {
        Node {
            span,
            expr,
            env: (),
            ty: (),
        }
    }
}

impl<E: Clone, T: Clone> Node<E, T> {
    /// A node with the same span and annotations but a different expression.
    /// The evaluator uses this to desugar in place.
    pub fn with_expr(&self, expr: Expr<E, T>) -> Node<E, T> {
        Node {
            span: self.span,
            expr,
            env: self.env.clone(),
            ty: self.ty.clone(),
        }
    }
}

/// Spans never participate in equality; see `Spanned`.
impl<E: PartialEq, T: PartialEq> PartialEq for Node<E, T> {
    fn eq(&self, other: &Node<E, T>) -> bool {
        self.expr == other.expr && self.env == other.env && self.ty == other.ty
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaParam {
    pub id: Spanned<String>,
    pub ty: Pretype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit<E, T> {
    pub mutable: bool,
    pub id: Spanned<String>,
    pub init: Node<E, T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase<E, T> {
    pub label: Spanned<String>,
    pub var: Spanned<String>,
    pub cont: Node<E, T>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<E, T> {
    UnitVal,
    BoolVal(bool),
    IntVal(i32),
    FloatVal(f32),
    StringVal(String),
    Var(String),
    Arith(Box<Node<E, T>>, ArithOp, Box<Node<E, T>>),
    /// `x += e` and friends; reduces as `Assign(x, Arith(x, op, e))`.
    ArithAssign(Box<Node<E, T>>, ArithOp, Box<Node<E, T>>),
    Bitwise(Box<Node<E, T>>, BitwiseOp, Box<Node<E, T>>),
    BNot(Box<Node<E, T>>),
    Logical(Box<Node<E, T>>, LogicalOp, Box<Node<E, T>>),
    Not(Box<Node<E, T>>),
    ScAnd(Box<Node<E, T>>, Box<Node<E, T>>),
    ScOr(Box<Node<E, T>>, Box<Node<E, T>>),
    Neg(Box<Node<E, T>>),
    Compare(Box<Node<E, T>>, CompareOp, Box<Node<E, T>>),
    Sqrt(Box<Node<E, T>>),
    ReadInt,
    ReadFloat,
    Print(Box<Node<E, T>>),
    PrintLn(Box<Node<E, T>>),
    Syscall(i32, Vec<Node<E, T>>),
    PreInc(Box<Node<E, T>>),
    PostInc(Box<Node<E, T>>),
    If(Box<Node<E, T>>, Box<Node<E, T>>, Box<Node<E, T>>),
    Seq(Vec<Node<E, T>>),
    /// `type T = pretype; scope`
    Type(Spanned<String>, Pretype, Box<Node<E, T>>),
    Ascription(Pretype, Box<Node<E, T>>),
    Assertion(Box<Node<E, T>>),
    Copy(Box<Node<E, T>>),
    /// `let x = init; scope`
    Let(Spanned<String>, Box<Node<E, T>>, Box<Node<E, T>>),
    /// `let x: T = init; scope`
    LetT(Spanned<String>, Pretype, Box<Node<E, T>>, Box<Node<E, T>>),
    /// `let mutable x = init; scope`
    LetMut(Spanned<String>, Box<Node<E, T>>, Box<Node<E, T>>),
    Assign(Box<Node<E, T>>, Box<Node<E, T>>),
    While(Box<Node<E, T>>, Box<Node<E, T>>),
    /// `for (x = init; cond; update) body`, binding `x` mutably.
    For(
        Spanned<String>,
        Box<Node<E, T>>,
        Box<Node<E, T>>,
        Box<Node<E, T>>,
        Box<Node<E, T>>,
    ),
    Lambda(Vec<LambdaParam>, Box<Node<E, T>>),
    App(Box<Node<E, T>>, Vec<Node<E, T>>),
    StructCons(Vec<FieldInit<E, T>>),
    FieldSelect(Box<Node<E, T>>, Spanned<String>),
    UnionCons(Spanned<String>, Box<Node<E, T>>),
    Match(Box<Node<E, T>>, Vec<MatchCase<E, T>>),
    /// `array(length, init)`
    ArrayCons(Box<Node<E, T>>, Box<Node<E, T>>),
    ArrayElem(Box<Node<E, T>>, Box<Node<E, T>>),
    ArrayLength(Box<Node<E, T>>),
    /// Runtime-only heap address; never produced by the parser. The type
    /// checker rejects it and the code generator treats it as a bug.
    Pointer(usize),
}
