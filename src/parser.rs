//! Recursive-descent parser from the token stream to the untyped tree. The
//! grammar is expression-oriented: `let`/`type`/`fun` binders scope over the
//! remainder of the enclosing sequence.

use crate::ast::*;
use crate::lexer::{LexError, Lexer, Tok};
use codespan::{FileId, Span};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub span: FileSpan,
    pub msg: String,
}

impl ParseError {
    fn from_lex(file_id: FileId, err: LexError) -> ParseError {
        ParseError {
            span: FileSpan::new(
                file_id,
                Span::new(err.index as u32, err.index as u32 + 1),
            ),
            msg: err.kind.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

pub fn parse_program(
    file_id: FileId,
    program: &str,
) -> std::result::Result<UntypedNode, Vec<ParseError>> {
    let mut toks = vec![];
    let mut errors = vec![];
    for item in Lexer::new(program) {
        match item {
            Ok(span) => toks.push(span),
            Err(err) => errors.push(ParseError::from_lex(file_id, err)),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    let mut parser = Parser {
        file_id,
        toks,
        pos: 0,
        last_end: 0,
    };
    let node = parser.parse_seq().map_err(|err| vec![err])?;
    match parser.peek() {
        None => Ok(node),
        Some(_) => Err(vec![parser.error_here("unexpected token after expression")]),
    }
}

struct Parser {
    file_id: FileId,
    toks: Vec<(usize, Tok, usize)>,
    pos: usize,
    last_end: usize,
}

/// A sequence item is either a plain expression or a binder whose scope is
/// the rest of the sequence.
enum SeqItem {
    Expr(UntypedNode),
    Binder(Binder),
}

enum Binder {
    Let {
        name: Spanned<String>,
        mutable: bool,
        pretype: Option<Pretype>,
        init: UntypedNode,
    },
    Type {
        name: Spanned<String>,
        def: Pretype,
    },
    Fun {
        name: Spanned<String>,
        params: Vec<LambdaParam>,
        ret: Pretype,
        body: UntypedNode,
    },
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, tok, _)| tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset).map(|(_, tok, _)| tok)
    }

    fn peek_start(&self) -> usize {
        self.toks
            .get(self.pos)
            .map(|(start, _, _)| *start)
            .unwrap_or(self.last_end)
    }

    fn advance(&mut self) -> Option<Tok> {
        let (_, tok, end) = self.toks.get(self.pos)?.clone();
        self.pos += 1;
        self.last_end = end;
        Some(tok)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected `{}`", tok)))
        }
    }

    fn error_here(&self, msg: &str) -> ParseError {
        let (start, end, found) = match self.toks.get(self.pos) {
            Some((start, tok, end)) => (*start, *end, format!(", found `{}`", tok)),
            None => (self.last_end, self.last_end + 1, ", found end of input".to_owned()),
        };
        ParseError {
            span: FileSpan::new(self.file_id, Span::new(start as u32, end as u32)),
            msg: format!("{}{}", msg, found),
        }
    }

    fn span_from(&self, start: usize) -> FileSpan {
        FileSpan::new(self.file_id, Span::new(start as u32, self.last_end as u32))
    }

    fn node(&self, start: usize, expr: Expr<(), ()>) -> UntypedNode {
        UntypedNode::untyped(expr, self.span_from(start))
    }

    fn unit_here(&self) -> UntypedNode {
        UntypedNode::untyped(
            Expr::UnitVal,
            FileSpan::new(
                self.file_id,
                Span::new(self.last_end as u32, self.last_end as u32),
            ),
        )
    }

    fn identifier(&mut self) -> Result<Spanned<String>> {
        let start = self.peek_start();
        match self.peek().cloned() {
            Some(Tok::Identifier(name)) => {
                self.advance();
                Ok(Spanned::new(name, self.span_from(start)))
            }
            _ => Err(self.error_here("expected an identifier")),
        }
    }

    /// A `;`-separated sequence; `let`/`type`/`fun` items scope over the
    /// rest of it.
    fn parse_seq(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let item = self.parse_item()?;
        let rest = if self.eat(&Tok::Semicolon) {
            match self.peek() {
                None | Some(Tok::RBrace) => Some(self.unit_here()),
                _ => Some(self.parse_seq()?),
            }
        } else {
            None
        };
        match (item, rest) {
            (SeqItem::Expr(node), None) => Ok(node),
            (SeqItem::Expr(node), Some(rest)) => {
                let mut nodes = vec![node];
                match rest.expr {
                    Expr::Seq(tail) => nodes.extend(tail),
                    _ => nodes.push(rest),
                }
                Ok(self.node(start, Expr::Seq(nodes)))
            }
            (SeqItem::Binder(binder), rest) => {
                let scope = rest.unwrap_or_else(|| self.unit_here());
                Ok(self.build_binder(start, binder, scope))
            }
        }
    }

    fn build_binder(&self, start: usize, binder: Binder, scope: UntypedNode) -> UntypedNode {
        match binder {
            Binder::Let {
                name,
                mutable: true,
                pretype: _,
                init,
            } => self.node(start, Expr::LetMut(name, Box::new(init), Box::new(scope))),
            Binder::Let {
                name,
                mutable: false,
                pretype: Some(pretype),
                init,
            } => self.node(
                start,
                Expr::LetT(name, pretype, Box::new(init), Box::new(scope)),
            ),
            Binder::Let {
                name,
                mutable: false,
                pretype: None,
                init,
            } => self.node(start, Expr::Let(name, Box::new(init), Box::new(scope))),
            Binder::Type { name, def } => {
                self.node(start, Expr::Type(name, def, Box::new(scope)))
            }
            Binder::Fun {
                name,
                params,
                ret,
                body,
            } => {
                // fun f(x: T): R = body  ==  let f: (T) -> R = fun (x: T) -> body
                let fn_pretype = Spanned::new(
                    PretypeType::Fn(
                        params.iter().map(|param| param.ty.clone()).collect(),
                        Box::new(ret.clone()),
                    ),
                    ret.span,
                );
                let body_span = body.span;
                let lambda =
                    UntypedNode::untyped(Expr::Lambda(params, Box::new(body)), body_span);
                self.node(
                    start,
                    Expr::LetT(name, fn_pretype, Box::new(lambda), Box::new(scope)),
                )
            }
        }
    }

    fn parse_item(&mut self) -> Result<SeqItem> {
        match self.peek() {
            Some(Tok::Let) => {
                self.advance();
                let mutable = self.eat(&Tok::Mutable);
                let name = self.identifier()?;
                let pretype = if self.eat(&Tok::Colon) {
                    if mutable {
                        return Err(
                            self.error_here("mutable bindings cannot carry a type annotation")
                        );
                    }
                    Some(self.parse_pretype()?)
                } else {
                    None
                };
                self.expect(&Tok::Equals)?;
                let init = self.parse_expr()?;
                Ok(SeqItem::Binder(Binder::Let {
                    name,
                    mutable,
                    pretype,
                    init,
                }))
            }
            Some(Tok::Type) => {
                self.advance();
                let name = self.identifier()?;
                self.expect(&Tok::Equals)?;
                let def = self.parse_pretype()?;
                Ok(SeqItem::Binder(Binder::Type { name, def }))
            }
            Some(Tok::Fun) if matches!(self.peek_at(1), Some(Tok::Identifier(_))) => {
                self.advance();
                let name = self.identifier()?;
                let params = self.parse_params()?;
                self.expect(&Tok::Colon)?;
                let ret = self.parse_pretype()?;
                self.expect(&Tok::Equals)?;
                let body = self.parse_expr()?;
                Ok(SeqItem::Binder(Binder::Fun {
                    name,
                    params,
                    ret,
                    body,
                }))
            }
            _ => Ok(SeqItem::Expr(self.parse_expr()?)),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<LambdaParam>> {
        self.expect(&Tok::LParen)?;
        let mut params = vec![];
        if !self.eat(&Tok::RParen) {
            loop {
                let id = self.identifier()?;
                self.expect(&Tok::Colon)?;
                let ty = self.parse_pretype()?;
                params.push(LambdaParam { id, ty });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        Ok(params)
    }

    pub fn parse_expr(&mut self) -> Result<UntypedNode> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let lhs = self.parse_sc_or()?;
        let op = match self.peek() {
            Some(Tok::LArrow) => None,
            Some(Tok::PlusEquals) => Some(ArithOp::Add),
            Some(Tok::MinusEquals) => Some(ArithOp::Sub),
            Some(Tok::AsteriskEquals) => Some(ArithOp::Mul),
            Some(Tok::SlashEquals) => Some(ArithOp::Div),
            Some(Tok::PercentEquals) => Some(ArithOp::Rem),
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_assign()?;
        let expr = match op {
            None => Expr::Assign(Box::new(lhs), Box::new(rhs)),
            Some(op) => Expr::ArithAssign(Box::new(lhs), op, Box::new(rhs)),
        };
        Ok(self.node(start, expr))
    }

    fn parse_sc_or(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_sc_and()?;
        while self.eat(&Tok::PipePipe) {
            let rhs = self.parse_sc_and()?;
            lhs = self.node(start, Expr::ScOr(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_sc_and(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_logical_or()?;
        while self.eat(&Tok::AmpAmp) {
            let rhs = self.parse_logical_or()?;
            lhs = self.node(start, Expr::ScAnd(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_logical_and()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Or) => LogicalOp::Or,
                Some(Tok::Xor) => LogicalOp::Xor,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_logical_and()?;
            lhs = self.node(start, Expr::Logical(Box::new(lhs), op, Box::new(rhs)));
        }
    }

    fn parse_logical_and(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_compare()?;
        while self.eat(&Tok::And) {
            let rhs = self.parse_compare()?;
            lhs = self.node(
                start,
                Expr::Logical(Box::new(lhs), LogicalOp::And, Box::new(rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let lhs = self.parse_bit_or()?;
        let op = match self.peek() {
            Some(Tok::DoubleEquals) => CompareOp::Eq,
            Some(Tok::Less) => CompareOp::Less,
            Some(Tok::LessEq) => CompareOp::LessEq,
            Some(Tok::Greater) => CompareOp::Greater,
            Some(Tok::GreaterEq) => CompareOp::GreaterEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_bit_or()?;
        Ok(self.node(start, Expr::Compare(Box::new(lhs), op, Box::new(rhs))))
    }

    fn parse_bit_or(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_bit_xor()?;
        while self.eat(&Tok::Pipe) {
            let rhs = self.parse_bit_xor()?;
            lhs = self.node(
                start,
                Expr::Bitwise(Box::new(lhs), BitwiseOp::Or, Box::new(rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_bit_and()?;
        while self.eat(&Tok::Caret) {
            let rhs = self.parse_bit_and()?;
            lhs = self.node(
                start,
                Expr::Bitwise(Box::new(lhs), BitwiseOp::Xor, Box::new(rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_shift()?;
        while self.eat(&Tok::Ampersand) {
            let rhs = self.parse_shift()?;
            lhs = self.node(
                start,
                Expr::Bitwise(Box::new(lhs), BitwiseOp::And, Box::new(rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Shl) => BitwiseOp::Shl,
                Some(Tok::Shr) => BitwiseOp::Shr,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = self.node(start, Expr::Bitwise(Box::new(lhs), op, Box::new(rhs)));
        }
    }

    fn parse_additive(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => ArithOp::Add,
                Some(Tok::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.node(start, Expr::Arith(Box::new(lhs), op, Box::new(rhs)));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Asterisk) => ArithOp::Mul,
                Some(Tok::Slash) => ArithOp::Div,
                Some(Tok::Percent) => ArithOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.node(start, Expr::Arith(Box::new(lhs), op, Box::new(rhs)));
        }
    }

    fn parse_unary(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let expr = match self.peek() {
            Some(Tok::Minus) => {
                self.advance();
                Expr::Neg(Box::new(self.parse_unary()?))
            }
            Some(Tok::Bang) => {
                self.advance();
                Expr::Not(Box::new(self.parse_unary()?))
            }
            Some(Tok::Tilde) => {
                self.advance();
                Expr::BNot(Box::new(self.parse_unary()?))
            }
            Some(Tok::PlusPlus) => {
                self.advance();
                Expr::PreInc(Box::new(self.parse_unary()?))
            }
            _ => return self.parse_postfix(),
        };
        Ok(self.node(start, expr))
    }

    fn parse_postfix(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let mut node = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::LParen) => {
                    self.advance();
                    let mut args = vec![];
                    if !self.eat(&Tok::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                        self.expect(&Tok::RParen)?;
                    }
                    node = self.node(start, Expr::App(Box::new(node), args));
                }
                Some(Tok::Period) => {
                    self.advance();
                    let field = self.identifier()?;
                    node = self.node(start, Expr::FieldSelect(Box::new(node), field));
                }
                Some(Tok::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Tok::RBracket)?;
                    node = self.node(start, Expr::ArrayElem(Box::new(node), Box::new(index)));
                }
                Some(Tok::PlusPlus) => {
                    self.advance();
                    node = self.node(start, Expr::PostInc(Box::new(node)));
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<UntypedNode> {
        let start = self.peek_start();
        let tok = match self.peek().cloned() {
            Some(tok) => tok,
            None => return Err(self.error_here("expected an expression")),
        };
        let expr = match tok {
            Tok::IntLit(n) => {
                self.advance();
                Expr::IntVal(n)
            }
            Tok::FloatLit(x) => {
                self.advance();
                Expr::FloatVal(x)
            }
            Tok::StringLit(s) => {
                self.advance();
                // The lexer keeps the surrounding quotes; drop them here.
                Expr::StringVal(s[1..s.len() - 1].to_owned())
            }
            Tok::True => {
                self.advance();
                Expr::BoolVal(true)
            }
            Tok::False => {
                self.advance();
                Expr::BoolVal(false)
            }
            Tok::LParen => {
                self.advance();
                if self.eat(&Tok::RParen) {
                    Expr::UnitVal
                } else {
                    let inner = self.parse_expr()?;
                    let expr = if self.eat(&Tok::Colon) {
                        let pretype = self.parse_pretype()?;
                        Expr::Ascription(pretype, Box::new(inner))
                    } else {
                        inner.expr
                    };
                    self.expect(&Tok::RParen)?;
                    expr
                }
            }
            Tok::LBrace => {
                self.advance();
                let inner = self.parse_seq()?;
                self.expect(&Tok::RBrace)?;
                inner.expr
            }
            Tok::Identifier(name) => {
                self.advance();
                if self.peek() == Some(&Tok::LBrace) {
                    // Label{expr} constructs a union instance.
                    let label = Spanned::new(name, self.span_from(start));
                    self.advance();
                    let init = self.parse_expr()?;
                    self.expect(&Tok::RBrace)?;
                    Expr::UnionCons(label, Box::new(init))
                } else {
                    Expr::Var(name)
                }
            }
            Tok::If => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(&Tok::Then)?;
                let then_branch = self.parse_expr()?;
                self.expect(&Tok::Else)?;
                let else_branch = self.parse_expr()?;
                Expr::If(
                    Box::new(cond),
                    Box::new(then_branch),
                    Box::new(else_branch),
                )
            }
            Tok::While => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(&Tok::Do)?;
                let body = self.parse_expr()?;
                Expr::While(Box::new(cond), Box::new(body))
            }
            Tok::For => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let var = self.identifier()?;
                self.expect(&Tok::Equals)?;
                let init = self.parse_expr()?;
                self.expect(&Tok::Semicolon)?;
                let cond = self.parse_expr()?;
                self.expect(&Tok::Semicolon)?;
                let update = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                let body = self.parse_expr()?;
                Expr::For(
                    var,
                    Box::new(init),
                    Box::new(cond),
                    Box::new(update),
                    Box::new(body),
                )
            }
            Tok::Fun => {
                self.advance();
                let params = self.parse_params()?;
                self.expect(&Tok::ThinArrow)?;
                let body = self.parse_expr()?;
                Expr::Lambda(params, Box::new(body))
            }
            Tok::Struct => {
                self.advance();
                self.expect(&Tok::LBrace)?;
                let mut fields = vec![];
                loop {
                    let mutable = !self.eat(&Tok::Immutable);
                    let id = self.identifier()?;
                    self.expect(&Tok::Equals)?;
                    let init = self.parse_expr()?;
                    fields.push(FieldInit { mutable, id, init });
                    if !self.eat(&Tok::Semicolon) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                Expr::StructCons(fields)
            }
            Tok::Match => {
                self.advance();
                let scrutinee = self.parse_expr()?;
                self.expect(&Tok::With)?;
                self.expect(&Tok::LBrace)?;
                let mut cases = vec![];
                loop {
                    let label = self.identifier()?;
                    self.expect(&Tok::LBrace)?;
                    let var = self.identifier()?;
                    self.expect(&Tok::RBrace)?;
                    self.expect(&Tok::ThinArrow)?;
                    let cont = self.parse_expr()?;
                    cases.push(MatchCase { label, var, cont });
                    if !self.eat(&Tok::Semicolon) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                Expr::Match(Box::new(scrutinee), cases)
            }
            Tok::Array => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let length = self.parse_expr()?;
                self.expect(&Tok::Comma)?;
                let init = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Expr::ArrayCons(Box::new(length), Box::new(init))
            }
            Tok::ArrayLength => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let arr = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Expr::ArrayLength(Box::new(arr))
            }
            Tok::ArrayElem => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let arr = self.parse_expr()?;
                self.expect(&Tok::Comma)?;
                let index = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Expr::ArrayElem(Box::new(arr), Box::new(index))
            }
            Tok::Print | Tok::PrintLn | Tok::Sqrt | Tok::Assert | Tok::Copy => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let arg = Box::new(self.parse_expr()?);
                self.expect(&Tok::RParen)?;
                match tok {
                    Tok::Print => Expr::Print(arg),
                    Tok::PrintLn => Expr::PrintLn(arg),
                    Tok::Sqrt => Expr::Sqrt(arg),
                    Tok::Assert => Expr::Assertion(arg),
                    _ => Expr::Copy(arg),
                }
            }
            Tok::ReadInt | Tok::ReadFloat => {
                self.advance();
                self.expect(&Tok::LParen)?;
                self.expect(&Tok::RParen)?;
                match tok {
                    Tok::ReadInt => Expr::ReadInt,
                    _ => Expr::ReadFloat,
                }
            }
            Tok::Syscall => {
                self.advance();
                self.expect(&Tok::LParen)?;
                let number = match self.peek().cloned() {
                    Some(Tok::IntLit(n)) => {
                        self.advance();
                        n
                    }
                    _ => return Err(self.error_here("expected a syscall number literal")),
                };
                let mut args = vec![];
                while self.eat(&Tok::Comma) {
                    args.push(self.parse_expr()?);
                }
                self.expect(&Tok::RParen)?;
                Expr::Syscall(number, args)
            }
            _ => return Err(self.error_here("expected an expression")),
        };
        Ok(self.node(start, expr))
    }

    fn parse_pretype(&mut self) -> Result<Pretype> {
        let start = self.peek_start();
        let tok = match self.peek().cloned() {
            Some(tok) => tok,
            None => return Err(self.error_here("expected a type")),
        };
        let pretype = match tok {
            Tok::Identifier(name) => {
                self.advance();
                PretypeType::Id(name)
            }
            Tok::Struct => {
                self.advance();
                self.expect(&Tok::LBrace)?;
                let mut fields = vec![];
                loop {
                    let mutable = !self.eat(&Tok::Immutable);
                    let id = self.identifier()?;
                    self.expect(&Tok::Colon)?;
                    let ty = self.parse_pretype()?;
                    fields.push(PretypeField { mutable, id, ty });
                    if !self.eat(&Tok::Semicolon) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                PretypeType::Struct(fields)
            }
            Tok::Union => {
                self.advance();
                self.expect(&Tok::LBrace)?;
                let mut cases = vec![];
                loop {
                    let label = self.identifier()?;
                    self.expect(&Tok::Colon)?;
                    let ty = self.parse_pretype()?;
                    cases.push(PretypeCase { label, ty });
                    if !self.eat(&Tok::Semicolon) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                PretypeType::Union(cases)
            }
            Tok::Array => {
                self.advance();
                self.expect(&Tok::LBrace)?;
                let elem = self.parse_pretype()?;
                self.expect(&Tok::RBrace)?;
                PretypeType::Array(Box::new(elem))
            }
            Tok::LParen => {
                self.advance();
                let mut args = vec![];
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.parse_pretype()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RParen)?;
                }
                if args.len() == 1 && self.peek() != Some(&Tok::ThinArrow) {
                    // Parenthesised type.
                    args.remove(0).t
                } else {
                    self.expect(&Tok::ThinArrow)?;
                    let ret = self.parse_pretype()?;
                    PretypeType::Fn(args, Box::new(ret))
                }
            }
            _ => return Err(self.error_here("expected a type")),
        };
        Ok(Spanned::new(pretype, self.span_from(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::Sourcemap;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> UntypedNode {
        let mut sourcemap = Sourcemap::default();
        let (_, result) = sourcemap.add_file("test.hyg", src);
        result.expect("failed to parse")
    }

    fn parse_err(src: &str) -> Vec<ParseError> {
        let mut sourcemap = Sourcemap::default();
        let (_, result) = sourcemap.add_file("test.hyg", src);
        result.expect_err("expected a parse failure")
    }

    fn int(n: i32) -> UntypedNode {
        enode!(Expr::IntVal(n))
    }

    #[test]
    fn test_precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4)
        assert_eq!(
            parse("2 + 3 * 4"),
            enode!(Expr::Arith(
                Box::new(int(2)),
                ArithOp::Add,
                Box::new(enode!(Expr::Arith(
                    Box::new(int(3)),
                    ArithOp::Mul,
                    Box::new(int(4))
                )))
            ))
        );
    }

    #[test]
    fn test_let_scopes_over_rest_of_sequence() {
        let node = parse("let x = 1; print(x); x");
        match node.expr {
            Expr::Let(name, init, scope) => {
                assert_eq!(name.t, "x");
                assert_eq!(*init, int(1));
                match scope.expr {
                    Expr::Seq(nodes) => assert_eq!(nodes.len(), 2),
                    expr => panic!("expected a sequence, got {:?}", expr),
                }
            }
            expr => panic!("expected a let, got {:?}", expr),
        }
    }

    #[test]
    fn test_let_mutable_and_assignment() {
        let node = parse("let mutable i = 0; i <- i + 1");
        match node.expr {
            Expr::LetMut(name, _, scope) => {
                assert_eq!(name.t, "i");
                assert!(matches!(scope.expr, Expr::Assign(..)));
            }
            expr => panic!("expected a mutable let, got {:?}", expr),
        }
    }

    #[test]
    fn test_annotated_let() {
        let node = parse("let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 }; p");
        match node.expr {
            Expr::LetT(name, pretype, init, _) => {
                assert_eq!(name.t, "p");
                match pretype.t {
                    PretypeType::Struct(fields) => {
                        assert_eq!(fields.len(), 2);
                        assert!(!fields[0].mutable);
                        assert!(fields[1].mutable);
                    }
                    pt => panic!("expected a struct pretype, got {:?}", pt),
                }
                assert!(matches!(init.expr, Expr::StructCons(_)));
            }
            expr => panic!("expected an annotated let, got {:?}", expr),
        }
    }

    #[test]
    fn test_named_fun_desugars_to_lambda_let() {
        let node = parse("fun isZero(x: int): bool = x == 0; isZero(0)");
        match node.expr {
            Expr::LetT(name, pretype, init, scope) => {
                assert_eq!(name.t, "isZero");
                assert!(matches!(pretype.t, PretypeType::Fn(..)));
                assert!(matches!(init.expr, Expr::Lambda(..)));
                assert!(matches!(scope.expr, Expr::App(..)));
            }
            expr => panic!("expected a let, got {:?}", expr),
        }
    }

    #[test]
    fn test_union_and_match() {
        let node = parse("match x with { End{v} -> true; Next{rest} -> false }");
        match node.expr {
            Expr::Match(scrutinee, cases) => {
                assert_eq!(*scrutinee, enode!(Expr::Var("x".to_owned())));
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].label.t, "End");
                assert_eq!(cases[1].var.t, "rest");
            }
            expr => panic!("expected a match, got {:?}", expr),
        }
        assert_eq!(
            parse("End{3}"),
            enode!(Expr::UnionCons(zspan!("End".to_owned()), Box::new(int(3))))
        );
    }

    #[test]
    fn test_array_sugar() {
        assert_eq!(
            parse("a[1]"),
            enode!(Expr::ArrayElem(
                Box::new(enode!(Expr::Var("a".to_owned()))),
                Box::new(int(1))
            ))
        );
        assert_eq!(parse("arrayElem(a, 1)"), parse("a[1]"));
    }

    #[test]
    fn test_string_literal_quotes_stripped() {
        assert_eq!(
            parse("\"hello\""),
            enode!(Expr::StringVal("hello".to_owned()))
        );
    }

    #[test]
    fn test_ascription() {
        let node = parse("(End{3} : L)");
        match node.expr {
            Expr::Ascription(pretype, inner) => {
                assert_eq!(pretype.t, PretypeType::Id("L".to_owned()));
                assert!(matches!(inner.expr, Expr::UnionCons(..)));
            }
            expr => panic!("expected an ascription, got {:?}", expr),
        }
    }

    #[test]
    fn test_parse_error_reports_span() {
        let errors = parse_err("let = 3");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].msg.contains("expected an identifier"));
    }

    #[test]
    fn test_increment_forms() {
        assert!(matches!(parse("++x").expr, Expr::PreInc(_)));
        assert!(matches!(parse("x++").expr, Expr::PostInc(_)));
        assert!(matches!(parse("x += 1").expr, Expr::ArithAssign(..)));
    }

    #[test]
    fn test_for_loop() {
        let node = parse("for (i = 0; i < 3; i <- i + 1) print(i)");
        match node.expr {
            Expr::For(var, init, cond, update, body) => {
                assert_eq!(var.t, "i");
                assert_eq!(*init, int(0));
                assert!(matches!(cond.expr, Expr::Compare(..)));
                assert!(matches!(update.expr, Expr::Assign(..)));
                assert!(matches!(body.expr, Expr::Print(_)));
            }
            expr => panic!("expected a for loop, got {:?}", expr),
        }
    }
}
