use lazy_static::lazy_static;
use std::collections::HashSet;

pub type Span = (usize, Tok, usize);
pub type Result = std::result::Result<Span, LexError>;

lazy_static! {
    static ref SYMBOL_START_CHARS: HashSet<char> = {
        let mut set = HashSet::new();
        for ch in "(){}[];:,.=+-*/%<>&|^~!".chars() {
            set.insert(ch);
        }
        set
    };
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Identifier(String),
    IntLit(i32),
    FloatLit(f32),
    /// Still carries its surrounding double quotes; the parser strips them.
    StringLit(String),
    Let,
    Mutable,
    Immutable,
    Type,
    Fun,
    If,
    Then,
    Else,
    While,
    Do,
    For,
    Match,
    With,
    Struct,
    Union,
    Array,
    And,
    Or,
    Xor,
    True,
    False,
    Assert,
    Print,
    PrintLn,
    ReadInt,
    ReadFloat,
    Sqrt,
    Copy,
    Syscall,
    ArrayLength,
    ArrayElem,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    Comma,
    Period,
    Equals,
    DoubleEquals,
    LArrow,
    ThinArrow,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    PlusEquals,
    MinusEquals,
    AsteriskEquals,
    SlashEquals,
    PercentEquals,
    PlusPlus,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    AmpAmp,
    PipePipe,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Tok::Identifier(s) => write!(f, "{}", s),
            Tok::IntLit(n) => write!(f, "{}", n),
            Tok::FloatLit(x) => write!(f, "{}f", x),
            Tok::StringLit(s) => write!(f, "{}", s),
            Tok::Let => write!(f, "let"),
            Tok::Mutable => write!(f, "mutable"),
            Tok::Immutable => write!(f, "immutable"),
            Tok::Type => write!(f, "type"),
            Tok::Fun => write!(f, "fun"),
            Tok::If => write!(f, "if"),
            Tok::Then => write!(f, "then"),
            Tok::Else => write!(f, "else"),
            Tok::While => write!(f, "while"),
            Tok::Do => write!(f, "do"),
            Tok::For => write!(f, "for"),
            Tok::Match => write!(f, "match"),
            Tok::With => write!(f, "with"),
            Tok::Struct => write!(f, "struct"),
            Tok::Union => write!(f, "union"),
            Tok::Array => write!(f, "array"),
            Tok::And => write!(f, "and"),
            Tok::Or => write!(f, "or"),
            Tok::Xor => write!(f, "xor"),
            Tok::True => write!(f, "true"),
            Tok::False => write!(f, "false"),
            Tok::Assert => write!(f, "assert"),
            Tok::Print => write!(f, "print"),
            Tok::PrintLn => write!(f, "println"),
            Tok::ReadInt => write!(f, "readInt"),
            Tok::ReadFloat => write!(f, "readFloat"),
            Tok::Sqrt => write!(f, "sqrt"),
            Tok::Copy => write!(f, "copy"),
            Tok::Syscall => write!(f, "syscall"),
            Tok::ArrayLength => write!(f, "arrayLength"),
            Tok::ArrayElem => write!(f, "arrayElem"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::LBrace => write!(f, "{{"),
            Tok::RBrace => write!(f, "}}"),
            Tok::LBracket => write!(f, "["),
            Tok::RBracket => write!(f, "]"),
            Tok::Semicolon => write!(f, ";"),
            Tok::Colon => write!(f, ":"),
            Tok::Comma => write!(f, ","),
            Tok::Period => write!(f, "."),
            Tok::Equals => write!(f, "="),
            Tok::DoubleEquals => write!(f, "=="),
            Tok::LArrow => write!(f, "<-"),
            Tok::ThinArrow => write!(f, "->"),
            Tok::Plus => write!(f, "+"),
            Tok::Minus => write!(f, "-"),
            Tok::Asterisk => write!(f, "*"),
            Tok::Slash => write!(f, "/"),
            Tok::Percent => write!(f, "%"),
            Tok::PlusEquals => write!(f, "+="),
            Tok::MinusEquals => write!(f, "-="),
            Tok::AsteriskEquals => write!(f, "*="),
            Tok::SlashEquals => write!(f, "/="),
            Tok::PercentEquals => write!(f, "%="),
            Tok::PlusPlus => write!(f, "++"),
            Tok::Less => write!(f, "<"),
            Tok::LessEq => write!(f, "<="),
            Tok::Greater => write!(f, ">"),
            Tok::GreaterEq => write!(f, ">="),
            Tok::AmpAmp => write!(f, "&&"),
            Tok::PipePipe => write!(f, "||"),
            Tok::Ampersand => write!(f, "&"),
            Tok::Pipe => write!(f, "|"),
            Tok::Caret => write!(f, "^"),
            Tok::Tilde => write!(f, "~"),
            Tok::Bang => write!(f, "!"),
            Tok::Shl => write!(f, "<<"),
            Tok::Shr => write!(f, ">>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub index: usize,
    pub kind: LexErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LexErrorKind {
    InvalidSymbol(String),
    InvalidNumber(String),
    UnterminatedString(String),
}

impl std::fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LexErrorKind::InvalidSymbol(s) => write!(f, "invalid symbol: {}", s),
            LexErrorKind::InvalidNumber(s) => write!(f, "invalid number: {}", s),
            LexErrorKind::UnterminatedString(s) => write!(f, "unterminated string: \"{}", s),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct CharInfo {
    index: usize,
    ch: char,
}

pub struct Lexer {
    current_index: usize,
    chars: Vec<CharInfo>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars = input
            .char_indices()
            .map(|(index, ch)| CharInfo { index, ch })
            .collect();
        Lexer {
            current_index: 0,
            chars,
        }
    }

    fn peek_char(&self, index: usize) -> Option<CharInfo> {
        if self.current_index + index >= self.chars.len() {
            None
        } else {
            Some(self.chars[self.current_index + index])
        }
    }

    fn lex_char(&mut self) -> CharInfo {
        let char_info = self.chars[self.current_index];
        self.current_index += 1;
        char_info
    }

    /// Skips whitespace and `//` line comments.
    fn lex_trivia(&mut self) {
        loop {
            match self.peek_char(0) {
                Some(char_info) if char_info.ch.is_whitespace() => {
                    self.lex_char();
                }
                Some(char_info) if char_info.ch == '/' => {
                    match self.peek_char(1) {
                        Some(next) if next.ch == '/' => {
                            while let Some(char_info) = self.peek_char(0) {
                                if char_info.ch == '\n' {
                                    break;
                                }
                                self.lex_char();
                            }
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_identifier(&mut self) -> Span {
        let start_char_info = self.lex_char();
        let mut end_char_info = start_char_info;
        let ch = start_char_info.ch;
        assert!(ch.is_alphabetic() || ch == '_');
        while let Some(char_info) = self.peek_char(0) {
            let ch = char_info.ch;
            if ch.is_alphanumeric() || ch == '_' {
                end_char_info = self.lex_char();
            } else {
                break;
            }
        }
        let identifier: String = self.chars[start_char_info.index..=end_char_info.index]
            .iter()
            .map(|char_info| char_info.ch)
            .collect();
        let tok = match identifier.as_ref() {
            "let" => Tok::Let,
            "mutable" => Tok::Mutable,
            "immutable" => Tok::Immutable,
            "type" => Tok::Type,
            "fun" => Tok::Fun,
            "if" => Tok::If,
            "then" => Tok::Then,
            "else" => Tok::Else,
            "while" => Tok::While,
            "do" => Tok::Do,
            "for" => Tok::For,
            "match" => Tok::Match,
            "with" => Tok::With,
            "struct" => Tok::Struct,
            "union" => Tok::Union,
            "array" => Tok::Array,
            "and" => Tok::And,
            "or" => Tok::Or,
            "xor" => Tok::Xor,
            "true" => Tok::True,
            "false" => Tok::False,
            "assert" => Tok::Assert,
            "print" => Tok::Print,
            "println" => Tok::PrintLn,
            "readInt" => Tok::ReadInt,
            "readFloat" => Tok::ReadFloat,
            "sqrt" => Tok::Sqrt,
            "copy" => Tok::Copy,
            "syscall" => Tok::Syscall,
            "arrayLength" => Tok::ArrayLength,
            "arrayElem" => Tok::ArrayElem,
            _ => Tok::Identifier(identifier),
        };
        (start_char_info.index, tok, end_char_info.index + 1)
    }

    fn lex_symbol(&mut self) -> Result {
        let char_info = self.lex_char();
        let followed_by = |lexer: &Self, expected: char| match lexer.peek_char(0) {
            Some(char_info) => char_info.ch == expected,
            None => false,
        };
        let tok = match char_info.ch {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ';' => Tok::Semicolon,
            ':' => Tok::Colon,
            ',' => Tok::Comma,
            '.' => Tok::Period,
            '~' => Tok::Tilde,
            '^' => Tok::Caret,
            '=' => {
                if followed_by(self, '=') {
                    self.lex_char();
                    Tok::DoubleEquals
                } else {
                    Tok::Equals
                }
            }
            '+' => {
                if followed_by(self, '+') {
                    self.lex_char();
                    Tok::PlusPlus
                } else if followed_by(self, '=') {
                    self.lex_char();
                    Tok::PlusEquals
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if followed_by(self, '>') {
                    self.lex_char();
                    Tok::ThinArrow
                } else if followed_by(self, '=') {
                    self.lex_char();
                    Tok::MinusEquals
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if followed_by(self, '=') {
                    self.lex_char();
                    Tok::AsteriskEquals
                } else {
                    Tok::Asterisk
                }
            }
            '/' => {
                if followed_by(self, '=') {
                    self.lex_char();
                    Tok::SlashEquals
                } else {
                    Tok::Slash
                }
            }
            '%' => {
                if followed_by(self, '=') {
                    self.lex_char();
                    Tok::PercentEquals
                } else {
                    Tok::Percent
                }
            }
            '<' => {
                if followed_by(self, '-') {
                    self.lex_char();
                    Tok::LArrow
                } else if followed_by(self, '=') {
                    self.lex_char();
                    Tok::LessEq
                } else if followed_by(self, '<') {
                    self.lex_char();
                    Tok::Shl
                } else {
                    Tok::Less
                }
            }
            '>' => {
                if followed_by(self, '=') {
                    self.lex_char();
                    Tok::GreaterEq
                } else if followed_by(self, '>') {
                    self.lex_char();
                    Tok::Shr
                } else {
                    Tok::Greater
                }
            }
            '&' => {
                if followed_by(self, '&') {
                    self.lex_char();
                    Tok::AmpAmp
                } else {
                    Tok::Ampersand
                }
            }
            '|' => {
                if followed_by(self, '|') {
                    self.lex_char();
                    Tok::PipePipe
                } else {
                    Tok::Pipe
                }
            }
            '!' => Tok::Bang,
            ch => {
                return Err(LexError {
                    index: char_info.index,
                    kind: LexErrorKind::InvalidSymbol(ch.to_string()),
                })
            }
        };
        let len = tok.to_string().len();
        Ok((char_info.index, tok, char_info.index + len))
    }

    fn lex_number(&mut self) -> Result {
        let start_char_info = self.lex_char();
        let mut end_char_info = start_char_info;
        assert!(start_char_info.ch.is_numeric());
        let mut is_float = false;
        while let Some(char_info) = self.peek_char(0) {
            let ch = char_info.ch;
            if ch.is_numeric() {
                end_char_info = self.lex_char();
            } else if ch == '.' && !is_float {
                // Fractional part, only if digits follow.
                match self.peek_char(1) {
                    Some(next) if next.ch.is_numeric() => {
                        is_float = true;
                        self.lex_char();
                        end_char_info = self.lex_char();
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }

        let number_str: String = self.chars[start_char_info.index..=end_char_info.index]
            .iter()
            .map(|char_info| char_info.ch)
            .collect();

        // Float literals require the trailing `f`.
        let has_suffix = match self.peek_char(0) {
            Some(char_info) if char_info.ch == 'f' => {
                end_char_info = self.lex_char();
                true
            }
            _ => false,
        };

        // Any further alphanumeric tail makes the literal invalid.
        let mut tail = end_char_info;
        while let Some(char_info) = self.peek_char(0) {
            if char_info.ch.is_alphanumeric() {
                tail = self.lex_char();
            } else {
                break;
            }
        }
        if tail != end_char_info {
            let bad: String = self.chars[start_char_info.index..=tail.index]
                .iter()
                .map(|char_info| char_info.ch)
                .collect();
            return Err(LexError {
                index: start_char_info.index,
                kind: LexErrorKind::InvalidNumber(bad),
            });
        }

        let tok = if has_suffix {
            match number_str.parse::<f32>() {
                Ok(x) => Tok::FloatLit(x),
                Err(_) => {
                    return Err(LexError {
                        index: start_char_info.index,
                        kind: LexErrorKind::InvalidNumber(number_str),
                    })
                }
            }
        } else if is_float {
            // A fractional literal without the `f` suffix.
            return Err(LexError {
                index: start_char_info.index,
                kind: LexErrorKind::InvalidNumber(number_str),
            });
        } else {
            match number_str.parse::<i32>() {
                Ok(n) => Tok::IntLit(n),
                Err(_) => {
                    return Err(LexError {
                        index: start_char_info.index,
                        kind: LexErrorKind::InvalidNumber(number_str),
                    })
                }
            }
        };
        Ok((start_char_info.index, tok, end_char_info.index + 1))
    }

    fn lex_string(&mut self) -> Result {
        let start_char_info = self.lex_char();
        let mut end_char_info = start_char_info;
        assert!(start_char_info.ch == '"');
        while let Some(char_info) = self.peek_char(0) {
            self.lex_char();
            if char_info.ch == '"' {
                end_char_info = char_info;
                break;
            }
        }

        if end_char_info == start_char_info {
            // Reached end of input without a closing quote.
            let s = self.chars[start_char_info.index + 1..self.chars.len()]
                .iter()
                .map(|char_info| char_info.ch)
                .collect();
            return Err(LexError {
                index: start_char_info.index,
                kind: LexErrorKind::UnterminatedString(s),
            });
        }

        // The token keeps its quotes; stripping happens in the parser.
        let s = self.chars[start_char_info.index..=end_char_info.index]
            .iter()
            .map(|char_info| char_info.ch)
            .collect();
        Ok((
            start_char_info.index,
            Tok::StringLit(s),
            end_char_info.index + 1,
        ))
    }
}

impl Iterator for Lexer {
    type Item = Result;

    fn next(&mut self) -> Option<Self::Item> {
        self.lex_trivia();
        let char_info = self.peek_char(0)?;
        if SYMBOL_START_CHARS.contains(&char_info.ch) {
            Some(self.lex_symbol())
        } else if char_info.ch.is_alphabetic() || char_info.ch == '_' {
            Some(Ok(self.lex_identifier()))
        } else if char_info.ch.is_numeric() {
            Some(self.lex_number())
        } else if char_info.ch == '"' {
            Some(self.lex_string())
        } else {
            self.lex_char();
            Some(Err(LexError {
                index: char_info.index,
                kind: LexErrorKind::InvalidSymbol(char_info.ch.to_string()),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lex_identifier_and_keyword() {
        let mut lexer = Lexer::new("foo mutable");
        assert_eq!(lexer.next(), Some(Ok((0, Tok::Identifier("foo".to_owned()), 3))));
        assert_eq!(lexer.next(), Some(Ok((4, Tok::Mutable, 11))));
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_lex_numbers() {
        let mut lexer = Lexer::new("42 3.5f 7f");
        assert_eq!(lexer.next(), Some(Ok((0, Tok::IntLit(42), 2))));
        assert_eq!(lexer.next(), Some(Ok((3, Tok::FloatLit(3.5), 7))));
        assert_eq!(lexer.next(), Some(Ok((8, Tok::FloatLit(7.0), 10))));
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_float_requires_suffix() {
        let mut lexer = Lexer::new("3.5");
        assert_eq!(
            lexer.next(),
            Some(Err(LexError {
                index: 0,
                kind: LexErrorKind::InvalidNumber("3.5".to_owned()),
            }))
        );
    }

    #[test]
    fn test_lex_string_keeps_quotes() {
        let mut lexer = Lexer::new("\"hi\"");
        assert_eq!(
            lexer.next(),
            Some(Ok((0, Tok::StringLit("\"hi\"".to_owned()), 4)))
        );
        let mut lexer = Lexer::new("\"oops");
        assert_eq!(
            lexer.next(),
            Some(Err(LexError {
                index: 0,
                kind: LexErrorKind::UnterminatedString("oops".to_owned()),
            }))
        );
    }

    #[test]
    fn test_lex_compound_symbols() {
        let toks: Vec<Tok> = Lexer::new("<- <= << < ++ += -> == =")
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(
            toks,
            vec![
                Tok::LArrow,
                Tok::LessEq,
                Tok::Shl,
                Tok::Less,
                Tok::PlusPlus,
                Tok::PlusEquals,
                Tok::ThinArrow,
                Tok::DoubleEquals,
                Tok::Equals,
            ]
        );
    }

    #[test]
    fn test_lex_comments() {
        let toks: Vec<Tok> = Lexer::new("1 // comment\n2")
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(toks, vec![Tok::IntLit(1), Tok::IntLit(2)]);
    }
}
