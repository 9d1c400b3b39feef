use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::Chars,
};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TokenKind {
    Identifier,
    Integer,
    Float,
    String,
    Assign,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Bang,
    LessThan,
    GreaterThan,
    Equal,
    NotEqual,
    Comma,
    Semicolon,
    Colon,
    LeftParentheses,
    RightParentheses,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Function,
    Return,
    If,
    Else,
    True,
    False,
    Null,
    For,
    In,
    Load,
    Export,
    EndOfFile,
    Illegal,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let kind = match self {
            Self::Identifier => "IDENTIFIER",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Asterisk => "*",
            Self::Slash => "/",
            Self::Bang => "!",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::LeftParentheses => "(",
            Self::RightParentheses => ")",
            Self::LeftBrace => "{",
            Self::RightBrace => "}",
            Self::LeftBracket => "[",
            Self::RightBracket => "]",
            Self::Function => "FUNCTION",
            Self::Return => "RETURN",
            Self::If => "IF",
            Self::Else => "ELSE",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Null => "NULL",
            Self::For => "FOR",
            Self::In => "IN",
            Self::Load => "LOAD",
            Self::Export => "EXPORT",
            Self::EndOfFile => "EOF",
            Self::Illegal => "ILLEGAL",
        };
        write!(f, "{}", kind)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            literal: literal.into(),
            line,
            column,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "<{}, \"{}\">", self.kind, self.literal)
    }
}

/// A lexical diagnostic. Lexing never stops on one of these; the offending
/// input is handed to the parser as an `Illegal` token.
#[derive(Debug, PartialEq, Clone)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Display for LexError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

pub const EOF_CHAR: char = '\0';

pub struct Lexer<'a> {
    chars: Chars<'a>,
    line: usize,
    column: usize,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Self {
            chars: input.chars(),
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_while(Self::is_whitespace);
        let (line, column) = (self.line, self.column);
        if self.is_eof() {
            return Token::new(TokenKind::EndOfFile, "", line, column);
        }

        let first_char = self.read_char();
        let single = |kind| Token::new(kind, first_char.to_string(), line, column);
        match first_char {
            '=' => self.next_char_or(TokenKind::Assign, '=', TokenKind::Equal, line, column),
            '!' => self.next_char_or(TokenKind::Bang, '=', TokenKind::NotEqual, line, column),
            '+' => single(TokenKind::Plus),
            '-' => single(TokenKind::Minus),
            '*' => single(TokenKind::Asterisk),
            '/' => single(TokenKind::Slash),
            '<' => single(TokenKind::LessThan),
            '>' => single(TokenKind::GreaterThan),
            ',' => single(TokenKind::Comma),
            ';' => single(TokenKind::Semicolon),
            ':' => single(TokenKind::Colon),
            '(' => single(TokenKind::LeftParentheses),
            ')' => single(TokenKind::RightParentheses),
            '{' => single(TokenKind::LeftBrace),
            '}' => single(TokenKind::RightBrace),
            '[' => single(TokenKind::LeftBracket),
            ']' => single(TokenKind::RightBracket),
            '"' | '\'' => self.read_string(first_char, line, column),
            c if Self::is_letter(c) => {
                let mut identifier = c.to_string();
                identifier.push_str(&self.take_while(|c| Self::is_letter(c) || Self::is_digit(c)));
                Token::new(Self::lookup_identifier(&identifier), identifier, line, column)
            }
            c if Self::is_digit(c) => {
                let mut number = c.to_string();
                number.push_str(&self.take_while(Self::is_digit));
                let mut kind = TokenKind::Integer;
                if self.peek_nth(0) == '.' && Self::is_digit(self.peek_nth(1)) {
                    number.push(self.read_char());
                    number.push_str(&self.take_while(Self::is_digit));
                    kind = TokenKind::Float;
                }
                Token::new(kind, number, line, column)
            }
            illegal => {
                self.error(format!("illegal character {:?}", illegal), line, column);
                single(TokenKind::Illegal)
            }
        }
    }

    /// Lexes the whole input. The returned tokens always end with `EndOfFile`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.is(TokenKind::EndOfFile);
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn read_string(&mut self, quote: char, line: usize, column: usize) -> Token {
        let contents = self.take_while(|c| c != quote);
        if self.is_eof() {
            self.error("unterminated string literal".to_string(), line, column);
            return Token::new(TokenKind::Illegal, format!("{}{}", quote, contents), line, column);
        }
        self.read_char();
        Token::new(TokenKind::String, contents, line, column)
    }

    fn error(&mut self, message: String, line: usize, column: usize) {
        self.errors.push(LexError {
            message,
            line,
            column,
        });
    }

    fn read_char(&mut self) -> char {
        match self.chars.next() {
            Some('\n') => {
                self.line += 1;
                self.column = 1;
                '\n'
            }
            Some(c) => {
                self.column += 1;
                c
            }
            None => EOF_CHAR,
        }
    }

    fn peek_nth(&self, n: usize) -> char {
        self.chars.clone().nth(n).unwrap_or(EOF_CHAR)
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> String {
        let mut chars = String::new();
        while !self.is_eof() && predicate(self.peek_nth(0)) {
            chars.push(self.read_char());
        }
        chars
    }

    fn skip_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while !self.is_eof() && predicate(self.peek_nth(0)) {
            self.read_char();
        }
    }

    fn is_letter(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || c == '$'
    }

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn is_whitespace(c: char) -> bool {
        c == ' ' || c == '\t' || c == '\n' || c == '\r'
    }

    fn lookup_identifier(identifier: &str) -> TokenKind {
        match identifier {
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "load" => TokenKind::Load,
            "export" => TokenKind::Export,
            _ => TokenKind::Identifier,
        }
    }

    fn next_char_or(
        &mut self,
        default: TokenKind,
        next_char: char,
        kind: TokenKind,
        line: usize,
        column: usize,
    ) -> Token {
        let first = default.to_string();
        if self.peek_nth(0) == next_char {
            self.read_char();
            return Token::new(kind, format!("{}{}", first, next_char), line, column);
        }
        Token::new(default, first, line, column)
    }
}
