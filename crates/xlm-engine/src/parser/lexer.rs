use xlm_model::{column_index, MAX_COLUMN, MAX_ROW};

use super::ast::{Axis, ParseError, Span};
use super::XlmSyntax;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(String),
    String(String),
    Boolean(bool),
    Error(String),
    Cell(CellToken),
    R1C1Cell { row: Axis, col: Axis },
    Ident(String),
    /// `Sheet1!` or `'My Sheet'!`, already unquoted.
    SheetPrefix(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    ArgSep,
    ArrayRowSep,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellToken {
    pub col: u32,
    pub row: u32,
    pub col_abs: bool,
    pub row_abs: bool,
}

const ERROR_LITERALS: &[&str] = &[
    "#NULL!",
    "#DIV/0!",
    "#VALUE!",
    "#REF!",
    "#NAME?",
    "#NUM!",
    "#N/A",
    "#GETTING_DATA",
];

pub(super) struct Lexer<'a> {
    src: &'a str,
    chars: std::str::Chars<'a>,
    idx: usize,
    syntax: XlmSyntax,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub(super) fn new(src: &'a str, syntax: XlmSyntax) -> Self {
        Self {
            src,
            chars: src.chars(),
            idx: 0,
            syntax,
            tokens: Vec::new(),
        }
    }

    pub(super) fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(ch) = self.peek_char() {
            let start = self.idx;
            if ch.is_whitespace() {
                self.bump();
                continue;
            }
            let kind = match ch {
                '"' => TokenKind::String(self.lex_string()?),
                '\'' => TokenKind::SheetPrefix(self.lex_quoted_sheet()?),
                '#' => TokenKind::Error(self.lex_error_literal()?),
                c if c.is_ascii_digit() || (c == '.' && self.peek_next_is_digit()) => {
                    TokenKind::Number(self.lex_number())
                }
                c if c == self.syntax.list_separator => {
                    self.bump();
                    TokenKind::ArgSep
                }
                ';' => {
                    self.bump();
                    TokenKind::ArrayRowSep
                }
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                ':' => self.single(TokenKind::Colon),
                '+' => self.single(TokenKind::Plus),
                '-' => self.single(TokenKind::Minus),
                '*' => self.single(TokenKind::Star),
                '/' => self.single(TokenKind::Slash),
                '^' => self.single(TokenKind::Caret),
                '&' => self.single(TokenKind::Amp),
                '=' => self.single(TokenKind::Eq),
                '<' => {
                    self.bump();
                    match self.peek_char() {
                        Some('>') => self.single(TokenKind::Ne),
                        Some('=') => self.single(TokenKind::Le),
                        _ => TokenKind::Lt,
                    }
                }
                '>' => {
                    self.bump();
                    match self.peek_char() {
                        Some('=') => self.single(TokenKind::Ge),
                        _ => TokenKind::Gt,
                    }
                }
                c if is_word_start(c) => self.lex_word(),
                other => {
                    return Err(ParseError::new(
                        format!("Unexpected character `{other}`"),
                        Span::new(start, start + other.len_utf8()),
                    ))
                }
            };
            self.tokens.push(Token {
                kind,
                span: Span::new(start, self.idx),
            });
        }
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(self.src.len(), self.src.len()),
        });
        Ok(self.tokens)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        self.idx += ch.len_utf8();
        Some(ch)
    }

    fn rollback_to(&mut self, idx: usize) {
        self.idx = idx;
        self.chars = self.src[idx..].chars();
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek_next_is_digit(&self) -> bool {
        let mut iter = self.chars.clone();
        iter.next();
        matches!(iter.next(), Some(c) if c.is_ascii_digit())
    }

    fn take_while<F>(&mut self, mut pred: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut out = String::new();
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }
            self.bump();
            out.push(ch);
        }
        out
    }

    /// Next non-whitespace character, without consuming anything.
    fn peek_significant(&self) -> Option<char> {
        self.chars.clone().find(|c| !c.is_whitespace())
    }

    fn lex_string(&mut self) -> Result<String, ParseError> {
        let start = self.idx;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    if self.peek_char() == Some('"') {
                        self.bump();
                        out.push('"');
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => {
                    return Err(ParseError::new(
                        "Unterminated string literal",
                        Span::new(start, self.idx),
                    ))
                }
            }
        }
    }

    fn lex_quoted_sheet(&mut self) -> Result<String, ParseError> {
        let start = self.idx;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') => {
                    if self.peek_char() == Some('\'') {
                        self.bump();
                        out.push('\'');
                    } else {
                        break;
                    }
                }
                Some(c) => out.push(c),
                None => {
                    return Err(ParseError::new(
                        "Unterminated quoted sheet name",
                        Span::new(start, self.idx),
                    ))
                }
            }
        }
        if self.peek_char() != Some('!') {
            return Err(ParseError::new(
                "Quoted sheet name must be followed by `!`",
                Span::new(start, self.idx),
            ));
        }
        self.bump();
        Ok(out)
    }

    fn lex_error_literal(&mut self) -> Result<String, ParseError> {
        let start = self.idx;
        let rest = &self.src[start..];
        let upper = rest.to_ascii_uppercase();
        let Some(lit) = ERROR_LITERALS.iter().find(|lit| upper.starts_with(**lit)) else {
            return Err(ParseError::new(
                "Unknown error literal",
                Span::new(start, start + 1),
            ));
        };
        for _ in 0..lit.chars().count() {
            self.bump();
        }
        Ok((*lit).to_string())
    }

    fn lex_number(&mut self) -> String {
        let mut out = self.take_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.') {
            self.bump();
            out.push('.');
            out.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let checkpoint = self.idx;
            let mut exp = String::new();
            exp.push(self.bump().unwrap_or('E'));
            if let Some(sign @ ('+' | '-')) = self.peek_char() {
                self.bump();
                exp.push(sign);
            }
            let digits = self.take_while(|c| c.is_ascii_digit());
            if digits.is_empty() {
                self.rollback_to(checkpoint);
            } else {
                out.push_str(&exp);
                out.push_str(&digits);
            }
        }
        out
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.idx;
        if let Some((row, col)) = self.try_r1c1() {
            return TokenKind::R1C1Cell { row, col };
        }
        self.rollback_to(start);

        let word = self.take_while(is_word_continue);
        if self.peek_char() == Some('!') {
            self.bump();
            return TokenKind::SheetPrefix(word);
        }
        let followed_by_call = self.peek_significant() == Some('(');
        if !followed_by_call {
            if let Some(cell) = parse_a1_word(&word) {
                return TokenKind::Cell(cell);
            }
            if word.eq_ignore_ascii_case("TRUE") {
                return TokenKind::Boolean(true);
            }
            if word.eq_ignore_ascii_case("FALSE") {
                return TokenKind::Boolean(false);
            }
        }
        TokenKind::Ident(word)
    }

    /// Recognize `R1C1`, `RC[2]`, `R[-1]C` forms. Leaves the cursor after the reference on
    /// success; the caller rolls back otherwise.
    fn try_r1c1(&mut self) -> Option<(Axis, Axis)> {
        if !matches!(self.bump()?, 'R' | 'r') {
            return None;
        }
        let row = self.lex_axis()?;
        if !matches!(self.bump()?, 'C' | 'c') {
            return None;
        }
        let col = self.lex_axis()?;
        if self.peek_char().is_some_and(is_word_continue) {
            return None;
        }
        let in_range = |axis: Axis, max: u32| match axis {
            Axis::Absolute(n) => (1..=max).contains(&n),
            _ => true,
        };
        (in_range(row, MAX_ROW) && in_range(col, MAX_COLUMN)).then_some((row, col))
    }

    fn lex_axis(&mut self) -> Option<Axis> {
        let (left, right) = (self.syntax.left_bracket, self.syntax.right_bracket);
        match self.peek_char() {
            Some(c) if c == left => {
                self.bump();
                let mut raw = String::new();
                if let Some(sign @ ('+' | '-')) = self.peek_char() {
                    self.bump();
                    raw.push(sign);
                }
                raw.push_str(&self.take_while(|c| c.is_ascii_digit()));
                if self.bump()? != right {
                    return None;
                }
                raw.trim_start_matches('+').parse().ok().map(Axis::Relative)
            }
            Some(c) if c.is_ascii_digit() => {
                self.take_while(|c| c.is_ascii_digit()).parse().ok().map(Axis::Absolute)
            }
            _ => Some(Axis::Current),
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '$' | '\\')
}

fn is_word_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\' | '?')
}

fn parse_a1_word(word: &str) -> Option<CellToken> {
    let bytes = word.as_bytes();
    let mut idx = 0usize;
    let col_abs = bytes.first() == Some(&b'$');
    if col_abs {
        idx += 1;
    }
    let col_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
        idx += 1;
    }
    if idx == col_start || idx - col_start > 3 {
        return None;
    }
    let col = column_index(&word[col_start..idx]).ok()?;
    let row_abs = bytes.get(idx) == Some(&b'$');
    if row_abs {
        idx += 1;
    }
    let row_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == row_start || idx != bytes.len() {
        return None;
    }
    let row: u32 = word[row_start..].parse().ok()?;
    if row == 0 || row > MAX_ROW {
        return None;
    }
    Some(CellToken {
        col,
        row,
        col_abs,
        row_abs,
    })
}
