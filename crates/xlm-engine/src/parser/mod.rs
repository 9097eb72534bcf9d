//! XLM formula lexer and parser.
//!
//! The grammar is the macro-sheet dialect: A1 and R1C1 references (with locale brackets),
//! sheet-qualified names, calls whose callee is a cell or another call, and array literals.

pub mod ast;
mod lexer;

use xlm_model::{InternationalChar, WorkbookSource};

pub use ast::{
    Axis, BinaryOp, Call, Callee, CellReference, Expr, NumberLiteral, ParseError, RangeExpr,
    RefKind, Span, UnaryOp,
};
use lexer::{Lexer, Token, TokenKind};

/// Formula text limit enforced by the parser.
const MAX_FORMULA_CHARS: usize = 8_192;
/// Nesting limit for calls, parentheses and unary chains.
const MAX_NESTING: usize = 256;

/// Locale-dependent separators used while lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XlmSyntax {
    pub list_separator: char,
    pub left_bracket: char,
    pub right_bracket: char,
}

impl Default for XlmSyntax {
    fn default() -> Self {
        Self {
            list_separator: InternationalChar::ListSeparator.default_char(),
            left_bracket: InternationalChar::LeftBracket.default_char(),
            right_bracket: InternationalChar::RightBracket.default_char(),
        }
    }
}

impl XlmSyntax {
    pub fn from_source(source: &dyn WorkbookSource) -> Self {
        Self {
            list_separator: source.international_char(InternationalChar::ListSeparator),
            left_bracket: source.international_char(InternationalChar::LeftBracket),
            right_bracket: source.international_char(InternationalChar::RightBracket),
        }
    }
}

/// Parse a formula (with or without its leading `=`).
pub fn parse_formula(formula: &str, syntax: XlmSyntax) -> Result<Expr, ParseError> {
    let char_len = formula.chars().count();
    if char_len > MAX_FORMULA_CHARS {
        return Err(ParseError::new(
            format!("Formula exceeds the {MAX_FORMULA_CHARS}-character limit (got {char_len})"),
            Span::new(0, formula.len()),
        ));
    }

    let (expr_src, span_offset) = match formula.strip_prefix('=') {
        Some(rest) => (rest, 1),
        None => (formula, 0),
    };

    let tokens = Lexer::new(expr_src, syntax)
        .lex()
        .map_err(|e| e.add_offset(span_offset))?;
    let mut parser = Parser::new(expr_src, tokens);
    let expr = parser
        .parse_expression(0)
        .map_err(|e| e.add_offset(span_offset))?;
    parser
        .expect(TokenKind::Eof)
        .map_err(|e| e.add_offset(span_offset))?;
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        self.enter()?;
        let mut lhs = self.parse_prefix()?;

        loop {
            if matches!(self.peek_kind(), TokenKind::LParen) && matches!(lhs, Expr::Call(_)) {
                let args = self.parse_args()?;
                lhs = Expr::Call(Call {
                    callee: Callee::Expr(Box::new(lhs)),
                    args,
                });
                continue;
            }

            let op = match self.peek_kind() {
                TokenKind::Caret => BinaryOp::Pow,
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Amp => BinaryOp::Concat,
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expression(r_bp)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }

        self.leave();
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Minus,
            _ => return self.parse_primary(),
        };
        self.next();
        let expr = self.parse_expression(50)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.next().clone();
        match token.kind {
            TokenKind::Number(raw) => {
                let value = raw.parse::<f64>().map_err(|_| {
                    ParseError::new(format!("Invalid number `{raw}`"), token.span)
                })?;
                Ok(Expr::Number(NumberLiteral { value, raw }))
            }
            TokenKind::String(text) => {
                if matches!(self.peek_kind(), TokenKind::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call(Call {
                        callee: Callee::Name(text),
                        args,
                    }));
                }
                Ok(Expr::Text(text))
            }
            TokenKind::Boolean(b) => Ok(Expr::Bool(b)),
            TokenKind::Error(e) => Ok(Expr::Error(e)),
            TokenKind::LParen => {
                let inner = self.parse_expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LBrace => self.parse_array_literal(),
            TokenKind::Cell(_) | TokenKind::R1C1Cell { .. } => {
                let cell = cell_reference(None, &token.kind);
                self.parse_after_cell(cell)
            }
            TokenKind::SheetPrefix(sheet) => self.parse_after_sheet_prefix(sheet),
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind(), TokenKind::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call(Call {
                        callee: Callee::Name(name),
                        args,
                    }));
                }
                Ok(Expr::Name(name))
            }
            other => Err(ParseError::new(
                format!("Unexpected token {other:?}"),
                token.span,
            )),
        }
    }

    fn parse_after_sheet_prefix(&mut self, sheet: String) -> Result<Expr, ParseError> {
        let token = self.next().clone();
        match token.kind {
            TokenKind::Cell(_) | TokenKind::R1C1Cell { .. } => {
                let cell = cell_reference(Some(sheet), &token.kind);
                self.parse_after_cell(cell)
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind(), TokenKind::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call(Call {
                        callee: Callee::SheetName { sheet, name },
                        args,
                    }));
                }
                Ok(Expr::SheetName { sheet, name })
            }
            _ => Err(ParseError::new(
                "Expected a cell or name after sheet prefix",
                token.span,
            )),
        }
    }

    /// A cell may start a range (`A1:B2`, `A1:B2:A1`) or be called as a subroutine (`A5()`).
    fn parse_after_cell(&mut self, start: CellReference) -> Result<Expr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::LParen) {
            let args = self.parse_args()?;
            return Ok(Expr::Call(Call {
                callee: Callee::Cell(start),
                args,
            }));
        }
        if !matches!(self.peek_kind(), TokenKind::Colon) {
            return Ok(Expr::Cell(start));
        }
        self.next();
        let end = self.parse_range_endpoint()?;
        let selected = if matches!(self.peek_kind(), TokenKind::Colon) {
            self.next();
            Some(self.parse_range_endpoint()?)
        } else {
            None
        };
        Ok(Expr::Range(RangeExpr {
            start,
            end,
            selected,
        }))
    }

    fn parse_range_endpoint(&mut self) -> Result<CellReference, ParseError> {
        let token = self.next().clone();
        match &token.kind {
            TokenKind::Cell(_) | TokenKind::R1C1Cell { .. } => Ok(cell_reference(None, &token.kind)),
            TokenKind::SheetPrefix(sheet) => {
                let sheet = sheet.clone();
                let inner = self.next().clone();
                match inner.kind {
                    TokenKind::Cell(_) | TokenKind::R1C1Cell { .. } => {
                        Ok(cell_reference(Some(sheet), &inner.kind))
                    }
                    _ => Err(ParseError::new("Expected a cell in range", inner.span)),
                }
            }
            _ => Err(ParseError::new("Expected a cell in range", token.span)),
        }
    }

    /// Parses `( arg, arg, ... )`. Empty slots become [`Expr::Missing`]; `()` has no args.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            if matches!(self.peek_kind(), TokenKind::ArgSep | TokenKind::RParen) {
                args.push(Expr::Missing);
            } else {
                args.push(self.parse_expression(0)?);
            }
            match self.peek_kind() {
                TokenKind::ArgSep => {
                    self.next();
                }
                TokenKind::RParen => {
                    self.next();
                    return Ok(args);
                }
                _ => {
                    return Err(ParseError::new(
                        "Expected `,` or `)` in argument list",
                        self.current_span(),
                    ))
                }
            }
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        let mut rows = vec![Vec::new()];
        loop {
            let item = match self.peek_kind() {
                TokenKind::Minus => {
                    self.next();
                    match self.parse_primary()? {
                        Expr::Number(n) => Expr::Number(NumberLiteral {
                            value: -n.value,
                            raw: format!("-{}", n.raw),
                        }),
                        _ => {
                            return Err(ParseError::new(
                                "Array literals only hold constants",
                                self.current_span(),
                            ))
                        }
                    }
                }
                _ => self.parse_primary()?,
            };
            if !item.is_literal() {
                return Err(ParseError::new(
                    "Array literals only hold constants",
                    self.current_span(),
                ));
            }
            if let Some(row) = rows.last_mut() {
                row.push(item);
            }
            let separator = self.next().kind.clone();
            match separator {
                TokenKind::ArgSep => {}
                TokenKind::ArrayRowSep => rows.push(Vec::new()),
                TokenKind::RBrace => return Ok(Expr::Array(rows)),
                _ => {
                    return Err(ParseError::new(
                        "Expected `,`, `;` or `}` in array literal",
                        self.current_span(),
                    ))
                }
            }
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("Expression nesting exceeds the {MAX_NESTING}-level limit"),
                self.current_span(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&kind) {
            self.next();
            Ok(())
        } else {
            Err(ParseError::new(
                format!("Expected {kind:?}"),
                self.current_span(),
            ))
        }
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn next(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::new(self.src.len(), self.src.len()))
    }
}

fn cell_reference(sheet: Option<String>, kind: &TokenKind) -> CellReference {
    let kind = match *kind {
        TokenKind::Cell(cell) => RefKind::A1 {
            col: cell.col,
            row: cell.row,
            col_abs: cell.col_abs,
            row_abs: cell.row_abs,
        },
        TokenKind::R1C1Cell { row, col } => RefKind::R1C1 { row, col },
        _ => RefKind::R1C1 {
            row: Axis::Current,
            col: Axis::Current,
        },
    };
    CellReference { sheet, kind }
}

fn infix_binding_power(op: BinaryOp) -> (u8, u8) {
    match op {
        BinaryOp::Pow => (50, 50), // right associative
        BinaryOp::Mul | BinaryOp::Div => (40, 41),
        BinaryOp::Add | BinaryOp::Sub => (30, 31),
        BinaryOp::Concat => (20, 21),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            (10, 11)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Expr {
        parse_formula(src, XlmSyntax::default()).unwrap()
    }

    #[test]
    fn reconstructs_formula_text() {
        for src in [
            "CHAR(65)&\"b\"\"c\"",
            "IF(A1>1,GOTO(R[1]C),HALT())",
            "FORMULA.FILL(\"x\",Sheet1!$B$2:$C$3)",
            "'My Sheet'!A1+-2^2",
            "CALL(\"Kernel32\",\"VirtualAlloc\",\"JJJJJ\",0,1000,,64)",
            "{1,2;\"a\",TRUE}",
            "OFFSET(A1,1,0)()",
            "R1C2()",
            "(1+2)*3",
        ] {
            assert_eq!(parse(src).to_string(), src);
        }
    }

    #[test]
    fn operator_precedence() {
        let Expr::Binary { op, right, .. } = parse("=1&2+3*4") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Concat);
        let Expr::Binary { op, right, .. } = *right else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));

        assert!(matches!(parse("A1=1&2"), Expr::Binary { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn missing_arguments_are_kept() {
        let Expr::Call(call) = parse("=FOO(1,,3)") else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.args[1], Expr::Missing);

        let Expr::Call(empty) = parse("=NOW()") else {
            panic!("expected call");
        };
        assert!(empty.args.is_empty());
    }

    #[test]
    fn honors_locale_separators() {
        let syntax = XlmSyntax {
            list_separator: ';',
            left_bracket: '(',
            right_bracket: ')',
        };
        let Expr::Call(call) = parse_formula("=FORMULA(\"a\";R(1)C(-2))", syntax).unwrap() else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
        assert_eq!(
            call.args[1],
            Expr::Cell(CellReference {
                sheet: None,
                kind: RefKind::R1C1 {
                    row: Axis::Relative(1),
                    col: Axis::Relative(-2)
                }
            })
        );
    }

    #[test]
    fn reports_errors_with_spans() {
        let err = parse_formula("=SUM(1,", XlmSyntax::default()).unwrap_err();
        assert!(err.span.start >= 1, "{err}");
        assert!(parse_formula("=1 +", XlmSyntax::default()).is_err());
        assert!(parse_formula(&format!("={}", "(".repeat(400)), XlmSyntax::default()).is_err());
        let long = format!("=\"{}\"", "a".repeat(MAX_FORMULA_CHARS));
        assert!(parse_formula(&long, XlmSyntax::default()).is_err());
    }
}
