use std::fmt;

use serde::{Deserialize, Serialize};
use xlm_model::{column_name, quote_sheet_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            start: self.start.saturating_add(delta),
            end: self.end.saturating_add(delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            message: self.message,
            span: self.span.add_offset(delta),
        }
    }
}

/// One axis of an R1C1 reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// `R` / `C` with no number: the current row/column.
    Current,
    /// `R3`: an absolute 1-based index.
    Absolute(u32),
    /// `R[-2]`: an offset from the current row/column.
    Relative(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    A1 {
        col: u32,
        row: u32,
        col_abs: bool,
        row_abs: bool,
    },
    R1C1 {
        row: Axis,
        col: Axis,
    },
}

/// A single-cell reference as written in formula text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellReference {
    pub sheet: Option<String>,
    pub kind: RefKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeExpr {
    pub start: CellReference,
    pub end: CellReference,
    /// Third component of `A1:B5:A3`, the cell selected inside the range.
    pub selected: Option<CellReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Name(String),
    /// `Sheet1!label(...)`.
    SheetName { sheet: String, name: String },
    /// `R1C1(...)` / `A5(...)`: a subroutine call by cell.
    Cell(CellReference),
    /// `OFFSET(...)(...)`: the callee is itself an expression.
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Expr>,
}

impl Call {
    /// Function name when the callee is a plain (possibly sheet-qualified) name.
    pub fn name(&self) -> Option<&str> {
        match &self.callee {
            Callee::Name(name) | Callee::SheetName { name, .. } => Some(name),
            Callee::Cell(_) | Callee::Expr(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Pow,
    Mul,
    Div,
    Add,
    Sub,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Pow => "^",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub value: f64,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(NumberLiteral),
    Text(String),
    Bool(bool),
    Error(String),
    Name(String),
    SheetName { sheet: String, name: String },
    Cell(CellReference),
    Range(RangeExpr),
    /// Array literal, row by row.
    Array(Vec<Vec<Expr>>),
    Call(Call),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Paren(Box<Expr>),
    /// An omitted argument, as in `FOO(1,,3)`.
    Missing,
}

impl Expr {
    /// True for literal leaves that evaluate without touching the workbook.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Error(_) | Expr::Missing
        )
    }
}

fn write_sheet_prefix(f: &mut fmt::Formatter<'_>, sheet: &Option<String>) -> fmt::Result {
    match sheet {
        Some(sheet) => write!(f, "{}!", quote_sheet_name(sheet)),
        None => Ok(()),
    }
}

fn write_axis(f: &mut fmt::Formatter<'_>, prefix: char, axis: Axis) -> fmt::Result {
    match axis {
        Axis::Current => write!(f, "{prefix}"),
        Axis::Absolute(n) => write!(f, "{prefix}{n}"),
        Axis::Relative(d) => write!(f, "{prefix}[{d}]"),
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sheet_prefix(f, &self.sheet)?;
        match self.kind {
            RefKind::A1 {
                col,
                row,
                col_abs,
                row_abs,
            } => write!(
                f,
                "{}{}{}{}",
                if col_abs { "$" } else { "" },
                column_name(col),
                if row_abs { "$" } else { "" },
                row
            ),
            RefKind::R1C1 { row, col } => {
                write_axis(f, 'R', row)?;
                write_axis(f, 'C', col)
            }
        }
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Name(name) => f.write_str(name),
            Callee::SheetName { sheet, name } => write!(f, "{}!{name}", quote_sheet_name(sheet)),
            Callee::Cell(cell) => write!(f, "{cell}"),
            Callee::Expr(expr) => write!(f, "{expr}"),
        }
    }
}

/// Reconstructs formula text (without the leading `=`).
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&n.raw),
            Expr::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Expr::Bool(true) => f.write_str("TRUE"),
            Expr::Bool(false) => f.write_str("FALSE"),
            Expr::Error(e) => f.write_str(e),
            Expr::Name(name) => f.write_str(name),
            Expr::SheetName { sheet, name } => write!(f, "{}!{name}", quote_sheet_name(sheet)),
            Expr::Cell(cell) => write!(f, "{cell}"),
            Expr::Range(range) => {
                write!(f, "{}:{}", range.start, range.end)?;
                if let Some(selected) = &range.selected {
                    write!(f, ":{selected}")?;
                }
                Ok(())
            }
            Expr::Array(rows) => {
                f.write_str("{")?;
                for (r, row) in rows.iter().enumerate() {
                    if r > 0 {
                        f.write_str(";")?;
                    }
                    for (c, item) in row.iter().enumerate() {
                        if c > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{item}")?;
                    }
                }
                f.write_str("}")
            }
            Expr::Call(call) => {
                write!(f, "{}(", call.callee)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Unary { op, expr } => {
                let sym = match op {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                };
                write!(f, "{sym}{expr}")
            }
            Expr::Binary { op, left, right } => write!(f, "{left}{}{right}", op.symbol()),
            Expr::Paren(inner) => write!(f, "({inner})"),
            Expr::Missing => Ok(()),
        }
    }
}
