/// Column/expression AST for compiled funnel queries.
///
/// Values never appear inline: anything caller-supplied is an [`Expr::Param`]
/// resolved to a positional placeholder at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Raw column or alias reference, e.g. `events.timestamp` or `latest_1`
    Column(String),
    /// Integer literal (compiler-owned constants like step numbers)
    Number(i64),
    /// Named parameter, bound through `Params`
    Param(String),
    Null,
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    /// Generic function call: `COALESCE`, `LEAST`, `MIN`, ...
    Func(String, Vec<Expr>),
    Case {
        branches: Vec<(Expr, Expr)>,
        else_value: Option<Box<Expr>>,
    },
    In(Box<Expr>, Vec<Expr>),
    /// JSONB text extraction: `a ->> b`
    JsonText(Box<Expr>, Box<Expr>),
    /// `expr::TYPE`
    Cast(Box<Expr>, String),
    /// `(expr * INTERVAL '1 second')`
    SecondsInterval(Box<Expr>),
    /// `EXTRACT(EPOCH FROM (later - earlier))`
    EpochDiff(Box<Expr>, Box<Expr>),
    /// Window function application with a ROWS frame
    Window {
        func: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<(Expr, SortDir)>,
        frame: Option<Frame>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    ILike,
    IsDistinctFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// ROWS frame bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u32),
    CurrentRow,
}

// Constructor helpers, used heavily by the engines

pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

pub fn param(name: impl Into<String>) -> Expr {
    Expr::Param(name.into())
}

pub fn num(value: i64) -> Expr {
    Expr::Number(value)
}

pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::Binary(Box::new(left), op, Box::new(right))
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinOp::Eq, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(left, BinOp::Lt, right)
}

pub fn lt_eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinOp::LtEq, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    binary(left, BinOp::Gt, right)
}

pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Func(name.into(), args)
}

/// AND-fold; empty input folds to TRUE (`1 = 1`)
pub fn and_all(exprs: Vec<Expr>) -> Expr {
    fold(exprs, BinOp::And, eq(num(1), num(1)))
}

/// OR-fold; empty input folds to FALSE (`1 = 0`)
pub fn or_all(exprs: Vec<Expr>) -> Expr {
    fold(exprs, BinOp::Or, eq(num(1), num(0)))
}

fn fold(exprs: Vec<Expr>, op: BinOp, empty: Expr) -> Expr {
    let mut iter = exprs.into_iter();
    match iter.next() {
        None => empty,
        Some(first) => iter.fold(first, |acc, next| binary(acc, op, next)),
    }
}

/// `CASE WHEN condition THEN value END`
pub fn case_when(condition: Expr, value: Expr) -> Expr {
    Expr::Case {
        branches: vec![(condition, value)],
        else_value: None,
    }
}

/// `CASE WHEN condition THEN value ELSE fallback END`
pub fn case_when_else(condition: Expr, value: Expr, fallback: Expr) -> Expr {
    Expr::Case {
        branches: vec![(condition, value)],
        else_value: Some(Box::new(fallback)),
    }
}

/// Windowed `MIN` over a per-target frame ordered by `timestamp`
pub fn min_over(
    inner: Expr,
    partition_by: Vec<Expr>,
    dir: SortDir,
    frame: Frame,
) -> Expr {
    Expr::Window {
        func: Box::new(func("MIN", vec![inner])),
        partition_by,
        order_by: vec![(col("timestamp"), dir)],
        frame: Some(frame),
    }
}

/// `ROWS BETWEEN UNBOUNDED PRECEDING AND <offset> PRECEDING`, with offset 0
/// collapsing to `CURRENT ROW`
pub fn trailing_frame(offset: u32) -> Frame {
    Frame {
        start: FrameBound::UnboundedPreceding,
        end: if offset == 0 {
            FrameBound::CurrentRow
        } else {
            FrameBound::Preceding(offset)
        },
    }
}
