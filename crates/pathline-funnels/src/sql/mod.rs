//! Small expression IR built bottom-up by the engines and rendered once into
//! SQL text. Keeping the recursive level-building on the IR makes it testable
//! independent of text formatting, and the renderer swappable.

pub mod expr;
pub mod render;

pub use expr::{BinOp, Expr, Frame, FrameBound, SortDir};
pub use render::{PostgresRenderer, SqlRenderer};
