//! Beacon Expr - predicate language over label maps
//!
//! Expressions such as
//!
//! ```text
//! labels["threshold.name"] == 'critical' && labels["service"] in ['auth', 'payment']
//! ```
//!
//! are compiled once into an [`Expression`] and evaluated against any
//! [`Labels`] implementation. Evaluation never panics: compile errors and
//! runtime type errors are returned as [`ExprError`], and
//! [`Expression::matches`] folds every failure into `false`.

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, Literal};
pub use error::ExprError;
pub use eval::{Labels, Value};
pub use parser::{CompileOptions, Expression};
