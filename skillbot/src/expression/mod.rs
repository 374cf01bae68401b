//! The small expression language used by Check Condition, Repeat, Create Data,
//! Fill Data and in-line Call Extern steps.
//!
//! It is a Python-flavoured subset: `and`/`or`/`not` (with `&&`, `||`, `!` as
//! aliases), chained comparisons, `in`, arithmetic, indexing and slicing, list
//! and dict literals, a handful of builtins (`len`, `int`, `str`, `float`, ...)
//! and common string/dict methods. Snippets may hold several `;`- or
//! newline-separated statements, including assignments to indexed targets.

mod eval;
mod lexer;
mod parser;

pub use eval::{
    assign, eval, execute as run, free_names as expr_free_names,
    free_names_in as statement_free_names, is_truthy, to_display_string, values_equal, Scope,
    ScopeMut,
};
pub use parser::{AssignOp, Expr, Statement, Target};

use crate::errors::ExprError;
use serde_json::Value;

/// Normalizes an expression by replacing smart quotes and other Unicode characters
/// with their ASCII equivalents to handle copy-paste from various sources.
fn normalize_expression(expr: &str) -> String {
    expr
        // Normalize smart quotes to straight quotes
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        // Normalize Unicode spaces
        .replace(['\u{00A0}', '\u{2009}', '\u{202F}'], " ")
        .trim()
        .to_string()
}

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let normalized = normalize_expression(source);
    let tokens = lexer::tokenize(&normalized)?;
    parser::parse_expression(tokens, normalized.len())
}

pub fn parse_snippet(source: &str) -> Result<Vec<Statement>, ExprError> {
    let normalized = normalize_expression(source);
    let tokens = lexer::tokenize(&normalized)?;
    parser::parse_snippet(tokens, normalized.len())
}

pub fn parse_target(source: &str) -> Result<Target, ExprError> {
    let normalized = normalize_expression(source);
    let tokens = lexer::tokenize(&normalized)?;
    parser::parse_target(tokens, normalized.len())
}

/// Names read by `source`, sorted. Works for single expressions and snippets.
pub fn free_names(source: &str) -> Result<Vec<String>, ExprError> {
    Ok(eval::free_names_in(&parse_snippet(source)?))
}

pub fn evaluate<S: Scope + ?Sized>(source: &str, scope: &S) -> Result<Value, ExprError> {
    eval::eval(&parse(source)?, scope)
}

pub fn evaluate_condition<S: Scope + ?Sized>(source: &str, scope: &S) -> Result<bool, ExprError> {
    Ok(is_truthy(&evaluate(source, scope)?))
}

/// Run a snippet; returns the value of its last expression statement.
pub fn execute<S: ScopeMut + ?Sized>(source: &str, scope: &mut S) -> Result<Value, ExprError> {
    eval::execute(&parse_snippet(source)?, scope)
}
