//! Piecewise score-function sets: `f(n:EXPR)` / `f(n:EXPR:COND)` terms
//! separated by `;`, e.g. `"f(n:n+2:n<5);f(n:n*2)"`.
//!
//! Exactly one term may omit its condition — that term is the default,
//! applied when no condition matches. Conditioned terms must be pairwise
//! disjoint over the probed streak domain so declaration order never
//! changes the result.

use crate::error::{AppError, Result};
use crate::score::expr::{parse_cond, parse_expr, Cond, Expr};

/// Streak lengths probed by validation. Covers realistic streaks and the
/// config UI's preview range.
pub const STREAK_PROBE_MIN: i64 = 1;
pub const STREAK_PROBE_MAX: i64 = 100;

/// Cap on reported overlap conflicts to keep error messages bounded.
const MAX_REPORTED_OVERLAPS: usize = 5;

#[derive(Debug, Clone)]
pub struct FuncDef {
    /// Original term text, kept for error reporting.
    pub raw: String,
    pub expr: Expr,
    pub cond: Option<Cond>,
}

/// Parse a `;`-separated function set. Never fails outright — syntax errors
/// are collected per term so a caller can report all of them at once.
pub fn parse_func_set(text: &str) -> (Vec<FuncDef>, Vec<String>) {
    let mut funcs = Vec::new();
    let mut errors = Vec::new();

    for raw in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        match parse_term(raw) {
            Ok(def) => funcs.push(def),
            Err(e) => errors.push(e),
        }
    }

    (funcs, errors)
}

fn parse_term(raw: &str) -> std::result::Result<FuncDef, String> {
    let inner = raw
        .strip_prefix("f(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("invalid syntax: {raw}"))?;

    let parts = split_top_level(inner, ':');
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid syntax: {raw}"));
    }
    if parts[0].trim() != "n" {
        return Err(format!("invalid syntax: {raw}"));
    }

    let expr_src = parts[1].trim();
    if expr_src.is_empty() {
        return Err(format!("missing expression in: {raw}"));
    }
    let expr = parse_expr(expr_src).map_err(|e| format!("invalid expression in {raw}: {e}"))?;

    let cond = match parts.get(2).map(|s| s.trim()) {
        Some("") => return Err(format!("missing condition in: {raw}")),
        Some(cond_src) => {
            Some(parse_cond(cond_src).map_err(|e| format!("invalid condition in {raw}: {e}"))?)
        }
        None => None,
    };

    Ok(FuncDef {
        raw: raw.to_string(),
        expr,
        cond,
    })
}

/// Split on `sep` at parenthesis depth zero only, so separators inside
/// `( )` stay part of their sub-expression.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Validate a parsed set: exactly one default term, and no streak length in
/// the probe domain matched by two conditioned terms.
pub fn validate_func_set(funcs: &[FuncDef]) -> Option<String> {
    let defaults = funcs.iter().filter(|f| f.cond.is_none()).count();
    if defaults != 1 {
        return Some("provide exactly one default (no condition)".to_string());
    }

    let mut overlaps: Vec<(i64, Vec<usize>)> = Vec::new();
    for n in STREAK_PROBE_MIN..=STREAK_PROBE_MAX {
        let hits: Vec<usize> = funcs
            .iter()
            .enumerate()
            .filter(|(_, f)| f.cond.as_ref().is_some_and(|c| c.eval(n as f64)))
            .map(|(i, _)| i)
            .collect();
        if hits.len() > 1 {
            overlaps.push((n, hits));
        }
    }

    if overlaps.is_empty() {
        return None;
    }

    let shown = overlaps
        .iter()
        .take(MAX_REPORTED_OVERLAPS)
        .map(|(n, idxs)| {
            let terms = idxs
                .iter()
                .map(|&i| format!("{} {}", i + 1, funcs[i].raw))
                .collect::<Vec<_>>()
                .join(", ");
            format!("n={n} matches {terms}")
        })
        .collect::<Vec<_>>()
        .join("; ");
    let more = overlaps.len().saturating_sub(MAX_REPORTED_OVERLAPS);
    let suffix = if more > 0 {
        format!(" (and {more} more)")
    } else {
        String::new()
    };

    Some(format!("overlapping conditions detected: {shown}{suffix}"))
}

/// Evaluate a pre-parsed, pre-validated set at streak length `n`: first
/// conditioned term whose predicate holds, else the default. The result
/// must be finite and is rounded to the nearest integer.
pub fn evaluate_set(funcs: &[FuncDef], n: i64) -> Result<i64> {
    let nf = n as f64;

    let term = funcs
        .iter()
        .find(|f| f.cond.as_ref().is_some_and(|c| c.eval(nf)))
        .or_else(|| funcs.iter().find(|f| f.cond.is_none()))
        .ok_or_else(|| AppError::Expression("no term matched and no default exists".to_string()))?;

    let value = term.expr.eval(nf);
    if !value.is_finite() {
        return Err(AppError::Expression(format!(
            "term {} returned a non-finite value at n={n}",
            term.raw
        )));
    }

    Ok(value.round() as i64)
}

/// Parse, validate, and evaluate a function-set string at streak length `n`.
pub fn evaluate(text: &str, n: i64) -> Result<i64> {
    let (funcs, errors) = parse_func_set(text);
    if !errors.is_empty() {
        return Err(AppError::Expression(errors.join("; ")));
    }
    if let Some(msg) = validate_func_set(&funcs) {
        return Err(AppError::Expression(msg));
    }
    evaluate_set(&funcs, n)
}
