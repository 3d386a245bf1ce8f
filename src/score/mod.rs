pub mod expr;
pub mod funcs;

pub use funcs::{evaluate, parse_func_set, validate_func_set};
