//! Reference script language for trance test bodies
//!
//! A small dynamically typed language: `let`/`var` bindings, `if`, `while`,
//! `for .. in`, first-class functions and records. Bodies are cut out of
//! `.hyp` files by the loader and handed to [`ScriptEngine`], which parses
//! them once and evaluates them against the run's context.
//!
//! ```text
//! fn square(x) { return x * x; }
//!
//! test "squares" {
//!     let values = [1, 2, 3];
//!     var total = 0;
//!     for v in values { total += square(v); }
//!     assert_equal(total, 14);
//! }
//! ```

pub mod ast;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod parser;

pub use engine::ScriptEngine;
pub use error::RuntimeError;
pub use parser::{parse_body, parse_helper};
