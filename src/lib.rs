mod ast;
pub mod code;
mod compiler;
mod lexer;
pub mod loader;
pub mod logging;
mod parser;
pub mod pipeline;
mod symbol_table;
mod value;
mod vm;

pub use self::{ast::*, compiler::*, lexer::*, parser::*, symbol_table::*, value::*, vm::*};

use std::fmt::Display;

fn flatten(items: &[impl Display], separator: &str) -> String {
    let strings = items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    strings.join(separator)
}
