pub mod builder;
pub mod parser;

pub use builder::{shell_quote, CommandBuilder};
pub use parser::{OutputParser, ParserConfig};
