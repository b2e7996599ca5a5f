//! swell-lexer - lexical analysis for the Swell language

pub mod lexer;
pub mod token;

pub use lexer::Lexer;
pub use token::{Token, TokenKind};
