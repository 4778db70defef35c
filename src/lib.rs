/// The lexer pulls bytes from an input stream, mapping them into a
/// sequence of tokens with source locations.
pub mod lexer;

/// The parser maps the token stream into an AST, climbing the mutable
/// operator-precedence table for binary expressions.
pub mod parser;

/// The code generator lowers the AST into SSA IR, one module at a
/// time.
pub mod codegen;

/// The SSA intermediate representation, its builder, verifier and
/// textual listing.
pub mod ir;

pub mod ast;
pub mod debug;
pub mod driver;
pub mod jit;
pub mod objcode;
pub mod opt;
pub mod symbols;
pub mod token;
