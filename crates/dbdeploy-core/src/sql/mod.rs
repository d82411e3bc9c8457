//! Lexical SQL scanning shared by the enhancer, the plan builder and the
//! risk rules.
//!
//! Nothing here parses SQL properly. The scanner recognises just enough
//! structure (identifiers, quoted names, comments, `CREATE <kind> <name>`
//! headers) to order operations and guard scripts.

pub mod lexer;
pub mod objects;
pub mod span;

pub use lexer::{has_batch_separator, mask_comments, significant_tokens, tokenize, SpannedToken, Token};
pub use objects::{
    create_statements, defined_objects, drop_statement, parse_qualified_name, referenced_objects,
    unnamed_creates, CreateStatement, ObjectKind, ObjectName, QualifiedName,
};
pub use span::Span;
