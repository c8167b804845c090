//! Structured diagnostics. Recoverable errors accumulate on the compilation
//! context so that one compile surfaces multiple issues; fatal ones raise the
//! [`Fatal`] signal which unwinds the whole invocation via `?`.

use colored::Colorize;
use thiserror::Error;

use crate::frontend::lexer::TokenIndex;

/// Raised when a diagnostic is unrecoverable. The diagnostic itself has
/// already been recorded on the context by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal;

pub type CompileResult<T> = Result<T, Fatal>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagKind {
    /* Lex / parse */
    #[error("expected {expected} but found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("unterminated or malformed literal")]
    MalformedLiteral,

    /* Static expansion */
    #[error("`{0}` is not a built-in version identifier")]
    UnknownVersion(String),
    #[error("`#foreach` source must be an alias array")]
    NonIterableForeach,
    #[error("a function may have only one variadic parameter")]
    DuplicateVariadic,

    /* Names */
    #[error("undefined identifier `{0}`")]
    UndefinedIdentifier(String),
    #[error("module `{name}` is declared by both {first} and {second}")]
    ModuleConflict {
        name: String,
        first: String,
        second: String,
    },
    #[error("duplicate declaration of `{0}` in this scope")]
    DuplicateDeclaration(String),

    /* Cycles */
    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /* Types */
    #[error("incompatible types: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("expression is not an lvalue")]
    LvalueRequired,
    #[error("invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },
    #[error("cannot take the address of a non-lvalue")]
    AddressOfNonLvalue,
    #[error("expected {expected} argument(s) but found {found}")]
    ArgumentCountMismatch { expected: usize, found: usize },
    #[error("argument {0} has no default and was not supplied")]
    MissingDefaultArgument(usize),
    #[error("type `{0}` has no member `{1}`")]
    NoSuchMember(String, String),
    #[error("expression is not callable")]
    NotCallable,
    #[error("templated declaration `{0}` cannot be used without instantiation")]
    TemplateUnsupported(String),

    /* Static assert */
    #[error("static assertion failed{0}")]
    StaticAssertFailed(String),
    #[error("expression is not a compile-time constant")]
    NotConstant,

    /* IR builder contract violations; always fatal */
    #[error("internal error: {0}")]
    IrContract(String),
}

impl DiagKind {
    /// Whether the pipeline can continue past this diagnostic
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DiagKind::IrContract(_) | DiagKind::CircularDependency(_))
    }
}

/// A reported problem plus the token it anchors to, if any
#[derive(Debug)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub loc: Option<TokenIndex>,
}

impl Diagnostic {
    /// Renders `error: <message> (at <position>)` with the offending line
    pub fn print(&self, position: Option<String>) {
        match &position {
            Some(position) => eprintln!(
                "{}: {} {}",
                "error".red(),
                self.kind,
                format!("(at {position})").white()
            ),
            None => eprintln!("{}: {}", "error".red(), self.kind),
        }
    }
}
