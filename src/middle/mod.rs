//! Semantic analysis and IR construction. Passes are entered on demand
//! through the lazy driver; name registration expands static conditionals,
//! resolution and type checking rewrite the AST in place, and IR generation
//! builds SSA per function.

pub mod driver;
pub mod eval;
pub mod ir;
pub mod layout;
pub mod register;
pub mod resolve;
pub mod scope;
pub mod type_check;
