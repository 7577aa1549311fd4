pub mod compiler;
pub mod model;

pub use compiler::{compile, like_pattern, CompiledArg, Target};
pub use model::{Query, QueryBuilder, Term};
