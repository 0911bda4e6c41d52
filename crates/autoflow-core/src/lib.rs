pub mod condition;
pub mod query;
pub mod runtime;
pub mod storage;
mod validation;
mod workflow;

pub use validation::*;
pub use workflow::*;
