pub mod context;
pub mod evaluator;
pub mod runtime;
