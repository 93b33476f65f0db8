pub mod context;
pub mod engine;

pub use context::ExecutionContext;
pub use engine::{ExecuteCallback, ExecutorEngine, StatementUnit};
