pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::{DataSourceConfig, ExecutorConfig, ProxyConfig};
pub use error::ShardpipeError;
pub use event::{EventSink, ExecutionEvent, ExecutionPhase, NoopSink, TracingSink};
pub use types::{DataValue, SqlType, SqlUnit};
