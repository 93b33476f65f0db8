use std::collections::HashMap;

/// Caller-scoped state snapshotted at dispatch time and handed to every
/// worker task, replacing inherited thread-locals.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// When false, per-unit failures are logged and reported through events
    /// while the result slot carries the null sentinel.
    pub exception_thrown: bool,
    pub data_map: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn suppressing() -> Self {
        Self {
            exception_thrown: false,
            data_map: HashMap::new(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            exception_thrown: true,
            data_map: HashMap::new(),
        }
    }
}
