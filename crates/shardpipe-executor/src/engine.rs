use crate::context::ExecutionContext;
use async_trait::async_trait;
use shardpipe_core::event::{EventSink, ExecutionEvent, ExecutionPhase, NoopSink};
use shardpipe_core::types::{DataValue, SqlType, SqlUnit};
use shardpipe_core::ShardpipeError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{error, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// One physical execution of a sharded SQL: the target data source, the
/// rewritten SQL unit, and the physical connection it must run on. The
/// connection mutex is the per-connection serialization point.
pub struct StatementUnit<C> {
    pub data_source: String,
    pub sql_unit: SqlUnit,
    pub connection: Arc<tokio::sync::Mutex<C>>,
}

impl<C> StatementUnit<C> {
    pub fn new(
        data_source: impl Into<String>,
        sql_unit: SqlUnit,
        connection: Arc<tokio::sync::Mutex<C>>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            sql_unit,
            connection,
        }
    }
}

impl<C> Clone for StatementUnit<C> {
    fn clone(&self) -> Self {
        Self {
            data_source: self.data_source.clone(),
            sql_unit: self.sql_unit.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

/// Caller-supplied execution strategy; the only component that touches the
/// underlying database API.
#[async_trait]
pub trait ExecuteCallback<C, T>: Send + Sync {
    async fn execute(
        &self,
        unit: &StatementUnit<C>,
        connection: &mut C,
        context: &ExecutionContext,
    ) -> Result<T, ShardpipeError>;
}

enum UnitResult<T> {
    Completed(T),
    /// The unit failed but the caller opted out of raised errors; the slot
    /// gets the null sentinel and the error only travels via events.
    Suppressed(ShardpipeError),
}

/// Fans the statement units of one logical SQL out over worker tasks, keeping
/// one unit on the calling task to overlap dispatch latency with real work.
pub struct ExecutorEngine {
    limiter: Option<Arc<Semaphore>>,
    sink: Arc<dyn EventSink>,
    closed: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    abort_handles: Arc<Mutex<Vec<AbortHandle>>>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutorEngine {
    /// `executor_size` of 0 dispatches without a concurrency cap; N caps the
    /// number of units running at once behind a fair FIFO queue.
    pub fn new(executor_size: usize) -> Self {
        Self::with_sink(executor_size, Arc::new(NoopSink))
    }

    pub fn with_sink(executor_size: usize, sink: Arc<dyn EventSink>) -> Self {
        let limiter = match executor_size {
            0 => None,
            size => Some(Arc::new(Semaphore::new(size))),
        };
        Self {
            limiter,
            sink,
            closed: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            abort_handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn execute<C, T>(
        &self,
        sql_type: SqlType,
        units: Vec<StatementUnit<C>>,
        callback: Arc<dyn ExecuteCallback<C, T>>,
    ) -> Result<Vec<Option<T>>, ShardpipeError>
    where
        C: Send + 'static,
        T: Send + 'static,
    {
        self.execute_with_context(&ExecutionContext::default(), sql_type, units, callback)
            .await
    }

    pub async fn execute_with_context<C, T>(
        &self,
        context: &ExecutionContext,
        sql_type: SqlType,
        mut units: Vec<StatementUnit<C>>,
        callback: Arc<dyn ExecuteCallback<C, T>>,
    ) -> Result<Vec<Option<T>>, ShardpipeError>
    where
        C: Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShardpipeError::Execution("executor engine is closed".into()));
        }
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let unit_count = units.len();
        self.publish_overall(sql_type, unit_count, ExecutionPhase::Before, None);

        let first = units.remove(0);
        let mut spawned = Vec::with_capacity(units.len());
        for unit in units {
            let callback = Arc::clone(&callback);
            let sink = Arc::clone(&self.sink);
            let context = context.clone();
            let limiter = self.limiter.clone();
            self.active.fetch_add(1, Ordering::SeqCst);
            let guard = ActiveGuard(Arc::clone(&self.active));
            let handle = tokio::spawn(async move {
                let _guard = guard;
                let _permit = match limiter {
                    Some(limiter) => Some(limiter.acquire_owned().await.map_err(|_| {
                        ShardpipeError::Execution("executor pool shut down".into())
                    })?),
                    None => None,
                };
                execute_internal(sql_type, &unit, callback.as_ref(), &context, sink.as_ref())
                    .await
            });
            let mut abort_handles = self.abort_handles.lock().unwrap();
            abort_handles.retain(|handle| !handle.is_finished());
            abort_handles.push(handle.abort_handle());
            drop(abort_handles);
            spawned.push(handle);
        }

        let mut results = Vec::with_capacity(unit_count);
        let mut first_error: Option<ShardpipeError> = None;
        match execute_internal(sql_type, &first, callback.as_ref(), context, self.sink.as_ref())
            .await
        {
            Ok(UnitResult::Completed(value)) => results.push(Some(value)),
            Ok(UnitResult::Suppressed(err)) => {
                first_error.get_or_insert(err);
                results.push(None);
            }
            // The synchronous leg short-circuits further waiting; spawned
            // units keep running but their results are discarded.
            Err(err) => {
                self.publish_overall(
                    sql_type,
                    unit_count,
                    ExecutionPhase::Failure,
                    Some(err.to_string()),
                );
                return Err(err);
            }
        }

        for handle in spawned {
            match handle.await {
                Ok(Ok(UnitResult::Completed(value))) => results.push(Some(value)),
                Ok(Ok(UnitResult::Suppressed(err))) => {
                    first_error.get_or_insert(err);
                    results.push(None);
                }
                Ok(Err(err)) => {
                    self.publish_overall(
                        sql_type,
                        unit_count,
                        ExecutionPhase::Failure,
                        Some(err.to_string()),
                    );
                    return Err(err);
                }
                Err(join_err) => {
                    let err =
                        ShardpipeError::Execution(format!("worker task failed: {join_err}"));
                    self.publish_overall(
                        sql_type,
                        unit_count,
                        ExecutionPhase::Failure,
                        Some(err.to_string()),
                    );
                    return Err(err);
                }
            }
        }

        match &first_error {
            Some(err) => self.publish_overall(
                sql_type,
                unit_count,
                ExecutionPhase::Failure,
                Some(err.to_string()),
            ),
            None => self.publish_overall(sql_type, unit_count, ExecutionPhase::Success, None),
        }
        Ok(results)
    }

    /// Idempotent. Shutdown runs on a detached task so the caller never
    /// blocks: in-flight work gets a bounded grace period, stragglers are
    /// aborted.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let active = Arc::clone(&self.active);
        let abort_handles = Arc::clone(&self.abort_handles);
        tokio::spawn(async move {
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while active.load(Ordering::SeqCst) > 0 {
                    tokio::time::sleep(SHUTDOWN_POLL).await;
                }
            })
            .await;
            if drained.is_err() {
                error!("executor engine drain timed out, aborting remaining tasks");
                for handle in abort_handles.lock().unwrap().drain(..) {
                    handle.abort();
                }
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish_overall(
        &self,
        sql_type: SqlType,
        unit_count: usize,
        phase: ExecutionPhase,
        error: Option<String>,
    ) {
        self.sink.publish(&ExecutionEvent::Overall {
            sql_type,
            unit_count,
            phase,
            error,
        });
    }
}

fn unit_event(
    sql_type: SqlType,
    data_source: &str,
    sql: &str,
    parameters: Vec<DataValue>,
    phase: ExecutionPhase,
    error: Option<String>,
) -> ExecutionEvent {
    match sql_type {
        SqlType::Dql => ExecutionEvent::Dql {
            data_source: data_source.to_string(),
            sql: sql.to_string(),
            parameters,
            phase,
            error,
        },
        _ => ExecutionEvent::Dml {
            data_source: data_source.to_string(),
            sql: sql.to_string(),
            parameters,
            phase,
            error,
        },
    }
}

/// Shared by the inline and spawned legs. Holds the unit's connection lock
/// for the whole callback invocation so units that share a physical
/// connection serialize.
async fn execute_internal<C, T>(
    sql_type: SqlType,
    unit: &StatementUnit<C>,
    callback: &(dyn ExecuteCallback<C, T>),
    context: &ExecutionContext,
    sink: &dyn EventSink,
) -> Result<UnitResult<T>, ShardpipeError>
where
    C: Send,
    T: Send,
{
    let mut connection = unit.connection.lock().await;
    for parameters in &unit.sql_unit.parameter_sets {
        sink.publish(&unit_event(
            sql_type,
            &unit.data_source,
            &unit.sql_unit.sql,
            parameters.clone(),
            ExecutionPhase::Before,
            None,
        ));
    }
    match callback.execute(unit, &mut *connection, context).await {
        Ok(value) => {
            for parameters in &unit.sql_unit.parameter_sets {
                sink.publish(&unit_event(
                    sql_type,
                    &unit.data_source,
                    &unit.sql_unit.sql,
                    parameters.clone(),
                    ExecutionPhase::Success,
                    None,
                ));
            }
            Ok(UnitResult::Completed(value))
        }
        Err(err) => {
            for parameters in &unit.sql_unit.parameter_sets {
                sink.publish(&unit_event(
                    sql_type,
                    &unit.data_source,
                    &unit.sql_unit.sql,
                    parameters.clone(),
                    ExecutionPhase::Failure,
                    Some(err.to_string()),
                ));
            }
            if context.exception_thrown {
                Err(err)
            } else {
                warn!(
                    data_source = %unit.data_source,
                    error = %err,
                    "unit failure suppressed"
                );
                Ok(UnitResult::Suppressed(err))
            }
        }
    }
}
