use crate::registry::{BackendRegistries, ChannelId, ConnectionId};
use crate::response::{PacketOutcome, ResponseStateMachine};
use crate::result::QueryResult;
use shardpipe_core::{DataSourceConfig, ShardpipeError};
use shardpipe_protocol::codec::{read_packet, write_packet};
use shardpipe_protocol::packets::{ComQueryPacket, ComQuitPacket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// One authenticated channel to a backend database. Commands are issued
/// through `&mut self`, which serializes requests per connection; the inbound
/// side runs on its own task and completes response futures through the
/// shared registries.
#[derive(Debug)]
pub struct BackendConnection<S> {
    writer: WriteHalf<S>,
    data_source_name: String,
    channel_id: ChannelId,
    connection_id: ConnectionId,
    registries: Arc<BackendRegistries>,
    alive: Arc<AtomicBool>,
    read_task: JoinHandle<()>,
}

impl<S> BackendConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Drives the handshake and authentication exchange to completion, then
    /// spawns the read loop for command-phase traffic.
    pub async fn connect(
        mut stream: S,
        data_source: DataSourceConfig,
        registries: Arc<BackendRegistries>,
    ) -> Result<Self, ShardpipeError> {
        let channel_id = registries.allocate_channel_id();
        let data_source_name = data_source.name.clone();
        let mut machine =
            ResponseStateMachine::new(channel_id, data_source, registries.clone());
        loop {
            let (sequence_id, payload) = match read_packet(&mut stream).await {
                Ok(packet) => packet,
                Err(err) => {
                    registries.channels.remove(channel_id);
                    return Err(err);
                }
            };
            match machine.on_packet(sequence_id, &payload) {
                Ok(PacketOutcome::Reply {
                    sequence_id,
                    payload,
                }) => {
                    if let Err(err) = write_packet(&mut stream, sequence_id, &payload).await {
                        registries.channels.remove(channel_id);
                        return Err(err);
                    }
                }
                Ok(PacketOutcome::Authenticated) => break,
                Ok(_) => {}
                Err(err) => {
                    registries.channels.remove(channel_id);
                    return Err(err);
                }
            }
        }
        let connection_id = machine.connection_id();
        debug!(
            data_source = %data_source_name,
            connection_id, "backend connection authenticated"
        );
        let alive = Arc::new(AtomicBool::new(true));
        let (read_half, writer) = tokio::io::split(stream);
        let read_task = tokio::spawn(read_loop(
            read_half,
            machine,
            registries.clone(),
            channel_id,
            alive.clone(),
        ));
        Ok(Self {
            writer,
            data_source_name,
            channel_id,
            connection_id,
            registries,
            alive,
            read_task,
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn data_source(&self) -> &str {
        &self.data_source_name
    }

    /// Sends one COM_QUERY and awaits the assembled response. Registers the
    /// response future before the command reaches the wire.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult, ShardpipeError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(ShardpipeError::Execution(format!(
                "backend connection {} is closed",
                self.connection_id
            )));
        }
        let receiver = self.registries.futures.register(self.connection_id)?;
        let payload = ComQueryPacket::new(sql).encode();
        if let Err(err) = write_packet(&mut self.writer, 0, &payload).await {
            self.registries.futures.discard(self.connection_id);
            return Err(err);
        }
        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ShardpipeError::Execution(
                "response future dropped without completion".into(),
            )),
        }
    }

    /// Best-effort COM_QUIT, then tears the connection down.
    pub async fn close(mut self) {
        let _ = write_packet(&mut self.writer, 0, &ComQuitPacket.encode()).await;
        self.read_task.abort();
        self.registries.channels.remove(self.channel_id);
    }
}

async fn read_loop<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    mut machine: ResponseStateMachine,
    registries: Arc<BackendRegistries>,
    channel_id: ChannelId,
    alive: Arc<AtomicBool>,
) {
    loop {
        match read_packet(&mut reader).await {
            Ok((sequence_id, payload)) => {
                match machine.on_packet(sequence_id, &payload) {
                    Ok(PacketOutcome::Reply { .. }) => {
                        // Command traffic never writes from the read path.
                        error!(
                            connection_id = machine.connection_id(),
                            "unexpected reply request in command phase"
                        );
                        machine.fail(ShardpipeError::Protocol(
                            "unexpected handshake traffic in command phase".into(),
                        ));
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(
                            connection_id = machine.connection_id(),
                            error = %err,
                            "fatal backend protocol error"
                        );
                        machine.fail(err);
                        break;
                    }
                }
            }
            Err(err) => {
                debug!(
                    connection_id = machine.connection_id(),
                    error = %err,
                    "backend connection read path closed"
                );
                machine.fail(err);
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
    registries.channels.remove(channel_id);
}
