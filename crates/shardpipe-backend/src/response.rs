use crate::registry::{BackendRegistries, ChannelId, ConnectionId};
use crate::result::{GenericResponse, QueryResult};
use bytes::Bytes;
use shardpipe_core::{DataSourceConfig, ShardpipeError};
use shardpipe_protocol::codec::PayloadReader;
use shardpipe_protocol::packets::{
    ColumnDefinition41Packet, EofPacket, ErrPacket, HandshakeResponse41Packet, HandshakePacket,
    OkPacket, TextResultSetRowPacket, NATIVE_PASSWORD_PLUGIN,
};
use shardpipe_protocol::scramble_native_password;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Handshaking,
    Authenticating,
    Command,
}

/// What the connection driver must do after one packet has been dispatched.
#[derive(Debug)]
pub enum PacketOutcome {
    /// Write these bytes back to the backend (the handshake response).
    Reply { sequence_id: u8, payload: Bytes },
    /// Authentication finished; the connection may carry command traffic.
    Authenticated,
    /// Mid result-set; keep reading.
    Pending,
    /// A logical response boundary was reached and the waiting future completed.
    Completed,
}

/// Per backend connection response dispatcher. Runs on the connection's read
/// path only, so it needs no locking of its own; futures are handed off
/// through the shared registries.
pub struct ResponseStateMachine {
    channel_id: ChannelId,
    data_source: DataSourceConfig,
    registries: Arc<BackendRegistries>,
    phase: ConnectionPhase,
    connection_id: ConnectionId,
    result: Option<QueryResult>,
    expected_sequence: u8,
}

impl ResponseStateMachine {
    pub fn new(
        channel_id: ChannelId,
        data_source: DataSourceConfig,
        registries: Arc<BackendRegistries>,
    ) -> Self {
        Self {
            channel_id,
            data_source,
            registries,
            phase: ConnectionPhase::Handshaking,
            connection_id: 0,
            result: None,
            expected_sequence: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Dispatches one inbound packet. Any returned error is fatal to the
    /// connection except none: ERR packets during command traffic complete
    /// the pending future instead of surfacing here.
    pub fn on_packet(
        &mut self,
        sequence_id: u8,
        payload: &[u8],
    ) -> Result<PacketOutcome, ShardpipeError> {
        match self.phase {
            ConnectionPhase::Handshaking => self.on_handshake(sequence_id, payload),
            ConnectionPhase::Authenticating => {
                self.check_sequence(sequence_id)?;
                self.on_auth_result(payload)
            }
            ConnectionPhase::Command => {
                self.check_sequence(sequence_id)?;
                self.expected_sequence = self.expected_sequence.wrapping_add(1);
                self.on_command_packet(payload)
            }
        }
    }

    /// Completes any waiting future with a connection-level error. The driver
    /// calls this before tearing the connection down.
    pub fn fail(&mut self, error: ShardpipeError) {
        self.result = None;
        if !self.registries.futures.complete(self.connection_id, Err(error)) {
            debug!(
                connection_id = self.connection_id,
                "connection failed with no response in flight"
            );
        }
    }

    fn check_sequence(&self, sequence_id: u8) -> Result<(), ShardpipeError> {
        if sequence_id != self.expected_sequence {
            return Err(ShardpipeError::Protocol(format!(
                "sequence id mismatch: expected {}, got {sequence_id}",
                self.expected_sequence
            )));
        }
        Ok(())
    }

    fn on_handshake(
        &mut self,
        sequence_id: u8,
        payload: &[u8],
    ) -> Result<PacketOutcome, ShardpipeError> {
        let handshake = HandshakePacket::decode(payload)?;
        if !handshake.auth_plugin_name.is_empty()
            && handshake.auth_plugin_name != NATIVE_PASSWORD_PLUGIN
        {
            return Err(ShardpipeError::Crypto(format!(
                "unsupported auth plugin: {}",
                handshake.auth_plugin_name
            )));
        }
        let password = self.data_source.password.as_deref().unwrap_or("");
        let auth_response =
            scramble_native_password(password.as_bytes(), &handshake.auth_plugin_data);
        let response = HandshakeResponse41Packet::new(
            self.data_source.username.clone(),
            auth_response,
            self.data_source.schema.clone(),
        );
        self.connection_id = handshake.connection_id;
        self.registries
            .channels
            .put(self.channel_id, handshake.connection_id);
        self.phase = ConnectionPhase::Authenticating;
        self.expected_sequence = sequence_id.wrapping_add(2);
        Ok(PacketOutcome::Reply {
            sequence_id: sequence_id.wrapping_add(1),
            payload: response.encode(),
        })
    }

    fn on_auth_result(&mut self, payload: &[u8]) -> Result<PacketOutcome, ShardpipeError> {
        let header = PayloadReader::new(payload).peek_int1()?;
        match header {
            OkPacket::HEADER => {
                let ok = OkPacket::decode(payload)?;
                let mut result = QueryResult::new();
                result.feed_generic(GenericResponse::Ok(ok))?;
                self.complete(result);
                self.phase = ConnectionPhase::Command;
                self.expected_sequence = 1;
                Ok(PacketOutcome::Authenticated)
            }
            ErrPacket::HEADER => {
                let err = ErrPacket::decode(payload)?;
                let auth_error = |packet: &ErrPacket| {
                    ShardpipeError::Auth(format!(
                        "[{}] {}",
                        packet.error_code, packet.error_message
                    ))
                };
                self.fail(auth_error(&err));
                Err(auth_error(&err))
            }
            other => Err(ShardpipeError::Protocol(format!(
                "unexpected packet during authentication: {other:#04x}"
            ))),
        }
    }

    fn on_command_packet(&mut self, payload: &[u8]) -> Result<PacketOutcome, ShardpipeError> {
        let header = PayloadReader::new(payload).peek_int1()?;
        if EofPacket::is_eof(payload) {
            return self.on_eof(payload);
        }
        match header {
            OkPacket::HEADER => {
                let ok = OkPacket::decode(payload)?;
                let mut result = QueryResult::new();
                result.feed_generic(GenericResponse::Ok(ok))?;
                self.result = None;
                self.complete(result);
                self.expected_sequence = 1;
                Ok(PacketOutcome::Completed)
            }
            ErrPacket::HEADER => {
                let err = ErrPacket::decode(payload)?;
                let mut result = QueryResult::new();
                result.feed_generic(GenericResponse::Err(err))?;
                self.result = None;
                self.complete(result);
                self.expected_sequence = 1;
                Ok(PacketOutcome::Completed)
            }
            _ => self.on_result_set_packet(payload),
        }
    }

    fn on_eof(&mut self, payload: &[u8]) -> Result<PacketOutcome, ShardpipeError> {
        let eof = EofPacket::decode(payload)?;
        let result = self
            .result
            .as_mut()
            .ok_or_else(|| ShardpipeError::Protocol("EOF packet outside a result set".into()))?;
        if result.need_column_definition() {
            return Err(ShardpipeError::Protocol(format!(
                "EOF before all {} column definitions arrived",
                result.column_count()
            )));
        }
        if result.column_finished() && result.columns_eof().is_none() {
            result.feed_columns_eof(eof)?;
            return Ok(PacketOutcome::Pending);
        }
        result.feed_rows_eof(eof)?;
        let result = self.result.take().ok_or_else(|| {
            ShardpipeError::Protocol("result set vanished at its terminal EOF".into())
        })?;
        self.complete(result);
        self.expected_sequence = 1;
        Ok(PacketOutcome::Completed)
    }

    fn on_result_set_packet(&mut self, payload: &[u8]) -> Result<PacketOutcome, ShardpipeError> {
        match self.result.as_mut() {
            None => {
                let column_count = PayloadReader::new(payload).read_lenenc_int()?;
                let mut result = QueryResult::new();
                result.feed_column_count(column_count)?;
                self.result = Some(result);
            }
            Some(result) if result.need_column_definition() => {
                result.feed_column_definition(ColumnDefinition41Packet::decode(payload)?)?;
            }
            Some(result) => {
                let row = TextResultSetRowPacket::decode(payload, result.column_count())?;
                result.feed_row(row)?;
            }
        }
        Ok(PacketOutcome::Pending)
    }

    fn complete(&mut self, result: QueryResult) {
        if !self
            .registries
            .futures
            .complete(self.connection_id, Ok(result))
        {
            warn!(
                connection_id = self.connection_id,
                "discarding response with no waiter"
            );
        }
    }
}
