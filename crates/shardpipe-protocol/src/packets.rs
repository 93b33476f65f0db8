use crate::codec::{PayloadReader, PayloadWriter};
use bytes::Bytes;
use shardpipe_core::ShardpipeError;

pub const PROTOCOL_VERSION: u8 = 10;
/// utf8_general_ci, the charset the proxy advertises in its handshake response.
pub const CHARSET: u8 = 33;
pub const MAX_PACKET_SIZE: u32 = 16_777_215;
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

pub mod capability {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 2;
    pub const CLIENT_LONG_FLAG: u32 = 4;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 8;
    pub const CLIENT_NO_SCHEMA: u32 = 16;
    pub const CLIENT_COMPRESS: u32 = 32;
    pub const CLIENT_ODBC: u32 = 64;
    pub const CLIENT_LOCAL_FILES: u32 = 128;
    pub const CLIENT_IGNORE_SPACE: u32 = 256;
    pub const CLIENT_PROTOCOL_41: u32 = 512;
    pub const CLIENT_INTERACTIVE: u32 = 1024;
    pub const CLIENT_SSL: u32 = 2048;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 4096;
    pub const CLIENT_TRANSACTIONS: u32 = 8192;
    pub const CLIENT_RESERVED: u32 = 16384;
    pub const CLIENT_SECURE_CONNECTION: u32 = 32768;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
}

/// Lower-word capability set the proxy sends in its handshake response.
pub fn handshake_capabilities() -> u32 {
    capability::CLIENT_LONG_PASSWORD
        | capability::CLIENT_FOUND_ROWS
        | capability::CLIENT_LONG_FLAG
        | capability::CLIENT_CONNECT_WITH_DB
        | capability::CLIENT_ODBC
        | capability::CLIENT_IGNORE_SPACE
        | capability::CLIENT_PROTOCOL_41
        | capability::CLIENT_INTERACTIVE
        | capability::CLIENT_IGNORE_SIGPIPE
        | capability::CLIENT_TRANSACTIONS
        | capability::CLIENT_SECURE_CONNECTION
}

pub mod command {
    pub const COM_QUIT: u8 = 0x01;
    pub const COM_QUERY: u8 = 0x03;
}

/// Server handshake, protocol v10.
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Salt: auth-plugin-data part 1 and part 2 joined, trailing NUL stripped.
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let protocol_version = reader.read_int1()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ShardpipeError::Protocol(format!(
                "unsupported handshake protocol version: {protocol_version}"
            )));
        }
        let server_version = reader.read_null_terminated_string()?;
        let connection_id = reader.read_int4()?;
        let mut auth_plugin_data = reader.read_bytes(8)?.to_vec();
        reader.read_int1()?; // filler
        let capability_low = reader.read_int2()?;
        let charset = reader.read_int1()?;
        let status_flags = reader.read_int2()?;
        let capability_high = reader.read_int2()?;
        let capability_flags = u32::from(capability_low) | (u32::from(capability_high) << 16);
        let auth_plugin_data_len = reader.read_int1()?;
        reader.read_bytes(10)?; // reserved
        if capability_flags & capability::CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = usize::max(13, usize::from(auth_plugin_data_len).saturating_sub(8));
            let part2 = reader.read_bytes(part2_len.min(reader.remaining()))?;
            auth_plugin_data.extend(part2.iter().copied().take_while(|byte| *byte != 0));
        }
        let auth_plugin_name = if capability_flags & capability::CLIENT_PLUGIN_AUTH != 0 {
            let rest = reader.read_rest();
            let end = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).to_string()
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };
        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data,
            capability_flags,
            charset,
            status_flags,
            auth_plugin_name,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(self.protocol_version);
        writer.write_null_terminated_string(&self.server_version);
        writer.write_int4(self.connection_id);
        writer.write_bytes(&self.auth_plugin_data[..8]);
        writer.write_int1(0);
        writer.write_int2((self.capability_flags & 0xffff) as u16);
        writer.write_int1(self.charset);
        writer.write_int2(self.status_flags);
        writer.write_int2((self.capability_flags >> 16) as u16);
        writer.write_int1((self.auth_plugin_data.len() + 1) as u8);
        writer.write_bytes(&[0u8; 10]);
        writer.write_bytes(&self.auth_plugin_data[8..]);
        writer.write_int1(0);
        writer.write_null_terminated_string(&self.auth_plugin_name);
        writer.into_bytes()
    }
}

/// Client handshake response, capability set 4.1.
#[derive(Debug, Clone)]
pub struct HandshakeResponse41Packet {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: String,
}

impl HandshakeResponse41Packet {
    pub fn new(username: impl Into<String>, auth_response: Vec<u8>, database: impl Into<String>) -> Self {
        Self {
            capability_flags: handshake_capabilities(),
            max_packet_size: MAX_PACKET_SIZE,
            charset: CHARSET,
            username: username.into(),
            auth_response,
            database: database.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int4(self.capability_flags);
        writer.write_int4(self.max_packet_size);
        writer.write_int1(self.charset);
        writer.write_bytes(&[0u8; 23]);
        writer.write_null_terminated_string(&self.username);
        writer.write_lenenc_bytes(&self.auth_response);
        writer.write_null_terminated_string(&self.database);
        writer.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let capability_flags = reader.read_int4()?;
        let max_packet_size = reader.read_int4()?;
        let charset = reader.read_int1()?;
        reader.read_bytes(23)?;
        let username = reader.read_null_terminated_string()?;
        let auth_response = reader.read_lenenc_bytes()?.to_vec();
        let database = if reader.remaining() > 0 {
            reader.read_null_terminated_string()?
        } else {
            String::new()
        };
        Ok(Self {
            capability_flags,
            max_packet_size,
            charset,
            username,
            auth_response,
            database,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub const HEADER: u8 = 0x00;

    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let header = reader.read_int1()?;
        if header != Self::HEADER {
            return Err(ShardpipeError::Protocol(format!(
                "expected OK header, got {header:#04x}"
            )));
        }
        let affected_rows = reader.read_lenenc_int()?;
        let last_insert_id = reader.read_lenenc_int()?;
        let status_flags = reader.read_int2()?;
        let warnings = reader.read_int2()?;
        let info = String::from_utf8_lossy(reader.read_rest()).to_string();
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(Self::HEADER);
        writer.write_lenenc_int(self.affected_rows);
        writer.write_lenenc_int(self.last_insert_id);
        writer.write_int2(self.status_flags);
        writer.write_int2(self.warnings);
        writer.write_bytes(self.info.as_bytes());
        writer.into_bytes()
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: 0x0002,
            warnings: 0,
            info: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub const HEADER: u8 = 0xff;

    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let header = reader.read_int1()?;
        if header != Self::HEADER {
            return Err(ShardpipeError::Protocol(format!(
                "expected ERR header, got {header:#04x}"
            )));
        }
        let error_code = reader.read_int2()?;
        reader.read_int1()?; // '#'
        let sql_state = String::from_utf8_lossy(reader.read_bytes(5)?).to_string();
        let error_message = String::from_utf8_lossy(reader.read_rest()).to_string();
        Ok(Self {
            error_code,
            sql_state,
            error_message,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(Self::HEADER);
        writer.write_int2(self.error_code);
        writer.write_int1(b'#');
        writer.write_bytes(self.sql_state.as_bytes());
        writer.write_bytes(self.error_message.as_bytes());
        writer.into_bytes()
    }
}

impl From<&ErrPacket> for ShardpipeError {
    fn from(packet: &ErrPacket) -> Self {
        ShardpipeError::Sql {
            code: packet.error_code,
            state: packet.sql_state.clone(),
            message: packet.error_message.clone(),
        }
    }
}

/// Terminator for a column-definition or row block. Only packets shorter
/// than 9 bytes with the 0xFE header are EOF; longer ones are row data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub const HEADER: u8 = 0xfe;

    pub fn is_eof(payload: &[u8]) -> bool {
        !payload.is_empty() && payload[0] == Self::HEADER && payload.len() < 9
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let header = reader.read_int1()?;
        if header != Self::HEADER {
            return Err(ShardpipeError::Protocol(format!(
                "expected EOF header, got {header:#04x}"
            )));
        }
        let warnings = reader.read_int2()?;
        let status_flags = reader.read_int2()?;
        Ok(Self {
            warnings,
            status_flags,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(Self::HEADER);
        writer.write_int2(self.warnings);
        writer.write_int2(self.status_flags);
        writer.into_bytes()
    }
}

/// Column metadata in the 4.1 protocol layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition41Packet {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition41Packet {
    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let catalog = reader.read_lenenc_string()?;
        let schema = reader.read_lenenc_string()?;
        let table = reader.read_lenenc_string()?;
        let org_table = reader.read_lenenc_string()?;
        let name = reader.read_lenenc_string()?;
        let org_name = reader.read_lenenc_string()?;
        reader.read_lenenc_int()?; // fixed-length field count, always 0x0c
        let charset = reader.read_int2()?;
        let column_length = reader.read_int4()?;
        let column_type = reader.read_int1()?;
        let flags = reader.read_int2()?;
        let decimals = reader.read_int1()?;
        reader.read_int2()?; // filler
        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_lenenc_string(&self.catalog);
        writer.write_lenenc_string(&self.schema);
        writer.write_lenenc_string(&self.table);
        writer.write_lenenc_string(&self.org_table);
        writer.write_lenenc_string(&self.name);
        writer.write_lenenc_string(&self.org_name);
        writer.write_lenenc_int(0x0c);
        writer.write_int2(self.charset);
        writer.write_int4(self.column_length);
        writer.write_int1(self.column_type);
        writer.write_int2(self.flags);
        writer.write_int1(self.decimals);
        writer.write_int2(0);
        writer.into_bytes()
    }
}

/// Text-protocol row: one length-encoded string per column, 0xFB for NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct TextResultSetRowPacket {
    pub values: Vec<Option<String>>,
}

impl TextResultSetRowPacket {
    const NULL_MARKER: u8 = 0xfb;

    pub fn decode(payload: &[u8], column_count: usize) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let mut values = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            if reader.peek_int1()? == Self::NULL_MARKER {
                reader.read_int1()?;
                values.push(None);
            } else {
                values.push(Some(reader.read_lenenc_string()?));
            }
        }
        Ok(Self { values })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        for value in &self.values {
            match value {
                Some(value) => writer.write_lenenc_string(value),
                None => writer.write_int1(Self::NULL_MARKER),
            }
        }
        writer.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComQueryPacket {
    pub sql: String,
}

impl ComQueryPacket {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ShardpipeError> {
        let mut reader = PayloadReader::new(payload);
        let header = reader.read_int1()?;
        if header != command::COM_QUERY {
            return Err(ShardpipeError::Protocol(format!(
                "expected COM_QUERY, got {header:#04x}"
            )));
        }
        let sql = String::from_utf8_lossy(reader.read_rest()).to_string();
        Ok(Self { sql })
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(command::COM_QUERY);
        writer.write_bytes(self.sql.as_bytes());
        writer.into_bytes()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComQuitPacket;

impl ComQuitPacket {
    pub fn encode(&self) -> Bytes {
        let mut writer = PayloadWriter::new();
        writer.write_int1(command::COM_QUIT);
        writer.into_bytes()
    }
}
