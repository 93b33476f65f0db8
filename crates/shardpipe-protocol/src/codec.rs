use bytes::{BufMut, Bytes, BytesMut};
use shardpipe_core::ShardpipeError;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload expressible in a single frame; larger commands would need
/// continuation packets, which the proxy never emits.
pub const MAX_PAYLOAD_LEN: usize = 0x00ff_ffff;

fn short_frame(err: std::io::Error) -> ShardpipeError {
    if err.kind() == ErrorKind::UnexpectedEof {
        ShardpipeError::Protocol("short frame".into())
    } else {
        ShardpipeError::Io(err)
    }
}

/// Reads one framed packet: `payload_length[3, LE] | sequence_id[1] | payload`.
pub async fn read_packet<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(u8, Bytes), ShardpipeError> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(short_frame)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let sequence_id = header[3];
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(short_frame)?;
    Ok((sequence_id, Bytes::from(payload)))
}

pub async fn write_packet<S: AsyncWrite + Unpin>(
    stream: &mut S,
    sequence_id: u8,
    payload: &[u8],
) -> Result<(), ShardpipeError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ShardpipeError::Protocol(format!(
            "payload of {} bytes exceeds a single frame",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    let len = payload.len() as u32;
    buf.put_u8((len & 0xff) as u8);
    buf.put_u8(((len >> 8) & 0xff) as u8);
    buf.put_u8(((len >> 16) & 0xff) as u8);
    buf.put_u8(sequence_id);
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Cursor over one packet payload exposing the typed field readers of the
/// MySQL protocol. All multi-byte integers are little-endian.
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// First payload byte without consuming it. Phase dispatch inspects
    /// headers this way.
    pub fn peek_int1(&self) -> Result<u8, ShardpipeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| ShardpipeError::Protocol("empty payload".into()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ShardpipeError> {
        if self.remaining() < len {
            return Err(ShardpipeError::Protocol(format!(
                "payload too short: need {len}, have {}",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    pub fn read_int1(&mut self) -> Result<u8, ShardpipeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_int2(&mut self) -> Result<u16, ShardpipeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_int3(&mut self) -> Result<u32, ShardpipeError> {
        let bytes = self.read_bytes(3)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    pub fn read_int4(&mut self) -> Result<u32, ShardpipeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_int6(&mut self) -> Result<u64, ShardpipeError> {
        let bytes = self.read_bytes(6)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], 0, 0,
        ]))
    }

    pub fn read_int8(&mut self) -> Result<u64, ShardpipeError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub fn read_lenenc_int(&mut self) -> Result<u64, ShardpipeError> {
        let first = self.read_int1()?;
        match first {
            0..=0xfa => Ok(u64::from(first)),
            0xfc => Ok(u64::from(self.read_int2()?)),
            0xfd => Ok(u64::from(self.read_int3()?)),
            0xfe => self.read_int8(),
            other => Err(ShardpipeError::Protocol(format!(
                "malformed length-encoded integer prefix: {other:#04x}"
            ))),
        }
    }

    pub fn read_lenenc_bytes(&mut self) -> Result<&'a [u8], ShardpipeError> {
        let len = self.read_lenenc_int()? as usize;
        self.read_bytes(len)
    }

    pub fn read_lenenc_string(&mut self) -> Result<String, ShardpipeError> {
        let bytes = self.read_lenenc_bytes()?;
        Ok(String::from_utf8_lossy(bytes).to_string())
    }

    pub fn read_null_terminated_string(&mut self) -> Result<String, ShardpipeError> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(ShardpipeError::Protocol("unterminated string".into()));
        }
        let value = String::from_utf8_lossy(&self.data[start..self.pos]).to_string();
        self.pos += 1;
        Ok(value)
    }
}

/// Mirror of [`PayloadReader`] for building payloads.
#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_int1(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_int2(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_int3(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_int4(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_int6(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes()[..6]);
    }

    pub fn write_int8(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 0xfb {
            self.buf.put_u8(value as u8);
        } else if value < 0x1_0000 {
            self.buf.put_u8(0xfc);
            self.buf.put_u16_le(value as u16);
        } else if value < 0x100_0000 {
            self.buf.put_u8(0xfd);
            self.buf.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
        } else {
            self.buf.put_u8(0xfe);
            self.buf.put_u64_le(value);
        }
    }

    pub fn write_lenenc_bytes(&mut self, bytes: &[u8]) {
        self.write_lenenc_int(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_lenenc_string(&mut self, value: &str) {
        self.write_lenenc_bytes(value.as_bytes());
    }

    pub fn write_null_terminated_string(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.put_u8(0);
    }
}
