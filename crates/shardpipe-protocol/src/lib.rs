pub mod auth;
pub mod codec;
pub mod packets;

#[cfg(test)]
mod tests;

pub use auth::scramble_native_password;
pub use codec::{read_packet, write_packet, PayloadReader, PayloadWriter};
pub use packets::{
    ColumnDefinition41Packet, ComQueryPacket, ComQuitPacket, EofPacket, ErrPacket,
    HandshakePacket, HandshakeResponse41Packet, OkPacket, TextResultSetRowPacket,
};
