#[cfg(test)]
mod tests {
    use crate::auth::scramble_native_password;
    use crate::codec::{read_packet, write_packet, PayloadReader, PayloadWriter};
    use crate::packets::{
        capability, ColumnDefinition41Packet, ComQueryPacket, EofPacket, ErrPacket,
        HandshakePacket, HandshakeResponse41Packet, OkPacket, TextResultSetRowPacket, CHARSET,
        MAX_PACKET_SIZE,
    };
    use sha1::{Digest, Sha1};
    use shardpipe_core::ShardpipeError;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn packet_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_packet(&mut client, 3, b"\x03SELECT 1").await.expect("write");
        let (sequence_id, payload) = read_packet(&mut server).await.expect("read");
        assert_eq!(sequence_id, 3);
        assert_eq!(&payload[..], b"\x03SELECT 1");
    }

    #[tokio::test]
    async fn short_frame_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Header promises 16 payload bytes but only 2 arrive.
        client.write_all(&[16, 0, 0, 1, 0xaa, 0xbb]).await.expect("write");
        drop(client);
        let err = read_packet(&mut server).await.expect_err("short frame");
        assert!(matches!(err, ShardpipeError::Protocol(_)));
    }

    #[test]
    fn lenenc_int_forms() {
        let mut writer = PayloadWriter::new();
        writer.write_lenenc_int(250);
        writer.write_lenenc_int(251);
        writer.write_lenenc_int(0xfffe);
        writer.write_lenenc_int(0x10000);
        writer.write_lenenc_int(0x1_0000_0000);
        let bytes = writer.into_bytes();
        let mut reader = PayloadReader::new(&bytes);
        assert_eq!(reader.read_lenenc_int().expect("1 byte"), 250);
        assert_eq!(reader.read_lenenc_int().expect("3 byte"), 251);
        assert_eq!(reader.read_lenenc_int().expect("3 byte"), 0xfffe);
        assert_eq!(reader.read_lenenc_int().expect("4 byte"), 0x10000);
        assert_eq!(reader.read_lenenc_int().expect("9 byte"), 0x1_0000_0000);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn lenenc_int_rejects_null_and_err_prefixes() {
        for prefix in [0xfbu8, 0xff] {
            let bytes = [prefix, 0, 0];
            let mut reader = PayloadReader::new(&bytes);
            assert!(matches!(
                reader.read_lenenc_int(),
                Err(ShardpipeError::Protocol(_))
            ));
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let bytes = [0xfe, 0x00, 0x00, 0x02, 0x00];
        let mut reader = PayloadReader::new(&bytes);
        assert_eq!(reader.peek_int1().expect("peek"), 0xfe);
        assert_eq!(reader.peek_int1().expect("peek again"), 0xfe);
        assert_eq!(reader.read_int1().expect("read"), 0xfe);
        assert_eq!(reader.read_int2().expect("warnings"), 0);
    }

    #[test]
    fn fixed_width_ints_are_little_endian() {
        let mut writer = PayloadWriter::new();
        writer.write_int3(0xabcdef);
        writer.write_int6(0x0000_a1b2_c3d4_e5f6);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..3], &[0xef, 0xcd, 0xab]);
        let mut reader = PayloadReader::new(&bytes);
        assert_eq!(reader.read_int3().expect("int3"), 0xabcdef);
        assert_eq!(reader.read_int6().expect("int6"), 0x0000_a1b2_c3d4_e5f6);
    }

    #[test]
    fn null_terminated_string_requires_terminator() {
        let mut reader = PayloadReader::new(b"abc\0rest");
        assert_eq!(reader.read_null_terminated_string().expect("read"), "abc");
        assert_eq!(reader.read_rest(), b"rest");
        let mut unterminated = PayloadReader::new(b"abc");
        assert!(matches!(
            unterminated.read_null_terminated_string(),
            Err(ShardpipeError::Protocol(_))
        ));
    }

    fn sample_handshake() -> HandshakePacket {
        HandshakePacket {
            protocol_version: 10,
            server_version: "5.7.34".into(),
            connection_id: 42,
            auth_plugin_data: (1..=20).collect(),
            capability_flags: capability::CLIENT_PROTOCOL_41
                | capability::CLIENT_SECURE_CONNECTION
                | capability::CLIENT_PLUGIN_AUTH,
            charset: CHARSET,
            status_flags: 0x0002,
            auth_plugin_name: "mysql_native_password".into(),
        }
    }

    #[test]
    fn handshake_decode() {
        let encoded = sample_handshake().encode();
        let decoded = HandshakePacket::decode(&encoded).expect("decode");
        assert_eq!(decoded.protocol_version, 10);
        assert_eq!(decoded.server_version, "5.7.34");
        assert_eq!(decoded.connection_id, 42);
        assert_eq!(decoded.auth_plugin_data, (1..=20).collect::<Vec<u8>>());
        assert_eq!(decoded.auth_plugin_name, "mysql_native_password");
    }

    #[test]
    fn handshake_rejects_wrong_protocol_version() {
        let mut encoded = sample_handshake().encode().to_vec();
        encoded[0] = 9;
        assert!(matches!(
            HandshakePacket::decode(&encoded),
            Err(ShardpipeError::Protocol(_))
        ));
    }

    #[test]
    fn handshake_response_layout() {
        let packet = HandshakeResponse41Packet::new("root", vec![0xaa; 20], "sharding_db");
        let encoded = packet.encode();
        let decoded = HandshakeResponse41Packet::decode(&encoded).expect("decode");
        assert_eq!(decoded.max_packet_size, MAX_PACKET_SIZE);
        assert_eq!(decoded.charset, CHARSET);
        assert_eq!(decoded.username, "root");
        assert_eq!(decoded.auth_response, vec![0xaa; 20]);
        assert_eq!(decoded.database, "sharding_db");
        // 23 reserved bytes follow the 9 fixed bytes.
        assert!(encoded[9..32].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn ok_packet_decode() {
        let payload = OkPacket {
            affected_rows: 3,
            last_insert_id: 7,
            status_flags: 0x0002,
            warnings: 1,
            info: "ok".into(),
        }
        .encode();
        let decoded = OkPacket::decode(&payload).expect("decode");
        assert_eq!(decoded.affected_rows, 3);
        assert_eq!(decoded.last_insert_id, 7);
        assert_eq!(decoded.warnings, 1);
        assert_eq!(decoded.info, "ok");
    }

    #[test]
    fn err_packet_decode() {
        let payload = ErrPacket {
            error_code: 1146,
            sql_state: "42S02".into(),
            error_message: "Table 'db.t' doesn't exist".into(),
        }
        .encode();
        assert_eq!(payload[0], ErrPacket::HEADER);
        let decoded = ErrPacket::decode(&payload).expect("decode");
        assert_eq!(decoded.error_code, 1146);
        assert_eq!(decoded.sql_state, "42S02");
        assert_eq!(decoded.error_message, "Table 'db.t' doesn't exist");
    }

    #[test]
    fn eof_detection_requires_short_packet() {
        let eof = EofPacket::default().encode();
        assert!(EofPacket::is_eof(&eof));
        // A row whose first cell begins with 0xFE lenenc prefix is 9+ bytes.
        let row = [0xfeu8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        assert!(!EofPacket::is_eof(&row));
    }

    #[test]
    fn column_definition_decode() {
        let payload = ColumnDefinition41Packet {
            catalog: "def".into(),
            schema: "sharding_db".into(),
            table: "t_order".into(),
            org_table: "t_order_0".into(),
            name: "order_id".into(),
            org_name: "order_id".into(),
            charset: 33,
            column_length: 11,
            column_type: 3,
            flags: 0,
            decimals: 0,
        }
        .encode();
        let decoded = ColumnDefinition41Packet::decode(&payload).expect("decode");
        assert_eq!(decoded.catalog, "def");
        assert_eq!(decoded.table, "t_order");
        assert_eq!(decoded.name, "order_id");
        assert_eq!(decoded.column_type, 3);
    }

    #[test]
    fn text_row_with_null_cell() {
        let payload = TextResultSetRowPacket {
            values: vec![Some("a".into()), None, Some("10".into())],
        }
        .encode();
        let decoded = TextResultSetRowPacket::decode(&payload, 3).expect("decode");
        assert_eq!(
            decoded.values,
            vec![Some("a".to_string()), None, Some("10".to_string())]
        );
    }

    #[test]
    fn com_query_roundtrip() {
        let payload = ComQueryPacket::new("SELECT * FROM t_order").encode();
        assert_eq!(payload[0], 0x03);
        let decoded = ComQueryPacket::decode(&payload).expect("decode");
        assert_eq!(decoded.sql, "SELECT * FROM t_order");
    }

    fn sha1_once(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[test]
    fn scramble_matches_native_password_scheme() {
        let salt = [0u8; 20];
        let response = scramble_native_password(b"secret", &salt);
        assert_eq!(response.len(), 20);

        let password_hash = sha1_once(b"secret");
        let mut salted = salt.to_vec();
        salted.extend_from_slice(&sha1_once(&password_hash));
        let expected: Vec<u8> = password_hash
            .iter()
            .zip(sha1_once(&salted).iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(response, expected);

        // response XOR SHA1(password) == SHA1(salt || SHA1(SHA1(password)))
        let recovered: Vec<u8> = response
            .iter()
            .zip(password_hash.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(recovered, sha1_once(&salted).to_vec());
    }

    #[test]
    fn empty_password_yields_empty_scramble() {
        assert!(scramble_native_password(b"", &[7u8; 20]).is_empty());
    }
}
