//! Fans one logical query out over two live backend connections and checks
//! that the assembled per-shard results come back in unit order.

use async_trait::async_trait;
use shardpipe_backend::{BackendConnection, BackendRegistries, QueryResult};
use shardpipe_core::{DataSourceConfig, ShardpipeError, SqlType, SqlUnit};
use shardpipe_executor::{ExecuteCallback, ExecutionContext, ExecutorEngine, StatementUnit};
use shardpipe_protocol::codec::{read_packet, write_packet};
use shardpipe_protocol::packets::{
    capability, handshake_capabilities, ColumnDefinition41Packet, ComQueryPacket, EofPacket,
    HandshakePacket, OkPacket, TextResultSetRowPacket, CHARSET,
};
use std::sync::Arc;
use tokio::io::DuplexStream;

fn data_source(name: &str) -> DataSourceConfig {
    DataSourceConfig {
        name: name.into(),
        username: "root".into(),
        password: Some("secret".into()),
        schema: "sharding_db".into(),
    }
}

fn column(name: &str) -> ColumnDefinition41Packet {
    ColumnDefinition41Packet {
        catalog: "def".into(),
        schema: "sharding_db".into(),
        table: "t_order".into(),
        org_table: "t_order".into(),
        name: name.into(),
        org_name: name.into(),
        charset: 33,
        column_length: 255,
        column_type: 253,
        flags: 0,
        decimals: 0,
    }
}

/// Scripted backend: authenticates any client, answers one query with a
/// single-row result set carrying the given order id.
async fn serve_shard(mut stream: DuplexStream, connection_id: u32, order_id: &str) {
    let handshake = HandshakePacket {
        protocol_version: 10,
        server_version: "5.7.34".into(),
        connection_id,
        auth_plugin_data: (1..=20).collect(),
        capability_flags: handshake_capabilities() | capability::CLIENT_PLUGIN_AUTH,
        charset: CHARSET,
        status_flags: 0x0002,
        auth_plugin_name: "mysql_native_password".into(),
    };
    write_packet(&mut stream, 0, &handshake.encode())
        .await
        .expect("handshake");
    let _ = read_packet(&mut stream).await.expect("handshake response");
    write_packet(&mut stream, 2, &OkPacket::default().encode())
        .await
        .expect("auth ok");

    let (_, payload) = read_packet(&mut stream).await.expect("command");
    ComQueryPacket::decode(&payload).expect("query");
    write_packet(&mut stream, 1, &[0x01]).await.expect("count");
    write_packet(&mut stream, 2, &column("order_id").encode())
        .await
        .expect("column");
    write_packet(&mut stream, 3, &EofPacket::default().encode())
        .await
        .expect("columns eof");
    let row = TextResultSetRowPacket {
        values: vec![Some(order_id.to_string())],
    };
    write_packet(&mut stream, 4, &row.encode()).await.expect("row");
    write_packet(&mut stream, 5, &EofPacket::default().encode())
        .await
        .expect("rows eof");
}

struct QueryShard;

#[async_trait]
impl ExecuteCallback<BackendConnection<DuplexStream>, QueryResult> for QueryShard {
    async fn execute(
        &self,
        unit: &StatementUnit<BackendConnection<DuplexStream>>,
        connection: &mut BackendConnection<DuplexStream>,
        _context: &ExecutionContext,
    ) -> Result<QueryResult, ShardpipeError> {
        connection.execute(&unit.sql_unit.sql).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logical_query_fans_out_over_two_backends() {
    let registries = Arc::new(BackendRegistries::new());
    let mut units = Vec::new();
    let mut servers = Vec::new();
    for (index, order_id) in ["1001", "2002"].iter().enumerate() {
        let (client, server) = tokio::io::duplex(4096);
        let name = format!("ds_{index}");
        servers.push(tokio::spawn(serve_shard(
            server,
            100 + index as u32,
            order_id,
        )));
        let connection =
            BackendConnection::connect(client, data_source(&name), registries.clone())
                .await
                .expect("connect");
        units.push(StatementUnit::new(
            name,
            SqlUnit::new("SELECT order_id FROM t_order"),
            Arc::new(tokio::sync::Mutex::new(connection)),
        ));
    }

    let engine = ExecutorEngine::new(2);
    let results = engine
        .execute(SqlType::Dql, units, Arc::new(QueryShard))
        .await
        .expect("fan-out");

    assert_eq!(results.len(), 2);
    let order_ids: Vec<String> = results
        .into_iter()
        .map(|result| {
            let result = result.expect("result");
            result.rows()[0].values[0].clone().expect("order id")
        })
        .collect();
    assert_eq!(order_ids, vec!["1001", "2002"]);
    for server in servers {
        server.await.expect("server");
    }
}
