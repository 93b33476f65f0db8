pub mod connection;
pub mod registry;
pub mod response;
pub mod result;

pub use connection::BackendConnection;
pub use registry::{BackendRegistries, ChannelId, ConnectionId};
pub use response::{ConnectionPhase, PacketOutcome, ResponseStateMachine};
pub use result::{GenericResponse, QueryResult, ResultPhase};
