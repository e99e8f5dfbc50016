//! Client networking for the tabletop sync client: wire protocol, framing,
//! payload compression, and the TCP transport that carries it.

pub mod bandwidth;
pub mod compression;
pub mod events;
pub mod framing;
pub mod messages;
pub mod payloads;
pub mod platform;
pub mod reconnection;
pub mod transport;

pub use bandwidth::{NetworkCounters, TrafficSnapshot};
pub use compression::{
    CompressionConfig, CompressionError, compress_payload, decompress_payload, pack_json, unpack_json,
};
pub use events::{
    BatchUpdate, DeltaUpdate, GameEvent, KNOWN_EVENT_TYPES, Priority, WireEvent, WireEventError,
};
pub use framing::{FrameConfig, FrameError, encode_frame, read_frame, write_frame};
pub use messages::{
    ClientMessage, MessageError, PROTOCOL_VERSION, ServerMessage, decode_message, encode_message,
    unix_millis,
};
pub use payloads::*;
pub use platform::{SocketConfig, configure_stream};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectState, reconnect_with_backoff};
pub use transport::{
    ConnectionState, ConnectionStateWatch, TcpTransport, Transport, TransportConfig,
    TransportError, TransportEvent,
};
