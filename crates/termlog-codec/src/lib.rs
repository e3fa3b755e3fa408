//! termlog-codec: bounded-size encoder for terminal I/O log messages.
//!
//! Turns timestamped input, output and window-resize packets into
//! messages that never exceed a fixed rendered size. Each message keeps
//! text and binary bytes per direction plus a compact timing record
//! string; writes that run out of space leave no partial state behind.

pub mod chunk;
pub mod config;
pub mod cost;
pub mod dispatcher;
pub mod error;
pub mod packet;
pub mod region;
pub mod sink;
pub mod stream;
pub mod trx;
pub mod utf8;

// Re-export commonly used items at crate root.
pub use chunk::{Chunk, WindowState};
pub use config::CodecConfig;
pub use cost::CostModel;
pub use dispatcher::{Budget, Dispatcher};
pub use error::{CodecError, CodecResult};
pub use packet::{Packet, PacketPos, Payload};
pub use sink::{Encoder, Message, MessageSink, OwnedMessage};
pub use stream::Stream;
pub use trx::{Transact, Trx};
