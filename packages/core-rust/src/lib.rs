//! Tern core: wire messages, declared method types, codecs, and the
//! data-path error taxonomy shared by the server and its callers.

pub mod codec;
pub mod error;
pub mod messages;
pub mod status;
pub mod types;

pub use codec::{codec_by_name, Codec, CodecError, JsonCodec, MsgPackCodec, DEFAULT_CODEC};
pub use error::RpcError;
pub use messages::{CallMeta, RequestEnvelope, RpcResponse, StatusBody};
pub use status::NodeStatus;
pub use types::{BindError, TypeSpec};
