//! The simple tf buffer wire protocol.
//!
//! A client sends [`Request`]s tagged with a request id it picked, the server answers each of them
//! with exactly one [`Response`] carrying the same id. Responses may come back in any order.

pub mod codec;
pub mod messages;
pub mod naming;

pub use codec::{
    decode_payload, encode_payload, read_frame, write_frame, write_message, RawFrame,
    MAX_FRAME_LEN, PROTOCOL_VERSION,
};
pub use messages::{
    ErrorKind, LookupFullRequest, LookupRequest, PublishRequest, Request, Response,
};
pub use naming::{runtime_dir, ServerName, DEFAULT_SERVER_NAME, RUNTIME_DIR_ENV};
