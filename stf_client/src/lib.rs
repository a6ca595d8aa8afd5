//! Client side of the transform buffer server.
//!
//! [`BufferClient`] implements [`stf_traits::TransformLookup`] over the wire, so code written
//! against the trait runs the same against a remote server or an in-process buffer.

mod broadcaster;
mod client;
mod connection;

pub use broadcaster::{TransformBroadcaster, MAX_TRANSFORMS_PER_PUBLISH};
pub use client::{
    BufferClient, ClientConfig, ClientState, DEFAULT_CONNECT_RETRY_INTERVAL,
    DEFAULT_RESPONSE_GRACE,
};
