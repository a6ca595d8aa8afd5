//! The transform buffer server.
//!
//! One process owns the frame tree and serves lookups to any number of clients over a local
//! socket named after the server. Requests are decoded by one reader thread per connection and
//! answered on a pool of handler threads, so a lookup waiting for data never holds up the others.

pub mod config;
mod server;

pub use config::{read_configuration, read_configuration_str, ServerConfig, StaticTransformConfig};
pub use server::{Dispatcher, ServerHandle, TransformServer};
