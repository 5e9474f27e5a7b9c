//! # Remote Speech Service
//!
//! - **protocol**: JSON events exchanged with the realtime API
//! - **transport**: the per-session socket, reconnects and the reader worker

pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use transport::WsConnector;
