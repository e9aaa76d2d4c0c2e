//! Canvas connections.
//!
//! [`ConnectionChannel`] owns one TCP stream behind a writer task so that
//! concurrent workers can share it without tearing `PX` lines.

mod connection;

pub use connection::{ConnectionChannel, ConnectionInfo, PixelSink, WriteOptions};
