//! # flut-client — pixelflut image flooder
//!
//! Loads an image, scales it to the requested canvas size and floods it
//! onto a pixelflut server through `flut-core`.
//!
//! Settings come from a TOML file ([`config::ClientConfig`]) and are
//! overridden by command-line flags.

pub mod config;
pub mod source;
