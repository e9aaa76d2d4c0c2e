//! `PX` wire codec.
//!
//! ```text
//! PX <x> <y> <rrggbbaa>\n
//! ```
//!
//! Coordinates are unsigned decimal, the color is exactly eight
//! lowercase hex digits. The decoder additionally accepts the
//! six-digit `rrggbb` form (alpha = `ff`) that canvas servers accept.

mod batch;

pub use batch::{Batch, BatchEncoder, DEFAULT_BATCH_SIZE};

use std::fmt::Write as _;

use bytes::{Buf, BytesMut};

use crate::error::FlutError;
use crate::pixels::Color;

/// Longest possible command: `PX 4294967295 4294967295 rrggbbaa\n`.
pub const MAX_COMMAND_LEN: usize = 3 + 10 + 1 + 10 + 1 + 8 + 1;

/// A single set-pixel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelCommand {
    pub x: u32,
    pub y: u32,
    pub color: Color,
}

impl PixelCommand {
    pub const fn new(x: u32, y: u32, color: Color) -> Self {
        Self { x, y, color }
    }

    /// Append the wire form of this command to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let Color { r, g, b, a } = self.color;
        dst.reserve(MAX_COMMAND_LEN);
        // Writing into a BytesMut cannot fail.
        let _ = writeln!(dst, "PX {} {} {r:02x}{g:02x}{b:02x}{a:02x}", self.x, self.y);
    }

    /// Parse one line (with or without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, FlutError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut parts = line.split(' ');

        match parts.next() {
            Some("PX") => {}
            _ => return Err(FlutError::Protocol(format!("not a PX command: {line:?}"))),
        }
        let x: u32 = parts
            .next()
            .ok_or_else(|| FlutError::Protocol("missing x".into()))?
            .parse()?;
        let y: u32 = parts
            .next()
            .ok_or_else(|| FlutError::Protocol("missing y".into()))?
            .parse()?;
        let hex = parts
            .next()
            .ok_or_else(|| FlutError::Protocol("missing color".into()))?;
        if parts.next().is_some() {
            return Err(FlutError::Protocol(format!("trailing fields: {line:?}")));
        }

        Ok(Self::new(x, y, parse_color(hex)?))
    }
}

fn parse_color(hex: &str) -> Result<Color, FlutError> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FlutError::Protocol(format!("invalid color {hex:?}")));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    match hex.len() {
        6 => Ok(Color::new(channel(0)?, channel(2)?, channel(4)?, 0xff)),
        8 => Ok(Color::new(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
        n => Err(FlutError::Protocol(format!(
            "color must have 6 or 8 hex digits, got {n}"
        ))),
    }
}

// ── PixelCodec ───────────────────────────────────────────────────

/// Line codec for framed `PX` I/O via `tokio_util`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelCodec;

impl tokio_util::codec::Encoder<PixelCommand> for PixelCodec {
    type Error = FlutError;

    fn encode(&mut self, item: PixelCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for PixelCodec {
    type Item = PixelCommand;
    type Error = FlutError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_COMMAND_LEN {
                return Err(FlutError::Protocol(format!(
                    "line exceeds {MAX_COMMAND_LEN} bytes without newline"
                )));
            }
            return Ok(None);
        };

        let line = src.split_to(newline + 1);
        let text = std::str::from_utf8(&line)
            .map_err(|e| FlutError::Protocol(format!("invalid utf-8: {e}")))?;
        PixelCommand::parse(text).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(cmd) => Ok(Some(cmd)),
            None if src.is_empty() => Ok(None),
            None => {
                let rest = src.len();
                src.advance(rest);
                Err(FlutError::Protocol(format!(
                    "{rest} trailing bytes without newline"
                )))
            }
        }
    }
}
