//! Batching of encoded commands into single write payloads.

use bytes::{Bytes, BytesMut};

use super::PixelCommand;

/// Default flush threshold in bytes.
pub const DEFAULT_BATCH_SIZE: usize = 16 * 1024;

/// One flushed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub payload: Bytes,
    /// Number of `PX` lines in `payload`.
    pub commands: usize,
}

/// Accumulates encoded `PX` lines up to a byte threshold.
///
/// Flush contract:
/// - [`push`](Self::push) returns the previously accumulated bytes when
///   appending the new command would exceed the threshold; the new
///   command becomes the start of the next batch.
/// - [`finish`](Self::finish) returns whatever is left.
///
/// Every flushed payload ends on a line boundary and commands come out in
/// the order they were pushed.
#[derive(Debug)]
pub struct BatchEncoder {
    buf: BytesMut,
    threshold: usize,
    pending_commands: usize,
    commands: usize,
}

impl BatchEncoder {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(threshold.max(super::MAX_COMMAND_LEN)),
            threshold,
            pending_commands: 0,
            commands: 0,
        }
    }

    /// Encode `cmd`, returning a full batch if one had to be flushed.
    pub fn push(&mut self, cmd: &PixelCommand) -> Option<Batch> {
        let mark = self.buf.len();
        cmd.encode_into(&mut self.buf);
        self.commands += 1;

        if self.buf.len() > self.threshold && mark > 0 {
            let batch = Batch {
                payload: self.buf.split_to(mark).freeze(),
                commands: self.pending_commands,
            };
            self.pending_commands = 1;
            Some(batch)
        } else {
            self.pending_commands += 1;
            None
        }
    }

    /// Take the remaining bytes, if any.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.buf.is_empty() {
            return None;
        }
        let batch = Batch {
            payload: self.buf.split().freeze(),
            commands: self.pending_commands,
        };
        self.pending_commands = 0;
        Some(batch)
    }

    /// Bytes waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Commands encoded since construction.
    pub fn commands(&self) -> usize {
        self.commands
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for BatchEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
