//! Row-band partitioning of a [`PixelBuffer`].
//!
//! A chunk is a half-open range of full-width rows. `partition` splits
//! the image into `count` bands of `height / count` rows each; the last
//! band absorbs the remainder so the union is always exactly
//! `[0, height)`.

use crate::codec::PixelCommand;
use crate::error::FlutError;
use crate::pixels::{CHANNELS, Color, Offset, PixelBuffer};

/// One unit of work: rows `[row_start, row_end)` spanning the full width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the partition, used as the task index.
    pub index: usize,
    pub row_start: u32,
    pub row_end: u32,
}

impl Chunk {
    /// Number of rows in the band.
    pub fn rows(&self) -> u32 {
        self.row_end - self.row_start
    }

    /// Top-left corner of the band in image coordinates.
    pub fn origin(&self) -> (u32, u32) {
        (0, self.row_start)
    }

    /// Number of pixels in the band of a `width`-wide image.
    pub fn pixel_count(&self, width: u32) -> usize {
        self.rows() as usize * width as usize
    }

    /// Commands for every pixel of the band in raster order.
    ///
    /// Coordinates come from the pixel's index in the full buffer
    /// (`x = index % width`, `y = index / width`) shifted by `offset`.
    pub fn commands<'a>(
        &self,
        buffer: &'a PixelBuffer,
        offset: Offset,
    ) -> impl Iterator<Item = PixelCommand> + 'a {
        let width = buffer.width() as usize;
        let first = self.row_start as usize * width;
        buffer
            .rows(self.row_start, self.row_end)
            .chunks_exact(CHANNELS)
            .enumerate()
            .map(move |(i, px)| {
                let index = first + i;
                PixelCommand::new(
                    (index % width) as u32 + offset.x,
                    (index / width) as u32 + offset.y,
                    Color::from_rgba(px),
                )
            })
    }
}

/// Split `buffer` into `count` disjoint, gapless row bands.
pub fn partition(buffer: &PixelBuffer, count: usize) -> Result<Vec<Chunk>, FlutError> {
    let height = buffer.height();
    if count == 0 || count > height as usize {
        return Err(FlutError::InvalidChunkCount { count, height });
    }

    let rows_per_chunk = height / count as u32;
    let chunks = (0..count)
        .map(|i| {
            let row_start = i as u32 * rows_per_chunk;
            let row_end = if i == count - 1 {
                height
            } else {
                row_start + rows_per_chunk
            };
            Chunk {
                index: i,
                row_start,
                row_end,
            }
        })
        .collect();
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::filled(width, height, Color::new(0, 0, 0, 0xff)).unwrap()
    }

    fn assert_exact_cover(chunks: &[Chunk], height: u32) {
        let mut next = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.row_start, next, "gap or overlap before chunk {i}");
            assert!(chunk.row_end > chunk.row_start, "chunk {i} is empty");
            assert_eq!(chunk.origin(), (0, chunk.row_start));
            next = chunk.row_end;
        }
        assert_eq!(next, height);
    }

    #[test]
    fn every_count_covers_every_row_once() {
        for height in 1..=40 {
            let buf = buffer(3, height);
            for count in 1..=height as usize {
                let chunks = partition(&buf, count).unwrap();
                assert_eq!(chunks.len(), count);
                assert_exact_cover(&chunks, height);
            }
        }
    }

    #[test]
    fn last_chunk_absorbs_remainder() {
        let chunks = partition(&buffer(4, 10), 3).unwrap();
        let bands: Vec<_> = chunks.iter().map(|c| (c.row_start, c.row_end)).collect();
        assert_eq!(bands, vec![(0, 3), (3, 6), (6, 10)]);
    }

    #[test]
    fn one_row_per_chunk() {
        let chunks = partition(&buffer(4, 5), 5).unwrap();
        assert!(chunks.iter().all(|c| c.rows() == 1));
    }

    #[test]
    fn single_chunk_is_whole_image() {
        let chunks = partition(&buffer(4, 5), 1).unwrap();
        assert_eq!(
            chunks,
            vec![Chunk {
                index: 0,
                row_start: 0,
                row_end: 5
            }]
        );
    }

    #[test]
    fn rejects_bad_counts() {
        let buf = buffer(4, 4);
        assert!(matches!(
            partition(&buf, 0),
            Err(FlutError::InvalidChunkCount {
                count: 0,
                height: 4
            })
        ));
        assert!(matches!(
            partition(&buf, 5),
            Err(FlutError::InvalidChunkCount {
                count: 5,
                height: 4
            })
        ));
    }

    #[test]
    fn commands_walk_rows_in_raster_order() {
        let mut data = Vec::new();
        for i in 0..12u8 {
            data.extend_from_slice(&[i, 0, 0, 0xff]);
        }
        let buf = PixelBuffer::from_rgba(4, 3, data).unwrap();
        let chunk = Chunk {
            index: 1,
            row_start: 1,
            row_end: 3,
        };
        let coords: Vec<_> = chunk
            .commands(&buf, Offset::default())
            .map(|c| (c.x, c.y, c.color.r))
            .collect();
        assert_eq!(coords.len(), chunk.pixel_count(4));
        assert_eq!(coords[0], (0, 1, 4));
        assert_eq!(coords[3], (3, 1, 7));
        assert_eq!(coords[4], (0, 2, 8));
        assert_eq!(coords[7], (3, 2, 11));
    }

    #[test]
    fn commands_apply_offset() {
        let buf = buffer(2, 2);
        let chunk = Chunk {
            index: 0,
            row_start: 0,
            row_end: 2,
        };
        let first = chunk.commands(&buf, Offset { x: 100, y: 50 }).next().unwrap();
        assert_eq!((first.x, first.y), (100, 50));
    }
}
