use std::io::{self, Read, Seek, SeekFrom};

use crate::index::{ByteRange, Segment};
use crate::response::RangeResponse;
use crate::Error;

/// Default chunk capacity, roughly one TCP kernel buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 65 * 1024;

/// Drives a variant's body through a callback in chunks of at most
/// `chunk_size` bytes, holding no more than one chunk's worth of bytes in
/// memory at a time.
///
/// Blocking I/O happens per chunk, and the callback is the only suspension
/// point — backpressure is whatever the caller enforces around it. A
/// [`Segment::LazyFile`] payload has its descriptor open only while that
/// one payload's chunks are produced, so peak descriptor usage stays at one
/// per in-flight payload no matter how many file segments the response
/// spans. Should the caller abort by returning an error from the callback,
/// the scoped acquisition still closes the handle on the way out.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedEmitter<'a> {
    response: &'a RangeResponse,
    chunk_size: usize,
}

impl<'a> ChunkedEmitter<'a> {
    pub fn new(response: &'a RangeResponse) -> Self {
        Self::with_chunk_size(response, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(response: &'a RangeResponse, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be at least one byte");
        ChunkedEmitter {
            response,
            chunk_size,
        }
    }

    /// Emits every body chunk through `visit`, allocating one scratch
    /// buffer for the whole run.
    pub fn each<F>(&self, visit: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        let mut scratch = vec![0u8; self.chunk_size];
        self.each_with_buffer(&mut scratch, visit)
    }

    /// Same as [`each`](Self::each) with a caller-owned scratch buffer that
    /// can be reused across responses. The buffer is resized to the chunk
    /// capacity; chunks handed to `visit` borrow from it.
    pub fn each_with_buffer<F>(&self, scratch: &mut Vec<u8>, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        scratch.resize(self.chunk_size, 0);
        self.response.each(|segment, local| match segment {
            Segment::Buffer(bytes) => self.for_each_chunk(local, |offset, len| {
                let at = offset as usize;
                visit(&bytes[at..at + len])
            }),
            Segment::OpenFile(file) => {
                // std implements Read and Seek for &File, so the caller's
                // handle can be used without exclusive ownership. It stays
                // open afterwards for the caller to manage.
                let mut handle: &std::fs::File = file;
                self.read_chunks(&mut handle, local, scratch, &mut visit)
            }
            Segment::LazyFile(lazy) => {
                lazy.with(|file| self.read_chunks(file, local, scratch, &mut visit))
            }
            Segment::Nested(_) => Err(Error::UnsupportedSegmentKind),
        })
    }

    // Splits a range into whole chunks of `chunk_size` bytes plus one
    // remainder chunk, handing absolute in-payload offsets to `f`.
    fn for_each_chunk(
        &self,
        range: ByteRange,
        mut f: impl FnMut(u64, usize) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let chunk = self.chunk_size as u64;
        let total = range.len();
        let whole = total / chunk;
        let remainder = total % chunk;

        for n in 0..whole {
            f(range.begin + n * chunk, self.chunk_size)?;
        }
        if remainder > 0 {
            f(range.begin + whole * chunk, remainder as usize)?;
        }
        Ok(())
    }

    fn read_chunks<R, F>(
        &self,
        handle: &mut R,
        range: ByteRange,
        scratch: &mut [u8],
        visit: &mut F,
    ) -> Result<(), Error>
    where
        R: Read + Seek,
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        self.for_each_chunk(range, |offset, len| {
            handle.seek(SeekFrom::Start(offset))?;
            let chunk = &mut scratch[..len];
            handle.read_exact(chunk).map_err(|source| {
                if source.kind() == io::ErrorKind::UnexpectedEof {
                    // An interior chunk coming up short means the segment
                    // no longer matches its declared size; padding or
                    // skipping would corrupt the offsets already promised
                    // in the headers.
                    Error::ShortRead {
                        offset,
                        expected: len,
                    }
                } else {
                    Error::Io(source)
                }
            })?;
            visit(chunk)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::ChunkedEmitter;
    use crate::index::{ByteRange, IntervalIndex, Segment};
    use crate::lazy_file::LazyFile;
    use crate::response::RangeResponse;
    use crate::Error;

    fn buffer_index(parts: &[&[u8]]) -> Arc<IntervalIndex> {
        let mut index = IntervalIndex::new();
        for part in parts {
            index
                .push(Segment::Buffer(Bytes::copy_from_slice(part)))
                .unwrap();
        }
        Arc::new(index)
    }

    fn collect_chunks(emitter: &ChunkedEmitter<'_>) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        emitter
            .each(|chunk| {
                chunks.push(chunk.to_vec());
                Ok(())
            })
            .unwrap();
        chunks
    }

    #[test]
    fn splits_into_whole_chunks_plus_remainder() {
        let index = buffer_index(&[b"0123456789"]);
        let response = RangeResponse::Full { index };
        let emitter = ChunkedEmitter::with_chunk_size(&response, 4);

        let chunks = collect_chunks(&emitter);
        assert_eq!(
            vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()],
            chunks,
        );
    }

    #[test]
    fn chunk_sized_range_has_no_remainder() {
        let index = buffer_index(&[b"01234567"]);
        let response = RangeResponse::Full { index };
        let emitter = ChunkedEmitter::with_chunk_size(&response, 4);

        let chunks = collect_chunks(&emitter);
        assert_eq!(vec![b"0123".to_vec(), b"4567".to_vec()], chunks);
    }

    #[test]
    fn scratch_buffer_is_reusable_across_responses() {
        let index = buffer_index(&[b"abcdef"]);
        let response = RangeResponse::Full { index };
        let emitter = ChunkedEmitter::with_chunk_size(&response, 4);

        let mut scratch = Vec::new();
        for _ in 0..2 {
            let mut body = Vec::new();
            emitter
                .each_with_buffer(&mut scratch, |chunk| {
                    body.extend_from_slice(chunk);
                    Ok(())
                })
                .unwrap();
            assert_eq!(b"abcdef".to_vec(), body);
        }
    }

    #[test]
    fn open_file_segments_seek_and_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let mut index = IntervalIndex::new();
        index
            .push(Segment::OpenFile(file.reopen().unwrap()))
            .unwrap();
        let response = RangeResponse::Single {
            index: Arc::new(index),
            range: ByteRange::new(2, 7),
        };

        let mut body = Vec::new();
        ChunkedEmitter::with_chunk_size(&response, 4)
            .each(|chunk| {
                body.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(b"234567".to_vec(), body);
    }

    #[test]
    fn lazy_file_segments_open_per_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let mut index = IntervalIndex::new();
        index
            .push(Segment::LazyFile(LazyFile::new(file.path())))
            .unwrap();
        index
            .push(Segment::Buffer(Bytes::from_static(b"tail")))
            .unwrap();
        let response = RangeResponse::Full {
            index: Arc::new(index),
        };

        let mut body = Vec::new();
        ChunkedEmitter::with_chunk_size(&response, 3)
            .each(|chunk| {
                body.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(b"0123456789tail".to_vec(), body);
    }

    #[test]
    fn missing_lazy_file_surfaces_the_open_error() {
        let mut index = IntervalIndex::new();
        index.push_with(
            Segment::LazyFile(LazyFile::new("/nonexistent/definitely-not-here")),
            10,
            10,
        );
        let response = RangeResponse::Full {
            index: Arc::new(index),
        };

        let result = response.emitter().each(|_| Ok(()));
        assert_matches!(result, Err(Error::Io(_)));
    }

    #[test]
    fn short_read_is_an_error_not_a_truncation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let mut index = IntervalIndex::new();
        // Declared larger than the file actually is.
        index.push_with(Segment::LazyFile(LazyFile::new(file.path())), 10, 10);
        let response = RangeResponse::Full {
            index: Arc::new(index),
        };

        let result = response.emitter().each(|_| Ok(()));
        assert_matches!(
            result,
            Err(Error::ShortRead {
                offset: 0,
                expected: 10,
            })
        );
    }

    #[test]
    fn callback_errors_abort_the_emission() {
        let index = buffer_index(&[b"0123456789"]);
        let response = RangeResponse::Full { index };
        let emitter = ChunkedEmitter::with_chunk_size(&response, 2);

        let mut seen = 0;
        let result = emitter.each(|_| {
            seen += 1;
            if seen == 2 {
                Err(Error::Io(std::io::Error::other("downstream closed")))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(2, seen);
    }
}
