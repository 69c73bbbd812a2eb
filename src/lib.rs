//! # interval-response
//!
//! HTTP range responses over a resource that is logically a concatenation
//! of independently stored segments — in-memory buffers, open files,
//! lazily opened file paths, and nested sub-resources — without ever
//! materializing the whole resource in memory.
//!
//! An [`IntervalIndex`] maps global byte offsets to segments in O(log n).
//! [`build_response`] classifies a request's `Range` and `If-Range` headers
//! into one of five [`RangeResponse`] shapes (200 full, 206 single range,
//! 206 multipart, 416, or the zero-byte special case), and a
//! [`ChunkedEmitter`] streams the body as bounded-size chunks with at most
//! one file descriptor open per in-flight segment.
//!
//! ```
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::HeaderValue;
//! use interval_response::{IntervalIndex, Segment};
//!
//! let mut index = IntervalIndex::new();
//! index.push(Segment::Buffer(Bytes::from_static(b"hello ")))?;
//! index.push(Segment::Buffer(Bytes::from_static(b"world")))?;
//!
//! let range = HeaderValue::from_static("bytes=4-7");
//! let response = interval_response::build_response(Arc::new(index), Some(&range), None);
//! assert_eq!(http::StatusCode::PARTIAL_CONTENT, response.status_code());
//!
//! let mut body = Vec::new();
//! response.emitter().each(|chunk| {
//!     body.extend_from_slice(chunk);
//!     Ok(())
//! })?;
//! assert_eq!(b"o wo".to_vec(), body);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod emitter;
mod index;
mod lazy_file;
mod multipart;
mod range_set;
mod response;

pub use emitter::{ChunkedEmitter, DEFAULT_CHUNK_SIZE};
pub use index::{ByteRange, IntervalIndex, Segment};
pub use lazy_file::LazyFile;
pub use multipart::MultipartEnvelope;
pub use range_set::RangeSet;
pub use response::{RangeResponse, UNSATISFIABLE_BODY};

use std::sync::Arc;

use http::HeaderValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The emitter was handed a payload kind it cannot read. A programming
    /// error, not a request outcome; do not retry.
    #[error("segment kind is not supported by the emitter")]
    UnsupportedSegmentKind,
    /// An interior chunk read returned fewer bytes than the segment's
    /// declared size called for.
    #[error("short read at offset {offset}: expected {expected} bytes")]
    ShortRead { offset: u64, expected: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Classifies a request against `index` and returns the matching response
/// variant.
///
/// `If-Range` is compared byte for byte against `index.etag()`. On mismatch
/// the `Range` header is discarded and the full resource served: the client
/// was asking for offsets into a representation that no longer exists, so
/// honoring them could splice together bytes of two different versions.
/// An unsatisfiable range is answered with the [`RangeResponse::Invalid`]
/// (416) variant, never an error.
pub fn build_response(
    index: Arc<IntervalIndex>,
    range: Option<&HeaderValue>,
    if_range: Option<&HeaderValue>,
) -> RangeResponse {
    let range = match if_range {
        Some(validator) if validator.as_bytes() != index.etag().as_bytes() => {
            tracing::debug!("if-range validator mismatch, serving the full resource");
            None
        }
        Some(_) => {
            tracing::debug!("if-range validator matched");
            range
        }
        None => range,
    };

    let response = classify(index, range);
    tracing::debug!(
        status = response.status_code().as_u16(),
        content_length = response.content_length(),
        multiple_ranges = response.multiple_ranges(),
        "classified range request"
    );
    response
}

fn classify(index: Arc<IntervalIndex>, range: Option<&HeaderValue>) -> RangeResponse {
    // A zero-byte resource answers the same regardless of any Range
    // header, so the header is never even parsed.
    if index.is_empty() {
        return RangeResponse::Empty { index };
    }

    let total_size = index.total_size();
    match RangeSet::resolve(total_size, range) {
        RangeSet::Unsatisfiable => RangeResponse::Invalid { index },
        RangeSet::NoRangeRequested => RangeResponse::Full { index },
        RangeSet::Satisfiable(ranges) => {
            if let [only] = ranges.as_slice() {
                if *only == ByteRange::new(0, total_size - 1) {
                    RangeResponse::Full { index }
                } else {
                    RangeResponse::Single {
                        index,
                        range: *only,
                    }
                }
            } else {
                let envelope = MultipartEnvelope::new(ranges, total_size, &mut rand::thread_rng());
                RangeResponse::Multi { index, envelope }
            }
        }
    }
}
