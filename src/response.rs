use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::emitter::ChunkedEmitter;
use crate::index::{ByteRange, IntervalIndex, Segment};
use crate::multipart::MultipartEnvelope;
use crate::Error;

/// Fixed body served with a 416 response.
pub const UNSATISFIABLE_BODY: &str = r#"{"message": "Ranges cannot be satisfied"}"#;

/// A classified range response: one of five shapes, all exposing the same
/// contract — status code, headers, exact content length, and a replayable
/// body iteration.
///
/// Variants are created once per request by [`build_response`] and are
/// immutable afterwards. [`each`](Self::each) is a pure function of stored
/// state rather than a one-shot cursor, so iterating the body twice yields
/// the same byte sequence.
///
/// [`build_response`]: crate::build_response
#[derive(Debug)]
pub enum RangeResponse {
    /// Zero-byte resource. Always a 200 with an empty body, no matter what
    /// headers the client sent.
    Empty { index: Arc<IntervalIndex> },
    /// The entire resource: no `Range` header, or one range covering
    /// everything.
    Full { index: Arc<IntervalIndex> },
    /// One range that is not the entire resource.
    Single {
        index: Arc<IntervalIndex>,
        range: ByteRange,
    },
    /// Several ranges wrapped in a `multipart/byte-ranges` envelope.
    Multi {
        index: Arc<IntervalIndex>,
        envelope: MultipartEnvelope,
    },
    /// The request carried a `Range` header but none of it was satisfiable.
    Invalid { index: Arc<IntervalIndex> },
}

impl RangeResponse {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RangeResponse::Empty { .. } | RangeResponse::Full { .. } => StatusCode::OK,
            RangeResponse::Single { .. } | RangeResponse::Multi { .. } => {
                StatusCode::PARTIAL_CONTENT
            }
            RangeResponse::Invalid { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }

    pub fn index(&self) -> &Arc<IntervalIndex> {
        match self {
            RangeResponse::Empty { index }
            | RangeResponse::Full { index }
            | RangeResponse::Single { index, .. }
            | RangeResponse::Multi { index, .. }
            | RangeResponse::Invalid { index } => index,
        }
    }

    /// The index's strong validator, identical across every variant built
    /// from the same index.
    pub fn etag(&self) -> String {
        self.index().etag()
    }

    /// Exact byte count of the body that [`each`](Self::each) produces.
    pub fn content_length(&self) -> u64 {
        match self {
            RangeResponse::Empty { .. } => 0,
            RangeResponse::Full { index } => index.total_size(),
            RangeResponse::Single { range, .. } => range.len(),
            RangeResponse::Multi { envelope, .. } => envelope.content_length(),
            RangeResponse::Invalid { .. } => UNSATISFIABLE_BODY.len() as u64,
        }
    }

    pub fn multiple_ranges(&self) -> bool {
        matches!(self, RangeResponse::Multi { .. })
    }

    /// True when every selected range lies inside the first interval, which
    /// lets a caller answer with a direct reference to the first segment
    /// (a redirect, say) instead of streaming through the index.
    pub fn satisfied_with_first_interval(&self) -> bool {
        match self {
            RangeResponse::Empty { .. } | RangeResponse::Invalid { .. } => false,
            RangeResponse::Full { index } => match index.total_size().checked_sub(1) {
                Some(last) => index.first_interval_only(&[ByteRange::new(0, last)]),
                None => false,
            },
            RangeResponse::Single { index, range } => index.first_interval_only(&[*range]),
            RangeResponse::Multi { index, envelope } => {
                index.first_interval_only(envelope.ranges())
            }
        }
    }

    /// Headers for the response preamble: always `Accept-Ranges`,
    /// `Content-Length`, `Content-Type` and `ETag`, plus the
    /// variant-specific `Content-Range`.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            CONTENT_LENGTH,
            HeaderValue::from_str(&self.content_length().to_string())
                .expect("an integer is always a valid header value"),
        );
        headers.insert(
            ETAG,
            HeaderValue::from_str(&self.etag()).expect("a quoted hex digest is a valid header value"),
        );
        match self {
            RangeResponse::Empty { .. } | RangeResponse::Full { .. } => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("binary/octet-stream"));
            }
            RangeResponse::Single { index, range } => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("binary/octet-stream"));
                let content_range =
                    format!("bytes {}-{}/{}", range.begin, range.end, index.total_size());
                headers.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&content_range)
                        .expect("formatted byte offsets are a valid header value"),
                );
            }
            RangeResponse::Multi { envelope, .. } => {
                let content_type =
                    format!("multipart/byte-ranges; boundary={}", envelope.boundary());
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_str(&content_type)
                        .expect("an alphanumeric boundary is a valid header value"),
                );
            }
            RangeResponse::Invalid { index } => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                // Denominator only: a 416 reports the resource size without
                // claiming any satisfied range.
                let content_range = format!("bytes */{}", index.total_size());
                headers.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&content_range)
                        .expect("formatted byte offsets are a valid header value"),
                );
            }
        }
        headers
    }

    /// Replays the body as `(payload, range local to that payload)` pairs
    /// in wire order. Payloads are either segments of the index or literal
    /// buffers synthesized for the response (multipart part headers, the
    /// 416 error body).
    pub fn each<F>(&self, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(&Segment, ByteRange) -> Result<(), Error>,
    {
        match self {
            RangeResponse::Empty { .. } => Ok(()),
            RangeResponse::Full { index } => {
                let last = match index.total_size().checked_sub(1) {
                    Some(last) => last,
                    None => return Ok(()),
                };
                index.each_in_range(ByteRange::new(0, last), |segment, local, _| {
                    visit(segment, local)
                })
            }
            RangeResponse::Single { index, range } => {
                index.each_in_range(*range, |segment, local, _| visit(segment, local))
            }
            RangeResponse::Multi { index, envelope } => {
                for (header, range) in envelope.parts() {
                    let header_segment = Segment::Buffer(header.clone());
                    visit(&header_segment, ByteRange::new(0, header.len() as u64 - 1))?;
                    index.each_in_range(range, |segment, local, _| visit(segment, local))?;
                }
                Ok(())
            }
            RangeResponse::Invalid { .. } => {
                let body = Segment::Buffer(Bytes::from_static(UNSATISFIABLE_BODY.as_bytes()));
                visit(&body, ByteRange::new(0, UNSATISFIABLE_BODY.len() as u64 - 1))
            }
        }
    }

    /// Status line and headers for the response preamble. Entries from
    /// `extra` are merged in first, so the variant's own headers win on
    /// conflict.
    pub fn to_response_parts(&self, extra: &HeaderMap) -> (StatusCode, HeaderMap) {
        let mut headers = extra.clone();
        for (name, value) in self.headers().iter() {
            headers.insert(name, value.clone());
        }
        (self.status_code(), headers)
    }

    /// The body half of the response: a bounded-chunk emitter over this
    /// variant, using the default chunk size.
    pub fn emitter(&self) -> ChunkedEmitter<'_> {
        ChunkedEmitter::new(self)
    }
}
