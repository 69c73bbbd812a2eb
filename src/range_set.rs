use std::ops::Bound;

use headers::{Header, Range};
use http::HeaderValue;

use crate::index::ByteRange;

/// Outcome of resolving a raw `Range` header against a resource size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSet {
    /// No `Range` header was sent; equivalent to asking for the entire
    /// resource.
    NoRangeRequested,
    /// At least one requested range maps onto `[0, total_size)`. Ranges are
    /// clamped to the resource but otherwise kept exactly as the client
    /// submitted them: not merged, not reordered.
    Satisfiable(Vec<ByteRange>),
    /// A `Range` header was sent but none of it could be mapped onto the
    /// resource.
    Unsatisfiable,
}

impl RangeSet {
    /// Resolves `raw` through the header-parsing collaborator
    /// ([`headers::Range`], which implements the RFC 7233 byte-range
    /// grammar), clamping range ends to `total_size - 1` and dropping
    /// anything that starts beyond the resource.
    pub fn resolve(total_size: u64, raw: Option<&HeaderValue>) -> RangeSet {
        let Some(raw) = raw else {
            return RangeSet::NoRangeRequested;
        };
        if total_size == 0 {
            return RangeSet::Unsatisfiable;
        }
        let Ok(header) = Range::decode(&mut std::iter::once(raw)) else {
            return RangeSet::Unsatisfiable;
        };

        let last_index = total_size - 1;
        let ranges: Vec<ByteRange> = header
            .satisfiable_ranges(total_size)
            .filter_map(|(start, end)| {
                let begin = match start {
                    Bound::Included(begin) => begin,
                    Bound::Excluded(begin) => begin.saturating_add(1),
                    Bound::Unbounded => 0,
                };
                let end = match end {
                    Bound::Included(end) => end.min(last_index),
                    Bound::Excluded(end) => end.checked_sub(1)?.min(last_index),
                    Bound::Unbounded => last_index,
                };
                (begin <= end && begin <= last_index).then_some(ByteRange::new(begin, end))
            })
            .collect();

        if ranges.is_empty() {
            RangeSet::Unsatisfiable
        } else {
            RangeSet::Satisfiable(ranges)
        }
    }
}
