use std::cmp::Ordering;
use std::fmt::Write;
use std::fs::File;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::lazy_file::LazyFile;
use crate::Error;

/// Tag mixed into every ETag so that a new release which changes how
/// responses are laid out also invalidates client-cached validators.
const ETAG_FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inclusive byte range `[begin, end]` within a resource or segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(begin: u64, end: u64) -> Self {
        ByteRange { begin, end }
    }

    /// Number of bytes the range covers, zero for a degenerate range.
    pub fn len(&self) -> u64 {
        if self.end < self.begin {
            0
        } else {
            self.end - self.begin + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One unit of payload within an [`IntervalIndex`].
///
/// The emitter switches on this tag to decide how bytes are produced.
/// `Nested` segments are recursed into by the index itself during range
/// queries and never reach the emitter.
#[derive(Debug)]
pub enum Segment {
    /// In-memory bytes, sliced directly with no I/O.
    Buffer(Bytes),
    /// An already-open file. The handle stays open for the caller to
    /// manage; the emitter seeks and reads through a shared reference.
    OpenFile(File),
    /// A filesystem path opened only while its bytes are being emitted.
    LazyFile(LazyFile),
    /// A sub-resource with its own interval index.
    Nested(Arc<IntervalIndex>),
}

impl Segment {
    /// Byte length of the payload. Stats the filesystem for file kinds.
    pub fn size(&self) -> io::Result<u64> {
        match self {
            Segment::Buffer(bytes) => Ok(bytes.len() as u64),
            Segment::OpenFile(file) => Ok(file.metadata()?.len()),
            Segment::LazyFile(lazy) => lazy.size(),
            Segment::Nested(index) => Ok(index.total_size()),
        }
    }
}

#[derive(Debug)]
struct Interval {
    segment: Segment,
    size: u64,
    offset: u64,
    fingerprint: u64,
}

/// Ordered, gap-free index of segments forming one logical resource.
///
/// Intervals are sorted by start offset, each starting exactly where the
/// previous one ends, so a global byte offset maps to its owning segment by
/// binary search. A segment may itself be an index ([`Segment::Nested`]),
/// making composition transparent to range queries.
///
/// Build it up with [`push`](Self::push)/[`push_with`](Self::push_with),
/// then treat it as read-only. Concurrent requests may share one index, but
/// mutating it while any read is in flight is a precondition violation the
/// implementation does not guard against.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    intervals: Vec<Interval>,
    total_size: u64,
}

impl IntervalIndex {
    pub fn new() -> Self {
        IntervalIndex::default()
    }

    /// Appends a segment using its own length as both size and ETag
    /// fingerprint. Stats the filesystem for file segments, which is the
    /// only way this can fail.
    pub fn push(&mut self, segment: Segment) -> io::Result<&mut Self> {
        let size = segment.size()?;
        Ok(self.push_with(segment, size, size))
    }

    /// Appends a segment with an explicit size and ETag fingerprint. The
    /// size must not change for as long as the segment is in the index.
    /// Zero-sized segments are silently excluded; they affect neither
    /// offsets nor the ETag.
    pub fn push_with(&mut self, segment: Segment, size: u64, fingerprint: u64) -> &mut Self {
        if size == 0 {
            return self;
        }
        self.intervals.push(Interval {
            segment,
            size,
            offset: self.total_size,
            fingerprint,
        });
        self.total_size += size;
        self
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Visits every interval overlapping `range` in order, passing the
    /// segment, the overlap translated to offsets local to that segment,
    /// and a flag that is true only for the first payload visited. Nested
    /// indices are recursed into with the local sub-range, so the visitor
    /// only ever sees leaf segments.
    ///
    /// A degenerate range (`end < begin`) or one entirely beyond
    /// [`total_size`](Self::total_size) visits nothing. A range that runs
    /// past the end is clamped to the last interval.
    pub fn each_in_range<F>(&self, range: ByteRange, mut visit: F) -> Result<(), Error>
    where
        F: FnMut(&Segment, ByteRange, bool) -> Result<(), Error>,
    {
        let mut first = true;
        self.each_in_range_inner(range, &mut first, &mut visit)
    }

    // Recursion through nested indices has to go through a dyn visitor,
    // otherwise every nesting level would monomorphize a fresh closure type.
    fn each_in_range_inner(
        &self,
        range: ByteRange,
        first: &mut bool,
        visit: &mut dyn FnMut(&Segment, ByteRange, bool) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if range.is_empty() {
            return Ok(());
        }
        let first_touched = match self.interval_under(range.begin) {
            Some(position) => position,
            // The range starts to the right of everything we hold.
            None => return Ok(()),
        };
        let last_touched = self
            .interval_under(range.end)
            .unwrap_or(self.intervals.len() - 1);

        for interval in &self.intervals[first_touched..=last_touched] {
            let interval_start = interval.offset;
            let interval_end = interval.offset + interval.size - 1;
            let local = ByteRange::new(
                range.begin.max(interval_start) - interval_start,
                range.end.min(interval_end) - interval_start,
            );
            match &interval.segment {
                Segment::Nested(inner) => inner.each_in_range_inner(local, first, visit)?,
                segment => {
                    let is_first = std::mem::replace(first, false);
                    visit(segment, local, is_first)?;
                }
            }
        }
        Ok(())
    }

    /// True iff every one of `ranges` lies entirely within the first
    /// interval. Callers use this to short-circuit a response to a direct
    /// reference to the first segment (a redirect, say) instead of
    /// streaming through the index.
    pub fn first_interval_only(&self, ranges: &[ByteRange]) -> bool {
        match self.intervals.first() {
            Some(first) => !ranges.is_empty() && ranges.iter().all(|r| r.end < first.size),
            None => false,
        }
    }

    /// A strong, quoted validator over the composition of the index: the
    /// format version tag plus every interval's fingerprint, in order.
    ///
    /// Segment contents are deliberately not hashed — computing the ETag is
    /// O(intervals), not O(resource bytes). It changes whenever the
    /// interval count, sizes or explicit fingerprints change, and is stable
    /// run to run otherwise. Clients send it back in `If-Range`, and
    /// resumable downloads only work if the comparison is a strong,
    /// byte-exact one.
    pub fn etag(&self) -> String {
        let mut digest = Sha256::new();
        digest.update(ETAG_FORMAT_VERSION.as_bytes());
        for interval in &self.intervals {
            digest.update(interval.fingerprint.to_le_bytes());
        }
        let mut etag = String::with_capacity(66);
        write!(etag, "\"{}\"", hex::encode(digest.finalize())).expect("writing to a String");
        etag
    }

    fn interval_under(&self, offset: u64) -> Option<usize> {
        self.intervals
            .binary_search_by(|interval| {
                // "Equal" means the offset falls inside this interval, not
                // just exactly at its start.
                if offset < interval.offset {
                    Ordering::Greater
                } else if offset < interval.offset + interval.size {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            })
            .ok()
    }
}
