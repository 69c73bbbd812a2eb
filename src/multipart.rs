use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::index::ByteRange;

/// Length of the boundary token. RFC 1521 allows up to 70 characters, not
/// counting the two leading hyphens.
const BOUNDARY_LEN: usize = 24;

/// Precomputed `multipart/byte-ranges` envelope: the boundary token and one
/// header blob per part, fixed at construction so that repeated reads of
/// the content length and repeated body iterations stay consistent.
#[derive(Debug)]
pub struct MultipartEnvelope {
    boundary: String,
    ranges: Vec<ByteRange>,
    part_headers: Vec<Bytes>,
    envelope_size: u64,
}

impl MultipartEnvelope {
    /// Builds the envelope with a random boundary drawn from `rng`.
    ///
    /// The randomness only guards against the boundary colliding with
    /// payload bytes, not against an adversary — but taking the rng as a
    /// parameter means a seeded one gives tests a fixed boundary.
    pub fn new(ranges: Vec<ByteRange>, total_size: u64, rng: &mut impl Rng) -> Self {
        let boundary: String = rng
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect();
        Self::with_boundary(boundary, ranges, total_size)
    }

    /// Builds the envelope around a caller-supplied boundary token.
    pub fn with_boundary(boundary: String, ranges: Vec<ByteRange>, total_size: u64) -> Self {
        let part_headers: Vec<Bytes> = ranges
            .iter()
            .enumerate()
            .map(|(index, range)| Bytes::from(part_header(&boundary, index, range, total_size)))
            .collect();
        // The Content-Length of a multipart response covers the part
        // headers as well as the ranges themselves, so it is summed here
        // once instead of re-deriving every header string per call.
        let envelope_size = ranges
            .iter()
            .zip(&part_headers)
            .map(|(range, header)| header.len() as u64 + range.len())
            .sum();
        MultipartEnvelope {
            boundary,
            ranges,
            part_headers,
            envelope_size,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Exact byte count of the body: every part header plus every range.
    pub fn content_length(&self) -> u64 {
        self.envelope_size
    }

    /// Parts in client-submission order: the header blob and the resource
    /// range it announces.
    pub(crate) fn parts(&self) -> impl Iterator<Item = (&Bytes, ByteRange)> {
        self.part_headers.iter().zip(self.ranges.iter().copied())
    }
}

// Byte-for-byte part header layout. Parts after the first are preceded by a
// CRLF delimiter; the body carries no closing `--boundary--` terminator.
fn part_header(boundary: &str, index: usize, range: &ByteRange, total_size: u64) -> String {
    format!(
        "{}--{}\r\nContent-Type: binary/octet-stream\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
        if index > 0 { "\r\n" } else { "" },
        boundary,
        range.begin,
        range.end,
        total_size,
    )
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::MultipartEnvelope;
    use crate::index::ByteRange;

    fn fixture() -> MultipartEnvelope {
        MultipartEnvelope::with_boundary(
            "tcROXEYMdRNXRRYstW296yM1".to_string(),
            vec![ByteRange::new(0, 0), ByteRange::new(2, 2)],
            8,
        )
    }

    #[test]
    fn part_headers_follow_the_wire_layout() {
        let envelope = fixture();
        let parts: Vec<_> = envelope.parts().collect();
        assert_eq!(2, parts.len());
        assert_eq!(
            &b"--tcROXEYMdRNXRRYstW296yM1\r\n\
               Content-Type: binary/octet-stream\r\n\
               Content-Range: bytes 0-0/8\r\n\
               \r\n"[..],
            parts[0].0.as_ref(),
        );
        assert_eq!(
            &b"\r\n--tcROXEYMdRNXRRYstW296yM1\r\n\
               Content-Type: binary/octet-stream\r\n\
               Content-Range: bytes 2-2/8\r\n\
               \r\n"[..],
            parts[1].0.as_ref(),
        );
    }

    #[test]
    fn envelope_size_counts_headers_and_payloads() {
        // Reference value from serving two one-byte ranges of an 8-byte
        // resource with a 24-character boundary.
        assert_eq!(190, fixture().content_length());
    }

    #[test]
    fn content_length_is_stable_across_reads() {
        let envelope = fixture();
        assert_eq!(envelope.content_length(), envelope.content_length());
    }

    #[test]
    fn generated_boundary_is_24_alphanumeric_characters() {
        let mut rng = StdRng::seed_from_u64(7);
        let envelope = MultipartEnvelope::new(vec![ByteRange::new(0, 0)], 8, &mut rng);
        assert_eq!(24, envelope.boundary().len());
        assert!(envelope.boundary().bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn seeded_rng_reproduces_the_boundary() {
        let ranges = vec![ByteRange::new(0, 0)];
        let a = MultipartEnvelope::new(ranges.clone(), 8, &mut StdRng::seed_from_u64(42));
        let b = MultipartEnvelope::new(ranges, 8, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.boundary(), b.boundary());
    }
}
