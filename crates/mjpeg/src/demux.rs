//! # Frame demultiplexer
//!
//! Splits a multipart byte stream into [`FrameRecord`]s.
//!
//! Each record on the wire looks like:
//!
//! ```text
//! <boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of payload>
//! ```
//!
//! The scanner works on byte offsets into the buffered data and reports where
//! it stopped, so the caller can drop exactly the consumed prefix and keep the
//! rest. It is safe to call again after more bytes arrive; nothing is lost or
//! emitted twice.

use std::ops::Range;

use bytes::Bytes;
use memchr::memmem;
use tracing::{debug, trace};

use crate::buffer::{AppendOutcome, ByteAccumulator};
use crate::error::MjpegError;
use crate::frame::{FrameHeaders, FrameRecord};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Literal token separating records in the stream.
#[derive(Debug, Clone)]
pub struct Boundary {
    finder: memmem::Finder<'static>,
}

impl Boundary {
    pub fn new(marker: impl AsRef<[u8]>) -> Result<Self, MjpegError> {
        let marker = marker.as_ref();
        if marker.is_empty() {
            return Err(MjpegError::EmptyBoundary);
        }
        Ok(Self {
            finder: memmem::Finder::new(marker).into_owned(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.finder.needle()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Always false; an empty boundary is rejected by [`Boundary::new`].
    pub fn is_empty(&self) -> bool {
        false
    }

    fn find(&self, haystack: &[u8]) -> Option<usize> {
        self.finder.find(haystack)
    }
}

/// Why a scan stopped before the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// No boundary in the unconsumed bytes.
    NoBoundary,
    /// A boundary was found but its header block is not terminated yet.
    Headers,
    /// Headers are complete but the payload has not fully arrived.
    Payload { declared: usize, available: usize },
}

#[derive(Debug)]
struct Located {
    headers: FrameHeaders,
    payload: Range<usize>,
}

#[derive(Debug)]
struct Scan {
    frames: Vec<Located>,
    consumed: usize,
    skipped: usize,
    pending: Pending,
    /// Start of the unterminated header block when `pending` is `Headers`.
    open_headers: Option<usize>,
}

/// Offsets into the buffer before which nothing new can be found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Resume {
    /// No boundary starts before this offset.
    boundary: usize,
    /// No header terminator of the first record starts before this offset.
    terminator: usize,
}

/// Locate every complete record in `buf`.
///
/// `resume` lets the caller skip bytes an earlier scan of the same buffer
/// already ruled out. It only affects the first record.
fn scan(buf: &[u8], boundary: &Boundary, resume: Resume) -> Scan {
    let mut frames = Vec::new();
    let mut consumed = 0;
    let mut skipped = 0;
    let mut from = resume.boundary.min(buf.len());
    let mut terminator_hint = resume.terminator.min(buf.len());
    let mut open_headers = None;

    let pending = loop {
        let Some(pos) = boundary.find(&buf[from..]) else {
            break Pending::NoBoundary;
        };
        let header_start = from + pos + boundary.len();
        let terminator_from = header_start.max(terminator_hint);
        terminator_hint = 0;

        let Some(pos) = memmem::find(&buf[terminator_from..], HEADER_TERMINATOR) else {
            open_headers = Some(header_start);
            break Pending::Headers;
        };
        let header_end = terminator_from + pos;
        let headers = FrameHeaders::parse(&buf[header_start..header_end]);
        let payload_start = header_end + HEADER_TERMINATOR.len();

        let Some(declared) = headers.content_length() else {
            debug!(
                offset = header_start,
                "Content-Length not found, skipping frame"
            );
            skipped += 1;
            consumed = payload_start;
            from = payload_start;
            continue;
        };

        let available = buf.len() - payload_start;
        if declared > available {
            break Pending::Payload {
                declared,
                available,
            };
        }

        let payload_end = payload_start + declared;
        frames.push(Located {
            headers,
            payload: payload_start..payload_end,
        });
        consumed = payload_end;
        from = payload_end;
    };

    trace!(
        frames = frames.len(),
        consumed,
        skipped,
        ?pending,
        "Scanned buffer"
    );

    Scan {
        frames,
        consumed,
        skipped,
        pending,
        open_headers,
    }
}

/// Output of [`split_frames`].
#[derive(Debug, Clone)]
pub struct Demuxed {
    /// Complete frames, in stream order.
    pub frames: Vec<FrameRecord>,
    /// Unconsumed bytes to feed back in front of the next read.
    pub remainder: Bytes,
    /// Records dropped for lacking a usable `Content-Length`.
    pub skipped: usize,
    /// Why scanning stopped.
    pub pending: Pending,
}

/// Extract every complete frame from `input`.
///
/// Payloads are zero-copy slices of `input`.
pub fn split_frames(input: Bytes, boundary: &Boundary) -> Demuxed {
    let scan = scan(&input, boundary, Resume::default());
    let frames = scan
        .frames
        .into_iter()
        .map(|located| FrameRecord::new(located.headers, input.slice(located.payload)))
        .collect();

    Demuxed {
        frames,
        remainder: input.slice(scan.consumed..),
        skipped: scan.skipped,
        pending: scan.pending,
    }
}

/// Stateful demultiplexer owning the bounded receive buffer of one session.
#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: ByteAccumulator,
    boundary: Boundary,
    resume: Resume,
    skipped: u64,
}

impl FrameDemuxer {
    pub fn new(boundary: Boundary, capacity: usize) -> Result<Self, MjpegError> {
        Ok(Self {
            buffer: ByteAccumulator::new(capacity)?,
            boundary,
            resume: Resume::default(),
            skipped: 0,
        })
    }

    /// Buffer a network read. See [`ByteAccumulator::append`] for the
    /// overflow policy.
    pub fn push(&mut self, chunk: &[u8]) -> AppendOutcome {
        let outcome = self.buffer.append(chunk);
        if outcome.is_overflow() {
            self.resume = Resume::default();
        }
        outcome
    }

    /// Pull every complete frame out of the buffer, leaving partial data in
    /// place.
    pub fn drain(&mut self) -> Vec<FrameRecord> {
        let buffered = self.buffer.len();
        let scan = scan(self.buffer.as_slice(), &self.boundary, self.resume);
        let consumed = scan.consumed;

        // A token may straddle the end of the buffer, so only the bytes before
        // its last possible start position are ruled out.
        self.resume = match (scan.pending, scan.open_headers) {
            (Pending::NoBoundary, _) => Resume {
                boundary: buffered
                    .saturating_sub(self.boundary.len() - 1)
                    .max(consumed)
                    - consumed,
                terminator: 0,
            },
            (Pending::Headers, Some(header_start)) => Resume {
                boundary: header_start - self.boundary.len() - consumed,
                terminator: buffered
                    .saturating_sub(HEADER_TERMINATOR.len() - 1)
                    .max(header_start)
                    - consumed,
            },
            _ => Resume::default(),
        };
        self.skipped += scan.skipped as u64;

        if consumed == 0 {
            return Vec::new();
        }

        let block = self.buffer.split_to(consumed).freeze();
        scan.frames
            .into_iter()
            .map(|located| FrameRecord::new(located.headers, block.slice(located.payload)))
            .collect()
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn overflow_count(&self) -> u64 {
        self.buffer.overflow_count()
    }

    /// Records skipped for a missing or invalid `Content-Length`.
    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BOUNDARY: &[u8] = b"--videoboundary";

    fn boundary() -> Boundary {
        Boundary::new(BOUNDARY).unwrap()
    }

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn payloads(frames: &[FrameRecord]) -> Vec<Vec<u8>> {
        frames.iter().map(|f| f.payload().to_vec()).collect()
    }

    #[test]
    fn rejects_empty_boundary() {
        assert_eq!(Boundary::new("").unwrap_err(), MjpegError::EmptyBoundary);
    }

    #[test]
    fn extracts_multiple_frames_in_order() {
        let mut input = Vec::new();
        for payload in [&b"first"[..], b"second", b"third"] {
            input.extend(record(payload));
        }

        let demuxed = split_frames(Bytes::from(input), &boundary());
        assert_eq!(
            payloads(&demuxed.frames),
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
        assert_eq!(&demuxed.remainder[..], b"\r\n");
        assert_eq!(demuxed.pending, Pending::NoBoundary);
        assert_eq!(demuxed.frames[0].headers().content_type(), Some("image/jpeg"));
    }

    #[test]
    fn keeps_buffer_when_no_boundary() {
        let demuxed = split_frames(Bytes::from_static(b"garbage without marker"), &boundary());
        assert!(demuxed.frames.is_empty());
        assert_eq!(&demuxed.remainder[..], b"garbage without marker");
        assert_eq!(demuxed.pending, Pending::NoBoundary);
    }

    #[test]
    fn waits_for_complete_headers() {
        let input = Bytes::from_static(b"--videoboundary\r\nContent-Length: 4\r\n");
        let demuxed = split_frames(input.clone(), &boundary());
        assert!(demuxed.frames.is_empty());
        assert_eq!(demuxed.remainder, input);
        assert_eq!(demuxed.pending, Pending::Headers);
    }

    #[test]
    fn waits_for_complete_payload() {
        let full = record(b"0123456789");
        let partial = Bytes::copy_from_slice(&full[..full.len() - 6]);
        let demuxed = split_frames(partial.clone(), &boundary());
        assert!(demuxed.frames.is_empty());
        assert_eq!(demuxed.remainder, partial);
        assert_eq!(
            demuxed.pending,
            Pending::Payload {
                declared: 10,
                available: 6
            }
        );
    }

    #[test]
    fn skips_record_without_content_length() {
        let mut input = Vec::new();
        input.extend_from_slice(b"--videoboundary\r\nContent-Type: image/jpeg\r\n\r\n");
        input.extend(record(b"good"));

        let demuxed = split_frames(Bytes::from(input), &boundary());
        assert_eq!(payloads(&demuxed.frames), vec![b"good".to_vec()]);
        assert_eq!(demuxed.skipped, 1);
    }

    #[test]
    fn skips_record_with_invalid_content_length() {
        let mut input = Vec::new();
        input.extend_from_slice(b"--videoboundary\r\nContent-Length: lots\r\n\r\n");
        input.extend(record(b"good"));

        let demuxed = split_frames(Bytes::from(input), &boundary());
        assert_eq!(payloads(&demuxed.frames), vec![b"good".to_vec()]);
        assert_eq!(demuxed.skipped, 1);
    }

    #[test]
    fn boundary_inside_payload_is_not_a_record_start() {
        let payload = b"\xff\xd8--videoboundary\r\nContent-Length: 1\r\n\r\nX\xff\xd9";
        let mut input = record(payload);
        input.extend(record(b"next"));

        let demuxed = split_frames(Bytes::from(input), &boundary());
        assert_eq!(
            payloads(&demuxed.frames),
            vec![payload.to_vec(), b"next".to_vec()]
        );
    }

    #[test]
    fn drops_leading_garbage_with_first_frame() {
        let mut input = b"\r\nHTTP noise".to_vec();
        input.extend(record(b"img"));
        let demuxed = split_frames(Bytes::from(input), &boundary());
        assert_eq!(payloads(&demuxed.frames), vec![b"img".to_vec()]);
        assert_eq!(&demuxed.remainder[..], b"\r\n");
    }

    #[test]
    fn zero_length_payload_is_a_frame() {
        let demuxed = split_frames(Bytes::from(record(b"")), &boundary());
        assert_eq!(demuxed.frames.len(), 1);
        assert!(demuxed.frames[0].is_empty());
    }

    #[test]
    fn demuxer_resumes_across_pushes() {
        let mut demuxer = FrameDemuxer::new(boundary(), 1024).unwrap();
        let data = record(b"payload-bytes");
        let (a, b) = data.split_at(20);

        demuxer.push(a);
        assert!(demuxer.drain().is_empty());
        assert_eq!(demuxer.buffered_len(), 20);

        demuxer.push(b);
        let frames = demuxer.drain();
        assert_eq!(payloads(&frames), vec![b"payload-bytes".to_vec()]);
        assert_eq!(demuxer.buffered_len(), 2);
    }

    #[test]
    fn boundary_split_across_reads_is_found() {
        let mut demuxer = FrameDemuxer::new(boundary(), 1024).unwrap();
        let data = record(b"abc");

        demuxer.push(b"noise noise --video");
        assert!(demuxer.drain().is_empty());
        demuxer.push(&data[b"--video".len()..]);
        assert_eq!(payloads(&demuxer.drain()), vec![b"abc".to_vec()]);
    }

    #[test]
    fn unterminated_headers_are_not_rescanned() {
        let mut demuxer = FrameDemuxer::new(boundary(), 4096).unwrap();
        demuxer.push(&record(b"first"));
        demuxer.push(b"--videoboundary\r\nContent-Length: 3\r\n");
        assert_eq!(payloads(&demuxer.drain()), vec![b"first".to_vec()]);

        // leftover "\r\n" of the first record precedes the open boundary
        let header_start = 2 + BOUNDARY.len();
        assert_eq!(demuxer.resume.boundary, 2);
        assert_eq!(demuxer.resume.terminator, demuxer.buffered_len() - 3);

        for _ in 0..200 {
            demuxer.push(b"x");
            assert!(demuxer.drain().is_empty());
            assert_eq!(demuxer.resume.boundary, 2);
            assert_eq!(demuxer.resume.terminator, demuxer.buffered_len() - 3);
            assert!(demuxer.resume.terminator > header_start);
        }

        // terminator split across reads is still found
        demuxer.push(b": pad\r\n\r");
        assert!(demuxer.drain().is_empty());
        demuxer.push(b"\nabc");
        let frames = demuxer.drain();
        assert_eq!(payloads(&frames), vec![b"abc".to_vec()]);
        assert_eq!(frames[0].headers().content_length(), Some(3));
        assert_eq!(demuxer.resume, Resume::default());
    }

    #[test]
    fn overflow_clears_resume_offsets() {
        let mut demuxer = FrameDemuxer::new(boundary(), 64).unwrap();
        demuxer.push(b"--videoboundary\r\nContent-Length: 3\r\n");
        demuxer.drain();
        assert_ne!(demuxer.resume, Resume::default());

        assert!(demuxer.push(&[b'x'; 64]).is_overflow());
        assert_eq!(demuxer.resume, Resume::default());
    }

    #[test]
    fn byte_by_byte_matches_single_chunk() {
        let mut input = Vec::new();
        for payload in [&b"one"[..], b"", b"three--videoboundary", b"four"] {
            input.extend(record(payload));
        }
        input.extend_from_slice(b"--videoboundary\r\nX-Broken: yes\r\n\r\n");
        input.extend(record(b"five"));

        let whole = split_frames(Bytes::from(input.clone()), &boundary());

        let mut demuxer = FrameDemuxer::new(boundary(), 4096).unwrap();
        let mut frames = Vec::new();
        for byte in &input {
            demuxer.push(std::slice::from_ref(byte));
            frames.extend(demuxer.drain());
        }

        assert_eq!(payloads(&frames), payloads(&whole.frames));
        assert_eq!(frames.len(), 5);
        assert_eq!(demuxer.skipped_count(), 1);
    }

    #[test]
    fn overflow_resets_and_parsing_recovers() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut demuxer = FrameDemuxer::new(boundary(), 128).unwrap();

        for _ in 0..10 {
            if demuxer.push(&[0x42; 16]).is_overflow() {
                break;
            }
            assert!(demuxer.drain().is_empty());
        }
        assert_eq!(demuxer.buffered_len(), 0);
        assert_eq!(demuxer.overflow_count(), 1);

        demuxer.push(&record(b"after"));
        assert_eq!(payloads(&demuxer.drain()), vec![b"after".to_vec()]);
    }

    proptest! {
        #[test]
        fn fragmentation_invariant(
            frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 1..6),
            cuts in prop::collection::vec(1usize..32, 1..64),
        ) {
            let mut input = Vec::new();
            for payload in &frames {
                input.extend(record(payload));
            }

            let mut demuxer = FrameDemuxer::new(boundary(), 1 << 16).unwrap();
            let mut out = Vec::new();
            let mut rest = &input[..];
            let mut cut = cuts.iter().cycle();
            while !rest.is_empty() {
                let n = (*cut.next().unwrap()).min(rest.len());
                let (chunk, tail) = rest.split_at(n);
                demuxer.push(chunk);
                out.extend(demuxer.drain());
                rest = tail;
            }

            prop_assert_eq!(payloads(&out), frames);
            prop_assert_eq!(demuxer.buffered_len(), 2);
        }
    }
}
