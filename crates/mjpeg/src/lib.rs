//! # MJPEG
//!
//! Incremental demultiplexer for boundary-delimited multipart byte streams,
//! as served by IP cameras (`multipart/x-mixed-replace`).
//!
//! Network reads are appended to a bounded [`ByteAccumulator`]; the
//! [`FrameDemuxer`] then pulls every complete [`FrameRecord`] out of it and
//! leaves any partial trailing record in place for the next read.
//!
//! Parsing never blocks and never rescans a payload: frames are sliced strictly
//! by their declared `Content-Length`, so a boundary token that happens to
//! appear inside JPEG data is not mistaken for the start of a new record.
//!
//! ```
//! use mjpeg::{Boundary, split_frames};
//! use bytes::Bytes;
//!
//! let boundary = Boundary::new("--frame").unwrap();
//! let input = Bytes::from_static(b"--frame\r\nContent-Length: 3\r\n\r\nabc\r\n--fr");
//! let demuxed = split_frames(input, &boundary);
//! assert_eq!(demuxed.frames.len(), 1);
//! assert_eq!(&demuxed.frames[0].payload()[..], b"abc");
//! assert_eq!(&demuxed.remainder[..], b"\r\n--fr");
//! ```

pub mod buffer;
pub mod demux;
pub mod error;
pub mod frame;

pub use buffer::{AppendOutcome, ByteAccumulator};
pub use demux::{Boundary, Demuxed, FrameDemuxer, Pending, split_frames};
pub use error::MjpegError;
pub use frame::{FrameHeaders, FrameRecord};
