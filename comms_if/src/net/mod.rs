//! # Network Module
//!
//! Stream framing used by the tank and the ground. Commands travel as newline terminated text
//! lines, video travels as frames with a 4 byte little-endian length prefix.
//!
//! Both readers are intended for sockets with a read timeout set, so that the owning thread can
//! poll its shutdown flag. A timeout never loses data, partially received lines and frames are
//! buffered until the rest arrives.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the video frame length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest video frame accepted by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Size of the chunk read from the underlying stream at once.
const READ_CHUNK_LEN: usize = 4096;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Splits a byte stream into newline terminated lines.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
}

/// Splits a byte stream into length-prefixed frames.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NetError {
    #[error("The peer closed the connection")]
    Closed,

    #[error("A line exceeded the maximum length of {max} bytes")]
    Overflow { max: usize },

    #[error("A frame of {len} bytes exceeded the maximum length of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<R: Read> LineReader<R> {
    /// Create a new reader which rejects lines longer than `max_len` bytes, terminator included.
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(max_len),
            max_len,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` if the underlying read timed out before a full line arrived. Once
    /// `Overflow` has been returned the stream can no longer be framed and should be dropped.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                if pos + 1 > self.max_len {
                    return Err(NetError::Overflow { max: self.max_len });
                }
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                return Ok(Some(line));
            }

            if self.buf.len() >= self.max_len {
                return Err(NetError::Overflow { max: self.max_len });
            }

            if !fill(&mut self.inner, &mut self.buf)? {
                return Ok(None);
            }
        }
    }
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_len,
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Ok(None)` if the underlying read timed out before a full frame arrived.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        loop {
            if self.buf.len() >= FRAME_HEADER_LEN {
                let len = LittleEndian::read_u32(&self.buf[..FRAME_HEADER_LEN]) as usize;
                if len > self.max_len {
                    return Err(NetError::FrameTooLarge {
                        len,
                        max: self.max_len,
                    });
                }

                if self.buf.len() >= FRAME_HEADER_LEN + len {
                    let frame = self.buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
                    self.buf.drain(..FRAME_HEADER_LEN + len);
                    return Ok(Some(frame));
                }
            }

            if !fill(&mut self.inner, &mut self.buf)? {
                return Ok(None);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Write a single length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), NetError> {
    if payload.len() > u32::MAX as usize {
        return Err(NetError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        });
    }

    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    writer.flush()?;

    Ok(())
}

/// Blocking read of a single length-prefixed frame, for use on files.
///
/// Returns `Ok(None)` if the stream ends cleanly on a frame boundary.
pub fn read_frame_blocking<R: Read>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>, NetError> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(l) => l as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > max_len {
        return Err(NetError::FrameTooLarge { len, max: max_len });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => NetError::Closed,
        _ => NetError::Io(e),
    })?;

    Ok(Some(frame))
}

/// Returns true if the error is the result of a socket read timeout.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Read one chunk from the stream into the buffer.
///
/// Returns false if the read timed out, raises `Closed` on end of stream.
fn fill<R: Read>(inner: &mut R, buf: &mut Vec<u8>) -> Result<bool, NetError> {
    let mut chunk = [0u8; READ_CHUNK_LEN];

    loop {
        match inner.read(&mut chunk) {
            Ok(0) => return Err(NetError::Closed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                return Ok(true);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    /// Reader which hands out its data in fixed pieces, timing out between each one.
    struct Trickle {
        pieces: Vec<Vec<u8>>,
        timed_out: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::Error::new(ErrorKind::WouldBlock, "timeout"));
            }
            self.timed_out = false;

            if self.pieces.is_empty() {
                return Ok(0);
            }
            let piece = self.pieces.remove(0);
            out[..piece.len()].copy_from_slice(&piece);
            Ok(piece.len())
        }
    }

    #[test]
    fn test_read_lines() {
        let mut r = LineReader::new(Cursor::new(b"CMD_STOP\nCMD_SONIC\r\n".to_vec()), 64);

        assert_eq!(r.read_line().unwrap(), Some(b"CMD_STOP".to_vec()));
        assert_eq!(r.read_line().unwrap(), Some(b"CMD_SONIC\r".to_vec()));
        assert!(matches!(r.read_line(), Err(NetError::Closed)));
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut r = LineReader::new(
            Trickle {
                pieces: vec![b"CMD_MO".to_vec(), b"TOR#1#2\n".to_vec()],
                timed_out: false,
            },
            64,
        );

        assert_eq!(r.read_line().unwrap(), None);
        assert_eq!(r.read_line().unwrap(), None);
        assert_eq!(r.read_line().unwrap(), Some(b"CMD_MOTOR#1#2".to_vec()));
    }

    #[test]
    fn test_line_overflow() {
        // Unterminated run of bytes
        let mut r = LineReader::new(Cursor::new(vec![b'A'; 100]), 16);
        assert!(matches!(r.read_line(), Err(NetError::Overflow { max: 16 })));

        // Terminated but too long
        let mut long = vec![b'A'; 16];
        long.push(b'\n');
        let mut r = LineReader::new(Cursor::new(long), 16);
        assert!(matches!(r.read_line(), Err(NetError::Overflow { .. })));

        // Exactly at the limit is fine
        let mut exact = vec![b'A'; 15];
        exact.push(b'\n');
        let mut r = LineReader::new(Cursor::new(exact), 16);
        assert_eq!(r.read_line().unwrap().map(|l| l.len()), Some(15));
    }

    #[test]
    fn test_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[1, 2, 3]).unwrap();
        write_frame(&mut wire, &[]).unwrap();
        assert_eq!(&wire[..4], &[3, 0, 0, 0]);

        let mut r = FrameReader::new(Cursor::new(wire.clone()), 16);
        assert_eq!(r.read_frame().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(r.read_frame().unwrap(), Some(vec![]));
        assert!(matches!(r.read_frame(), Err(NetError::Closed)));

        let mut c = Cursor::new(wire);
        assert_eq!(read_frame_blocking(&mut c, 16).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame_blocking(&mut c, 16).unwrap(), Some(vec![]));
        assert_eq!(read_frame_blocking(&mut c, 16).unwrap(), None);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[9; 10]).unwrap();
        let mut r = FrameReader::new(
            Trickle {
                pieces: vec![wire[..2].to_vec(), wire[2..7].to_vec(), wire[7..].to_vec()],
                timed_out: false,
            },
            16,
        );

        let mut got = None;
        for _ in 0..10 {
            if let Some(f) = r.read_frame().unwrap() {
                got = Some(f);
                break;
            }
        }
        assert_eq!(got, Some(vec![9; 10]));
    }

    #[test]
    fn test_frame_too_large() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0; 32]).unwrap();
        let mut r = FrameReader::new(Cursor::new(wire), 16);
        assert!(matches!(
            r.read_frame(),
            Err(NetError::FrameTooLarge { len: 32, max: 16 })
        ));
    }
}
