//! Length-prefixed audio frame files
//!
//! Each frame is stored as a big-endian `u16` length followed by that many
//! bytes of encoded audio.

use bytes::{Buf, Bytes};
use std::io;

/// Split a length-prefixed file into frames
pub fn read_audio_frames(data: &[u8]) -> io::Result<Vec<Bytes>> {
    let mut buf = data;
    let mut frames = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated audio frame length",
            ));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("audio frame of {} bytes truncated to {}", len, buf.remaining()),
            ));
        }
        frames.push(Bytes::copy_from_slice(&buf[..len]));
        buf.advance(len);
    }

    Ok(frames)
}
