//! Length-prefixed command framing.
//!
//! ```text
//! +-----------+------------------+-------------------+
//! | opcode u8 | length u32 (BE)  | payload (length)  |
//! +-----------+------------------+-------------------+
//! ```
//!
//! The decoder is a two-state machine so a frame split across any number of
//! reads reassembles once the remainder arrives. EOF on a frame boundary ends
//! the stream; EOF inside a frame is an error.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;

/// opcode + length prefix.
pub const HEADER_LEN: usize = 5;

/// Largest payload accepted in either direction (1 MiB).
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodeState {
    #[default]
    ReadingHeader,
    ReadingPayload { opcode: u8, len: usize },
}

/// Codec for [`Command`] frames, for use with `tokio_util::codec::Framed`.
#[derive(Debug)]
pub struct CommandCodec {
    state: DecodeState,
    max_payload: usize,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DecodeState::ReadingHeader,
            max_payload,
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, CodecError> {
        loop {
            match self.state {
                DecodeState::ReadingHeader => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let opcode = src[0];
                    let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
                    if len > self.max_payload {
                        return Err(CodecError::PayloadTooLarge {
                            len,
                            max: self.max_payload,
                        });
                    }
                    src.advance(HEADER_LEN);
                    src.reserve(len);
                    self.state = DecodeState::ReadingPayload { opcode, len };
                }
                DecodeState::ReadingPayload { opcode, len } => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    self.state = DecodeState::ReadingHeader;
                    return Ok(Some(Command { opcode, payload }));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Command>, CodecError> {
        if let Some(cmd) = self.decode(src)? {
            return Ok(Some(cmd));
        }
        match self.state {
            DecodeState::ReadingHeader if src.is_empty() => Ok(None),
            DecodeState::ReadingHeader => Err(CodecError::Truncated { buffered: src.len() }),
            DecodeState::ReadingPayload { .. } => Err(CodecError::Truncated {
                buffered: HEADER_LEN + src.len(),
            }),
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = CodecError;

    fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<(), CodecError> {
        if cmd.payload.len() > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                len: cmd.payload.len(),
                max: self.max_payload,
            });
        }
        dst.reserve(HEADER_LEN + cmd.payload.len());
        dst.put_u8(cmd.opcode);
        dst.put_u32(cmd.payload.len() as u32);
        dst.extend_from_slice(&cmd.payload);
        Ok(())
    }
}

/// Encode a single command into a fresh buffer.
pub fn encode_command(cmd: Command) -> Result<BytesMut, CodecError> {
    let mut buf = BytesMut::new();
    CommandCodec::new().encode(cmd, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::opcode;

    fn sample_commands() -> Vec<Command> {
        vec![
            Command::new(opcode::AUTH, vec![9u8; 16]),
            Command::new(0x42, Vec::<u8>::new()),
            Command::new(0x7f, b"move left".to_vec()),
            Command::new(0x80, vec![0xAB; 300]),
            Command::close(),
        ]
    }

    fn encode_all(cmds: &[Command]) -> BytesMut {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::new();
        for cmd in cmds {
            codec.encode(cmd.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn header_layout() {
        let buf = encode_command(Command::new(0x10, b"abc".to_vec())).unwrap();
        assert_eq!(&buf[..], &[0x10, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn decodes_across_arbitrary_split_points() {
        let cmds = sample_commands();
        let wire = encode_all(&cmds).freeze();

        for chunk in 1..=wire.len() {
            let mut codec = CommandCodec::new();
            let mut buf = BytesMut::new();
            let mut out = Vec::new();
            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(cmd) = codec.decode(&mut buf).unwrap() {
                    out.push(cmd);
                }
            }
            assert!(codec.decode_eof(&mut buf).unwrap().is_none());
            assert_eq!(out, cmds, "chunk size {}", chunk);
        }
    }

    #[test]
    fn split_inside_header_then_payload() {
        let wire = encode_all(&[Command::new(0x33, b"hello".to_vec())]);
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&wire[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[2..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[7..]);
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&cmd.payload[..], b"hello");
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = CommandCodec::with_max_payload(8);
        let mut buf = BytesMut::from(&[0x01u8, 0, 0, 0, 9][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::PayloadTooLarge { len: 9, max: 8 })
        ));
    }

    #[test]
    fn eof_inside_frame_is_truncation() {
        let wire = encode_all(&[Command::new(0x33, b"hello".to_vec())]);
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&wire[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(matches!(codec.decode_eof(&mut buf), Err(CodecError::Truncated { .. })));

        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::from(&wire[..3]);
        assert!(matches!(codec.decode_eof(&mut buf), Err(CodecError::Truncated { buffered: 3 })));
    }
}
