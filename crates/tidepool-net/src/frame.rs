//! Frame layer of the wire protocol.
//!
//! A message is a sequence of frames. Each frame is encoded as
//!
//! ```text
//! +----------------+-------------+-----------------+
//! | length: i32 LE | flags: u16  | content         |
//! +----------------+-------------+-----------------+
//! ```
//!
//! where `length` counts the 6-byte header too. The first frame of a
//! message (the *initial frame*) holds fixed-width fields at static offsets;
//! variable-length fields follow as additional frames. The last frame of a
//! message carries [`flags::IS_FINAL`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::NetError;

/// Size of the per-frame header: `i32` length plus `u16` flags.
pub const FRAME_HEADER_SIZE: usize = 6;

/// Maximum accepted size of a whole message on the wire.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Frame flag bits.
pub mod flags {
    /// No flags.
    pub const DEFAULT: u16 = 0;
    /// First fragment of a fragmented message.
    pub const BEGIN_FRAGMENT: u16 = 1 << 15;
    /// Last fragment of a fragmented message.
    pub const END_FRAGMENT: u16 = 1 << 14;
    /// Set on the initial frame of a message sent in one piece.
    pub const UNFRAGMENTED: u16 = BEGIN_FRAGMENT | END_FRAGMENT;
    /// Set on the last frame of a message.
    pub const IS_FINAL: u16 = 1 << 13;
    /// Opens a nested structure or list.
    pub const BEGIN_DATA_STRUCTURE: u16 = 1 << 12;
    /// Closes a nested structure or list.
    pub const END_DATA_STRUCTURE: u16 = 1 << 11;
    /// Stands in for an absent optional value.
    pub const IS_NULL: u16 = 1 << 10;
}

/// A single frame: flags plus raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flag bits, see [`flags`].
    pub flags: u16,
    /// Frame payload.
    pub content: Bytes,
}

impl Frame {
    /// A data frame with default flags.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self::with_flags(content, flags::DEFAULT)
    }

    /// A frame with explicit flags.
    pub fn with_flags(content: impl Into<Bytes>, flags: u16) -> Self {
        Self {
            flags,
            content: content.into(),
        }
    }

    /// The marker frame for an absent optional value.
    pub fn null() -> Self {
        Self::with_flags(Bytes::new(), flags::IS_NULL)
    }

    /// Opening bracket of a structure or list.
    pub fn begin() -> Self {
        Self::with_flags(Bytes::new(), flags::BEGIN_DATA_STRUCTURE)
    }

    /// Closing bracket of a structure or list.
    pub fn end() -> Self {
        Self::with_flags(Bytes::new(), flags::END_DATA_STRUCTURE)
    }

    pub fn is_null(&self) -> bool {
        self.flags & flags::IS_NULL != 0
    }

    pub fn is_begin(&self) -> bool {
        self.flags & flags::BEGIN_DATA_STRUCTURE != 0
    }

    pub fn is_end(&self) -> bool {
        self.flags & flags::END_DATA_STRUCTURE != 0
    }

    /// Encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.content.len()
    }
}

/// An ordered list of frames forming one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMessage {
    frames: Vec<Frame>,
}

impl FrameMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// All frames in order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The first frame, holding the fixed-width header fields.
    pub fn initial_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Iterate frames with structure-aware helpers.
    pub fn iter(&self) -> FrameIter<'_> {
        FrameIter {
            frames: &self.frames,
            pos: 0,
        }
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        self.frames.iter().map(Frame::encoded_len).sum()
    }

    /// Append the wire form of this message to `dst`.
    ///
    /// [`flags::IS_FINAL`] is set on the last frame and cleared elsewhere.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        let last = self.frames.len().saturating_sub(1);
        for (i, frame) in self.frames.iter().enumerate() {
            let flags = if i == last {
                frame.flags | flags::IS_FINAL
            } else {
                frame.flags & !flags::IS_FINAL
            };
            dst.put_i32_le(frame.encoded_len() as i32);
            dst.put_u16_le(flags);
            dst.put_slice(&frame.content);
        }
    }

    /// Decode one message from the front of `src`.
    ///
    /// Returns `Ok(None)` while the message is still incomplete; `src` is
    /// only consumed once a final frame has been fully buffered.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, NetError> {
        // Scan headers first so a partial message leaves `src` untouched.
        let mut total = 0usize;
        loop {
            if src.len() < total + FRAME_HEADER_SIZE {
                return Ok(None);
            }
            let mut header = &src[total..total + FRAME_HEADER_SIZE];
            let len = header.get_i32_le();
            let frame_flags = header.get_u16_le();

            if len < FRAME_HEADER_SIZE as i32 {
                return Err(NetError::Frame(format!(
                    "frame length {len} is shorter than the frame header"
                )));
            }
            let len = len as usize;
            if total + len > MAX_MESSAGE_SIZE {
                return Err(NetError::MessageTooLarge(total + len));
            }
            if src.len() < total + len {
                return Ok(None);
            }
            total += len;
            if frame_flags & flags::IS_FINAL != 0 {
                break;
            }
        }

        let mut buf = src.split_to(total).freeze();
        let mut frames = Vec::new();
        while buf.has_remaining() {
            let len = buf.get_i32_le() as usize;
            let frame_flags = buf.get_u16_le();
            let content = buf.split_to(len - FRAME_HEADER_SIZE);
            frames.push(Frame {
                flags: frame_flags & !flags::IS_FINAL,
                content,
            });
        }

        Ok(Some(Self { frames }))
    }
}

/// Forward cursor over the frames of a message.
pub struct FrameIter<'a> {
    frames: &'a [Frame],
    pos: usize,
}

impl<'a> FrameIter<'a> {
    /// Take the next frame, failing if the message ended early.
    pub fn next_frame(&mut self) -> Result<&'a Frame, NetError> {
        let frame = self
            .frames
            .get(self.pos)
            .ok_or_else(|| NetError::Frame("unexpected end of message".into()))?;
        self.pos += 1;
        Ok(frame)
    }

    /// Look at the next frame without consuming it.
    pub fn peek(&self) -> Option<&'a Frame> {
        self.frames.get(self.pos)
    }

    pub fn next_is_null(&self) -> bool {
        self.peek().is_some_and(Frame::is_null)
    }

    pub fn next_is_end(&self) -> bool {
        self.peek().is_some_and(Frame::is_end)
    }

    /// Consume the next frame, which must open a structure.
    pub fn expect_begin(&mut self) -> Result<(), NetError> {
        if self.next_frame()?.is_begin() {
            Ok(())
        } else {
            Err(NetError::Frame("expected begin-structure frame".into()))
        }
    }

    /// Skip everything up to and including the frame that closes the
    /// current structure, descending over nested structures.
    ///
    /// Lets an older decoder read a structure that grew trailing fields.
    pub fn fast_forward_to_end(&mut self) -> Result<(), NetError> {
        let mut depth = 1usize;
        loop {
            let frame = self.next_frame()?;
            if frame.is_end() {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            } else if frame.is_begin() {
                depth += 1;
            }
        }
    }
}
