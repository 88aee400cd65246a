use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::CodecError;
use crate::kind::MessageKind;
use crate::safety::{decode_modifiers, encode_modifiers, Safety};

const PROTOCOL_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4 + 8;

static NEXT_CORRELATION: AtomicU64 = AtomicU64::new(1);

fn next_correlation() -> u64 {
    NEXT_CORRELATION.fetch_add(1, Ordering::Relaxed)
}

/// One segment of a message body: either bytes owned by the message, or a
/// send-span referencing caller-owned data that is streamed without copying
/// it into the message's own buffer.
#[derive(Clone)]
enum Segment {
    Owned(Vec<u8>),
    Span(Arc<[u8]>),
}

impl Segment {
    fn as_slice(&self) -> &[u8] {
        match self {
            Segment::Owned(v) => v,
            Segment::Span(s) => s,
        }
    }
}

enum Body {
    /// A message being assembled locally, before it has been sent.
    Building(Vec<Segment>),
    /// A message received from a peer; already fully buffered.
    Received { data: Vec<u8>, cursor: usize },
}

/// A framed wire message: a fixed header followed by `count` sub-operations.
///
/// See the wire protocol table in the external interfaces section for the
/// per-kind sub-operation layout; this type only handles framing, not the
/// semantics of any particular kind.
pub struct Message {
    kind: MessageKind,
    safety: Safety,
    safety_forced: bool,
    is_reply: bool,
    correlation: u64,
    op_count: u32,
    body_len: u64,
    body: Body,
}

impl Message {
    /// Creates an empty request message of the given kind.
    ///
    /// `size_hint` is the expected body size in bytes and is used only to
    /// pre-size the internal buffer; it has no effect on the wire format.
    pub fn new(kind: MessageKind, size_hint: usize) -> Self {
        Self {
            kind,
            safety: Safety::None,
            safety_forced: false,
            is_reply: false,
            correlation: next_correlation(),
            op_count: 0,
            body_len: 0,
            body: Body::Building(Vec::with_capacity(if size_hint == 0 { 1 } else { 2 })),
        }
    }

    /// Builds an empty reply matched to `request`'s correlation id and kind.
    /// Call [`Message::receive`] to fill it in.
    pub fn new_reply(request: &Message) -> Self {
        Self {
            kind: request.kind,
            safety: Safety::None,
            safety_forced: false,
            is_reply: true,
            correlation: request.correlation,
            op_count: 0,
            body_len: 0,
            body: Body::Received { data: Vec::new(), cursor: 0 },
        }
    }

    /// Builds an empty reply to `request`, ready to have fields appended
    /// and then sent. The counterpart to [`Message::new_reply`], which
    /// instead prepares an empty shell for [`Message::receive`]; this one
    /// is for the side constructing the reply, not consuming it.
    pub fn reply_to(request: &Message, size_hint: usize) -> Self {
        Self {
            kind: request.kind,
            safety: Safety::None,
            safety_forced: false,
            is_reply: true,
            correlation: request.correlation,
            op_count: 0,
            body_len: 0,
            body: Body::Building(Vec::with_capacity(if size_hint == 0 { 1 } else { 2 })),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn safety(&self) -> Safety {
        self.safety
    }

    pub fn is_reply(&self) -> bool {
        self.is_reply
    }

    pub fn correlation(&self) -> u64 {
        self.correlation
    }

    /// Number of sub-operations declared via [`Message::add_operation`] (for
    /// a request being built) or read off the wire (for a received reply).
    pub fn count(&self) -> u32 {
        self.op_count
    }

    /// Total body length in bytes, across every appended region and send
    /// span declared so far.
    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    /// Sets the safety level from the batch's semantics, unless a previous
    /// call to [`Message::force_safety`] pinned it.
    pub fn set_safety(&mut self, safety: Safety) {
        if !self.safety_forced {
            self.safety = safety;
        }
    }

    /// Overrides the safety level regardless of the batch default and locks
    /// it so a later `set_safety` cannot undo it. Used by the lazy
    /// `DATA_CREATE` piggy-back so the server is guaranteed to reply even
    /// under unsafe batch semantics.
    pub fn force_safety(&mut self, safety: Safety) {
        self.safety = safety;
        self.safety_forced = true;
    }

    fn building_segments(&mut self) -> &mut Vec<Segment> {
        match &mut self.body {
            Body::Building(segments) => segments,
            Body::Received { .. } => panic!("cannot append to a received message"),
        }
    }

    /// Declares the start of a new sub-operation. Sub-operations have no
    /// explicit length prefix on the wire; readers consume a fixed layout
    /// per message kind, so this only increments the sub-operation count
    /// used in the header.
    pub fn add_operation(&mut self) {
        self.op_count += 1;
    }

    /// Appends raw bytes to the body, in declaration order.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.body_len += bytes.len() as u64;
        self.building_segments().push(Segment::Owned(bytes.to_vec()));
    }

    /// Appends a little-endian `u32`.
    pub fn append_4(&mut self, value: u32) {
        self.append_bytes(&value.to_le_bytes());
    }

    /// Appends a little-endian `u64`.
    pub fn append_8(&mut self, value: u64) {
        self.append_bytes(&value.to_le_bytes());
    }

    /// Appends a NUL-terminated, length-prefixed UTF-8 string: a `u32` byte
    /// count (including the terminator) followed by the bytes and a NUL.
    pub fn append_string(&mut self, s: &str) {
        let len = s.len() as u32 + 1;
        self.append_4(len);
        self.append_bytes(s.as_bytes());
        self.append_bytes(&[0u8]);
    }

    /// Attaches a send-span: caller-owned bytes streamed in declaration
    /// order without being copied into the message's own buffer ahead of
    /// time. Used for write payloads, which can be large.
    pub fn add_send_span(&mut self, data: Arc<[u8]>) {
        self.body_len += data.len() as u64;
        self.building_segments().push(Segment::Span(data));
    }

    /// Sends the message header followed by every appended region and send
    /// span, in declaration order. Atomic per message: a short write fails
    /// the whole message.
    pub fn send(&self, stream: &mut impl Write) -> Result<(), CodecError> {
        let segments = match &self.body {
            Body::Building(segments) => segments,
            Body::Received { .. } => panic!("cannot send a received message"),
        };

        let mut header = [0u8; HEADER_LEN];
        header[0] = PROTOCOL_VERSION;
        header[1] = self.kind.to_wire();
        header[2..4].copy_from_slice(&encode_modifiers(self.safety, self.is_reply).to_le_bytes());
        header[4..8].copy_from_slice(&(self.body_len as u32).to_le_bytes());
        header[8..12].copy_from_slice(&self.op_count.to_le_bytes());
        header[12..20].copy_from_slice(&self.correlation.to_le_bytes());

        stream.write_all(&header)?;

        for segment in segments {
            stream.write_all(segment.as_slice())?;
        }

        stream.flush()?;

        Ok(())
    }

    /// Receives a message from `stream`: the fixed header, then exactly
    /// `body_length` bytes. Partial reads are looped over transparently; an
    /// EOF before completion surfaces as [`CodecError::Io`].
    pub fn receive(&mut self, stream: &mut impl Read) -> Result<(), CodecError> {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header)?;

        let version = header[0];
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        self.kind = MessageKind::from_wire(header[1])?;
        let modifiers = u16::from_le_bytes([header[2], header[3]]);
        let (safety, is_reply) = decode_modifiers(modifiers);
        self.safety = safety;
        self.is_reply = is_reply;

        let body_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        self.op_count = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        self.correlation = u64::from_le_bytes(header[12..20].try_into().unwrap());

        let mut data = vec![0u8; body_len];
        stream.read_exact(&mut data)?;

        self.body_len = body_len as u64;
        self.body = Body::Received { data, cursor: 0 };

        Ok(())
    }

    fn received_mut(&mut self) -> (&[u8], &mut usize) {
        match &mut self.body {
            Body::Received { data, cursor } => (data, cursor),
            Body::Building(_) => panic!("cannot read from a message under construction"),
        }
    }

    fn take(&mut self, len: usize) -> Result<&[u8], CodecError> {
        let (data, cursor) = self.received_mut();
        if *cursor + len > data.len() {
            return Err(CodecError::ShortTransfer("read", len, data.len() - *cursor));
        }
        let slice = &data[*cursor..*cursor + len];
        *cursor += len;
        Ok(slice)
    }

    /// Reads a little-endian `u32` from the current cursor position.
    pub fn get_4(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a little-endian `u64` from the current cursor position.
    pub fn get_8(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Reads exactly `len` raw bytes from the current cursor position.
    pub fn get_n(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a length-prefixed, NUL-terminated UTF-8 string.
    pub fn get_string(&mut self) -> Result<String, CodecError> {
        let len = self.get_4()? as usize;
        let bytes = self.take(len)?.to_vec();
        let (content, nul) = bytes.split_at(len.saturating_sub(1));
        debug_assert_eq!(nul, &[0u8]);
        Ok(String::from_utf8(content.to_vec())?)
    }
}
