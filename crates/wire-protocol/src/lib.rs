//! Wire message codec for the storage client.
//!
//! A message is a fixed 20-byte header (protocol version, kind, safety +
//! reply modifiers, body length, sub-operation count, correlation id)
//! followed by a body that concatenates `count` sub-operations. The codec
//! itself is agnostic to what a sub-operation contains: callers append
//! fields (`append_4`, `append_8`, `append_string`, raw bytes, or a
//! zero-copy send span) in the order the receiving kind expects them, and
//! read them back the same way on the other end.

mod error;
mod kind;
mod message;
mod safety;

pub use error::CodecError;
pub use kind::MessageKind;
pub use message::Message;
pub use safety::Safety;
