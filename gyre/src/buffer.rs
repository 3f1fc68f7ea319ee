//! Buffer holders: the per-direction containers a pipeline allocates for
//! each handler.
//!
//! A holder is either a growable byte queue, an ordered queue of arbitrary
//! message objects, or a discard sink that accepts everything and drops it
//! (used as the outbound placeholder of server channels so the pipeline
//! API stays total). Handlers declare which kind they consume per
//! direction; the pipeline allocates the matching variant.

use std::any::Any;
use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// The kind of payload a [`BufferHolder`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderKind {
    /// A contiguous byte stream.
    Bytes,
    /// A sequence of message objects.
    Messages,
    /// A sink that drops everything pushed into it.
    Discard,
}

/// A directional buffer between two pipeline handlers (or between a
/// handler and the channel).
pub enum BufferHolder {
    /// Byte stream variant.
    Bytes(BytesMut),
    /// Message queue variant.
    Messages(VecDeque<Box<dyn Any>>),
    /// Accepts and drops.
    Discard,
}

impl BufferHolder {
    /// Creates an empty byte holder.
    pub fn bytes() -> Self {
        BufferHolder::Bytes(BytesMut::new())
    }

    /// Creates an empty message holder.
    pub fn messages() -> Self {
        BufferHolder::Messages(VecDeque::new())
    }

    /// Creates a discard sink.
    pub fn discard() -> Self {
        BufferHolder::Discard
    }

    /// Creates an empty holder of the given kind.
    pub fn for_kind(kind: HolderKind) -> Self {
        match kind {
            HolderKind::Bytes => Self::bytes(),
            HolderKind::Messages => Self::messages(),
            HolderKind::Discard => Self::discard(),
        }
    }

    /// The kind of this holder.
    pub fn kind(&self) -> HolderKind {
        match self {
            BufferHolder::Bytes(_) => HolderKind::Bytes,
            BufferHolder::Messages(_) => HolderKind::Messages,
            BufferHolder::Discard => HolderKind::Discard,
        }
    }

    /// Pushes a message into the holder. Byte holders accept byte-shaped
    /// payloads (`BytesMut`, `Bytes`, `Vec<u8>`) and append them; message
    /// holders enqueue anything; discard holders drop everything.
    ///
    /// # Panics
    ///
    /// Pushing a non-byte message into a byte holder is a handler-kind
    /// mismatch and panics.
    pub fn push(&mut self, msg: Box<dyn Any>) {
        match self {
            BufferHolder::Bytes(buf) => {
                let msg = match msg.downcast::<BytesMut>() {
                    Ok(data) => {
                        buf.extend_from_slice(&data);
                        return;
                    }
                    Err(msg) => msg,
                };
                let msg = match msg.downcast::<Bytes>() {
                    Ok(data) => {
                        buf.extend_from_slice(&data);
                        return;
                    }
                    Err(msg) => msg,
                };
                match msg.downcast::<Vec<u8>>() {
                    Ok(data) => buf.extend_from_slice(&data),
                    Err(_) => panic!("byte holder cannot accept a non-byte message"),
                }
            }
            BufferHolder::Messages(queue) => queue.push_back(msg),
            BufferHolder::Discard => {}
        }
    }

    /// Appends raw bytes to a byte holder; discard holders drop them.
    ///
    /// # Panics
    ///
    /// Panics on a message holder.
    pub fn push_bytes(&mut self, data: &[u8]) {
        match self {
            BufferHolder::Bytes(buf) => buf.extend_from_slice(data),
            BufferHolder::Messages(_) => panic!("message holder cannot accept raw bytes"),
            BufferHolder::Discard => {}
        }
    }

    /// Removes and returns all readable bytes. Returns an empty buffer for
    /// a discard holder.
    ///
    /// # Panics
    ///
    /// Panics on a message holder.
    pub fn take_bytes(&mut self) -> BytesMut {
        match self {
            BufferHolder::Bytes(buf) => buf.split(),
            BufferHolder::Messages(_) => panic!("message holder has no byte stream"),
            BufferHolder::Discard => BytesMut::new(),
        }
    }

    /// Mutable access to the underlying byte stream.
    ///
    /// # Panics
    ///
    /// Panics on message and discard holders.
    pub fn as_bytes_mut(&mut self) -> &mut BytesMut {
        match self {
            BufferHolder::Bytes(buf) => buf,
            BufferHolder::Messages(_) => panic!("message holder has no byte stream"),
            BufferHolder::Discard => panic!("discard holder has no byte stream"),
        }
    }

    /// Pops the oldest message from a message holder.
    pub fn pop_message(&mut self) -> Option<Box<dyn Any>> {
        match self {
            BufferHolder::Messages(queue) => queue.pop_front(),
            BufferHolder::Bytes(_) => panic!("byte holder has no message queue"),
            BufferHolder::Discard => None,
        }
    }

    /// Whether the holder has nothing to consume. Discard holders are
    /// always empty.
    pub fn is_empty(&self) -> bool {
        match self {
            BufferHolder::Bytes(buf) => buf.is_empty(),
            BufferHolder::Messages(queue) => queue.is_empty(),
            BufferHolder::Discard => true,
        }
    }

    /// Number of readable bytes or queued messages.
    pub fn len(&self) -> usize {
        match self {
            BufferHolder::Bytes(buf) => buf.len(),
            BufferHolder::Messages(queue) => queue.len(),
            BufferHolder::Discard => 0,
        }
    }
}

impl std::fmt::Debug for BufferHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferHolder::Bytes(buf) => write!(f, "BufferHolder::Bytes({} bytes)", buf.len()),
            BufferHolder::Messages(queue) => {
                write!(f, "BufferHolder::Messages({} messages)", queue.len())
            }
            BufferHolder::Discard => write!(f, "BufferHolder::Discard"),
        }
    }
}

/// Moves everything from `src` into `dst`, adapting between kinds where
/// that is meaningful: bytes append to byte holders, messages enqueue to
/// message holders, byte payloads crossing into a message holder arrive as
/// a single `BytesMut` message, and discard destinations swallow all of it.
pub(crate) fn transfer(src: &mut BufferHolder, dst: &mut BufferHolder) {
    match src {
        BufferHolder::Bytes(buf) => {
            if buf.is_empty() {
                return;
            }
            let data = buf.split();
            match dst {
                BufferHolder::Bytes(out) => out.extend_from_slice(&data),
                BufferHolder::Messages(queue) => queue.push_back(Box::new(data)),
                BufferHolder::Discard => {}
            }
        }
        BufferHolder::Messages(queue) => {
            while let Some(msg) = queue.pop_front() {
                dst.push(msg);
            }
        }
        BufferHolder::Discard => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_holder_appends_byte_shaped_messages() {
        let mut holder = BufferHolder::bytes();
        holder.push(Box::new(BytesMut::from(&b"ab"[..])));
        holder.push(Box::new(Bytes::from_static(b"cd")));
        holder.push(Box::new(b"ef".to_vec()));
        holder.push_bytes(b"gh");
        assert_eq!(holder.len(), 8);
        assert_eq!(&holder.take_bytes()[..], b"abcdefgh");
        assert!(holder.is_empty());
    }

    #[test]
    #[should_panic(expected = "non-byte message")]
    fn byte_holder_rejects_object_messages() {
        let mut holder = BufferHolder::bytes();
        holder.push(Box::new("not bytes".to_string()));
    }

    #[test]
    fn message_holder_preserves_order() {
        let mut holder = BufferHolder::messages();
        holder.push(Box::new(1u32));
        holder.push(Box::new(2u32));
        let first = holder.pop_message().unwrap().downcast::<u32>().unwrap();
        let second = holder.pop_message().unwrap().downcast::<u32>().unwrap();
        assert_eq!((*first, *second), (1, 2));
        assert!(holder.pop_message().is_none());
    }

    #[test]
    fn discard_holder_swallows_everything() {
        let mut holder = BufferHolder::discard();
        holder.push(Box::new(BytesMut::from(&b"dropped"[..])));
        holder.push_bytes(b"dropped");
        assert!(holder.is_empty());
        assert_eq!(holder.len(), 0);
        assert!(holder.take_bytes().is_empty());
    }

    #[test]
    fn transfer_adapts_bytes_into_messages() {
        let mut src = BufferHolder::bytes();
        src.push_bytes(b"payload");
        let mut dst = BufferHolder::messages();
        transfer(&mut src, &mut dst);
        let msg = dst.pop_message().unwrap().downcast::<BytesMut>().unwrap();
        assert_eq!(&msg[..], b"payload");
        assert!(src.is_empty());
    }
}
