//! [`FileTag`]: an opaque, fixed-size, handler-qualified file identity.

use std::fmt;

/// Size in bytes of the handler-specific payload carried by a [`FileTag`].
///
/// Large enough to hold e.g. four `u32`s (tablespace/database/relation/fork)
/// plus a segment number, which is the richest case handlers in this crate's
/// test suite need.
pub const TAG_PAYLOAD_LEN: usize = 20;

/// Identifies which entry in the handler vtable ([`crate::handler::HandlerTable`])
/// owns a given [`FileTag`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u8);

/// An opaque, fixed-size, value-type file identifier.
///
/// `FileTag` is compared and hashed bytewise: two tags are equal iff their
/// `handler` and raw `payload` bytes are identical. Handlers interpret the
/// payload according to their own convention (e.g. tablespace/database/
/// relation/fork/segment numbers for on-disk relation segments, or a single
/// log segment number for a commit log) and additionally expose a semantic
/// [`matches`][crate::handler::SyncHandler::matches] predicate used by
/// pattern-cancel requests, since "these two tags denote the same relation,
/// ignoring fork/segment" is not expressible as byte equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileTag {
    pub handler: HandlerId,
    pub payload: [u8; TAG_PAYLOAD_LEN],
}

impl FileTag {
    pub fn new(handler: HandlerId, payload: [u8; TAG_PAYLOAD_LEN]) -> Self {
        Self { handler, payload }
    }

    /// Build a tag from a handler id and a short byte slice, zero-padding the
    /// remainder of the payload.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than [`TAG_PAYLOAD_LEN`].
    pub fn from_bytes(handler: HandlerId, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= TAG_PAYLOAD_LEN, "tag payload too long");
        let mut payload = [0u8; TAG_PAYLOAD_LEN];
        payload[..bytes.len()].copy_from_slice(bytes);
        Self { handler, payload }
    }
}

impl fmt::Debug for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTag")
            .field("handler", &self.handler.0)
            .field("payload", &hex(&self.payload))
            .finish()
    }
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler={} tag={}", self.handler.0, hex(&self.payload))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tags_hash_equal() {
        let a = FileTag::from_bytes(HandlerId(1), &[1, 2, 3]);
        let b = FileTag::from_bytes(HandlerId(1), &[1, 2, 3]);
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn different_handler_not_equal() {
        let a = FileTag::from_bytes(HandlerId(1), &[1, 2, 3]);
        let b = FileTag::from_bytes(HandlerId(2), &[1, 2, 3]);
        assert_ne!(a, b);
    }
}
