//! Session identifiers.
//!
//! A session id is 128 bits; the first 8 bytes hold a big-endian counter so
//! ids sort in allocation order. The allocator is an owned value handed to
//! whoever creates sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 128-bit player session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; 16]);

impl SessionId {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse from a wire payload; `None` unless exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The allocation counter embedded in the id.
    pub fn sequence(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

/// Hands out monotonically increasing session ids.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct SessionIdAllocator {
    next: Arc<AtomicU64>,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    pub fn next_id(&self) -> SessionId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&seq.to_be_bytes());
        SessionId(bytes)
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_big_endian() {
        let alloc = SessionIdAllocator::starting_at(255);
        let a = alloc.next_id();
        let b = alloc.next_id();
        assert_eq!(a.as_bytes()[..8], [0, 0, 0, 0, 0, 0, 0, 255]);
        assert_eq!(b.sequence(), 256);
        assert!(a < b);
    }

    #[test]
    fn clones_share_the_counter() {
        let alloc = SessionIdAllocator::new();
        let other = alloc.clone();
        assert_eq!(alloc.next_id().sequence(), 1);
        assert_eq!(other.next_id().sequence(), 2);
    }

    #[test]
    fn separate_allocators_are_independent() {
        assert_eq!(SessionIdAllocator::new().next_id(), SessionIdAllocator::new().next_id());
    }

    #[test]
    fn from_slice_requires_sixteen_bytes() {
        assert!(SessionId::from_slice(&[0u8; 15]).is_none());
        assert!(SessionId::from_slice(&[1u8; 16]).is_some());
    }
}
