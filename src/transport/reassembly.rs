//! Fragment reassembly.
//!
//! A message that arrives as one final fragment is passed through untouched.
//! Anything else is accumulated in a growable scratch buffer and, once the final
//! fragment lands, copied into a buffer from the shared pool.
//!
//! The scratch buffer grows to `old_capacity + incoming + default` whenever a
//! fragment does not fit. Every fragment checks whether it can be shrunk back to
//! the default size: at most once per trim interval, only while no message is in
//! flight and only when it has grown past twice the default.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::core::buffer_pool::BufferPool;
use crate::transport::InboundMessage;

pub struct MessageAssembler {
    scratch: Vec<u8>,
    default_capacity: usize,
    trim_interval: Duration,
    last_trim: Instant,
    pool: Arc<BufferPool>,
}

impl MessageAssembler {
    pub fn new(pool: Arc<BufferPool>, default_capacity: usize, trim_interval: Duration) -> Self {
        Self {
            scratch: Vec::with_capacity(default_capacity),
            default_capacity,
            trim_interval,
            last_trim: Instant::now(),
            pool,
        }
    }

    /// Feed one fragment. Returns the whole message once `last` is seen.
    pub fn push_fragment(&mut self, data: Bytes, last: bool) -> Option<InboundMessage> {
        self.maybe_trim(Instant::now());
        if last && self.scratch.is_empty() {
            return Some(InboundMessage::Direct(data));
        }

        self.ensure_capacity(data.len());
        self.scratch.extend_from_slice(&data);

        if !last {
            return None;
        }

        let mut buffer = self.pool.acquire_with_capacity(self.scratch.len());
        let message = match buffer.put(&self.scratch) {
            Ok(()) => InboundMessage::Pooled(buffer),
            Err(err) => {
                tracing::warn!(error = %err, "pooled buffer too small, delivering a copy");
                self.pool.release(buffer);
                InboundMessage::Direct(Bytes::copy_from_slice(&self.scratch))
            }
        };
        self.scratch.clear();
        self.maybe_trim(Instant::now());
        Some(message)
    }

    fn ensure_capacity(&mut self, incoming: usize) {
        let remaining = self.scratch.capacity() - self.scratch.len();
        if remaining >= incoming {
            return;
        }
        let new_capacity = self.scratch.capacity() + incoming + self.default_capacity;
        tracing::debug!(
            from = self.scratch.capacity(),
            to = new_capacity,
            "growing reassembly buffer"
        );
        let mut grown = Vec::with_capacity(new_capacity);
        grown.extend_from_slice(&self.scratch);
        self.scratch = grown;
    }

    /// Shrink the scratch buffer if it is oversized, idle and the interval has passed.
    ///
    /// The interval is measured from the last trim. Returns whether a trim happened.
    pub fn maybe_trim(&mut self, now: Instant) -> bool {
        if self.scratch.capacity() <= self.default_capacity * 2
            || !self.scratch.is_empty()
            || now.saturating_duration_since(self.last_trim) < self.trim_interval
        {
            return false;
        }
        tracing::debug!(
            from = self.scratch.capacity(),
            to = self.default_capacity,
            "trimming reassembly buffer"
        );
        self.scratch = Vec::with_capacity(self.default_capacity);
        self.last_trim = now;
        true
    }

    /// Bytes of the message currently being assembled.
    pub fn pending_len(&self) -> usize {
        self.scratch.len()
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }

    /// Discard any partially assembled message.
    pub fn reset(&mut self) {
        self.scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: usize = 1024 * 1024;

    fn assembler(default_capacity: usize) -> MessageAssembler {
        let pool = Arc::new(BufferPool::new(4, default_capacity, false));
        MessageAssembler::new(pool, default_capacity, Duration::from_secs(60))
    }

    #[test]
    fn test_single_fragment_is_passed_through() {
        let mut assembler = assembler(64);
        let data = Bytes::from_static(b"one shot");
        let message = assembler.push_fragment(data.clone(), true).unwrap();

        match message {
            InboundMessage::Direct(bytes) => {
                assert_eq!(bytes, data);
                assert_eq!(bytes.as_ptr(), data.as_ptr());
            }
            InboundMessage::Pooled(_) => panic!("single fragment should not touch the pool"),
        }
        assert_eq!(assembler.pool.stats().acquires, 0);
    }

    #[test]
    fn test_fragments_are_joined_into_pooled_buffer() {
        let mut assembler = assembler(64);
        assert!(assembler.push_fragment(Bytes::from_static(b"abc"), false).is_none());
        assert_eq!(assembler.pending_len(), 3);
        assert!(assembler.push_fragment(Bytes::from_static(b"def"), false).is_none());

        let message = assembler.push_fragment(Bytes::from_static(b"g"), true).unwrap();
        assert!(message.is_pooled());
        assert_eq!(message.as_slice(), b"abcdefg");
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_three_mebibyte_message_grows_scratch() {
        let mut assembler = assembler(2 * MIB);
        for _ in 0..3 {
            let chunk = Bytes::from(vec![0x42u8; MIB]);
            assert!(assembler.push_fragment(chunk, false).is_none());
        }
        let message = assembler
            .push_fragment(Bytes::from_static(&[0x43]), true)
            .unwrap();

        assert!(assembler.scratch_capacity() >= 3 * MIB + 1);
        assert_eq!(message.len(), 3 * MIB + 1);
        assert!(message.is_pooled());
        assert_eq!(message.as_slice()[3 * MIB], 0x43);

        // Oversized for the pool, so it came from a one-off allocation.
        let stats = assembler.pool.stats();
        assert_eq!(stats.acquires, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_trim_only_when_idle_and_oversized() {
        let pool = Arc::new(BufferPool::new(2, 16, false));
        let mut assembler = MessageAssembler::new(pool, 16, Duration::ZERO);

        assert!(assembler.push_fragment(Bytes::from(vec![1u8; 40]), false).is_none());
        assert!(assembler.scratch_capacity() > 32);
        // In flight: never trimmed.
        assert!(!assembler.maybe_trim(Instant::now()));

        let message = assembler.push_fragment(Bytes::from_static(&[2]), true).unwrap();
        assert_eq!(message.len(), 41);
        // Trim ran on completion.
        assert_eq!(assembler.scratch_capacity(), 16);
    }

    #[test]
    fn test_trim_respects_interval() {
        let pool = Arc::new(BufferPool::new(2, 16, false));
        let mut assembler = MessageAssembler::new(pool, 16, Duration::from_secs(60));

        assembler.push_fragment(Bytes::from(vec![1u8; 100]), false);
        assembler.push_fragment(Bytes::from_static(&[2]), true);
        assert!(assembler.scratch_capacity() > 32);

        let later = Instant::now() + Duration::from_secs(61);
        assert!(assembler.maybe_trim(later));
        assert_eq!(assembler.scratch_capacity(), 16);
    }

    #[test]
    fn test_single_fragment_traffic_trims_grown_scratch() {
        let pool = Arc::new(BufferPool::new(2, 16, false));
        let mut assembler = MessageAssembler::new(pool, 16, Duration::from_millis(50));

        assembler.push_fragment(Bytes::from(vec![1u8; 100]), false);
        assembler.push_fragment(Bytes::from_static(&[2]), true);
        let grown = assembler.scratch_capacity();
        assert!(grown > 32);

        std::thread::sleep(Duration::from_millis(120));
        let message = assembler.push_fragment(Bytes::from_static(b"whole"), true).unwrap();
        assert!(!message.is_pooled());
        assert_eq!(assembler.scratch_capacity(), 16);
    }

    #[test]
    fn test_small_scratch_does_not_restart_interval() {
        let pool = Arc::new(BufferPool::new(2, 16, false));
        let mut assembler = MessageAssembler::new(pool, 16, Duration::from_secs(60));
        let created = assembler.last_trim;

        assert!(!assembler.maybe_trim(created + Duration::from_secs(61)));
        assert_eq!(assembler.last_trim, created);

        assembler.push_fragment(Bytes::from(vec![1u8; 100]), false);
        assembler.push_fragment(Bytes::from_static(&[2]), true);
        assert!(assembler.maybe_trim(created + Duration::from_secs(62)));
        assert_eq!(assembler.scratch_capacity(), 16);
        assert_eq!(assembler.last_trim, created + Duration::from_secs(62));
    }

    #[test]
    fn test_reset_discards_partial_message() {
        let mut assembler = assembler(32);
        assembler.push_fragment(Bytes::from_static(b"partial"), false);
        assembler.reset();

        let message = assembler.push_fragment(Bytes::from_static(b"next"), true).unwrap();
        assert_eq!(message.as_slice(), b"next");
        assert!(!message.is_pooled());
    }

    proptest! {
        #[test]
        fn prop_any_split_reassembles_exactly_once(
            payload in proptest::collection::vec(any::<u8>(), 1..4096),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut bounds: Vec<usize> = cuts.iter().map(|c| c % payload.len()).collect();
            bounds.push(0);
            bounds.push(payload.len());
            bounds.sort_unstable();
            bounds.dedup();

            let mut assembler = assembler(256);
            let mut delivered = Vec::new();
            let fragments = bounds.len() - 1;
            for i in 0..fragments {
                let chunk = Bytes::copy_from_slice(&payload[bounds[i]..bounds[i + 1]]);
                if let Some(message) = assembler.push_fragment(chunk, i + 1 == fragments) {
                    delivered.push(message.as_slice().to_vec());
                }
            }

            prop_assert_eq!(delivered.len(), 1);
            prop_assert_eq!(&delivered[0], &payload);
            prop_assert_eq!(assembler.pending_len(), 0);
        }
    }
}
