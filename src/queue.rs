//! Realtime-safe frame queue
//!
//! Single-producer single-consumer queue of pre-encoded byte buffers.
//! The producer side pushes whole buffers; the realtime consumer drains
//! bytes, advancing a cursor through a partially consumed head buffer.
//! The drain path performs no allocation and no blocking synchronization.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::QueueError;

struct Shared {
    queue: ArrayQueue<Bytes>,
    /// Total undelivered bytes across queued buffers, including the
    /// not-yet-consumed tail of the head buffer
    queued_bytes: AtomicUsize,
    /// Bytes per frame of the active configuration
    stride: AtomicU32,
}

/// Create a frame queue with the given buffer slot capacity.
///
/// Returns the producer and consumer halves; each half is owned by
/// exactly one thread.
pub fn frame_queue(slots: usize, stride: u32) -> (FrameQueueProducer, FrameQueueConsumer) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(slots),
        queued_bytes: AtomicUsize::new(0),
        stride: AtomicU32::new(stride),
    });
    (
        FrameQueueProducer {
            shared: shared.clone(),
        },
        FrameQueueConsumer {
            shared,
            head: None,
            cursor: 0,
        },
    )
}

/// Producer half: pushed buffers transfer ownership into the queue
pub struct FrameQueueProducer {
    shared: Arc<Shared>,
}

impl FrameQueueProducer {
    /// Push a buffer onto the tail of the queue.
    ///
    /// The buffer size must be a positive multiple of the current stride.
    pub fn push(&self, buffer: Bytes) -> Result<(), QueueError> {
        let stride = self.shared.stride.load(Ordering::Acquire);
        let size = buffer.len();
        if size == 0 || size % stride as usize != 0 {
            return Err(QueueError::Misaligned { size, stride });
        }

        self.shared.queue.push(buffer).map_err(|_| QueueError::Full {
            slots: self.shared.queue.capacity(),
        })?;
        self.shared.queued_bytes.fetch_add(size, Ordering::AcqRel);
        Ok(())
    }

    /// Undelivered bytes currently queued
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued_bytes.load(Ordering::Acquire)
    }

    /// Whole undelivered frames currently queued.
    ///
    /// A partial frame left at the drain cursor does not count.
    pub fn queued_frames(&self) -> usize {
        let stride = self.shared.stride.load(Ordering::Acquire) as usize;
        self.shared.queued_bytes.load(Ordering::Acquire) / stride
    }

    /// Current stride in bytes
    pub fn stride(&self) -> u32 {
        self.shared.stride.load(Ordering::Acquire)
    }

    /// Replace the stride after a renegotiation
    pub fn set_stride(&self, stride: u32) {
        self.shared.stride.store(stride, Ordering::Release);
    }

    /// Drop every queued buffer. Used on teardown, after the consumer
    /// thread has been detached.
    pub fn clear(&self) {
        while self.shared.queue.pop().is_some() {}
        self.shared.queued_bytes.store(0, Ordering::Release);
    }
}

/// Consumer half: drained by the realtime thread
pub struct FrameQueueConsumer {
    shared: Arc<Shared>,
    /// Partially consumed head buffer
    head: Option<Bytes>,
    /// Bytes of `head` already delivered
    cursor: usize,
}

impl FrameQueueConsumer {
    /// Copy up to `dest.len()` bytes from the head of the queue.
    ///
    /// Fully consumed buffers are popped and released; a partially
    /// consumed head stays resident with the cursor advanced. If queued
    /// data runs out the remainder of `dest` is zero-filled. Returns the
    /// count of real (non-zero-filled) bytes sourced.
    pub fn drain(&mut self, dest: &mut [u8]) -> usize {
        let mut written = 0;

        while written < dest.len() {
            let head = match self.head.take() {
                Some(head) => head,
                None => match self.shared.queue.pop() {
                    Some(next) => {
                        self.cursor = 0;
                        next
                    }
                    None => break,
                },
            };

            let remaining = head.len() - self.cursor;
            let take = remaining.min(dest.len() - written);
            dest[written..written + take]
                .copy_from_slice(&head[self.cursor..self.cursor + take]);
            written += take;
            self.cursor += take;

            if self.cursor < head.len() {
                // Partially consumed head stays resident
                self.head = Some(head);
            } else {
                self.cursor = 0;
            }
        }

        if written > 0 {
            self.shared.queued_bytes.fetch_sub(written, Ordering::AcqRel);
        }

        // Ran out of source data; never hand back uninitialized audio
        dest[written..].fill(0);

        written
    }

    pub fn queued_bytes(&self) -> usize {
        self.shared.queued_bytes.load(Ordering::Acquire)
    }

    pub fn queued_frames(&self) -> usize {
        let stride = self.shared.stride.load(Ordering::Acquire) as usize;
        self.shared.queued_bytes.load(Ordering::Acquire) / stride
    }

    pub fn stride(&self) -> u32 {
        self.shared.stride.load(Ordering::Acquire)
    }

    /// Replace the stride after a renegotiation discovered on the
    /// realtime thread
    pub fn set_stride(&self, stride: u32) {
        self.shared.stride.store(stride, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn buf(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn test_push_increments_frame_count() {
        let (producer, _consumer) = frame_queue(16, 8);

        producer.push(buf(64, 1)).unwrap();
        assert_eq!(producer.queued_frames(), 8);

        producer.push(buf(8, 2)).unwrap();
        assert_eq!(producer.queued_frames(), 9);
        assert_eq!(producer.queued_bytes(), 72);
    }

    #[test]
    fn test_misaligned_push_rejected() {
        let (producer, _consumer) = frame_queue(16, 8);

        let err = producer.push(buf(12, 0)).unwrap_err();
        assert!(matches!(err, QueueError::Misaligned { size: 12, stride: 8 }));

        let err = producer.push(Bytes::new()).unwrap_err();
        assert!(matches!(err, QueueError::Misaligned { size: 0, .. }));

        assert_eq!(producer.queued_frames(), 0);
    }

    #[test]
    fn test_full_queue_rejected() {
        let (producer, _consumer) = frame_queue(2, 8);
        producer.push(buf(8, 0)).unwrap();
        producer.push(buf(8, 0)).unwrap();

        let err = producer.push(buf(8, 0)).unwrap_err();
        assert!(matches!(err, QueueError::Full { slots: 2 }));
    }

    #[test]
    fn test_drain_zero_fills_shortfall() {
        let (producer, mut consumer) = frame_queue(16, 8);
        producer.push(buf(16, 7)).unwrap();

        let mut dest = [0xffu8; 40];
        let real = consumer.drain(&mut dest);

        assert_eq!(real, 16);
        assert!(dest[..16].iter().all(|&b| b == 7));
        assert!(dest[16..].iter().all(|&b| b == 0));
        assert_eq!(consumer.queued_bytes(), 0);
    }

    #[test]
    fn test_drain_spans_buffers_and_keeps_cursor() {
        // Push 400 + 400 + 200 bytes at stride 8, drain 900: buffers 1-2
        // fully consumed plus 100 bytes of buffer 3, 100 bytes remain and
        // the partial frame at the cursor is not counted.
        let (producer, mut consumer) = frame_queue(16, 8);
        producer.push(buf(400, 1)).unwrap();
        producer.push(buf(400, 2)).unwrap();
        producer.push(buf(200, 3)).unwrap();
        assert_eq!(producer.queued_frames(), 125);

        let mut dest = vec![0u8; 900];
        let real = consumer.drain(&mut dest);

        assert_eq!(real, 900);
        assert!(dest[..400].iter().all(|&b| b == 1));
        assert!(dest[400..800].iter().all(|&b| b == 2));
        assert!(dest[800..].iter().all(|&b| b == 3));

        assert_eq!(consumer.queued_bytes(), 100);
        assert_eq!(consumer.queued_frames(), 12);

        // The retained tail of buffer 3 comes out on the next drain
        let mut rest = vec![0u8; 100];
        assert_eq!(consumer.drain(&mut rest), 100);
        assert!(rest.iter().all(|&b| b == 3));
        assert_eq!(consumer.queued_frames(), 0);
    }

    #[test]
    fn test_drain_empty_queue_is_all_silence() {
        let (_producer, mut consumer) = frame_queue(4, 8);
        let mut dest = [0xaau8; 64];
        assert_eq!(consumer.drain(&mut dest), 0);
        assert!(dest.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_cross_thread_drain() {
        let (producer, mut consumer) = frame_queue(64, 4);
        for i in 0..32 {
            producer.push(buf(64, i as u8)).unwrap();
        }

        let handle = std::thread::spawn(move || {
            let mut total = 0;
            let mut dest = [0u8; 48];
            while total < 32 * 64 {
                total += consumer.drain(&mut dest);
            }
            total
        });

        assert_eq!(handle.join().unwrap(), 32 * 64);
        assert_eq!(producer.queued_bytes(), 0);
    }

    proptest! {
        #[test]
        fn prop_push_drain_conserves_bytes(
            sizes in prop::collection::vec(1usize..32, 1..16),
            drain_len in 1usize..2048,
        ) {
            let (producer, mut consumer) = frame_queue(16, 8);
            let mut pushed = 0;
            for s in sizes {
                producer.push(buf(s * 8, 5)).unwrap();
                pushed += s * 8;
            }

            let mut dest = vec![0u8; drain_len];
            let real = consumer.drain(&mut dest);

            prop_assert_eq!(real, pushed.min(drain_len));
            prop_assert_eq!(consumer.queued_bytes(), pushed - real);
            prop_assert!(dest[real..].iter().all(|&b| b == 0));
        }
    }
}
