//! Frame Buffer Slot
//!
//! A single-slot mailbox between the capture side and the recognition worker.
//! Publishing overwrites whatever is pending: recognition is far slower than
//! capture, so only the freshest frame matters. Buffers move by value; a
//! consumed frame comes back through [`FrameSlot::recycle`] so steady-state
//! capture reuses two allocations instead of sharing one.

use crate::frame::Frame;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Slots {
    pending: Option<Frame>,
    spare: Option<Frame>,
}

#[derive(Default)]
pub struct FrameSlot {
    slots: Mutex<Slots>,
    /// Mirrors `slots.pending.is_some()`; only written with the lock held.
    dirty: AtomicBool,
    published: Condvar,
    next_sequence: AtomicU64,
    claims: AtomicU64,
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free check for an unclaimed frame.
    pub fn has_new_frame(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Hands the producer a writable buffer, reusing the spare when its size matches.
    pub fn acquire(&self, width: u32, height: u32) -> Frame {
        let spare = self.slots.lock().spare.take();
        match spare {
            Some(frame) if frame.dimensions() == (width, height) => frame,
            _ => Frame::blank(width, height),
        }
    }

    /// Replaces the pending frame and raises the dirty flag. Returns the
    /// sequence number assigned to the frame.
    pub fn publish(&self, mut frame: Frame) -> u64 {
        let mut slots = self.slots.lock();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        frame.sequence = sequence;
        if let Some(stale) = slots.pending.replace(frame) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Frame {} superseded before it was claimed", stale.sequence);
            if slots.spare.is_none() {
                slots.spare = Some(stale);
            }
        }
        self.dirty.store(true, Ordering::Release);
        drop(slots);

        self.published.notify_one();
        sequence
    }

    /// Tests and clears the dirty flag, moving the pending frame out if it was set.
    pub fn claim(&self) -> Option<Frame> {
        if !self.has_new_frame() {
            return None;
        }
        let mut slots = self.slots.lock();
        self.take_pending(&mut slots)
    }

    /// Like [`claim`](Self::claim), but waits up to `timeout` for a publish.
    pub fn claim_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut slots = self.slots.lock();
        if slots.pending.is_none() {
            self.published.wait_for(&mut slots, timeout);
        }
        self.take_pending(&mut slots)
    }

    fn take_pending(&self, slots: &mut Slots) -> Option<Frame> {
        let frame = slots.pending.take()?;
        self.dirty.store(false, Ordering::Release);
        self.claims.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Returns a consumed buffer for reuse by the producer.
    pub fn recycle(&self, frame: Frame) {
        let mut slots = self.slots.lock();
        if slots.spare.is_none() {
            slots.spare = Some(frame);
        }
    }

    /// Drops every held buffer. Called when the capture session ends.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.pending = None;
        slots.spare = None;
        self.dirty.store(false, Ordering::Release);
    }

    /// Number of successful claims so far.
    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::Relaxed)
    }

    /// Number of frames overwritten before anyone claimed them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Arc;
    use std::thread;

    fn publish_marked(slot: &FrameSlot, mark: u8) -> u64 {
        let mut frame = slot.acquire(2, 2);
        frame.image.put_pixel(0, 0, Rgb([mark, 0, 0]));
        slot.publish(frame)
    }

    #[test]
    fn claim_returns_published_frame_once() {
        let slot = FrameSlot::new();
        assert!(slot.claim().is_none());

        let seq = publish_marked(&slot, 7);
        assert!(slot.has_new_frame());

        let frame = slot.claim().expect("frame A");
        assert_eq!(frame.sequence, seq);
        assert_eq!(frame.image.get_pixel(0, 0), &Rgb([7, 0, 0]));
        assert!(!slot.has_new_frame());
        assert!(slot.claim().is_none());
    }

    #[test]
    fn intermediate_frames_are_dropped() {
        let slot = FrameSlot::new();
        publish_marked(&slot, 1);
        publish_marked(&slot, 2);
        let last = publish_marked(&slot, 3);

        let frame = slot.claim().unwrap();
        assert_eq!(frame.sequence, last);
        assert_eq!(frame.image.get_pixel(0, 0), &Rgb([3, 0, 0]));
        assert_eq!(slot.dropped(), 2);
        assert!(slot.claim().is_none());
    }

    #[test]
    fn recycled_buffers_are_reused_when_sizes_match() {
        let slot = FrameSlot::new();
        publish_marked(&slot, 9);
        let frame = slot.claim().unwrap();
        let ptr = frame.image.as_ptr();
        slot.recycle(frame);

        let reused = slot.acquire(2, 2);
        assert_eq!(reused.image.as_ptr(), ptr);
        slot.recycle(reused);

        let resized = slot.acquire(4, 4);
        assert_eq!(resized.dimensions(), (4, 4));
    }

    #[test]
    fn clear_discards_pending_frame() {
        let slot = FrameSlot::new();
        publish_marked(&slot, 1);
        slot.clear();
        assert!(!slot.has_new_frame());
        assert!(slot.claim_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn claim_timeout_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                publish_marked(&slot, 5)
            })
        };
        let mut claimed = None;
        for _ in 0..100 {
            claimed = slot.claim_timeout(Duration::from_millis(50));
            if claimed.is_some() {
                break;
            }
        }
        let seq = producer.join().unwrap();
        assert_eq!(claimed.map(|f| f.sequence), Some(seq));
    }

    #[test]
    fn claims_never_go_backwards_under_contention() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let frame = slot.acquire(2, 2);
                    slot.publish(frame);
                }
            })
        };

        let mut last_seen = 0;
        while !producer.is_finished() || slot.has_new_frame() {
            if let Some(frame) = slot.claim() {
                assert!(frame.sequence > last_seen);
                last_seen = frame.sequence;
                slot.recycle(frame);
            }
        }
        producer.join().unwrap();
        assert!(last_seen > 0);
        assert_eq!(slot.claims() + slot.dropped(), 2_000);
    }
}
