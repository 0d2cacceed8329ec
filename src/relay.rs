//! Moves received bytes into the staging queue at main loop cadence.

use crate::queue::ByteQueue;
use crate::transport::Link;

#[derive(Debug, Default)]
pub struct Relay {
    dropped: usize,
}

impl Relay {
    pub const fn new() -> Self {
        Self { dropped: 0 }
    }

    /// Move the bytes currently waiting in the receive queue to `staging`.
    ///
    /// Bytes arriving while the pump runs are left for the next call. Bytes
    /// that do not fit in `staging` are dropped. Returns the number moved.
    pub fn pump<const RX: usize, const TX: usize, const S: usize>(
        &mut self,
        link: &mut Link<'_, RX, TX>,
        staging: &mut ByteQueue<S>,
    ) -> usize {
        let mut moved = 0;

        for _ in 0..link.received() {
            let byte = match link.try_receive() {
                Some(b) => b,
                None => break,
            };

            if staging.try_enqueue(byte) {
                moved += 1;
            } else {
                self.dropped = self.dropped.wrapping_add(1);
            }
        }

        moved
    }

    /// Bytes dropped because the staging queue was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn moves_pending_bytes_in_order() {
        let mut t = Transport::<8, 2>::new();
        let (mut isr, mut link) = t.split();
        let mut staging = ByteQueue::<8>::new();
        let mut relay = Relay::new();

        for b in b":10" {
            isr.receive.on_byte(*b);
        }

        assert_eq!(relay.pump(&mut link, &mut staging), 3);
        assert_eq!(link.received(), 0);
        assert_eq!(staging.try_dequeue(), Some(b':'));
        assert_eq!(staging.try_dequeue(), Some(b'1'));
        assert_eq!(staging.try_dequeue(), Some(b'0'));

        // Nothing pending is a no-op
        assert_eq!(relay.pump(&mut link, &mut staging), 0);
    }

    #[test]
    fn drops_when_staging_is_full() {
        let mut t = Transport::<8, 2>::new();
        let (mut isr, mut link) = t.split();
        let mut staging = ByteQueue::<2>::new();
        let mut relay = Relay::new();

        for b in b"abcd" {
            isr.receive.on_byte(*b);
        }

        assert_eq!(relay.pump(&mut link, &mut staging), 2);
        assert_eq!(relay.dropped(), 2);
        assert_eq!(link.received(), 0);
        assert_eq!(staging.try_dequeue(), Some(b'a'));
        assert_eq!(staging.try_dequeue(), Some(b'b'));
    }
}
