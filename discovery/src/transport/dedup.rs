use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

type Fingerprint = [u8; 32];

/// Remembers recently received payloads so repeated announcements are only
/// delivered once.
#[derive(Debug)]
pub(crate) struct RecentMessages {
    threshold: Duration,
    capacity: usize,
    seen: HashSet<Fingerprint>,
    // Oldest entry at the front
    order: VecDeque<(Fingerprint, Instant)>,
}

impl RecentMessages {
    pub fn new(threshold: Duration, capacity: usize) -> Self {
        Self {
            threshold,
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns true if `message` was already seen within the threshold,
    /// otherwise records it.
    pub fn is_duplicate(&mut self, message: &str, now: Instant) -> bool {
        if self.threshold.is_zero() || self.capacity == 0 {
            return false;
        }

        while let Some((fingerprint, expires)) = self.order.front() {
            if *expires > now {
                break;
            }

            self.seen.remove(fingerprint);
            self.order.pop_front();
        }

        let fingerprint: Fingerprint = Sha256::digest(message.as_bytes()).into();
        if self.seen.contains(&fingerprint) {
            return true;
        }

        self.seen.insert(fingerprint);
        self.order.push_back((fingerprint, now + self.threshold));

        if self.order.len() > self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        false
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}
