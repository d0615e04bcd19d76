use crate::entities::item::Serial;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_COOLDOWN_MS: u64 = 5_000;

/// Serials that are queued or popped but not yet finished.
#[derive(Debug, Default)]
pub struct DedupSet {
    serials: Mutex<HashSet<Serial>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the serial was already tracked.
    pub fn insert(&self, serial: Serial) -> bool {
        self.lock().insert(serial)
    }

    pub fn remove(&self, serial: Serial) -> bool {
        self.lock().remove(&serial)
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.lock().contains(&serial)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Serial>> {
        self.serials.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Recently processed serials.
///
/// The whole set shares one window: every insert or touch pushes the expiry
/// out, and entries are only released in bulk by `sweep` once the window has
/// passed with no work pending.
#[derive(Debug)]
pub struct CooldownSet {
    serials: Mutex<HashSet<Serial>>,
    expires_at: AtomicU64,
    window_ms: AtomicU64,
}

impl Default for CooldownSet {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MS)
    }
}

impl CooldownSet {
    pub fn new(window_ms: u64) -> Self {
        Self {
            serials: Mutex::new(HashSet::new()),
            expires_at: AtomicU64::new(0),
            window_ms: AtomicU64::new(window_ms),
        }
    }

    pub fn insert(&self, serial: Serial, now: u64) {
        self.lock().insert(serial);
        self.touch(now);
    }

    /// Restarts the shared window at `now`.
    pub fn touch(&self, now: u64) {
        let expiry = now.saturating_add(self.window_ms.load(Ordering::Relaxed));
        self.expires_at.fetch_max(expiry, Ordering::AcqRel);
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.lock().contains(&serial)
    }

    /// Clears the set when `idle` and the window has elapsed. Returns the
    /// number of serials released.
    pub fn sweep(&self, now: u64, idle: bool) -> usize {
        if !idle || now < self.expires_at.load(Ordering::Acquire) {
            return 0;
        }
        let mut serials = self.lock();
        let released = serials.len();
        serials.clear();
        released
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at.load(Ordering::Acquire)
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms.load(Ordering::Relaxed)
    }

    pub fn set_window(&self, window_ms: u64) {
        self.window_ms.store(window_ms, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Serial>> {
        self.serials.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn dedup_rejects_second_insert() {
        let set = DedupSet::new();
        assert!(set.insert(Serial(1)));
        assert!(!set.insert(Serial(1)));
        assert!(set.remove(Serial(1)));
        assert!(set.insert(Serial(1)));
    }

    #[test]
    fn dedup_is_safe_across_threads() {
        let set = Arc::new(DedupSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || (0..100).filter(|n| set.insert(Serial(*n))).count())
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .sum();
        assert_eq!(wins, 100);
        assert_eq!(set.len(), 100);
    }

    #[test]
    fn cooldown_holds_until_window_passes_while_idle() {
        let cooldown = CooldownSet::new(5_000);
        cooldown.insert(Serial(1), 1_000);
        assert_eq!(cooldown.sweep(5_999, true), 0);
        assert!(cooldown.contains(Serial(1)));
        assert_eq!(cooldown.sweep(6_000, false), 0);
        assert!(cooldown.contains(Serial(1)));
        assert_eq!(cooldown.sweep(6_000, true), 1);
        assert!(!cooldown.contains(Serial(1)));
    }

    #[test]
    fn touch_extends_shared_window() {
        let cooldown = CooldownSet::new(5_000);
        cooldown.insert(Serial(1), 0);
        cooldown.insert(Serial(2), 3_000);
        assert_eq!(cooldown.sweep(5_000, true), 0);
        cooldown.touch(4_000);
        assert_eq!(cooldown.expires_at(), 9_000);
        assert_eq!(cooldown.sweep(9_000, true), 2);
    }

    #[test]
    fn expiry_never_moves_backwards() {
        let cooldown = CooldownSet::new(1_000);
        cooldown.touch(10_000);
        cooldown.touch(2_000);
        assert_eq!(cooldown.expires_at(), 11_000);
    }
}
