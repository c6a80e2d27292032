//! Keeps the remote device awake for as long as any session needs it.
//! Several `ScrcpySession`s can share one process; a plain acquire/release
//! pair would let one session's teardown turn off the wake-lock for a
//! session still running, so holds are counted.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct PowerCoordinator {
    holds: Mutex<HashMap<String, u32>>,
}

impl PowerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a given session acquires a hold,
    /// meaning the caller should actually assert wake-lock now.
    pub fn acquire(&self, session_id: &str) -> bool {
        let mut holds = self.holds.lock().unwrap();
        let count = holds.entry(session_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` when the count for `session_id` drops to zero,
    /// meaning the caller should release wake-lock now.
    pub fn release(&self, session_id: &str) -> bool {
        let mut holds = self.holds.lock().unwrap();
        match holds.get_mut(session_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                holds.remove(session_id);
                true
            }
            None => false,
        }
    }

    pub fn hold_count(&self, session_id: &str) -> u32 {
        *self.holds.lock().unwrap().get(session_id).unwrap_or(&0)
    }

    pub fn active_sessions(&self) -> usize {
        self.holds.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_and_last_release_toggle() {
        let coord = PowerCoordinator::new();
        assert!(coord.acquire("a"));
        assert!(!coord.acquire("a"));
        assert!(!coord.release("a"));
        assert!(coord.release("a"));
        assert_eq!(coord.hold_count("a"), 0);
    }

    #[test]
    fn sessions_are_independent() {
        let coord = PowerCoordinator::new();
        assert!(coord.acquire("a"));
        assert!(coord.acquire("b"));
        assert_eq!(coord.active_sessions(), 2);
        assert!(coord.release("a"));
        assert_eq!(coord.active_sessions(), 1);
    }

    #[test]
    fn release_without_acquire_is_a_noop() {
        let coord = PowerCoordinator::new();
        assert!(!coord.release("ghost"));
    }
}
