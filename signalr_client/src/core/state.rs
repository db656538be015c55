//! # Connection State Machine
//!
//! `Disconnected -> Connecting -> Connected <-> Reconnecting -> Disconnected`.
//!
//! The state lives in a single atomic byte. [`AtomicConnectionState::change`]
//! is a compare-and-set: it applies only when the current value equals the
//! expected old state, which is what keeps concurrent reconnect and stop
//! paths from firing twice.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A transition that was actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub old: ConnectionState,
    pub new: ConnectionState,
}

#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `old -> new` if and only if the current state is `old`.
    pub fn change(&self, old: ConnectionState, new: ConnectionState) -> bool {
        self.0
            .compare_exchange(old.as_u8(), new.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally stores `new`, returning the previous state.
    pub fn swap(&self, new: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(new.as_u8(), Ordering::AcqRel))
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn change_applies_only_from_expected_state() {
        let state = AtomicConnectionState::default();
        assert!(!state.change(ConnectionState::Connected, ConnectionState::Reconnecting));
        assert_eq!(state.get(), ConnectionState::Disconnected);

        assert!(state.change(ConnectionState::Disconnected, ConnectionState::Connecting));
        assert_eq!(state.get(), ConnectionState::Connecting);
    }

    #[test]
    fn exactly_one_concurrent_caller_wins() {
        const CALLERS: usize = 32;
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Connected));
        let wins = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let state = Arc::clone(&state);
                let wins = Arc::clone(&wins);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if state.change(ConnectionState::Connected, ConnectionState::Reconnecting) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), ConnectionState::Reconnecting);
    }

    #[test]
    fn swap_reports_previous_state() {
        let state = AtomicConnectionState::new(ConnectionState::Reconnecting);
        assert_eq!(state.swap(ConnectionState::Disconnected), ConnectionState::Reconnecting);
        assert_eq!(state.swap(ConnectionState::Disconnected), ConnectionState::Disconnected);
    }
}
