//! Backoff wait for transient states
//!
//! A caller that finds a vnode under construction or teardown spins on that
//! vnode's own state word instead of re-taking the global cache lock. Each
//! round doubles the spin count up to a ceiling and then calls the policy's
//! relax hook, which a hosted kernel points at its scheduler yield.

use core::fmt;

/// Upper bound on spin iterations per round
const MAX_BACKOFF: usize = 256;

/// How long and how politely to wait for a condition
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// Rounds to wait before giving up; `None` waits forever
    pub max_rounds: Option<u32>,
    /// Called once per round after spinning
    pub relax: fn(),
}

fn spin_relax() {
    core::hint::spin_loop();
}

impl WaitPolicy {
    /// Wait until the condition holds, however long that takes
    pub const fn unbounded() -> Self {
        Self {
            max_rounds: None,
            relax: spin_relax,
        }
    }

    /// Give up after `rounds` rounds
    pub const fn bounded(rounds: u32) -> Self {
        Self {
            max_rounds: Some(rounds),
            relax: spin_relax,
        }
    }

    pub const fn with_relax(mut self, relax: fn()) -> Self {
        self.relax = relax;
        self
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// The condition did not become true within the policy's bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimedOut;

impl fmt::Display for WaitTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait timed out")
    }
}

/// Wait until `ready` returns true, with exponential backoff
pub fn wait_until(policy: &WaitPolicy, mut ready: impl FnMut() -> bool) -> Result<(), WaitTimedOut> {
    let mut backoff = 1;
    let mut rounds: u32 = 0;

    loop {
        if ready() {
            return Ok(());
        }

        if let Some(max) = policy.max_rounds {
            if rounds >= max {
                return Err(WaitTimedOut);
            }
        }
        rounds = rounds.saturating_add(1);

        for _ in 0..backoff {
            core::hint::spin_loop();
        }
        (policy.relax)();

        if backoff < MAX_BACKOFF {
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ready_immediately() {
        let mut calls = 0;
        let result = wait_until(&WaitPolicy::bounded(0), || {
            calls += 1;
            true
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_bounded_gives_up() {
        let mut calls = 0;
        let result = wait_until(&WaitPolicy::bounded(5), || {
            calls += 1;
            false
        });
        assert_eq!(result, Err(WaitTimedOut));
        assert_eq!(calls, 6);
    }

    #[test]
    fn test_unbounded_sees_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = flag.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
            })
        };

        let policy = WaitPolicy::unbounded().with_relax(std::thread::yield_now);
        assert!(wait_until(&policy, || flag.load(Ordering::SeqCst)).is_ok());
        setter.join().unwrap();
    }
}
