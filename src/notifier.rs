//! Event-count used to park idle workers.
//!
//! The primitive lets a worker atomically "check for work, then sleep"
//! without losing a wakeup that races with the check. A worker first
//! publishes its intent to wait ([`Notifier::prepare_wait`]), re-checks its
//! condition, and only then commits to sleeping ([`Notifier::wait`]). Any
//! notification issued after the intent was published invalidates the token,
//! so the commit returns immediately instead of sleeping through it.

use std::sync::{Condvar, Mutex};

/// Epoch token returned by [`Notifier::prepare_wait`].
///
/// The token captures the notification epoch at the time intent-to-wait was
/// published. It is consumed by [`Notifier::wait`] or abandoned with
/// [`Notifier::cancel_wait`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct WaitToken(u64);

/// A condvar-backed event count.
pub(crate) struct Notifier {
    epoch: Mutex<u64>,
    waiters: Condvar,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        Notifier {
            epoch: Mutex::new(0),
            waiters: Condvar::new(),
        }
    }

    /// Publishes intent to wait and returns the current epoch.
    ///
    /// Taking the lock here orders this call with any notifier that has
    /// already published work: either the re-check that follows sees the
    /// work, or the notification lands on a later epoch and `wait` returns
    /// immediately.
    pub(crate) fn prepare_wait(&self) -> WaitToken {
        WaitToken(*self.epoch.lock().unwrap())
    }

    /// Abandons a previously published intent to wait.
    ///
    /// With a condvar backing there is no waiter registration to undo; the
    /// token simply goes stale. The call is kept so every `prepare_wait` is
    /// visibly paired with either a `wait` or a `cancel_wait`.
    pub(crate) fn cancel_wait(&self, _token: WaitToken) {}

    /// Blocks until a notification with an epoch newer than `token` arrives.
    ///
    /// Returns immediately if one already has. Spurious condvar wakeups are
    /// absorbed by re-checking the epoch.
    pub(crate) fn wait(&self, token: WaitToken) {
        let mut epoch = self.epoch.lock().unwrap();
        while *epoch == token.0 {
            epoch = self.waiters.wait(epoch).unwrap();
        }
    }

    /// Wakes at most one worker whose intent predates this call.
    pub(crate) fn notify_one(&self) {
        let mut epoch = self.epoch.lock().unwrap();
        *epoch = epoch.wrapping_add(1);
        self.waiters.notify_one();
    }

    /// Wakes every worker whose intent predates this call.
    pub(crate) fn notify_all(&self) {
        let mut epoch = self.epoch.lock().unwrap();
        *epoch = epoch.wrapping_add(1);
        self.waiters.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn stale_token_returns_immediately() {
        let notifier = Notifier::new();
        let token = notifier.prepare_wait();
        notifier.notify_one();
        // The notification postdates the token, so this must not block.
        notifier.wait(token);
    }

    #[test]
    fn cancel_then_reprepare() {
        let notifier = Notifier::new();
        let token = notifier.prepare_wait();
        notifier.cancel_wait(token);
        notifier.notify_all();
        let token = notifier.prepare_wait();
        notifier.notify_one();
        notifier.wait(token);
    }

    #[test]
    fn wakes_blocked_waiter() {
        let notifier = Arc::new(Notifier::new());
        let waiter = {
            let notifier = Arc::clone(&notifier);
            thread::spawn(move || {
                let token = notifier.prepare_wait();
                notifier.wait(token);
            })
        };
        // Give the waiter a moment to actually block, then wake it.
        thread::sleep(Duration::from_millis(50));
        notifier.notify_all();
        waiter.join().unwrap();
    }

    #[test]
    fn notify_without_waiters_is_harmless() {
        let notifier = Notifier::new();
        notifier.notify_one();
        notifier.notify_all();
        let token = notifier.prepare_wait();
        notifier.notify_one();
        notifier.wait(token);
    }
}
