// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background timer threads with cooperative shutdown.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

/// Owns a timer thread and its stop channel.
///
/// Dropping the handle (or calling [`TimerHandle::stop`]) drops the sender,
/// which wakes the thread's `recv_timeout` with `Disconnected`, then joins it.
/// A timer that stops its own handle (e.g. a resend callback pushing onto
/// the same queue) detaches instead of joining itself. [`TimerHandle::cancel`]
/// signals without joining, for stops issued from a sibling timer.
pub(crate) struct TimerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Spawn a named timer thread. `body` receives the stop receiver.
    pub(crate) fn spawn<F>(name: &str, body: F) -> Option<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop_rx))
        {
            Ok(thread) => Some(Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Err(e) => {
                log::error!("[timer] failed to spawn {} thread: {}", name, e);
                None
            }
        }
    }

    /// Whether the thread is still running.
    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Whether the timer runs on the calling thread.
    pub(crate) fn is_current(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == thread::current().id())
    }

    /// Signal the thread to stop without waiting for it.
    pub(crate) fn cancel(&mut self) {
        drop(self.stop_tx.take());
        drop(self.thread.take());
    }

    /// Signal the thread to stop and wait for it to finish.
    pub(crate) fn stop(&mut self) {
        // Disconnect first so a sleeping thread wakes up.
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::RecvTimeoutError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_stop_wakes_sleeping_thread() {
        let woke = Arc::new(AtomicBool::new(false));
        let woke_clone = Arc::clone(&woke);
        let mut timer = TimerHandle::spawn("bidcos-test", move |stop_rx| {
            if let Err(RecvTimeoutError::Disconnected) = stop_rx.recv_timeout(Duration::from_secs(30)) {
                woke_clone.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

        let start = Instant::now();
        timer.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(woke.load(Ordering::SeqCst));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_timeout_elapses() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let timer = TimerHandle::spawn("bidcos-test", move |stop_rx| {
            if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(Duration::from_millis(10)) {
                fired_clone.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
        drop(timer);
    }
}
