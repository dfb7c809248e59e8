//! Bounded count of items submitted but not yet emitted

use parking_lot::{Condvar, Mutex};

use crate::{PipelineError, Result};

#[derive(Debug, Default)]
struct WindowState {
    in_flight: usize,
    closed: bool,
}

/// In-flight window shared by the submitting thread and the reconciler
#[derive(Debug)]
pub(crate) struct InFlightWindow {
    limit: usize,
    state: Mutex<WindowState>,
    changed: Condvar,
}

impl InFlightWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(WindowState::default()),
            changed: Condvar::new(),
        }
    }

    /// Take a slot, blocking while `limit` items are in flight
    ///
    /// Returns the new in-flight count.
    pub fn acquire(&self) -> Result<usize> {
        let mut state = self.state.lock();
        while state.in_flight >= self.limit && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(PipelineError::ChannelClosed);
        }
        state.in_flight += 1;
        Ok(state.in_flight)
    }

    /// Return a slot
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Wake every waiter for good; used when the reconciler exits
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Block until nothing is in flight
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            if state.closed {
                return Err(PipelineError::ChannelClosed);
            }
            self.changed.wait(&mut state);
        }
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }
}

/// Closes the window when dropped, including on unwind
pub(crate) struct CloseOnDrop<'a>(pub &'a InFlightWindow);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let window = InFlightWindow::new(2);
        assert_eq!(window.acquire().unwrap(), 1);
        assert_eq!(window.acquire().unwrap(), 2);
        window.release();
        assert_eq!(window.in_flight(), 1);
        window.release();
        window.wait_idle().unwrap();
    }

    #[test]
    fn test_acquire_blocks_when_full() {
        let window = Arc::new(InFlightWindow::new(1));
        window.acquire().unwrap();

        let waiter = {
            let window = Arc::clone(&window);
            thread::spawn(move || window.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(window.in_flight(), 1);

        window.release();
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let window = Arc::new(InFlightWindow::new(1));
        window.acquire().unwrap();

        let waiter = {
            let window = Arc::clone(&window);
            thread::spawn(move || window.wait_idle())
        };
        {
            let _guard = CloseOnDrop(&window);
        }
        assert!(matches!(
            waiter.join().unwrap(),
            Err(PipelineError::ChannelClosed)
        ));
        assert!(window.acquire().is_err());
    }
}
