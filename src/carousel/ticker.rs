//! Background clock that drives carousel timer transitions.
//!
//! The ticker wakes every `poll` period, locks the shared session state and
//! calls [`CarouselSession::poll`]. Manual navigation takes the same lock,
//! so a timer step and a manual step can never interleave on one session.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::CarouselSession;

impl AsMut<CarouselSession> for CarouselSession {
    fn as_mut(&mut self) -> &mut CarouselSession {
        self
    }
}

/// Emitted after a timer-driven advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickEvent {
    /// Index into the sampled list.
    pub position: usize,
    /// Catalogue position of the book now shown.
    pub book: usize,
}

/// Handle to a running ticker thread. Dropping it stops the thread.
pub struct CarouselTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CarouselTicker {
    /// Spawn a ticker over `state`.
    ///
    /// `on_advance` runs outside the lock; returning `false` stops the ticker
    /// (e.g. when the client it reports to has gone away).
    pub fn spawn<T, F>(state: Arc<Mutex<T>>, poll: Duration, mut on_advance: F) -> io::Result<Self>
    where
        T: AsMut<CarouselSession> + Send + 'static,
        F: FnMut(TickEvent) -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let ticks = crossbeam_channel::tick(poll.max(Duration::from_millis(1)));

        let handle = thread::Builder::new()
            .name("carousel-ticker".to_string())
            .spawn(move || {
                debug!(poll_ms = poll.as_millis() as u64, "carousel ticker started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticks) -> tick => {
                            let Ok(now) = tick else { break };
                            let event = {
                                let mut guard = state.lock();
                                let carousel = guard.as_mut();
                                carousel.poll(now).then(|| TickEvent {
                                    position: carousel.position(),
                                    book: carousel.current(),
                                })
                            };
                            if let Some(event) = event {
                                trace!(position = event.position, book = event.book, "carousel advanced");
                                if !on_advance(event) {
                                    break;
                                }
                            }
                        }
                    }
                }
                debug!("carousel ticker stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the stop channel wakes the select.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CarouselTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
