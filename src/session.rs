//! Per-connection session state.
//!
//! Each client gets its own [`SessionContext`] holding its carousel and the
//! last search result set. Contexts are never shared between sessions; the
//! [`SessionRegistry`] only tracks which ones are alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::carousel::{CarouselSession, Navigation};
use crate::search::query::{SearchHit, SearchResultSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug)]
pub struct SessionContext {
    id: SessionId,
    started_at: Instant,
    carousel: CarouselSession,
    results: Option<SearchResultSet>,
}

impl SessionContext {
    pub fn new(id: SessionId, carousel: CarouselSession, now: Instant) -> Self {
        Self {
            id,
            started_at: now,
            carousel,
            results: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn carousel(&self) -> &CarouselSession {
        &self.carousel
    }

    pub fn carousel_mut(&mut self) -> &mut CarouselSession {
        &mut self.carousel
    }

    pub fn results(&self) -> Option<&SearchResultSet> {
        self.results.as_ref()
    }

    /// Replace the cached result set; a new search resets browsing.
    pub fn set_results(&mut self, results: SearchResultSet) {
        self.results = Some(results);
    }

    pub fn clear_results(&mut self) {
        self.results = None;
    }

    /// Move the result cursor. Clamped at both ends; `None` when nothing is cached.
    pub fn browse_results(&mut self, nav: Option<Navigation>) -> Option<&SearchHit> {
        let results = self.results.as_mut()?;
        match nav {
            Some(Navigation::Next) => {
                results.next();
            }
            Some(Navigation::Previous) => {
                results.previous();
            }
            None => {}
        }
        results.current()
    }
}

impl AsMut<CarouselSession> for SessionContext {
    fn as_mut(&mut self) -> &mut CarouselSession {
        &mut self.carousel
    }
}

pub type SharedSession = Arc<Mutex<SessionContext>>;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session around `carousel`.
    pub fn open(&self, carousel: CarouselSession, now: Instant) -> SharedSession {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let ctx = Arc::new(Mutex::new(SessionContext::new(id, carousel, now)));
        self.sessions.lock().insert(id, ctx.clone());
        ctx
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn close(&self, id: SessionId) -> bool {
        self.sessions.lock().remove(&id).is_some()
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }
}
