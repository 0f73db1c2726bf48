//! Rotating "featured books" carousel.
//!
//! A [`CarouselSession`] holds a frozen random sample of catalogue positions
//! and a current position that wraps modulo the sample length. It advances
//! when the configured interval has elapsed since the last advance, or
//! immediately on explicit navigation. Navigation restarts the interval, so
//! a manual step is never followed by a timer step inside the same window.
//!
//! The session never reads the clock itself; every transition takes `now`.
//! This keeps the timer/navigation interplay deterministic under test.

pub mod ticker;

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SAMPLE_SIZE: usize = 20;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL: Duration = Duration::from_millis(250);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CarouselError {
    #[error("cannot start a carousel over an empty catalogue")]
    EmptyCatalogue,
    #[error("carousel sample size must be > 0")]
    ZeroSampleSize,
    #[error("carousel position {position} is outside the catalogue (len {catalogue_len})")]
    PositionOutOfRange { position: usize, catalogue_len: usize },
}

/// Explicit user navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Navigation {
    Next,
    Previous,
}

/// How a carousel position change came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvanceCause {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarouselConfig {
    pub sample_size: usize,
    pub interval: Duration,
    /// How often a ticker checks whether the interval has elapsed.
    pub poll: Duration,
}

impl Default for CarouselConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            interval: DEFAULT_INTERVAL,
            poll: DEFAULT_POLL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CarouselSession {
    sampled: Vec<usize>,
    position: usize,
    interval: Duration,
    last_advance: Instant,
}

impl CarouselSession {
    /// Sample `min(sample_size, catalogue_len)` positions without replacement.
    pub fn new<R: Rng + ?Sized>(
        catalogue_len: usize,
        config: &CarouselConfig,
        rng: &mut R,
        now: Instant,
    ) -> Result<Self, CarouselError> {
        if catalogue_len == 0 {
            return Err(CarouselError::EmptyCatalogue);
        }
        if config.sample_size == 0 {
            return Err(CarouselError::ZeroSampleSize);
        }
        let amount = config.sample_size.min(catalogue_len);
        let sampled = rand::seq::index::sample(rng, catalogue_len, amount).into_vec();
        Ok(Self {
            sampled,
            position: 0,
            interval: config.interval,
            last_advance: now,
        })
    }

    /// Start from an explicit sample, e.g. a fixed showcase list.
    pub fn from_sample(
        sampled: Vec<usize>,
        catalogue_len: usize,
        interval: Duration,
        now: Instant,
    ) -> Result<Self, CarouselError> {
        if sampled.is_empty() {
            return Err(CarouselError::EmptyCatalogue);
        }
        if let Some(&position) = sampled.iter().find(|&&p| p >= catalogue_len) {
            return Err(CarouselError::PositionOutOfRange {
                position,
                catalogue_len,
            });
        }
        Ok(Self {
            sampled,
            position: 0,
            interval,
            last_advance: now,
        })
    }

    /// Catalogue position of the book currently shown.
    pub fn current(&self) -> usize {
        self.sampled[self.position]
    }

    /// Index into the sample, in `[0, len)`.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.sampled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sampled.is_empty()
    }

    pub fn sampled(&self) -> &[usize] {
        &self.sampled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advance if more than `interval` has passed since the last advance.
    ///
    /// Returns true when the position moved.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_advance) > self.interval {
            self.step_forward();
            self.last_advance = now;
            true
        } else {
            false
        }
    }

    pub fn next(&mut self, now: Instant) -> usize {
        self.step_forward();
        self.last_advance = now;
        self.current()
    }

    pub fn previous(&mut self, now: Instant) -> usize {
        let len = self.sampled.len();
        self.position = (self.position + len - 1) % len;
        self.last_advance = now;
        self.current()
    }

    pub fn apply(&mut self, nav: Navigation, now: Instant) -> usize {
        match nav {
            Navigation::Next => self.next(now),
            Navigation::Previous => self.previous(now),
        }
    }

    /// Time left before the timer would fire; zero once it is due.
    pub fn time_until_advance(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.last_advance))
    }

    fn step_forward(&mut self) {
        self.position = (self.position + 1) % self.sampled.len();
    }
}
