//! Navigation seam for hard redirects

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A navigation target. `from` is the location the user was trying to reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub from: Option<String>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            from: None,
        }
    }

    #[must_use]
    pub fn from_path(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

/// Performs hard redirects on behalf of the session engine
pub trait Navigator: Send + Sync {
    fn redirect(&self, location: Location);

    /// Where the last redirect went, if anywhere
    fn location(&self) -> Option<Location>;
}

/// Navigator that remembers where it was sent
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<Location>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of redirects performed so far
    pub fn redirects(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, location: Location) {
        info!(to = %location.path, from = ?location.from, "Redirecting");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(location);
    }

    fn location(&self) -> Option<Location> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}
