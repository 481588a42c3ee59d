//! Pending-local-change flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Records "local data is dirty since the last successful push".
///
/// Set by any mutating operation on local data; cleared only after a
/// confirmed remote write. A mutation landing while a cycle is in flight
/// re-sets the flag and rides the next cycle; the cycle clears the flag
/// only for marks it actually captured in its snapshot.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    dirty: AtomicBool,
    marked_at: Mutex<Option<DateTime<Utc>>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        if let Ok(mut marked_at) = self.marked_at.lock() {
            *marked_at = Some(Utc::now());
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn marked_at(&self) -> Option<DateTime<Utc>> {
        self.marked_at.lock().ok().and_then(|guard| *guard)
    }

    pub fn reset(&self) {
        if let Ok(mut marked_at) = self.marked_at.lock() {
            self.dirty.store(false, Ordering::SeqCst);
            *marked_at = None;
        }
    }

    /// Clear the flag unless a mark landed after `cutoff`.
    ///
    /// A sync cycle passes the instant it collected its local snapshot:
    /// marks from before that instant are covered by the push it just
    /// confirmed, marks from after it are not and must stay dirty.
    pub fn reset_if_marked_before(&self, cutoff: DateTime<Utc>) {
        if let Ok(mut marked_at) = self.marked_at.lock() {
            match *marked_at {
                Some(at) if at > cutoff => {}
                _ => {
                    self.dirty.store(false, Ordering::SeqCst);
                    *marked_at = None;
                }
            }
        }
    }
}
