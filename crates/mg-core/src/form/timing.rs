//! Minimum fill-time check.
//!
//! Load times are keyed by [`FormId`]; entries live until the form is
//! forgotten explicitly. A submit with no recorded load time is allowed,
//! since it means tracking was skipped rather than that a bot was seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::model::FormId;
use crate::clock::Clock;

pub struct FormTimingTracker {
    clock: Arc<dyn Clock>,
    min_fill: Duration,
    loads: Mutex<HashMap<FormId, DateTime<Utc>>>,
}

impl FormTimingTracker {
    pub fn new(min_fill: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            min_fill,
            loads: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_fill(&self) -> Duration {
        self.min_fill
    }

    /// Record (or refresh) the load time of `id` as now.
    pub fn track_form_load(&self, id: &FormId) {
        self.track_form_load_at(id, self.clock.now());
    }

    pub fn track_form_load_at(&self, id: &FormId, loaded_at: DateTime<Utc>) {
        debug!(form = %id, "Tracking form load");
        self.loads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), loaded_at);
    }

    /// False if the form is being submitted sooner than the minimum fill time.
    pub fn check_form_timing(&self, id: &FormId) -> bool {
        self.time_remaining(id).is_none()
    }

    /// How much longer the visitor should have spent on the form, if too fast.
    pub fn time_remaining(&self, id: &FormId) -> Option<Duration> {
        let loaded_at = self.loaded_at(id)?;
        let elapsed = self.clock.now() - loaded_at;
        if elapsed < self.min_fill {
            Some(self.min_fill - elapsed)
        } else {
            None
        }
    }

    pub fn loaded_at(&self, id: &FormId) -> Option<DateTime<Utc>> {
        self.loads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .copied()
    }

    /// Drop the entry for a disposed form.
    pub fn forget(&self, id: &FormId) {
        self.loads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }

    pub fn tracked(&self) -> usize {
        self.loads.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl std::fmt::Debug for FormTimingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormTimingTracker")
            .field("min_fill", &self.min_fill)
            .field("tracked", &self.tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (FormTimingTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            FormTimingTracker::new(Duration::milliseconds(3000), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_too_fast_rejected() {
        let (tracker, clock) = tracker();
        let id = FormId::new("contact");
        tracker.track_form_load(&id);
        clock.advance(Duration::milliseconds(2999));
        assert!(!tracker.check_form_timing(&id));
        assert_eq!(tracker.time_remaining(&id), Some(Duration::milliseconds(1)));
    }

    #[test]
    fn test_at_threshold_accepted() {
        let (tracker, clock) = tracker();
        let id = FormId::new("contact");
        tracker.track_form_load(&id);
        clock.advance(Duration::milliseconds(3000));
        assert!(tracker.check_form_timing(&id));
    }

    #[test]
    fn test_untracked_form_allowed() {
        let (tracker, _clock) = tracker();
        assert!(tracker.check_form_timing(&FormId::new("never-seen")));
    }

    #[test]
    fn test_refresh_rearms() {
        let (tracker, clock) = tracker();
        let id = FormId::new("contact");
        tracker.track_form_load(&id);
        clock.advance(Duration::seconds(10));
        assert!(tracker.check_form_timing(&id));
        tracker.track_form_load(&id);
        assert!(!tracker.check_form_timing(&id));
    }

    #[test]
    fn test_forget() {
        let (tracker, _clock) = tracker();
        let id = FormId::new("contact");
        tracker.track_form_load(&id);
        assert_eq!(tracker.tracked(), 1);
        tracker.forget(&id);
        assert_eq!(tracker.tracked(), 0);
        assert!(tracker.check_form_timing(&id));
    }
}
