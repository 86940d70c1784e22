use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use pk::planner::{DayNote, MealPlan};

/// Each signed-in user's meal plan, kept in memory only
#[derive(Clone, Default)]
pub struct Calendars {
    plans: Arc<DashMap<String, MealPlan>>,
}

impl Calendars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a day's note. A blank note clears the day.
    pub fn set_note(&self, uid: &str, date: NaiveDate, note: &str) {
        self.plans
            .entry(uid.to_string())
            .or_default()
            .set_note(date, note);
    }

    pub fn note(&self, uid: &str, date: NaiveDate) -> Option<String> {
        self.plans
            .get(uid)
            .and_then(|plan| plan.note(date).map(str::to_string))
    }

    pub fn clear(&self, uid: &str, date: NaiveDate) -> Option<String> {
        self.plans.get_mut(uid).and_then(|mut plan| plan.clear(date))
    }

    pub fn notes_between(&self, uid: &str, from: NaiveDate, to: NaiveDate) -> Vec<DayNote> {
        self.plans
            .get(uid)
            .map(|plan| plan.notes_between(from, to))
            .unwrap_or_default()
    }
}
