use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Free-text meal notes for calendar days. Lives in memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealPlan {
    notes: BTreeMap<NaiveDate, String>,
}

/// One calendar day and its note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayNote {
    pub date: NaiveDate,
    pub note: String,
}

impl MealPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the note for a day. A blank note clears the day.
    pub fn set_note(&mut self, date: NaiveDate, note: impl Into<String>) {
        let note = note.into();
        if note.trim().is_empty() {
            self.notes.remove(&date);
        } else {
            self.notes.insert(date, note);
        }
    }

    pub fn note(&self, date: NaiveDate) -> Option<&str> {
        self.notes.get(&date).map(String::as_str)
    }

    /// Remove the note for a day, returning it if there was one
    pub fn clear(&mut self, date: NaiveDate) -> Option<String> {
        self.notes.remove(&date)
    }

    /// Notes from `from` to `to`, both inclusive, in date order
    pub fn notes_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<DayNote> {
        if from > to {
            return vec![];
        }
        self.notes
            .range(from..=to)
            .map(|(date, note)| DayNote {
                date: *date,
                note: note.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
