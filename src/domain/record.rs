//! Validated result records.
//!
//! A [`ResultRecord`] is only constructed through [`ResultRecord::new`],
//! which rejects blank fields and out-of-range values instead of silently
//! coercing them. Fields a source simply does not publish carry the
//! explicit [`UNAVAILABLE`] sentinel rather than an empty string.

use serde::{Deserialize, Serialize};

/// Sentinel for fields a source layout does not provide.
pub const UNAVAILABLE: &str = "Unavailable";

/// Inclusive range of years a source has published results for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub min: u16,
    pub max: u16,
}

impl YearRange {
    #[must_use]
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn contains(&self, year: u16) -> bool {
        year >= self.min && year <= self.max
    }
}

/// Raw field values gathered by the extraction pipeline, before validation.
///
/// All cell values are still strings here; parsing and range checks happen
/// in [`ResultRecord::new`] so transforms can work on partially-formed text.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub source_id: String,
    pub year: u16,
    pub category: Option<String>,
    pub place: String,
    pub age: String,
    pub gender: String,
    pub nationality: String,
    pub finish_time: String,
    pub split_time: String,
    pub affiliation: String,
}

/// One validated harvested entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub source_id: String,
    pub year: u16,
    pub category: Option<String>,
    pub place: u32,
    pub age: String,
    pub gender: String,
    pub nationality: String,
    pub finish_time: String,
    pub split_time: String,
    pub affiliation: String,
}

impl ResultRecord {
    /// Validating factory. Fails instead of coercing: blank required fields,
    /// a non-positive place, or a year outside the source's supported range
    /// all reject the draft.
    pub fn new(draft: RecordDraft, years: &YearRange) -> Result<Self, RecordError> {
        let source_id = non_blank("source_id", &draft.source_id)?;
        let age = non_blank("age", &draft.age)?;
        let gender = non_blank("gender", &draft.gender)?;
        let nationality = non_blank("nationality", &draft.nationality)?;
        let finish_time = non_blank("finish_time", &draft.finish_time)?;
        let split_time = non_blank("split_time", &draft.split_time)?;
        let affiliation = non_blank("affiliation", &draft.affiliation)?;

        let place_text = draft.place.trim();
        let place: u32 = place_text
            .parse()
            .map_err(|_| RecordError::InvalidPlace(draft.place.clone()))?;
        if place == 0 {
            return Err(RecordError::InvalidPlace(draft.place.clone()));
        }

        if !years.contains(draft.year) {
            return Err(RecordError::YearOutOfRange {
                year: draft.year,
                min: years.min,
                max: years.max,
            });
        }

        Ok(Self {
            source_id,
            year: draft.year,
            category: draft.category.filter(|c| !c.trim().is_empty()),
            place,
            age,
            gender,
            nationality,
            finish_time,
            split_time,
            affiliation,
        })
    }

    /// Category as stored in the completion key (`""` when uncategorized).
    #[must_use]
    pub fn category_key(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<String, RecordError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RecordError::BlankField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Record construction failures. These are row-level defects: the caller
/// logs them and drops the row, harvesting continues.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("required field '{0}' is blank")]
    BlankField(&'static str),

    #[error("place '{0}' is not a positive integer")]
    InvalidPlace(String),

    #[error("year {year} outside supported range {min}..={max}")]
    YearOutOfRange { year: u16, min: u16, max: u16 },
}
