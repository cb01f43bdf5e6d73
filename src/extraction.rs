//! Row extraction pipeline.
//!
//! Turns one raw table row (text cells plus their HTML twins) into a
//! validated [`ResultRecord`], steered by the descriptor's [`ColumnMap`].
//! A row either fully succeeds or is rejected with an error — extraction
//! never continues with partial data for a row.

pub mod transforms;

use tracing::warn;

use crate::domain::{
    FieldSpec, PageDescriptor, RecordDraft, RecordError, ResultRecord, UNAVAILABLE,
};
use crate::driver::TableRow;

/// Extraction failures for a single row.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Merged age/gender column configured without a split function. This
    /// is an adapter bug, not a data problem, so it fails loudly.
    #[error("merged age/gender column at index {index} has no split function")]
    MissingSplitFn { index: i32 },

    #[error("split function rejected merged age/gender value '{value}'")]
    SplitFailed { value: String },

    #[error("column {index} for '{field}' out of bounds (row has {len} cells)")]
    ColumnOutOfBounds {
        field: &'static str,
        index: i32,
        len: usize,
    },

    #[error("transform for '{field}' failed: {source}")]
    Transform {
        field: &'static str,
        source: anyhow::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Extract and validate one row according to the descriptor's column map.
///
/// Fields mapped to index -1 resolve to the [`UNAVAILABLE`] sentinel, except
/// gender, which first falls back to the page's category context (a
/// per-page gender division when rows do not carry one).
pub fn extract_row(
    descriptor: &PageDescriptor,
    row: &TableRow,
) -> Result<ResultRecord, ExtractError> {
    let map = &descriptor.column_map;

    let (gender, age) = if map.age_gender.is_absent() {
        let age = cell_value(row, &map.age, "age")?.unwrap_or_else(|| UNAVAILABLE.to_string());
        let gender = match cell_value(row, &map.gender, "gender")? {
            Some(value) => value,
            None => descriptor
                .category
                .clone()
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
        };
        (gender, age)
    } else {
        let split = map
            .split_age_gender
            .as_ref()
            .ok_or(ExtractError::MissingSplitFn {
                index: map.age_gender.index,
            })?;
        let merged = cell_value(row, &map.age_gender, "age_gender")?.unwrap_or_default();
        split(&merged).ok_or_else(|| ExtractError::SplitFailed {
            value: merged.clone(),
        })?
    };

    let draft = RecordDraft {
        source_id: descriptor.source_id.clone(),
        year: descriptor.year,
        category: descriptor.category.clone(),
        place: cell_value(row, &map.place, "place")?.unwrap_or_default(),
        age,
        gender,
        nationality: cell_or_sentinel(row, &map.nationality, "nationality")?,
        finish_time: cell_or_sentinel(row, &map.finish_time, "finish_time")?,
        split_time: cell_or_sentinel(row, &map.split_time, "split_time")?,
        affiliation: cell_or_sentinel(row, &map.affiliation, "affiliation")?,
    };

    ResultRecord::new(draft, &descriptor.year_range).map_err(ExtractError::from)
}

/// Like [`extract_row`], but logs the offending row before propagating, so
/// callers in the page loop can simply count and drop.
pub fn extract_row_logged(
    descriptor: &PageDescriptor,
    row: &TableRow,
) -> Result<ResultRecord, ExtractError> {
    extract_row(descriptor, row).map_err(|error| {
        warn!(
            job = %descriptor.job_key(),
            row = ?row.text,
            %error,
            "row extraction failed, dropping row"
        );
        error
    })
}

/// Raw-or-transformed value for a field; `None` when absent from the layout.
fn cell_value(
    row: &TableRow,
    spec: &FieldSpec,
    field: &'static str,
) -> Result<Option<String>, ExtractError> {
    if spec.is_absent() {
        return Ok(None);
    }
    let index = spec.index as usize;
    let cells = if spec.from_html { &row.html } else { &row.text };
    let raw = cells.get(index).ok_or(ExtractError::ColumnOutOfBounds {
        field,
        index: spec.index,
        len: cells.len(),
    })?;
    let value = match &spec.transform {
        Some(transform) => {
            transform(raw).map_err(|source| ExtractError::Transform { field, source })?
        }
        None => raw.clone(),
    };
    Ok(Some(value))
}

fn cell_or_sentinel(
    row: &TableRow,
    spec: &FieldSpec,
    field: &'static str,
) -> Result<String, ExtractError> {
    Ok(cell_value(row, spec, field)?
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNAVAILABLE.to_string()))
}
