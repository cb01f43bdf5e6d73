//! Stock cell transforms shared by source adapters.
//!
//! Adapters are free to supply their own closures; these cover the common
//! cases so most column maps can be assembled from building blocks.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{CellTransform, SplitAgeGender};

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static LETTER_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)[\s\-]*(\d+)\s*$").expect("static regex"));

/// Trim and collapse internal whitespace.
#[must_use]
pub fn trim_clean() -> CellTransform {
    Arc::new(|raw| Ok(raw.split_whitespace().collect::<Vec<_>>().join(" ")))
}

/// Remove markup tags, then trim. For text cells polluted with inline HTML.
#[must_use]
pub fn strip_tags() -> CellTransform {
    Arc::new(|raw| {
        let stripped = TAG.replace_all(raw, "");
        Ok(stripped.split_whitespace().collect::<Vec<_>>().join(" "))
    })
}

/// Keep digits only. Fails when the cell has no digits at all, so bad
/// columns surface instead of producing empty fields.
#[must_use]
pub fn digits_only() -> CellTransform {
    Arc::new(|raw| {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            anyhow::bail!("no digits in cell '{raw}'");
        }
        Ok(digits)
    })
}

/// Extract an attribute value from an HTML cell (e.g. `alt` of a flag
/// image carrying the nationality).
#[must_use]
pub fn attr(name: &str) -> CellTransform {
    let pattern = Regex::new(&format!(
        r#"{}\s*=\s*["']([^"']*)["']"#,
        regex::escape(name)
    ))
    .expect("attribute regex");
    let name = name.to_string();
    Arc::new(move |raw| {
        pattern
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| anyhow::anyhow!("attribute '{name}' not found in cell"))
    })
}

/// Split a merged age/gender cell of the `"M35"` / `"W-40"` shape into
/// `(gender, age)`.
#[must_use]
pub fn split_letter_digits() -> SplitAgeGender {
    Arc::new(|merged| {
        LETTER_DIGITS
            .captures(merged)
            .map(|c| (c[1].to_string(), c[2].to_string()))
    })
}
