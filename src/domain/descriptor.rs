//! Declarative descriptors supplied by per-source adapters.
//!
//! A [`PageDescriptor`] is the unit of resumable work: it carries everything
//! the engine needs to drive one paginated source, and nothing about *how*
//! to drive it. Descriptors are immutable; per-category/page variants are
//! derived copies, never in-place mutations.

use std::fmt;
use std::sync::Arc;

use super::record::YearRange;

/// Pure cell transform: raw cell text (or HTML) in, normalized value out.
/// Failures are logged with the offending row and propagated, never
/// swallowed into partial records.
pub type CellTransform = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Splits a merged age/gender cell (e.g. `"M35"`) into `(gender, age)`.
pub type SplitAgeGender = Arc<dyn Fn(&str) -> Option<(String, String)> + Send + Sync>;

/// Parses the UI's page-indicator text into a page number.
pub type PageNumberParser = Arc<dyn Fn(&str) -> Option<u32> + Send + Sync>;

/// Where one semantic field lives in a raw table row.
#[derive(Clone)]
pub struct FieldSpec {
    /// Cell index, or -1 when this layout does not carry the field.
    pub index: i32,
    /// Read the cell's raw HTML instead of its text (attribute-only fields,
    /// e.g. nationality encoded in a flag image).
    pub from_html: bool,
    pub transform: Option<CellTransform>,
}

impl FieldSpec {
    /// Field present at `index`, raw text, no transform.
    #[must_use]
    pub fn at(index: usize) -> Self {
        Self {
            index: index as i32,
            from_html: false,
            transform: None,
        }
    }

    /// Field not present on this layout; resolves to the sentinel.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            index: -1,
            from_html: false,
            transform: None,
        }
    }

    /// Field read from the cell's raw HTML at `index`.
    #[must_use]
    pub fn html_at(index: usize) -> Self {
        Self {
            index: index as i32,
            from_html: true,
            transform: None,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: CellTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.index < 0
    }
}

impl Default for FieldSpec {
    fn default() -> Self {
        Self::absent()
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("index", &self.index)
            .field("from_html", &self.from_html)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Maps semantic fields to row indices for one page layout.
///
/// Two supported shapes for age/gender: independent `age` + `gender`
/// columns, or a single merged `age_gender` column together with a
/// `split_age_gender` function. A merged column without a split function is
/// an adapter bug and fails extraction loudly.
#[derive(Clone, Default)]
pub struct ColumnMap {
    pub place: FieldSpec,
    pub finish_time: FieldSpec,
    pub split_time: FieldSpec,
    pub nationality: FieldSpec,
    pub affiliation: FieldSpec,
    pub age: FieldSpec,
    pub gender: FieldSpec,
    pub age_gender: FieldSpec,
    pub split_age_gender: Option<SplitAgeGender>,
}

impl ColumnMap {
    /// Map with every field absent; adapters fill in what the layout has.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            place: FieldSpec::absent(),
            finish_time: FieldSpec::absent(),
            split_time: FieldSpec::absent(),
            nationality: FieldSpec::absent(),
            affiliation: FieldSpec::absent(),
            age: FieldSpec::absent(),
            gender: FieldSpec::absent(),
            age_gender: FieldSpec::absent(),
            split_age_gender: None,
        }
    }
}

impl fmt::Debug for ColumnMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMap")
            .field("place", &self.place)
            .field("finish_time", &self.finish_time)
            .field("split_time", &self.split_time)
            .field("nationality", &self.nationality)
            .field("affiliation", &self.affiliation)
            .field("age", &self.age)
            .field("gender", &self.gender)
            .field("age_gender", &self.age_gender)
            .field("split_age_gender", &self.split_age_gender.is_some())
            .finish()
    }
}

/// CSS selectors used to drive the source's pagination controls.
#[derive(Debug, Clone)]
pub struct Navigation {
    /// Primary "next page" selector.
    pub next: String,
    /// Some UIs swap in a different "next" control once past page 1.
    pub alt_next: Option<String>,
    /// "Previous page" selector.
    pub prev: String,
    /// Element whose text declares the UI's current page.
    pub page_indicator: String,
}

impl Navigation {
    #[must_use]
    pub fn new(
        next: impl Into<String>,
        prev: impl Into<String>,
        page_indicator: impl Into<String>,
    ) -> Self {
        Self {
            next: next.into(),
            alt_next: None,
            prev: prev.into(),
            page_indicator: page_indicator.into(),
        }
    }

    #[must_use]
    pub fn with_alt_next(mut self, selector: impl Into<String>) -> Self {
        self.alt_next = Some(selector.into());
        self
    }
}

/// Declarative unit of one harvest job.
#[derive(Clone)]
pub struct PageDescriptor {
    pub url: String,
    pub source_id: String,
    pub year: u16,
    /// Optional category/gender subdivision. When rows carry no gender
    /// column, extraction falls back to this page-level context.
    pub category: Option<String>,
    /// Selector addressing the results table element.
    pub table_selector: String,
    /// Leading rows to skip (header rows).
    pub header_rows: usize,
    /// Trailing rows to clip (footers, pagination rows inside the table).
    pub trailing_rows: usize,
    pub column_map: ColumnMap,
    pub navigation: Navigation,
    pub start_page: u32,
    pub end_page: u32,
    /// `false` for whole-result-set sources without pagination.
    pub paginated: bool,
    pub year_range: YearRange,
    /// Override for the default digit-scan page-indicator parser.
    pub page_number_parser: Option<PageNumberParser>,
}

impl PageDescriptor {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        source_id: impl Into<String>,
        year: u16,
        year_range: YearRange,
        navigation: Navigation,
    ) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            year,
            category: None,
            table_selector: "table".to_string(),
            header_rows: 1,
            trailing_rows: 0,
            column_map: ColumnMap::empty(),
            navigation,
            start_page: 1,
            end_page: 1,
            paginated: true,
            year_range,
            page_number_parser: None,
        }
    }

    #[must_use]
    pub fn with_table(mut self, selector: impl Into<String>) -> Self {
        self.table_selector = selector.into();
        self
    }

    #[must_use]
    pub fn with_rows_trim(mut self, header_rows: usize, trailing_rows: usize) -> Self {
        self.header_rows = header_rows;
        self.trailing_rows = trailing_rows;
        self
    }

    #[must_use]
    pub fn with_columns(mut self, map: ColumnMap) -> Self {
        self.column_map = map;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, start_page: u32, end_page: u32) -> Self {
        self.start_page = start_page;
        self.end_page = end_page;
        self
    }

    /// Derive a per-category copy (e.g. one descriptor per gender division).
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Derive a whole-result-set (non-paginated) copy.
    #[must_use]
    pub fn unpaginated(mut self) -> Self {
        self.paginated = false;
        self.start_page = 1;
        self.end_page = 1;
        self
    }

    #[must_use]
    pub fn with_page_number_parser(mut self, parser: PageNumberParser) -> Self {
        self.page_number_parser = Some(parser);
        self
    }

    /// Category as used in persistence keys (`""` when uncategorized).
    #[must_use]
    pub fn category_key(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }

    /// Human-readable job identity for logs and reports.
    #[must_use]
    pub fn job_key(&self) -> String {
        match &self.category {
            Some(category) => format!("{}/{}/{}", self.source_id, self.year, category),
            None => format!("{}/{}", self.source_id, self.year),
        }
    }
}

impl fmt::Debug for PageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageDescriptor")
            .field("url", &self.url)
            .field("source_id", &self.source_id)
            .field("year", &self.year)
            .field("category", &self.category)
            .field("table_selector", &self.table_selector)
            .field("pages", &(self.start_page..=self.end_page))
            .field("paginated", &self.paginated)
            .finish()
    }
}
