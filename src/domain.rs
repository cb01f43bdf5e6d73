//! Domain types shared across the harvesting engine.
//!
//! Everything in here is plain data: validated result records, the
//! declarative page descriptors supplied by per-source adapters, and the
//! column maps that tell the extraction pipeline where each semantic field
//! lives in a raw table row.

pub mod descriptor;
pub mod record;

pub use descriptor::{
    CellTransform, ColumnMap, FieldSpec, Navigation, PageDescriptor, PageNumberParser,
    SplitAgeGender,
};
pub use record::{RecordDraft, RecordError, ResultRecord, YearRange, UNAVAILABLE};
