//! # Result Harvester
//!
//! A resumable, concurrency-bounded harvesting engine for paginated tabular
//! result sources. The engine drives an existing browser session through a
//! stateful paginated UI, extracts and validates row data into canonical
//! records, and persists them together with per-page completion markers so
//! an interrupted run can resume without re-fetching finished pages.
//!
//! Per-source specifics (URLs, selectors, column maps, cleanup rules) are
//! supplied declaratively through [`domain::PageDescriptor`]; the engine
//! itself is source-agnostic.

pub mod domain;
pub mod driver;
pub mod extraction;
pub mod harvest;
pub mod infrastructure;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod resume;
pub mod sync;

pub use domain::{ColumnMap, FieldSpec, PageDescriptor, RecordDraft, ResultRecord, YearRange};
pub use harvest::{HarvestError, HarvestReport, HarvestUnit};
pub use orchestrator::{HarvestOrchestrator, RunReport};
pub use pipeline::{IngestionQueue, PageBatch, PageCompletion};
pub use pool::{BrowserPool, SessionLease};
pub use resume::ResumePoint;
