//! Refpanel Core: panel loading over a reference-data warehouse.
//!
//! - ISIN to internal-key mapping ([`source::SymbologyMapper`])
//! - Fundamentals field resolution against a per-frequency table priority
//! - Price loading with cumulative corporate-action adjustment
//! - Alignment onto a reporting-date calendar
//! - Estimates loading with placeholder rows for missing items
//! - Metadata browsing and panel export

pub mod adjust;
pub mod align;
pub mod config;
pub mod domain;
pub mod frame;
pub mod load;
pub mod metadata;
pub mod output;
pub mod panel;
pub mod query;
pub mod resolve;
pub mod schema;
pub mod source;

pub use config::{FetchPolicy, Settings};
pub use domain::{DateWindow, EntityMap, Frequency, Ident, TableId};
pub use metadata::MetadataService;
pub use output::{ExportFormat, PanelOutput, PanelSummary};
pub use panel::{PanelAssembler, PanelError, PanelRequest};
pub use resolve::{FieldResolver, ResolutionMap};
pub use source::{Catalog, Database, EntityMapper, FrameWarehouse, SourceError, SymbologyMapper};
