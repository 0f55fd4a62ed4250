//! Domain types shared by the loaders.

pub mod entity;
pub mod frequency;
pub mod ids;
pub mod window;

pub use entity::{AdjustmentEvent, EntityLink, EntityMap};
pub use frequency::{Frequency, UnknownFrequency};
pub use ids::{Ident, IdentError, TableId};
pub use window::{DateWindow, InvalidWindow};

/// Column carrying the external identifier in every output frame.
pub const ISIN_COL: &str = "ISIN";
/// Column carrying the internal entity key in raw tables.
pub const ENTITY_COL: &str = "fsym_id";
/// Date column of output frames and of fundamentals tables.
pub const DATE_COL: &str = "date";
/// Date column of the price tables.
pub const PRICE_DATE_COL: &str = "price_date";
/// Cumulative adjustment factor column added by the price adjuster.
pub const FACTOR_COL: &str = "cum_factor";
