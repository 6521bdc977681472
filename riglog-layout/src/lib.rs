//! # riglog-layout: Geometry model for deck placements
//!
//! Pure, side-effect-free spatial computation.  The interactive surface
//! and the export pages use the same functions so they agree exactly.
//!
//! ## Modules
//!
//! - [`units`]: Meters ↔ workspace units
//! - [`bounds`]: Rotation-aware bounding boxes
//! - [`spatial`]: Containment and zone grouping
//! - [`shape`]: Canonical item outlines
//! - [`export`]: Export page planning

pub mod bounds;
pub mod export;
pub mod shape;
pub mod spatial;
pub mod units;

pub use bounds::{compute_bounds, Bounds, Footprint, Point, FALLBACK_BOUNDS};
pub use export::{plan_export, ExportError, ExportItem, ExportOptions, ExportPage, ExportZone, PageKind};
pub use shape::{build_shape, item_outline, ShapeOutline};
pub use spatial::{containing_zone, contains, group_zones};
pub use units::{to_real_units, to_workspace_units, WORKSPACE_UNITS_PER_METER};
