//! # ekman
//!
//! Resampling, slicing, grid algebra and derived meteorological quantities
//! over gridded scientific fields.
//!
//! ## Key Features
//!
//! - **Georeferenced sample domains**: linear and curvilinear grids, map
//!   projections, empirical and terrain-following vertical coordinates
//! - **Resampling and slicing**: nearest-neighbour and weighted-average
//!   resampling, constant-level slices, vertical cross sections and profiles
//! - **Grid algebra**: unit-aware binary operations on fields over differing
//!   domains, reductions over time, levels, axes and ensemble members
//! - **Derived quantities**: vorticity, divergence, advection, geostrophic
//!   wind, thermodynamic and moisture quantities, layer differences
//!
//! ## Architecture
//!
//! - **Domain layer** (`domain`, `resolver`): sample domains, coordinate
//!   systems and the predicates that classify them
//! - **Field layer** (`field`): flat grids and time/ensemble sequences
//! - **Engines** (`resample`, `algebra`, `derived`): stateless operations
//!   that take fields and return new ones
//! - **Sources** (`source`): the inbound collaborator that builds domains
//!   through an explicit cache

pub mod algebra;
pub mod config;
pub mod derived;
pub mod domain;
pub mod error;
pub mod field;
pub mod logging;
pub mod resample;
pub mod resolver;
pub mod source;
pub mod units;

pub use config::Config;
pub use domain::{Axis, AxisKind, CoordinateSystem, LinearAxis, SampleDomain, SamplingMode};
pub use error::{EkmanError, Result};
pub use field::{FlatGrid, GridField, Param};
pub use logging::{
    generate_request_id, init_tracing, log_error, log_field_stats, log_operation_end,
    log_operation_start, log_timed_operation,
};
pub use source::{load_field, GridSource, MemorySource, Selection, SourceGrid};
pub use units::Unit;
