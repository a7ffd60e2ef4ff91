//! External collaborators of the fetch executor
//!
//! - [`rollup`]: raw point source (the Graphite-style rollup store)
//! - [`converter`]: tagged series to backend path mapping

pub mod converter;
pub mod rollup;

pub use converter::{DottedTagConverter, GraphiteConverter};
pub use rollup::{HttpRollupClient, RollupClient, RollupQuery};
