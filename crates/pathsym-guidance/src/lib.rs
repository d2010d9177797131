//! Search guidance for pathsym: the shortest control-flow distance from
//! every location to the property.
//!
//! The search driver consults the distances written into the location table
//! to prefer states that are closer to the assertion under analysis.

pub mod graph;

pub use graph::PropertyDistanceGraph;

use pathsym_ir::{LocRef, Locs};
use thiserror::Error;

/// Unsupported configurations of the distance computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuidanceError {
    #[error("more than one property: assertions at {first} and {second}")]
    MultipleProperties { first: LocRef, second: LocRef },

    #[error("no property: the program contains no assertion")]
    NoProperty,
}

pub type GuidanceResult<T> = Result<T, GuidanceError>;

/// Build the distance graph for `locs` and annotate every location with its
/// distance to the property.
pub fn compute_distances(locs: &mut Locs) -> GuidanceResult<()> {
    PropertyDistanceGraph::new(locs).get_path_lengths_to_property(locs)
}
