//! The Routing DAG: the normalized output of the DAG Builder, consumed by
//! the Translator.

pub mod builder;
pub mod model;
pub mod naming;

pub use builder::{build, BuildMetrics, BuildOutcome, BuilderConfig, NamespaceCounts};
pub use model::Dag;
