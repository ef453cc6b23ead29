pub mod args;
pub mod consensus;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod profile;
pub mod rank;
pub mod reference;
pub mod report;
pub mod taxonomy;
pub mod tool;
pub mod utils;

/// NCBI taxonomy identifier.
pub type TaxId = u64;

pub use consensus::{ConsensusEngine, ConsensusResult, CutoffMode, MergeConfig, ProfileEntry};
pub use error::{MergeError, Result};
pub use pipeline::{run_merge, MergeRun};
pub use profile::{ProfileRow, ProfileTable, RankPartition};
pub use rank::{Rank, Ranks};
pub use taxonomy::Taxonomy;
