//! Error type shared by the merge library.
//!
//! Taxonomy inconsistencies in individual rows (ambiguous names, unexpected
//! ranks, retired ids) are not errors: the row is dropped and a log line is
//! written. Everything here aborts the run.

use crate::TaxId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} line {line}: {detail}")]
    Parse {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("taxon {taxid} was reported by a tool but no reference database contains it")]
    ZeroReferenceSupport { taxid: TaxId },

    #[error("tool {tool} reports taxon {taxid} more than once at rank {rank}")]
    DuplicateTaxon {
        tool: String,
        rank: String,
        taxid: TaxId,
    },

    #[error("reference length for taxon {taxid} is missing or zero")]
    MissingReferenceLength { taxid: TaxId },

    #[error("taxon {taxid} is not in the taxonomy")]
    UnknownTaxon { taxid: TaxId },

    #[error("taxon {taxid} points to parent {parent} which is not in the taxonomy")]
    DanglingParent { taxid: TaxId, parent: TaxId },

    #[error("lineage of taxon {taxid} never reaches the root")]
    UnterminatedLineage { taxid: TaxId },

    #[error("score {score} of taxon {taxid} is outside the histogram range [0, {upper}]")]
    ScoreOutOfRange {
        taxid: TaxId,
        score: f64,
        upper: f64,
    },
}

impl MergeError {
    pub fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        MergeError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse<P: Into<PathBuf>, S: Into<String>>(path: P, line: usize, detail: S) -> Self {
        MergeError::Parse {
            path: path.into(),
            line,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;
