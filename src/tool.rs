use crate::error::{MergeError, Result};
use crate::profile::{Column, ProfileTable, SortKey};
use crate::reference::ReferenceProfile;
use crate::TaxId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a tool reports its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// taxon -> relative abundance
    #[value(name = "p")]
    Profiling,
    /// read -> taxon, with read length
    #[value(name = "b")]
    Binning,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Profiling => "p",
            Method::Binning => "b",
        })
    }
}

impl FromStr for Method {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "p" | "profiling" => Ok(Method::Profiling),
            "b" | "binning" => Ok(Method::Binning),
            other => Err(MergeError::InvalidConfig(format!(
                "unknown tool method `{}` (expected p or b)",
                other
            ))),
        }
    }
}

/// Filter applied to every tool profile before merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbundanceCutoff {
    /// Only drop zero abundances.
    Off,
    /// Drop rows whose relative abundance is below the threshold.
    MinRelative(f64),
    /// Keep the top k rows of each rank.
    MaxResults(usize),
}

impl AbundanceCutoff {
    /// 0: off, (0, 1): minimum relative abundance, >= 1: maximum results.
    pub fn from_value(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "cutoff must be a non-negative number, got {}",
                value
            )));
        }
        Ok(if value >= 1.0 {
            AbundanceCutoff::MaxResults(value as usize)
        } else if value > 0.0 {
            AbundanceCutoff::MinRelative(value)
        } else {
            AbundanceCutoff::Off
        })
    }
}

impl fmt::Display for AbundanceCutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbundanceCutoff::Off => write!(f, "off"),
            AbundanceCutoff::MinRelative(t) => write!(f, "min. relative abundance {}", t),
            AbundanceCutoff::MaxResults(k) => write!(f, "max. results {}", k),
        }
    }
}

/// The normalized result of one tool.
#[derive(Debug, Clone)]
pub struct ToolProfile {
    ident: String,
    method: Method,
    file: PathBuf,
    table: ProfileTable,
}

impl ToolProfile {
    /// Normalize a parsed tool result against the tool's own reference:
    /// drop taxa outside the reference, collapse repeated taxids, turn binned
    /// lengths into abundances, then rescale every rank to sum to 1.
    pub fn new<P: AsRef<Path>>(
        ident: &str,
        method: Method,
        file: P,
        table: ProfileTable,
        reference: &ReferenceProfile,
    ) -> Result<Self> {
        let mut tool = ToolProfile {
            ident: ident.to_string(),
            method,
            file: file.as_ref().to_path_buf(),
            table,
        };
        tool.check_db(reference);
        let repeated = tool.merge_repeated_taxids();
        if !repeated.is_empty() {
            log::info!(
                "\t{} - {} taxons with merged entries {:?}",
                tool.ident,
                repeated.len(),
                repeated
            );
        }
        if method == Method::Binning {
            tool.estimate_abundance(reference)?;
        }
        tool.normalize_abundance();
        Ok(tool)
    }

    /// Wrap a table without checking or normalizing it.
    #[cfg(test)]
    pub(crate) fn from_parts<P: AsRef<Path>>(
        ident: &str,
        method: Method,
        file: P,
        table: ProfileTable,
    ) -> Self {
        ToolProfile {
            ident: ident.to_string(),
            method,
            file: file.as_ref().to_path_buf(),
            table,
        }
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn table(&self) -> &ProfileTable {
        &self.table
    }

    /// Total abundance reported for `taxid` over all ranks, if reported at all.
    pub fn abundance_of(&self, taxid: TaxId) -> Option<f64> {
        let found = self.table.find(taxid);
        if found.is_empty() {
            None
        } else {
            Some(found.column(Column::Abundance).iter().sum())
        }
    }

    /// Drop taxa that the tool's reference does not contain.
    pub fn check_db(&mut self, reference: &ReferenceProfile) {
        let ranks = self.table.ranks().clone();
        for partition in self.table.partitions_mut() {
            let rank = ranks.name(partition.rank_id());
            let dropped = partition.filter(|row| {
                let found = reference.contains(row.taxid);
                if !found {
                    log::debug!(
                        "Ignored entry [{}] rank [{}] - taxon not found in the database profile",
                        row.taxid,
                        rank
                    );
                }
                found
            });
            if dropped > 0 {
                log::info!(
                    "\t{} - {} filtered taxons [{}] (not found on database profile)",
                    self.ident,
                    dropped,
                    rank
                );
            }
        }
    }

    pub fn merge_repeated_taxids(&mut self) -> Vec<TaxId> {
        self.table.merge_repeated_taxids()
    }

    /// Divide each binned length by the reference length of its taxon.
    pub fn estimate_abundance(&mut self, reference: &ReferenceProfile) -> Result<()> {
        for partition in self.table.partitions_mut() {
            for row in partition.rows_mut() {
                match reference.length_of(row.taxid) {
                    Some(len) if len > 0.0 => row.abundance /= len,
                    _ => return Err(MergeError::MissingReferenceLength { taxid: row.taxid }),
                }
            }
        }
        Ok(())
    }

    pub fn normalize_abundance(&mut self) {
        self.table.normalize_abundance();
    }

    fn log_filtered(&self, dropped: &[(usize, usize)]) {
        for &(rank_id, n) in dropped {
            log::info!(
                "\t{} - {} entries filtered [{}]",
                self.ident,
                n,
                self.table.ranks().name(rank_id)
            );
        }
    }

    /// Drop rows with abundance below `min_relative_abundance`.
    pub fn filter_min_relative_abundance(&mut self, min_relative_abundance: f64) {
        let dropped = self
            .table
            .filter(|row| row.abundance >= min_relative_abundance);
        self.log_filtered(&dropped);
    }

    /// Drop rows with zero abundance.
    pub fn filter_zero_abundance(&mut self) {
        let dropped = self.table.filter(|row| row.abundance > 0.0);
        self.log_filtered(&dropped);
    }

    /// Keep the `max_results` most abundant rows of every rank.
    pub fn filter_max_results(&mut self, max_results: usize) {
        let mut dropped = Vec::new();
        for partition in self.table.partitions_mut() {
            partition.sort(&[SortKey::desc(Column::Abundance)]);
            dropped.push((partition.rank_id(), partition.truncate(max_results)));
        }
        self.log_filtered(&dropped);
    }

    pub fn apply_cutoff(&mut self, cutoff: AbundanceCutoff) {
        match cutoff {
            AbundanceCutoff::Off => self.filter_zero_abundance(),
            AbundanceCutoff::MinRelative(t) => {
                self.filter_zero_abundance();
                self.filter_min_relative_abundance(t);
            }
            AbundanceCutoff::MaxResults(k) => {
                self.filter_zero_abundance();
                self.filter_max_results(k);
            }
        }
    }
}
