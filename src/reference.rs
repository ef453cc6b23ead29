use crate::profile::ProfileTable;
use crate::TaxId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Composition of one tool's reference database: which taxa it holds at each
/// rank and their total sequence length.
#[derive(Debug, Clone)]
pub struct ReferenceProfile {
    file: PathBuf,
    table: ProfileTable,
    taxids: HashSet<TaxId>,
    lengths: HashMap<TaxId, f64>,
}

impl ReferenceProfile {
    /// Takes ownership of the parsed table and collapses taxids that appear
    /// more than once (old and current ids resolved to the same taxon).
    pub fn new<P: AsRef<Path>>(file: P, mut table: ProfileTable) -> Self {
        let repeated = table.merge_repeated_taxids();
        if !repeated.is_empty() {
            log::info!(
                "\t{} taxons with merged entries {:?}",
                repeated.len(),
                repeated
            );
        }

        let taxids = table.taxid_set();
        let mut lengths = HashMap::new();
        for (_, row) in table.rows() {
            lengths.entry(row.taxid).or_insert(row.abundance);
        }

        ReferenceProfile {
            file: file.as_ref().to_path_buf(),
            table,
            taxids,
            lengths,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn table(&self) -> &ProfileTable {
        &self.table
    }

    pub fn contains(&self, taxid: TaxId) -> bool {
        self.taxids.contains(&taxid)
    }

    pub fn taxids(&self) -> &HashSet<TaxId> {
        &self.taxids
    }

    /// Recorded length of `taxid`, taken from its first row in rank order.
    pub fn length_of(&self, taxid: TaxId) -> Option<f64> {
        self.lengths.get(&taxid).copied()
    }
}

/// For every taxon, how many reference databases contain it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSupport {
    counts: HashMap<TaxId, usize>,
}

impl ReferenceSupport {
    pub fn from_references(references: &[ReferenceProfile]) -> Self {
        let mut counts = HashMap::new();
        for reference in references {
            for &taxid in reference.taxids() {
                *counts.entry(taxid).or_insert(0) += 1;
            }
        }
        ReferenceSupport { counts }
    }

    pub fn count(&self, taxid: TaxId) -> usize {
        self.counts.get(&taxid).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
