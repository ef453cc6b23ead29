use crate::rank::Ranks;
use crate::TaxId;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One taxon at one rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileRow {
    pub presence: u32,
    pub taxid: TaxId,
    pub abundance: f64,
}

impl ProfileRow {
    pub fn new(presence: u32, taxid: TaxId, abundance: f64) -> Self {
        ProfileRow {
            presence,
            taxid,
            abundance,
        }
    }

    pub fn get(&self, column: Column) -> f64 {
        match column {
            Column::Presence => self.presence as f64,
            Column::TaxId => self.taxid as f64,
            Column::Abundance => self.abundance,
        }
    }

    fn cmp_by(&self, other: &ProfileRow, column: Column) -> Ordering {
        match column {
            Column::Presence => self.presence.cmp(&other.presence),
            Column::TaxId => self.taxid.cmp(&other.taxid),
            Column::Abundance => self.abundance.total_cmp(&other.abundance),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Presence,
    TaxId,
    Abundance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// One key of a lexicographic multi-key sort. Earlier keys take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: Column,
    pub order: Order,
}

impl SortKey {
    pub fn asc(column: Column) -> Self {
        SortKey {
            column,
            order: Order::Ascending,
        }
    }

    pub fn desc(column: Column) -> Self {
        SortKey {
            column,
            order: Order::Descending,
        }
    }
}

/// Rows of a profile that share one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankPartition {
    rank_id: usize,
    rows: Vec<ProfileRow>,
}

impl RankPartition {
    pub fn new(rank_id: usize, rows: Vec<ProfileRow>) -> Self {
        RankPartition { rank_id, rows }
    }

    pub fn rank_id(&self) -> usize {
        self.rank_id
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ProfileRow] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProfileRow> {
        self.rows.iter()
    }

    pub fn column(&self, column: Column) -> Vec<f64> {
        self.rows.iter().map(|r| r.get(column)).collect()
    }

    pub fn taxids(&self) -> Vec<TaxId> {
        self.rows.iter().map(|r| r.taxid).collect()
    }

    pub fn abundance_sum(&self) -> f64 {
        self.rows.iter().map(|r| r.abundance).sum()
    }

    /// New partition holding copies of the matching rows.
    pub fn subset<F: Fn(&ProfileRow) -> bool>(&self, predicate: F) -> RankPartition {
        RankPartition::new(
            self.rank_id,
            self.rows.iter().filter(|r| predicate(r)).copied().collect(),
        )
    }

    /// Drop the rows not matching `predicate`; returns how many were dropped.
    pub(crate) fn filter<F: FnMut(&ProfileRow) -> bool>(&mut self, mut predicate: F) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| predicate(r));
        before - self.rows.len()
    }

    pub(crate) fn truncate(&mut self, len: usize) -> usize {
        let before = self.rows.len();
        self.rows.truncate(len);
        before - self.rows.len()
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [ProfileRow] {
        &mut self.rows
    }

    pub(crate) fn push(&mut self, row: ProfileRow) {
        self.rows.push(row);
    }

    /// Stable lexicographic sort, each key with its own direction.
    pub fn sort(&mut self, keys: &[SortKey]) {
        self.rows.sort_by(|a, b| {
            for key in keys {
                let ord = a.cmp_by(b, key.column);
                let ord = match key.order {
                    Order::Ascending => ord,
                    Order::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Rescale so the abundances sum to 1. An all-zero partition is left as is.
    pub(crate) fn normalize_abundance(&mut self) {
        let total = self.abundance_sum();
        if total != 0.0 {
            for row in self.rows.iter_mut() {
                row.abundance /= total;
            }
        }
    }

    /// Collapse rows sharing a taxid into the first one, summing abundances.
    /// Returns the taxids that had more than one row.
    pub(crate) fn merge_repeated_taxids(&mut self) -> Vec<TaxId> {
        let mut first_seen: HashMap<TaxId, usize> = HashMap::new();
        let mut merged_rows: Vec<ProfileRow> = Vec::with_capacity(self.rows.len());
        let mut repeated = Vec::new();

        for row in self.rows.drain(..) {
            match first_seen.get(&row.taxid) {
                Some(&idx) => {
                    merged_rows[idx].abundance += row.abundance;
                    if !repeated.contains(&row.taxid) {
                        repeated.push(row.taxid);
                    }
                }
                None => {
                    first_seen.insert(row.taxid, merged_rows.len());
                    merged_rows.push(row);
                }
            }
        }

        self.rows = merged_rows;
        repeated
    }
}

impl<'a> IntoIterator for &'a RankPartition {
    type Item = &'a ProfileRow;
    type IntoIter = std::slice::Iter<'a, ProfileRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// A profile split into one partition per active rank, kept in the declared
/// rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    ranks: Ranks,
    partitions: Vec<RankPartition>,
}

impl ProfileTable {
    /// Empty table with one partition per active rank.
    pub fn new(ranks: &Ranks) -> Self {
        ProfileTable {
            ranks: ranks.clone(),
            partitions: (0..ranks.len())
                .map(|rank_id| RankPartition::new(rank_id, Vec::new()))
                .collect(),
        }
    }

    /// Group `(rank_id, row)` pairs by rank. Rows with a rank id outside the
    /// active list are ignored.
    pub fn from_rows<I>(ranks: &Ranks, rows: I) -> Self
    where
        I: IntoIterator<Item = (usize, ProfileRow)>,
    {
        let mut table = ProfileTable::new(ranks);
        for (rank_id, row) in rows {
            if let Some(partition) = table.partition_mut(rank_id) {
                partition.push(row);
            } else {
                log::debug!("row for taxid {} has unknown rank id {}", row.taxid, rank_id);
            }
        }
        table
    }

    pub fn ranks(&self) -> &Ranks {
        &self.ranks
    }

    /// Partitions in declared rank order. The iterator can be recreated at will.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &RankPartition)> + '_ {
        self.partitions.iter().map(|p| (p.rank_id, p))
    }

    pub fn partition(&self, rank_id: usize) -> Option<&RankPartition> {
        self.partitions.iter().find(|p| p.rank_id == rank_id)
    }

    pub(crate) fn partition_mut(&mut self, rank_id: usize) -> Option<&mut RankPartition> {
        self.partitions.iter_mut().find(|p| p.rank_id == rank_id)
    }

    pub(crate) fn partitions_mut(&mut self) -> std::slice::IterMut<'_, RankPartition> {
        self.partitions.iter_mut()
    }

    /// Rows of one rank, or of the whole table.
    pub fn size(&self, rank_id: Option<usize>) -> usize {
        match rank_id {
            Some(rank_id) => self.partition(rank_id).map_or(0, |p| p.size()),
            None => self.partitions.iter().map(|p| p.size()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size(None) == 0
    }

    /// `(rank_id, row)` for every row, in rank-then-row order.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &ProfileRow)> + '_ {
        self.partitions
            .iter()
            .flat_map(|p| p.rows.iter().map(move |r| (p.rank_id, r)))
    }

    pub fn column(&self, column: Column) -> Vec<f64> {
        self.rows().map(|(_, r)| r.get(column)).collect()
    }

    pub fn taxid_set(&self) -> HashSet<TaxId> {
        self.rows().map(|(_, r)| r.taxid).collect()
    }

    /// New table with copies of the matching rows; empty partitions are omitted.
    pub fn subset<F: Fn(&ProfileRow) -> bool>(&self, predicate: F) -> ProfileTable {
        ProfileTable {
            ranks: self.ranks.clone(),
            partitions: self
                .partitions
                .iter()
                .map(|p| p.subset(&predicate))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Rows of `taxid` across all ranks.
    pub fn find(&self, taxid: TaxId) -> ProfileTable {
        self.subset(|r| r.taxid == taxid)
    }

    pub fn sort(&mut self, keys: &[SortKey]) {
        for partition in self.partitions.iter_mut() {
            partition.sort(keys);
        }
    }

    /// In-place filter over every partition; returns dropped counts per rank id.
    pub(crate) fn filter<F: FnMut(&ProfileRow) -> bool>(&mut self, mut predicate: F) -> Vec<(usize, usize)> {
        self.partitions
            .iter_mut()
            .map(|p| (p.rank_id, p.filter(&mut predicate)))
            .collect()
    }

    /// Append the rows of `other`, rank by rank. Both tables must share the rank list.
    pub fn concat(&mut self, other: &ProfileTable) {
        for (rank_id, partition) in other.iter() {
            if let Some(target) = self.partition_mut(rank_id) {
                target.rows.extend_from_slice(&partition.rows);
            }
        }
    }

    pub(crate) fn normalize_abundance(&mut self) {
        for partition in self.partitions.iter_mut() {
            partition.normalize_abundance();
        }
    }

    /// Collapse duplicated taxids within each rank. Returns the repeated taxids.
    pub(crate) fn merge_repeated_taxids(&mut self) -> Vec<TaxId> {
        let mut repeated = Vec::new();
        for partition in self.partitions.iter_mut() {
            repeated.extend(partition.merge_repeated_taxids());
        }
        repeated
    }
}
