//! Consensus merge of normalized tool profiles.
//!
//! Every (taxon, rank) reported by any tool gets a support score
//! `(presence + 1)^2 / (reference support + 1)`. Scores are binned on the
//! fixed range `[0, tools + 1]` and, inside every bin and rank, only the most
//! abundant fraction `f(bin)` of the candidates is kept. The merged abundance
//! of a candidate is the harmonic mean of the abundances the tools reported.
//! When only some ranks were analyzed, the coarser missing ranks are rebuilt
//! from the finest analyzed rank by walking up the taxonomy.

use crate::error::{MergeError, Result};
use crate::profile::{Column, ProfileRow, ProfileTable, SortKey};
use crate::rank::{Rank, Ranks};
use crate::reference::{ReferenceProfile, ReferenceSupport};
use crate::taxonomy::Taxonomy;
use crate::tool::{AbundanceCutoff, ToolProfile};
use crate::TaxId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Fraction of a bin's candidates that survive, as a function of the bin index.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CutoffMode {
    /// b / B
    #[default]
    Linear,
    /// ln(b + 1) / ln(B + 1)
    Sensitive,
    /// ln(b + 3) / ln(B + 3)
    VerySensitive,
    /// 2^b / 2^B
    Precise,
    /// 4^b / 4^B
    VeryPrecise,
    /// keep everything
    NoCutoff,
}

impl CutoffMode {
    pub const ALL: [CutoffMode; 6] = [
        CutoffMode::Linear,
        CutoffMode::Sensitive,
        CutoffMode::VerySensitive,
        CutoffMode::Precise,
        CutoffMode::VeryPrecise,
        CutoffMode::NoCutoff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CutoffMode::Linear => "linear",
            CutoffMode::Sensitive => "sensitive",
            CutoffMode::VerySensitive => "very-sensitive",
            CutoffMode::Precise => "precise",
            CutoffMode::VeryPrecise => "very-precise",
            CutoffMode::NoCutoff => "no-cutoff",
        }
    }

    /// f(bin) for `bin` in 1..=bins. Non-decreasing in `bin`, within [0, 1].
    pub fn fraction(&self, bin: usize, bins: usize) -> f64 {
        let b = bin as f64;
        let n = bins as f64;
        match self {
            CutoffMode::Linear => b / n,
            CutoffMode::Sensitive => (b + 1.0).ln() / (n + 1.0).ln(),
            CutoffMode::VerySensitive => (b + 3.0).ln() / (n + 3.0).ln(),
            // 2^b / 2^B without overflowing for large B
            CutoffMode::Precise => 2f64.powf(b - n),
            CutoffMode::VeryPrecise => 4f64.powf(b - n),
            CutoffMode::NoCutoff => 1.0,
        }
    }
}

impl fmt::Display for CutoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CutoffMode {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        CutoffMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MergeError::InvalidConfig(format!("unknown mode `{}`", s)))
    }
}

/// Values the merge consumes.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub bins: usize,
    pub mode: CutoffMode,
    pub ranks: Ranks,
    pub cutoff: AbundanceCutoff,
    /// Rescale each final rank to sum to 1.
    pub normalize_output: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            bins: 4,
            mode: CutoffMode::Linear,
            ranks: Ranks::new(vec![Rank::Species]).unwrap_or_else(|_| Ranks::all()),
            cutoff: AbundanceCutoff::MinRelative(0.0001),
            normalize_output: false,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(MergeError::InvalidConfig(
                "number of bins must be at least 1".to_string(),
            ));
        }
        if self.ranks.is_empty() {
            return Err(MergeError::InvalidConfig("empty rank list".to_string()));
        }
        Ok(())
    }
}

pub fn support_score(presence: usize, support: usize) -> f64 {
    let p = (presence + 1) as f64;
    p * p / (support + 1) as f64
}

pub fn harmonic_mean(values: &[f64]) -> f64 {
    values.len() as f64 / values.iter().map(|v| 1.0 / v).sum::<f64>()
}

/// `bins + 1` equally spaced edges over `[0, upper]`; the last one is exactly `upper`.
pub fn bin_edges(bins: usize, upper: f64) -> Vec<f64> {
    let mut edges: Vec<f64> = (0..=bins)
        .map(|i| upper * i as f64 / bins as f64)
        .collect();
    if let Some(last) = edges.last_mut() {
        *last = upper;
    }
    edges
}

/// Index of the first edge >= `score` (right inclusive). 0 means below every
/// edge, `edges.len()` above every edge.
pub fn digitize(score: f64, edges: &[f64]) -> usize {
    edges
        .iter()
        .position(|&edge| score <= edge)
        .unwrap_or(edges.len())
}

/// `ceil(count * fraction)`, ignoring floating point noise just above an integer.
pub fn kept_count(count: usize, fraction: f64) -> usize {
    let x = count as f64 * fraction;
    let nearest = x.round();
    let kept = if (x - nearest).abs() <= 4.0 * f64::EPSILON * x.abs().max(1.0) {
        nearest
    } else {
        x.ceil()
    };
    (kept.max(0.0) as usize).min(count)
}

/// Accumulated evidence for one (taxon, rank).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntry {
    pub taxid: TaxId,
    pub rank_id: usize,
    pub presence: usize,
    pub support: usize,
    pub score: f64,
    pub bin: usize,
    pub abundances: Vec<f64>,
}

impl MergedEntry {
    pub fn abundance(&self) -> f64 {
        harmonic_mean(&self.abundances)
    }
}

/// Candidates and survivors of one (rank, bin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinStat {
    pub rank_id: usize,
    pub bin: usize,
    pub count: usize,
    pub fraction: f64,
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct ConsensusResult {
    /// Final profile. Covers the full hierarchy when ranks were reconstructed.
    pub table: ProfileTable,
    /// Every candidate before the cutoff, over the analyzed ranks.
    pub merged: ProfileTable,
    pub bin_edges: Vec<f64>,
    pub bin_stats: Vec<BinStat>,
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileEntry {
    pub rank: Rank,
    pub taxid: TaxId,
    pub name: String,
    pub abundance: f64,
}

impl ConsensusResult {
    /// Final rows in rank-then-sort order.
    pub fn entries(&self, taxonomy: &Taxonomy) -> Vec<ProfileEntry> {
        let ranks = self.table.ranks();
        self.table
            .rows()
            .filter_map(|(rank_id, row)| {
                ranks.rank(rank_id).map(|rank| ProfileEntry {
                    rank,
                    taxid: row.taxid,
                    name: taxonomy.name(row.taxid).to_string(),
                    abundance: row.abundance,
                })
            })
            .collect()
    }
}

pub struct ConsensusEngine<'a> {
    config: &'a MergeConfig,
    taxonomy: &'a Taxonomy,
    support: &'a ReferenceSupport,
}

impl<'a> ConsensusEngine<'a> {
    pub fn new(
        config: &'a MergeConfig,
        taxonomy: &'a Taxonomy,
        support: &'a ReferenceSupport,
    ) -> Self {
        ConsensusEngine {
            config,
            taxonomy,
            support,
        }
    }

    pub fn merge(&self, tools: &[ToolProfile]) -> Result<ConsensusResult> {
        self.config.validate()?;
        let ranks = &self.config.ranks;

        let mut entries = self.accumulate(tools)?;
        if entries.is_empty() {
            log::info!("no taxa reported by any tool");
            return Ok(ConsensusResult {
                table: ProfileTable::new(ranks),
                merged: ProfileTable::new(ranks),
                bin_edges: Vec::new(),
                bin_stats: Vec::new(),
            });
        }

        let edges = self.assign_bins(&mut entries, tools.len())?;
        sort_entries(&mut entries);

        let merged = ProfileTable::from_rows(
            ranks,
            entries
                .iter()
                .map(|e| (e.rank_id, ProfileRow::new(e.presence as u32, e.taxid, e.abundance()))),
        );
        for (rank_id, partition) in merged.iter() {
            log::info!("\t{} - {} entries", ranks.name(rank_id), partition.size());
        }

        let (mut table, bin_stats) = self.apply_cutoff(&entries);
        table.sort(&[SortKey::desc(Column::Abundance)]);

        if ranks.is_partial() {
            table = self.reconstruct(&table)?;
        }
        if self.config.normalize_output {
            table.normalize_abundance();
        }

        for (rank_id, partition) in table.iter() {
            log::info!(
                "\t{} - {} entries",
                table.ranks().name(rank_id),
                partition.size()
            );
        }

        Ok(ConsensusResult {
            table,
            merged,
            bin_edges: edges,
            bin_stats,
        })
    }

    /// Count presence per (taxon, rank) over all tools and score it.
    pub fn accumulate(&self, tools: &[ToolProfile]) -> Result<Vec<MergedEntry>> {
        let mut index: HashMap<(TaxId, usize), usize> = HashMap::new();
        let mut entries: Vec<MergedEntry> = Vec::new();
        let mut last_tool: Vec<usize> = Vec::new();

        for (tool_idx, tool) in tools.iter().enumerate() {
            for (rank_id, partition) in tool.table().iter() {
                for row in partition {
                    let idx = *index.entry((row.taxid, rank_id)).or_insert_with(|| {
                        entries.push(MergedEntry {
                            taxid: row.taxid,
                            rank_id,
                            presence: 0,
                            support: 0,
                            score: 0.0,
                            bin: 0,
                            abundances: Vec::new(),
                        });
                        last_tool.push(usize::MAX);
                        entries.len() - 1
                    });
                    if last_tool[idx] == tool_idx {
                        return Err(MergeError::DuplicateTaxon {
                            tool: tool.ident().to_string(),
                            rank: self.config.ranks.name(rank_id).to_string(),
                            taxid: row.taxid,
                        });
                    }
                    last_tool[idx] = tool_idx;
                    let entry = &mut entries[idx];
                    entry.presence += 1;
                    entry.abundances.push(row.abundance);
                }
            }
        }

        for entry in entries.iter_mut() {
            entry.support = self.support.count(entry.taxid);
            if entry.support == 0 {
                log::error!(
                    "taxon {} reported by {} tool(s) is in no reference profile",
                    entry.taxid,
                    entry.presence
                );
                return Err(MergeError::ZeroReferenceSupport {
                    taxid: entry.taxid,
                });
            }
            entry.score = support_score(entry.presence, entry.support);
        }

        Ok(entries)
    }

    /// Histogram the scores over `[0, tools + 1]` and store each entry's bin.
    fn assign_bins(&self, entries: &mut [MergedEntry], n_tools: usize) -> Result<Vec<f64>> {
        let upper = (n_tools + 1) as f64;
        let edges = bin_edges(self.config.bins, upper);
        for entry in entries.iter_mut() {
            let bin = digitize(entry.score, &edges);
            if bin == 0 || bin > self.config.bins {
                return Err(MergeError::ScoreOutOfRange {
                    taxid: entry.taxid,
                    score: entry.score,
                    upper,
                });
            }
            entry.bin = bin;
        }
        Ok(edges)
    }

    /// Keep the first `ceil(count * f(bin))` entries of every (rank, bin).
    /// `entries` must already be in merge order.
    fn apply_cutoff(&self, entries: &[MergedEntry]) -> (ProfileTable, Vec<BinStat>) {
        let ranks = &self.config.ranks;
        let bins = self.config.bins;
        let mut rows = Vec::new();
        let mut stats = Vec::new();

        for (rank_id, rank) in ranks.iter() {
            log::info!("\t{}", rank);
            for bin in 1..=bins {
                let candidates: Vec<&MergedEntry> = entries
                    .iter()
                    .filter(|e| e.rank_id == rank_id && e.bin == bin)
                    .collect();
                let count = candidates.len();
                let fraction = self.config.mode.fraction(bin, bins);
                let kept = kept_count(count, fraction);
                log::info!(
                    "\tbin: {} \t # taxons: {} ({} kept - {:.2}%)",
                    bin,
                    count,
                    kept,
                    fraction * 100.0
                );
                rows.extend(candidates.iter().take(kept).map(|e| {
                    (
                        rank_id,
                        ProfileRow::new(e.presence as u32, e.taxid, e.abundance()),
                    )
                }));
                stats.push(BinStat {
                    rank_id,
                    bin,
                    count,
                    fraction,
                    kept,
                });
            }
        }

        (ProfileTable::from_rows(ranks, rows), stats)
    }

    /// Rebuild the ranks that were not analyzed from the finest analyzed one.
    ///
    /// Every row of the finest rank adds its abundance to each ancestor whose
    /// rank is missing. Analyzed ranks are copied unchanged. The result spans
    /// the full hierarchy.
    pub fn reconstruct(&self, table: &ProfileTable) -> Result<ProfileTable> {
        let ranks = table.ranks();
        let all = Ranks::all();
        let missing = ranks.missing();
        let finest = ranks.finest();

        let mut index: HashMap<TaxId, usize> = HashMap::new();
        let mut estimated: Vec<(TaxId, Rank, f64)> = Vec::new();

        let finest_rows = ranks
            .rank_id(finest)
            .and_then(|id| table.partition(id))
            .map(|p| p.rows().to_vec())
            .unwrap_or_default();

        for row in &finest_rows {
            self.taxonomy.walk_to_root(row.taxid, |taxid, node| {
                let rank = match node.rank() {
                    Some(rank) if missing.contains(&rank) => rank,
                    _ => return,
                };
                let idx = *index.entry(taxid).or_insert_with(|| {
                    estimated.push((taxid, rank, 0.0));
                    estimated.len() - 1
                });
                estimated[idx].2 += row.abundance;
            })?;
        }

        let mut rows: Vec<(usize, ProfileRow)> = Vec::new();
        for (full_id, rank) in all.iter() {
            match ranks.rank_id(rank) {
                Some(active_id) => {
                    if let Some(partition) = table.partition(active_id) {
                        rows.extend(partition.iter().map(|r| (full_id, *r)));
                    }
                }
                None => rows.extend(
                    estimated
                        .iter()
                        .filter(|(_, r, _)| *r == rank)
                        .map(|&(taxid, _, ab)| (full_id, ProfileRow::new(1, taxid, ab))),
                ),
            }
        }

        let mut rebuilt = ProfileTable::from_rows(&all, rows);
        for (full_id, rank) in all.iter() {
            if !ranks.contains(rank) {
                if let Some(partition) = rebuilt.partition_mut(full_id) {
                    partition.sort(&[SortKey::desc(Column::Abundance)]);
                }
            }
        }
        Ok(rebuilt)
    }
}

/// Merge order: descending merged abundance, then descending presence.
fn sort_entries(entries: &mut [MergedEntry]) {
    let abundances: Vec<f64> = entries.iter().map(|e| e.abundance()).collect();
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        abundances[b]
            .total_cmp(&abundances[a])
            .then(entries[b].presence.cmp(&entries[a].presence))
    });
    let sorted: Vec<MergedEntry> = order.iter().map(|&i| entries[i].clone()).collect();
    entries.clone_from_slice(&sorted);
}

/// Per tool: its abundance for `taxid`, 0 when only its reference has the
/// taxon, -1 when the reference does not have it either.
pub fn per_tool_abundance(
    taxid: TaxId,
    tools: &[ToolProfile],
    references: &[ReferenceProfile],
) -> Vec<f64> {
    tools
        .iter()
        .zip(references)
        .map(|(tool, reference)| match tool.abundance_of(taxid) {
            Some(abundance) => abundance,
            None if reference.contains(taxid) => 0.0,
            None => -1.0,
        })
        .collect()
}
