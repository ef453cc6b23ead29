use crate::error::{MergeError, Result};
use crate::rank::{Rank, Ranks};
use crate::utils::read_lines;
use crate::TaxId;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::path::Path;

/// Id of the taxonomy root. Every parent walk stops here.
pub const ROOT: TaxId = 1;

pub const SCIENTIFIC_NAME: &str = "scientific name";

/// Names index: (name, rank) to every taxon carrying that name at that rank.
pub type NameIndex = HashMap<(String, Rank), Vec<TaxId>>;

/// Represents a node in the taxonomy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxonNode {
    pub parent_id: TaxId,
    /// Rank exactly as written in nodes.dmp ("species", "no rank", "strain", ...)
    pub rank: String,
    /// Scientific name, or the first alternate name when none was seen
    pub name: String,
}

impl TaxonNode {
    pub fn new(parent_id: TaxId, rank: &str) -> Self {
        TaxonNode {
            parent_id,
            rank: rank.to_string(),
            name: String::new(),
        }
    }

    pub fn rank(&self) -> Option<Rank> {
        Rank::from_ncbi(&self.rank)
    }
}

/// One row of names.dmp.
#[derive(Debug, Clone, PartialEq)]
pub struct NameRecord {
    pub taxid: TaxId,
    pub name: String,
    pub scientific: bool,
}

impl NameRecord {
    pub fn new(taxid: TaxId, name: &str, scientific: bool) -> Self {
        NameRecord {
            taxid,
            name: name.to_string(),
            scientific,
        }
    }
}

/// Whether the row being resolved comes from a profile or from binned reads.
/// Binned reads are kept at every rank because they are aggregated up the tree
/// before any rank filtering happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    Profiling,
    Binning,
}

/// What an input row tells us about its taxon.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxonQuery<'a> {
    pub taxid: Option<TaxId>,
    pub name: Option<&'a str>,
    pub rank: Option<Rank>,
}

impl<'a> TaxonQuery<'a> {
    pub fn by_id(taxid: TaxId) -> Self {
        TaxonQuery {
            taxid: Some(taxid),
            ..Default::default()
        }
    }

    pub fn by_name(name: &'a str, rank: Rank) -> Self {
        TaxonQuery {
            taxid: None,
            name: Some(name),
            rank: Some(rank),
        }
    }
}

/// Split a `.dmp` line into its `\t|\t` separated fields.
fn split_dmp_line(line: &str) -> Vec<&str> {
    line.trim_end_matches(|c| c == '\t' || c == '|' || c == '\n' || c == '\r')
        .split("\t|\t")
        .collect()
}

fn parse_taxid(field: &str, path: &Path, line: usize, what: &str) -> Result<TaxId> {
    field
        .trim()
        .parse::<TaxId>()
        .map_err(|_| MergeError::parse(path, line, format!("invalid {} `{}`", what, field)))
}

/// Parse the NCBI taxonomy nodes file
///
/// # Arguments
///
/// * `nodes_filename` - Path to nodes.dmp
///
/// # Returns
///
/// A HashMap of node ID to its parent and rank. Names are filled in later
/// from names.dmp.
pub fn parse_nodes_file<P: AsRef<Path>>(nodes_filename: P) -> Result<HashMap<TaxId, TaxonNode>> {
    let path = nodes_filename.as_ref();
    let mut nodes = HashMap::new();

    for line in read_lines(path)? {
        let (line_no, line) = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = split_dmp_line(&line);
        if fields.len() < 3 {
            return Err(MergeError::parse(path, line_no, "expected at least 3 fields"));
        }

        let node_id = parse_taxid(fields[0], path, line_no, "node id")?;
        let parent_id = parse_taxid(fields[1], path, line_no, "parent id")?;
        nodes.insert(node_id, TaxonNode::new(parent_id, fields[2]));
    }

    Ok(nodes)
}

/// Parse merged.dmp into a map of retired id to current id.
pub fn parse_merged_file<P: AsRef<Path>>(merged_filename: P) -> Result<HashMap<TaxId, TaxId>> {
    let path = merged_filename.as_ref();
    let mut merged = HashMap::new();

    for line in read_lines(path)? {
        let (line_no, line) = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = split_dmp_line(&line);
        if fields.len() < 2 {
            return Err(MergeError::parse(path, line_no, "expected 2 fields"));
        }
        let old_id = parse_taxid(fields[0], path, line_no, "old taxid")?;
        let new_id = parse_taxid(fields[1], path, line_no, "new taxid")?;
        merged.insert(old_id, new_id);
    }

    Ok(merged)
}

/// Parse the NCBI taxonomy names file
///
/// # Arguments
///
/// * `names_filename` - Path to names.dmp
///
/// # Returns
///
/// Every name row, in file order, flagged scientific or not.
pub fn parse_names_file<P: AsRef<Path>>(names_filename: P) -> Result<Vec<NameRecord>> {
    let path = names_filename.as_ref();
    let mut names = Vec::new();

    for line in read_lines(path)? {
        let (line_no, line) = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = split_dmp_line(&line);
        if fields.len() < 4 {
            return Err(MergeError::parse(path, line_no, "expected 4 fields"));
        }
        let taxid = parse_taxid(fields[0], path, line_no, "taxid")?;
        names.push(NameRecord::new(
            taxid,
            fields[1],
            fields[3] == SCIENTIFIC_NAME,
        ));
    }

    Ok(names)
}

/// Read-only snapshot of the NCBI taxonomy used for one merge run.
#[derive(Debug, Default)]
pub struct Taxonomy {
    nodes: HashMap<TaxId, TaxonNode>,
    merged: HashMap<TaxId, TaxId>,
    scientific_names: NameIndex,
    other_names: NameIndex,
}

impl Taxonomy {
    /// Load nodes.dmp, names.dmp and merged.dmp.
    pub fn from_ncbi<P: AsRef<Path>>(
        nodes_filename: P,
        names_filename: P,
        merged_filename: P,
    ) -> Result<Self> {
        let nodes = parse_nodes_file(nodes_filename)?;
        let merged = parse_merged_file(merged_filename)?;
        let names = parse_names_file(names_filename)?;
        Ok(Self::from_tables(nodes, merged, names))
    }

    /// Build the taxonomy from already parsed tables.
    pub fn from_tables(
        mut nodes: HashMap<TaxId, TaxonNode>,
        merged: HashMap<TaxId, TaxId>,
        names: Vec<NameRecord>,
    ) -> Self {
        let mut scientific_names = NameIndex::new();
        let mut other_names = NameIndex::new();

        for record in names {
            let node = match nodes.get_mut(&record.taxid) {
                Some(node) => node,
                None => {
                    log::debug!("name `{}` for unknown taxid {}", record.name, record.taxid);
                    continue;
                }
            };

            if record.scientific || node.name.is_empty() {
                node.name = record.name.clone();
            }

            let rank = match node.rank() {
                Some(rank) => rank,
                None => continue,
            };
            let index = if record.scientific {
                &mut scientific_names
            } else {
                &mut other_names
            };
            let ids = index.entry((record.name, rank)).or_insert_with(Vec::new);
            if !ids.is_empty() {
                log::debug!(
                    "repeated {} name at rank {}: taxid {} and {:?}",
                    if record.scientific { "scientific" } else { "other" },
                    rank,
                    record.taxid,
                    ids
                );
            }
            ids.push(record.taxid);
        }

        Taxonomy {
            nodes,
            merged,
            scientific_names,
            other_names,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn merged_count(&self) -> usize {
        self.merged.len()
    }

    pub fn node(&self, taxid: TaxId) -> Option<&TaxonNode> {
        self.nodes.get(&taxid)
    }

    pub fn contains(&self, taxid: TaxId) -> bool {
        self.nodes.contains_key(&taxid)
    }

    pub fn name(&self, taxid: TaxId) -> &str {
        self.nodes.get(&taxid).map_or("", |n| n.name.as_str())
    }

    pub fn rank(&self, taxid: TaxId) -> Option<Rank> {
        self.nodes.get(&taxid).and_then(|n| n.rank())
    }

    /// Current id for a retired one, if merged.dmp lists it.
    pub fn remapped(&self, taxid: TaxId) -> Option<TaxId> {
        self.merged.get(&taxid).copied()
    }

    fn lookup_name(&self, index: &NameIndex, name: &str, rank: Rank, kind: &str) -> Option<TaxId> {
        match index.get(&(name.to_string(), rank)).map(|ids| ids.as_slice()) {
            Some([taxid]) => Some(*taxid),
            Some(ids) if ids.len() > 1 => {
                log::warn!(
                    "ambiguous {} name [{}] rank [{}] matches taxids {:?}",
                    kind,
                    name,
                    rank,
                    ids
                );
                None
            }
            _ => None,
        }
    }

    /// Map an input row's (id, name, rank) to a current taxid.
    ///
    /// Tries, in order: the id as is, the id through merged.dmp, a unique
    /// scientific name at the rank, a unique alternate name at the rank.
    /// Returns `None` when nothing matches; the caller drops the row.
    pub fn resolve(&self, query: &TaxonQuery, ranks: &Ranks, mode: ResolveMode) -> Option<TaxId> {
        if let Some(taxid) = query.taxid {
            if self.nodes.contains_key(&taxid) {
                return Some(taxid);
            }

            if let Some(new_taxid) = self.remapped(taxid) {
                let node = match self.nodes.get(&new_taxid) {
                    Some(node) => node,
                    None => {
                        log::warn!(
                            "merged taxid [{}] -> [{}] which is not in nodes",
                            taxid,
                            new_taxid
                        );
                        return None;
                    }
                };
                log::warn!(
                    "merged taxid [{}] -> [{}] rank [{}]",
                    taxid,
                    new_taxid,
                    node.rank
                );
                if mode == ResolveMode::Profiling && !ranks.contains_str(&node.rank) {
                    log::debug!(
                        "Ignored entry [{}] rank [{}] - Rank not expected",
                        taxid,
                        node.rank
                    );
                    return None;
                }
                return Some(new_taxid);
            }
        }

        let (name, rank) = match (query.name, query.rank) {
            (Some(name), Some(rank)) => (name, rank),
            _ => return None,
        };

        self.lookup_name(&self.scientific_names, name, rank, "scientific")
            .or_else(|| self.lookup_name(&self.other_names, name, rank, "other"))
    }

    /// Visit `taxid` and each of its ancestors up to and including the root.
    ///
    /// Fails when a parent is missing from the node table or when the chain
    /// is longer than the table (a cycle).
    pub fn walk_to_root<F>(&self, taxid: TaxId, mut visit: F) -> Result<()>
    where
        F: FnMut(TaxId, &TaxonNode),
    {
        let mut current = taxid;
        let mut node = self
            .nodes
            .get(&current)
            .ok_or(MergeError::UnknownTaxon { taxid })?;

        for _ in 0..=self.nodes.len() {
            visit(current, node);
            if current == ROOT {
                return Ok(());
            }
            let parent = node.parent_id;
            node = self.nodes.get(&parent).ok_or(MergeError::DanglingParent {
                taxid: current,
                parent,
            })?;
            current = parent;
        }

        Err(MergeError::UnterminatedLineage { taxid })
    }

    /// Lineage of `taxid`, root excluded, coarsest first.
    pub fn lineage(&self, taxid: TaxId) -> Result<Vec<TaxId>> {
        let mut path = Vec::new();
        self.walk_to_root(taxid, |id, _| {
            if id != ROOT {
                path.push(id)
            }
        })?;
        path.reverse();
        Ok(path)
    }

    /// Sum values at their taxa and propagate each one to every ancestor.
    ///
    /// The root's total equals the sum of all inputs.
    pub fn clade_totals<V>(&self, counts: &HashMap<TaxId, V>) -> Result<HashMap<TaxId, V>>
    where
        V: Copy + Default + AddAssign,
    {
        let mut clade_counts: HashMap<TaxId, V> = HashMap::new();
        for (&taxid, &count) in counts {
            self.walk_to_root(taxid, |id, _| {
                *clade_counts.entry(id).or_default() += count;
            })?;
        }
        Ok(clade_counts)
    }
}
