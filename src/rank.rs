use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Taxonomic ranks considered by the merge, from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Superkingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Superkingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Superkingdom => "superkingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    /// One letter prefix used in lineage strings (`d__Bacteria|p__...`).
    pub fn code(&self) -> char {
        match self {
            Rank::Superkingdom => 'd',
            Rank::Phylum => 'p',
            Rank::Class => 'c',
            Rank::Order => 'o',
            Rank::Family => 'f',
            Rank::Genus => 'g',
            Rank::Species => 's',
        }
    }

    /// Parse a rank as written in nodes.dmp; `None` for ranks outside the hierarchy.
    pub fn from_ncbi(rank: &str) -> Option<Rank> {
        rank.parse().ok()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "superkingdom" => Ok(Rank::Superkingdom),
            "phylum" => Ok(Rank::Phylum),
            "class" => Ok(Rank::Class),
            "order" => Ok(Rank::Order),
            "family" => Ok(Rank::Family),
            "genus" => Ok(Rank::Genus),
            "species" => Ok(Rank::Species),
            other => Err(MergeError::InvalidConfig(format!(
                "unknown rank `{}`",
                other
            ))),
        }
    }
}

/// The active rank list. A rank id is the position of the rank in the
/// declared order, and every per-rank iteration follows that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranks {
    ranks: Vec<Rank>,
}

impl Ranks {
    pub fn new(ranks: Vec<Rank>) -> Result<Self> {
        if ranks.is_empty() {
            return Err(MergeError::InvalidConfig("empty rank list".to_string()));
        }
        for (i, rank) in ranks.iter().enumerate() {
            if ranks[..i].contains(rank) {
                return Err(MergeError::InvalidConfig(format!(
                    "rank `{}` listed more than once",
                    rank
                )));
            }
        }
        Ok(Ranks { ranks })
    }

    /// The full hierarchy, coarsest first.
    pub fn all() -> Self {
        Ranks {
            ranks: Rank::ALL.to_vec(),
        }
    }

    /// Parse a comma separated list. `off` and `all` select the full hierarchy.
    pub fn parse_list(list: &str) -> Result<Self> {
        let list = list.trim();
        if list.is_empty() || list == "off" || list == "all" {
            return Ok(Ranks::all());
        }
        let ranks = list
            .split(',')
            .map(|r| r.trim().parse::<Rank>())
            .collect::<Result<Vec<_>>>()?;
        Ranks::new(ranks)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn rank_id(&self, rank: Rank) -> Option<usize> {
        self.ranks.iter().position(|&r| r == rank)
    }

    pub fn rank(&self, rank_id: usize) -> Option<Rank> {
        self.ranks.get(rank_id).copied()
    }

    pub fn name(&self, rank_id: usize) -> &'static str {
        self.rank(rank_id).map_or("unknown", |r| r.as_str())
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.ranks.contains(&rank)
    }

    /// Membership test on a raw rank string as found in nodes.dmp.
    pub fn contains_str(&self, rank: &str) -> bool {
        Rank::from_ncbi(rank).map_or(false, |r| self.contains(r))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Rank)> + '_ {
        self.ranks.iter().copied().enumerate()
    }

    /// Finest (deepest) active rank.
    pub fn finest(&self) -> Rank {
        // non-empty by construction
        self.ranks.iter().copied().max().unwrap_or(Rank::Species)
    }

    /// True when some rank of the full hierarchy is not active.
    pub fn is_partial(&self) -> bool {
        self.ranks.len() < Rank::ALL.len()
    }

    /// Ranks of the full hierarchy that are not active, coarsest first.
    pub fn missing(&self) -> Vec<Rank> {
        Rank::ALL
            .iter()
            .copied()
            .filter(|r| !self.contains(*r))
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.ranks.iter().map(|r| r.as_str()).collect()
    }
}

impl fmt::Display for Ranks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ids_follow_declared_order() {
        let ranks = Ranks::parse_list("species, genus").unwrap();
        assert_eq!(ranks.rank_id(Rank::Species), Some(0));
        assert_eq!(ranks.rank_id(Rank::Genus), Some(1));
        assert_eq!(ranks.rank_id(Rank::Family), None);
        assert_eq!(ranks.finest(), Rank::Species);
        assert!(ranks.is_partial());
        assert_eq!(ranks.missing().first(), Some(&Rank::Superkingdom));
        assert_eq!(ranks.missing().len(), 5);
    }

    #[test]
    fn test_off_selects_full_hierarchy() {
        let ranks = Ranks::parse_list("off").unwrap();
        assert_eq!(ranks, Ranks::all());
        assert!(!ranks.is_partial());
        assert!(ranks.missing().is_empty());
    }

    #[test]
    fn test_rejects_unknown_and_repeated_ranks() {
        assert!(Ranks::parse_list("species,strain").is_err());
        assert!(Ranks::parse_list("genus,genus").is_err());
        assert!(!Ranks::all().contains_str("no rank"));
        assert!(Ranks::all().contains_str("phylum"));
    }
}
