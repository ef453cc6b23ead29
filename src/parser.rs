use crate::error::{MergeError, Result};
use crate::profile::{ProfileRow, ProfileTable};
use crate::rank::{Rank, Ranks};
use crate::taxonomy::{ResolveMode, TaxonQuery, Taxonomy};
use crate::tool::Method;
use crate::utils::{dyn_reader, read_lines};
use crate::TaxId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::BufRead;
use std::path::Path;

/// Layout of a tool output or database profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// plain tab separated columns
    Tsv,
    /// CAMI bioboxes, `@`/`#` header lines
    Bioboxes,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputFormat::Tsv => "tsv",
            InputFormat::Bioboxes => "BioBoxes",
        })
    }
}

/// Bioboxes files start with a `@` or `#` header line.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<InputFormat> {
    let mut reader = dyn_reader(&path)?;
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .map_err(|e| MergeError::io(path.as_ref(), e))?;
    if first_line.starts_with('@') || first_line.starts_with('#') {
        Ok(InputFormat::Bioboxes)
    } else {
        Ok(InputFormat::Tsv)
    }
}

fn is_header(line: &str) -> bool {
    line.is_empty() || line.starts_with('@') || line.starts_with('#')
}

/// Rows seen and dropped for one rank of one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankCount {
    pub total: usize,
    pub ignored: usize,
}

/// Per-rank counts keyed by the rank string found in the file.
#[derive(Debug, Clone, Default)]
pub struct ParseStats {
    counts: BTreeMap<String, RankCount>,
}

impl ParseStats {
    fn seen(&mut self, rank: &str) {
        self.counts.entry(rank.to_string()).or_default().total += 1;
    }

    fn ignored(&mut self, rank: &str) {
        self.counts.entry(rank.to_string()).or_default().ignored += 1;
    }

    pub fn get(&self, rank: &str) -> RankCount {
        self.counts.get(rank).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts.values().map(|c| c.total).sum()
    }

    pub fn ignored_total(&self) -> usize {
        self.counts.values().map(|c| c.ignored).sum()
    }

    fn log(&self, ranks: &Ranks) {
        for rank in ranks.names() {
            let count = self.get(rank);
            log::info!(
                "\t{} - total: {} ignored: {}",
                rank,
                count.total,
                count.ignored
            );
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    field: &str,
    path: &Path,
    line: usize,
    what: &str,
) -> Result<T> {
    field
        .trim()
        .parse::<T>()
        .map_err(|_| MergeError::parse(path, line, format!("invalid {} `{}`", what, field)))
}

/// Abundances, percentages and reference lengths must be finite and non-negative.
fn parse_abundance(field: &str, path: &Path, line: usize, what: &str) -> Result<f64> {
    let value: f64 = parse_number(field, path, line, what)?;
    if !value.is_finite() || value < 0.0 {
        return Err(MergeError::parse(
            path,
            line,
            format!("{} must be a finite non-negative number, got `{}`", what, field),
        ));
    }
    Ok(value)
}

/// One profiling row before resolution.
struct RawProfileRow<'a> {
    rank: &'a str,
    taxid: Option<TaxId>,
    name: &'a str,
    abundance: f64,
}

fn split_profiling_tsv<'a>(line: &'a str, path: &Path, line_no: usize) -> Result<RawProfileRow<'a>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 {
        return Err(MergeError::parse(
            path,
            line_no,
            format!("expected 3 columns (rank, name or taxid, abundance), found {}", fields.len()),
        ));
    }
    let name_taxid = fields[1];
    Ok(RawProfileRow {
        rank: fields[0],
        taxid: name_taxid.parse::<TaxId>().ok(),
        name: name_taxid,
        abundance: parse_abundance(fields[2], path, line_no, "abundance")?,
    })
}

fn split_profiling_bioboxes<'a>(
    line: &'a str,
    path: &Path,
    line_no: usize,
) -> Result<RawProfileRow<'a>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return Err(MergeError::parse(
            path,
            line_no,
            format!(
                "expected 5 columns (taxid, rank, taxpath, taxpathsn, percentage), found {}",
                fields.len()
            ),
        ));
    }
    // strains such as `103731.1` are not numeric and fall back to the name
    Ok(RawProfileRow {
        rank: fields[1],
        taxid: fields[0].parse::<TaxId>().ok(),
        name: fields[3].rsplit('|').next().unwrap_or(""),
        abundance: parse_abundance(fields[4], path, line_no, "percentage")?,
    })
}

/// Parse a profiling result or a database profile into a table over `ranks`.
///
/// Rows at ranks outside `ranks` and rows whose taxon cannot be resolved are
/// dropped and counted.
pub fn parse_profile<P: AsRef<Path>>(
    path: P,
    taxonomy: &Taxonomy,
    ranks: &Ranks,
) -> Result<ProfileTable> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    log::info!("{} ({})", path.display(), format);

    let mut stats = ParseStats::default();
    let mut rows = Vec::new();

    for line in read_lines(path)? {
        let (line_no, line) = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        let raw = match format {
            InputFormat::Bioboxes if is_header(line) => continue,
            InputFormat::Bioboxes => split_profiling_bioboxes(line, path, line_no)?,
            InputFormat::Tsv if line.is_empty() => continue,
            InputFormat::Tsv => split_profiling_tsv(line, path, line_no)?,
        };
        stats.seen(raw.rank);

        let (rank_id, rank) = match Rank::from_ncbi(raw.rank)
            .and_then(|rank| ranks.rank_id(rank).map(|id| (id, rank)))
        {
            Some(found) => found,
            None => {
                log::debug!(
                    "Ignored entry [{}] rank [{}] - Rank not expected",
                    raw.name,
                    raw.rank
                );
                stats.ignored(raw.rank);
                continue;
            }
        };

        let query = TaxonQuery {
            taxid: raw.taxid,
            name: Some(raw.name),
            rank: Some(rank),
        };
        match taxonomy.resolve(&query, ranks, ResolveMode::Profiling) {
            Some(taxid) => rows.push((rank_id, ProfileRow::new(1, taxid, raw.abundance))),
            None => {
                log::debug!(
                    "Ignored entry [{}] rank [{}] - Name not found",
                    raw.name,
                    raw.rank
                );
                stats.ignored(raw.rank);
            }
        }
    }

    stats.log(ranks);
    log::info!(
        "\t{} rows read, {} ignored",
        stats.total(),
        stats.ignored_total()
    );
    Ok(ProfileTable::from_rows(ranks, rows))
}

/// Parse `sequence-id \t taxid \t length` rows into resolved (taxid, length)
/// pairs, in file order.
pub fn parse_binning<P: AsRef<Path>>(path: P, taxonomy: &Taxonomy) -> Result<Vec<(TaxId, u64)>> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    log::info!("{} ({})", path.display(), format);

    let mut assignments = Vec::new();
    let mut ignored = 0usize;
    for line in read_lines(path)? {
        let (line_no, line) = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        if is_header(line) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(MergeError::parse(
                path,
                line_no,
                format!(
                    "expected 3 columns (sequence id, taxid, length), found {}",
                    fields.len()
                ),
            ));
        }
        let taxid: TaxId = parse_number(fields[1], path, line_no, "taxid")?;
        let length: u64 = parse_number(fields[2], path, line_no, "length")?;

        match taxonomy.resolve(&TaxonQuery::by_id(taxid), &Ranks::all(), ResolveMode::Binning) {
            Some(taxid) => assignments.push((taxid, length)),
            None => {
                log::debug!(
                    "Taxid not found - ignoring entry [{}] taxid [{}]",
                    fields[0],
                    taxid
                );
                ignored += 1;
            }
        }
    }

    log::info!(
        "\t{} binned sequences, {} ignored",
        assignments.len() + ignored,
        ignored
    );
    Ok(assignments)
}

/// Turn binned lengths into a profile: lengths are summed per taxon, carried
/// up to every ancestor, and only taxa at an active rank are kept.
///
/// A taxon whose lineage is broken (missing parent, no path to the root) is
/// dropped with a warning; the other taxa are unaffected.
pub fn binning_to_profile(
    assignments: &[(TaxId, u64)],
    taxonomy: &Taxonomy,
    ranks: &Ranks,
) -> Result<ProfileTable> {
    let mut lengths: HashMap<TaxId, u64> = HashMap::new();
    for &(taxid, length) in assignments {
        *lengths.entry(taxid).or_insert(0) += length;
    }
    lengths.retain(|&taxid, &mut length| match taxonomy.walk_to_root(taxid, |_, _| {}) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("ignoring {} binned bases of taxon {}: {}", length, taxid, e);
            false
        }
    });
    let totals = taxonomy.clade_totals(&lengths)?;

    let mut entries: Vec<(TaxId, u64)> = totals.into_iter().collect();
    entries.sort_unstable_by_key(|&(taxid, _)| taxid);

    let rows = entries.into_iter().filter_map(|(taxid, length)| {
        taxonomy
            .rank(taxid)
            .and_then(|rank| ranks.rank_id(rank))
            .map(|rank_id| (rank_id, ProfileRow::new(1, taxid, length as f64)))
    });
    let table = ProfileTable::from_rows(ranks, rows);
    for (rank_id, partition) in table.iter() {
        log::info!("\t{} - {} taxons", ranks.name(rank_id), partition.size());
    }
    Ok(table)
}

/// Parse one tool output according to its method.
pub fn parse_input<P: AsRef<Path>>(
    path: P,
    method: Method,
    taxonomy: &Taxonomy,
    ranks: &Ranks,
) -> Result<ProfileTable> {
    match method {
        Method::Profiling => parse_profile(path, taxonomy, ranks),
        Method::Binning => {
            let assignments = parse_binning(path, taxonomy)?;
            binning_to_profile(&assignments, taxonomy, ranks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::tests::sample_taxonomy;
    use crate::taxonomy::{NameRecord, TaxonNode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_detect_format() {
        let tsv = write_file("species\t10\t0.5\n");
        let bb = write_file("@SampleID:x\n@@TAXID\tRANK\tTAXPATH\tTAXPATHSN\tPERCENTAGE\n");
        let hash = write_file("# comment\n");
        assert_eq!(detect_format(tsv.path()).unwrap(), InputFormat::Tsv);
        assert_eq!(detect_format(bb.path()).unwrap(), InputFormat::Bioboxes);
        assert_eq!(detect_format(hash.path()).unwrap(), InputFormat::Bioboxes);
    }

    #[test]
    fn test_profiling_tsv_resolution() {
        let taxo = sample_taxonomy();
        let ranks = Ranks::parse_list("genus,species").unwrap();
        let file = write_file(
            "species\t10\t40.0\n\
             species\tEscherichia albertii\t20.0\n\
             species\t99\t10.0\n\
             species\tE. sp\t5.0\n\
             genus\t7\t70.0\n\
             family\t6\t100.0\n\
             species\tBacillus coli\t1.0\n",
        );
        let table = parse_profile(file.path(), &taxo, &ranks).unwrap();
        // 99 is merged into 10, `E. sp` is ambiguous, family is not active
        assert_eq!(table.partition(1).unwrap().taxids(), vec![10, 11, 10, 10]);
        assert_eq!(table.partition(0).unwrap().taxids(), vec![7]);
        assert_eq!(table.partition(1).unwrap().rows()[3].abundance, 1.0);
    }

    #[test]
    fn test_merged_taxid_with_inactive_rank_is_dropped() {
        let taxo = sample_taxonomy();
        let ranks = Ranks::parse_list("species").unwrap();
        // 98 -> 7 (genus), not active
        let file = write_file("species\t98\t1.0\n");
        let table = parse_profile(file.path(), &taxo, &ranks).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_profiling_bioboxes() {
        let taxo = sample_taxonomy();
        let ranks = Ranks::parse_list("species").unwrap();
        let file = write_file(
            "@SampleID:sample\n\
             @Version:0.9.1\n\
             @Ranks:superkingdom|phylum|class|order|family|genus|species\n\
             \n\
             @@TAXID\tRANK\tTAXPATH\tTAXPATHSN\tPERCENTAGE\n\
             10\tspecies\t2|3|4|5|6|7|10\tBacteria|x|x|x|x|Escherichia|Escherichia coli\t60.0\n\
             103731.1\tspecies\t2|3|4|5|6|7|11\tBacteria|x|x|x|x|Escherichia|Escherichia albertii\t30.0\n\
             7\tgenus\t2|3|4|5|6|7\tBacteria|x|x|x|x|Escherichia\t90.0\n",
        );
        let table = parse_profile(file.path(), &taxo, &ranks).unwrap();
        assert_eq!(table.partition(0).unwrap().taxids(), vec![10, 11]);
        assert_eq!(table.partition(0).unwrap().rows()[1].abundance, 30.0);
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let taxo = sample_taxonomy();
        let ranks = Ranks::parse_list("species").unwrap();
        let file = write_file("species\t10\t0.5\nspecies\t11\tlots\n");
        let err = parse_profile(file.path(), &taxo, &ranks).unwrap_err();
        assert!(matches!(err, MergeError::Parse { line: 2, .. }));

        let file = write_file("species\t10\n");
        let err = parse_profile(file.path(), &taxo, &ranks).unwrap_err();
        assert!(matches!(err, MergeError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_parse_stats_totals() {
        let mut stats = ParseStats::default();
        stats.seen("species");
        stats.seen("species");
        stats.seen("family");
        stats.ignored("family");
        assert_eq!(stats.get("species"), RankCount { total: 2, ignored: 0 });
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.ignored_total(), 1);
    }

    #[test]
    fn test_non_finite_or_negative_abundance_is_rejected() {
        let taxo = sample_taxonomy();
        let ranks = Ranks::parse_list("species").unwrap();
        for bad in ["nan", "inf", "-0.5"] {
            let file = write_file(&format!("species\t10\t{}\nspecies\t11\t1.0\n", bad));
            let err = parse_profile(file.path(), &taxo, &ranks).unwrap_err();
            assert!(matches!(err, MergeError::Parse { line: 1, .. }), "{}", bad);
        }

        let file = write_file(
            "@SampleID:x\n\
             @@TAXID\tRANK\tTAXPATH\tTAXPATHSN\tPERCENTAGE\n\
             10\tspecies\t2|3|4|5|6|7|10\tBacteria|x|x|x|x|Escherichia|Escherichia coli\tNaN\n",
        );
        let err = parse_profile(file.path(), &taxo, &ranks).unwrap_err();
        assert!(matches!(err, MergeError::Parse { line: 3, .. }));

        // zero stays a valid abundance
        let file = write_file("species\t10\t0\n");
        let table = parse_profile(file.path(), &taxo, &ranks).unwrap();
        assert_eq!(table.partition(0).unwrap().rows()[0].abundance, 0.0);
    }

    #[test]
    fn test_binning_broken_lineage_drops_only_that_taxon() {
        let mut nodes = HashMap::new();
        nodes.insert(1, TaxonNode::new(1, "no rank"));
        nodes.insert(2, TaxonNode::new(1, "superkingdom"));
        nodes.insert(10, TaxonNode::new(2, "species"));
        nodes.insert(50, TaxonNode::new(4040, "species"));
        let names = vec![
            NameRecord::new(2, "Bacteria", true),
            NameRecord::new(10, "Escherichia coli", true),
            NameRecord::new(50, "Orphan", true),
        ];
        let taxo = Taxonomy::from_tables(nodes, HashMap::new(), names);
        let ranks = Ranks::parse_list("superkingdom,species").unwrap();
        let file = write_file("r1\t10\t100\nr2\t50\t5\n");

        let table = parse_input(file.path(), Method::Binning, &taxo, &ranks).unwrap();
        let superkingdom = table.partition(0).unwrap();
        assert_eq!(superkingdom.taxids(), vec![2]);
        assert_eq!(superkingdom.rows()[0].abundance, 100.0);
        let species = table.partition(1).unwrap();
        assert_eq!(species.taxids(), vec![10]);
        assert_eq!(species.rows()[0].abundance, 100.0);

        // the strict propagation still refuses the broken lineage
        let lengths: HashMap<TaxId, u64> = [(10, 100), (50, 5)].into_iter().collect();
        assert!(matches!(
            taxo.clade_totals(&lengths),
            Err(MergeError::DanglingParent { taxid: 50, parent: 4040 })
        ));
    }

    #[test]
    fn test_binning_parse_and_conversion() {
        let taxo = sample_taxonomy();
        let file = write_file(
            "read1\t10\t100\n\
             read2\t11\t50\n\
             read3\t100\t25\n\
             read4\t99\t25\n\
             read5\t12345\t1000\n",
        );
        let assignments = parse_binning(file.path(), &taxo).unwrap();
        assert_eq!(assignments, vec![(10, 100), (11, 50), (100, 25), (10, 25)]);

        let ranks = Ranks::parse_list("genus,species").unwrap();
        let table = binning_to_profile(&assignments, &taxo, &ranks).unwrap();
        let genus = table.partition(0).unwrap();
        assert_eq!(genus.taxids(), vec![7]);
        assert_eq!(genus.rows()[0].abundance, 200.0);
        let species = table.partition(1).unwrap();
        assert_eq!(species.taxids(), vec![10, 11]);
        // 100 (no rank) rolls into 10
        assert_eq!(species.column(crate::profile::Column::Abundance), vec![150.0, 50.0]);
    }

    #[test]
    fn test_binning_bioboxes_skips_headers() {
        let taxo = sample_taxonomy();
        let file = write_file(
            "@Version:0.9.1\n@@SEQUENCEID\tTAXID\tLENGTH\nr1\t10\t10\n\nr2\t7\t5\n",
        );
        let table = parse_input(
            file.path(),
            Method::Binning,
            &taxo,
            &Ranks::parse_list("superkingdom").unwrap(),
        )
        .unwrap();
        assert_eq!(table.partition(0).unwrap().rows()[0].abundance, 15.0);
    }
}
