use crate::consensus::{per_tool_abundance, ConsensusResult, ProfileEntry};
use crate::error::{MergeError, Result};
use crate::rank::Rank;
use crate::reference::ReferenceProfile;
use crate::taxonomy::Taxonomy;
use crate::tool::ToolProfile;
use crate::TaxId;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const BIOBOXES_VERSION: &str = "0.9.1";

/// Layout of the merged profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// rank, name, abundance
    #[default]
    Tsv,
    /// CAMI profiling format with lineages
    Bioboxes,
    /// array of entries
    Json,
}

/// Writes a line in the flat tsv report
///
/// # Arguments
///
/// * `writer` - Destination
/// * `entry` - Merged taxon
fn print_tsv_report_line<W: Write>(writer: &mut W, entry: &ProfileEntry) -> io::Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{:.16}",
        entry.rank, entry.name, entry.abundance
    )
}

/// Flat `rank \t name \t abundance` report, one line per entry.
pub fn write_tsv<W: Write>(writer: &mut W, entries: &[ProfileEntry]) -> io::Result<()> {
    for entry in entries {
        print_tsv_report_line(writer, entry)?;
    }
    Ok(())
}

/// Ranked lineage of a taxon: the (taxid, name) of each ancestor whose rank is
/// in the hierarchy, coarsest first, the taxon itself included.
pub fn ranked_lineage(taxonomy: &Taxonomy, taxid: TaxId) -> Result<Vec<(TaxId, String)>> {
    Ok(taxonomy
        .lineage(taxid)?
        .into_iter()
        .filter(|&id| taxonomy.rank(id).is_some())
        .map(|id| (id, taxonomy.name(id).to_string()))
        .collect())
}

/// CAMI bioboxes profiling report.
///
/// # Arguments
///
/// * `writer` - Destination
/// * `sample_id` - Value of the `@SampleID` header
/// * `entries` - Merged taxa in output order
/// * `taxonomy` - Used to build `TAXPATH` and `TAXPATHSN`
pub fn write_bioboxes<W: Write>(
    writer: &mut W,
    sample_id: &str,
    entries: &[ProfileEntry],
    taxonomy: &Taxonomy,
) -> Result<()> {
    let ranks: Vec<&str> = Rank::ALL.iter().map(|r| r.as_str()).collect();
    let io_err = |e| MergeError::io(sample_id, e);

    writeln!(writer, "@SampleID:{}", sample_id).map_err(io_err)?;
    writeln!(writer, "@Version:{}", BIOBOXES_VERSION).map_err(io_err)?;
    writeln!(writer, "@Ranks:{}", ranks.join("|")).map_err(io_err)?;
    writeln!(writer).map_err(io_err)?;
    writeln!(writer, "@@TAXID\tRANK\tTAXPATH\tTAXPATHSN\tPERCENTAGE").map_err(io_err)?;

    for entry in entries {
        let lineage = ranked_lineage(taxonomy, entry.taxid)?;
        let taxpath: Vec<String> = lineage.iter().map(|(id, _)| id.to_string()).collect();
        let taxpathsn: Vec<&str> = lineage.iter().map(|(_, name)| name.as_str()).collect();
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{:.16}",
            entry.taxid,
            entry.rank,
            taxpath.join("|"),
            taxpathsn.join("|"),
            entry.abundance * 100.0
        )
        .map_err(io_err)?;
    }
    Ok(())
}

pub fn write_json<W: Write>(writer: &mut W, entries: &[ProfileEntry]) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, entries)?;
    writeln!(writer)
}

/// Merged abundance next to what each tool reported for the same taxon.
///
/// Tool columns hold the tool's normalized abundance, `0` when only the tool's
/// reference has the taxon, `-1` when the reference does not have it either.
pub fn write_detailed<W: Write>(
    writer: &mut W,
    entries: &[ProfileEntry],
    tools: &[ToolProfile],
    references: &[ReferenceProfile],
) -> io::Result<()> {
    let idents: Vec<&str> = tools.iter().map(|t| t.ident()).collect();
    writeln!(
        writer,
        "rank\ttaxid\tname\tmetametamerge\t{}",
        idents.join("\t")
    )?;
    for entry in entries {
        let values: Vec<String> = per_tool_abundance(entry.taxid, tools, references)
            .into_iter()
            .map(|v| {
                if v > 0.0 {
                    format!("{:.16}", v)
                } else {
                    v.to_string()
                }
            })
            .collect();
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.16}\t{}",
            entry.rank,
            entry.taxid,
            entry.name,
            entry.abundance,
            values.join("\t")
        )?;
    }
    Ok(())
}

/// Path of the detailed table written next to `output`.
pub fn detailed_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".detailed");
    PathBuf::from(name)
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| MergeError::io(path, e))
}

/// Write the merged profile to `output`, or to stdout when `output` is `None`.
pub fn write_report(
    output: Option<&Path>,
    format: OutputFormat,
    result: &ConsensusResult,
    taxonomy: &Taxonomy,
) -> Result<()> {
    let entries = result.entries(taxonomy);
    let sample_id = output
        .and_then(|p| p.file_stem())
        .map_or_else(|| "metametamerge".to_string(), |s| s.to_string_lossy().into_owned());
    let target = output.map_or_else(|| PathBuf::from("<stdout>"), Path::to_path_buf);

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(create_writer(path)?),
        None => Box::new(io::stdout().lock()),
    };

    match format {
        OutputFormat::Tsv => {
            write_tsv(&mut writer, &entries).map_err(|e| MergeError::io(&target, e))?
        }
        OutputFormat::Json => {
            write_json(&mut writer, &entries).map_err(|e| MergeError::io(&target, e))?
        }
        OutputFormat::Bioboxes => write_bioboxes(&mut writer, &sample_id, &entries, taxonomy)?,
    }
    writer.flush().map_err(|e| MergeError::io(&target, e))
}

/// Write the per-tool comparison table to `<output>.detailed`.
pub fn write_detailed_report(
    output: &Path,
    result: &ConsensusResult,
    taxonomy: &Taxonomy,
    tools: &[ToolProfile],
    references: &[ReferenceProfile],
) -> Result<PathBuf> {
    let path = detailed_path(output);
    let mut writer = create_writer(&path)?;
    write_detailed(&mut writer, &result.entries(taxonomy), tools, references)
        .and_then(|_| writer.flush())
        .map_err(|e| MergeError::io(&path, e))?;
    Ok(path)
}
