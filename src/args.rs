use crate::consensus::{CutoffMode, MergeConfig};
use crate::error::{MergeError, Result};
use crate::rank::Ranks;
use crate::report::OutputFormat;
use crate::tool::{AbundanceCutoff, Method};
use crate::utils::parse_comma_separated_list;
use clap::Parser;
use std::path::PathBuf;

/// One tool: its result file, its database profile, its identifier and method.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInput {
    pub ident: String,
    pub method: Method,
    pub input: PathBuf,
    pub database: PathBuf,
}

/// Command line arguments for the merge.
///
/// Input files, database profiles, tool identifiers and methods are matched
/// by position.
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about = "Merge taxonomic profiles from several metagenomic tools into one consensus profile",
    long_about = "Merge taxonomic profiles from several metagenomic tools into one consensus profile.
Each (taxon, rank) is scored by how many tools report it against how many tool databases contain it,
and a score guided cutoff keeps the most abundant fraction of each score bin."
)]
pub struct MergeArgs {
    /// Input binning or profiling files, bioboxes or tsv
    #[arg(short = 'i', long = "input", num_args = 1.., required = true)]
    pub input_files: Vec<PathBuf>,

    /// Database profiles, in the same order as the input files
    #[arg(short = 'd', long = "db", num_args = 1.., required = true)]
    pub database_profiles: Vec<PathBuf>,

    /// Tool identifiers (comma separated), in the same order as the input files
    #[arg(short = 't', long = "tools", required = true)]
    pub tool_identifier: String,

    /// Tool methods (comma separated): p -> profiling / b -> binning
    #[arg(short = 'c', long = "methods", value_delimiter = ',', required = true)]
    pub tool_method: Vec<Method>,

    /// names.dmp from the NCBI Taxonomy database
    #[arg(short = 'n', long = "names", required = true)]
    pub names_file: PathBuf,

    /// nodes.dmp from the NCBI Taxonomy database
    #[arg(short = 'e', long = "nodes", required = true)]
    pub nodes_file: PathBuf,

    /// merged.dmp from the NCBI Taxonomy database
    #[arg(short = 'm', long = "merged", required = true)]
    pub merged_file: PathBuf,

    /// Number of bins
    #[clap(short = 'b', long, value_parser = clap::value_parser!(u64).range(1..), default_value_t = 4)]
    pub bins: u64,

    /// Minimum abundance/maximum results for each taxonomic level
    /// (0: off / 0-1: minimum relative abundance / >=1: maximum number of identifications)
    #[clap(short = 'r', long, default_value_t = 0.0001)]
    pub cutoff: f64,

    /// Result mode
    #[clap(short = 'f', long, value_enum, default_value_t = CutoffMode::Linear)]
    pub mode: CutoffMode,

    /// Consider only the specified taxonomic ranks (comma separated) and estimate
    /// upper taxonomic levels from them. `off` merges every rank independently
    /// (superkingdom, phylum, class, order, family, genus, species, off)
    #[clap(short = 's', long, default_value = "species")]
    pub ranks: String,

    /// Also write `<output>.detailed` with the abundance each tool reported
    #[clap(short = 'l', long = "detailed", action)]
    pub detailed_output: bool,

    /// Output file, stdout when absent
    #[clap(short = 'o', long = "output")]
    pub output_file: Option<PathBuf>,

    /// Output format
    #[clap(long = "output-format", value_enum, default_value_t = OutputFormat::Tsv)]
    pub output_format: OutputFormat,

    /// Rescale every rank of the final profile to sum to 1
    #[clap(long, action)]
    pub normalize: bool,

    /// Number of threads used to parse the inputs
    #[clap(short = 'p', long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Debug level logging
    #[clap(long, action)]
    pub verbose: bool,
}

impl MergeArgs {
    /// Input files zipped with their databases, identifiers and methods.
    pub fn tool_inputs(&self) -> Result<Vec<ToolInput>> {
        let idents = parse_comma_separated_list(&self.tool_identifier);
        let n = self.input_files.len();
        if self.database_profiles.len() != n || idents.len() != n || self.tool_method.len() != n
        {
            return Err(MergeError::InvalidConfig(format!(
                "{} input files, {} database profiles, {} identifiers and {} methods: counts must match",
                n,
                self.database_profiles.len(),
                idents.len(),
                self.tool_method.len()
            )));
        }
        Ok(idents
            .into_iter()
            .zip(&self.tool_method)
            .zip(self.input_files.iter().zip(&self.database_profiles))
            .map(|((ident, &method), (input, database))| ToolInput {
                ident,
                method,
                input: input.clone(),
                database: database.clone(),
            })
            .collect())
    }

    pub fn merge_config(&self) -> Result<MergeConfig> {
        let config = MergeConfig {
            bins: self.bins as usize,
            mode: self.mode,
            ranks: Ranks::parse_list(&self.ranks)?,
            cutoff: AbundanceCutoff::from_value(self.cutoff)?,
            normalize_output: self.normalize,
        };
        config.validate()?;
        Ok(config)
    }
}
