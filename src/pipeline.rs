use crate::args::ToolInput;
use crate::consensus::{ConsensusEngine, ConsensusResult, MergeConfig};
use crate::error::{MergeError, Result};
use crate::parser::{parse_input, parse_profile};
use crate::reference::{ReferenceProfile, ReferenceSupport};
use crate::taxonomy::Taxonomy;
use crate::tool::ToolProfile;
use rayon::prelude::*;

/// Everything a merge produced, kept together for reporting.
#[derive(Debug)]
pub struct MergeRun {
    pub references: Vec<ReferenceProfile>,
    pub tools: Vec<ToolProfile>,
    pub result: ConsensusResult,
}

/// Parse every database profile, in input order.
pub fn load_references(
    inputs: &[ToolInput],
    taxonomy: &Taxonomy,
    config: &MergeConfig,
) -> Result<Vec<ReferenceProfile>> {
    let references = inputs
        .par_iter()
        .map(|input| {
            let table = parse_profile(&input.database, taxonomy, &config.ranks)?;
            Ok(ReferenceProfile::new(&input.database, table))
        })
        .collect::<Result<Vec<_>>>()?;

    for (input, reference) in inputs.iter().zip(&references) {
        log::info!(
            "\t{} database {} - {} taxons",
            input.ident,
            reference.file().display(),
            reference.taxids().len()
        );
    }
    Ok(references)
}

/// Parse and normalize every tool result against its own reference, then
/// apply the pre-merge abundance cutoff.
pub fn load_tools(
    inputs: &[ToolInput],
    references: &[ReferenceProfile],
    taxonomy: &Taxonomy,
    config: &MergeConfig,
) -> Result<Vec<ToolProfile>> {
    let mut tools = inputs
        .par_iter()
        .zip(references)
        .map(|(input, reference)| {
            let table = parse_input(&input.input, input.method, taxonomy, &config.ranks)?;
            ToolProfile::new(&input.ident, input.method, &input.input, table, reference)
        })
        .collect::<Result<Vec<_>>>()?;

    log::info!("Filtering profiles ({}) ...", config.cutoff);
    for tool in tools.iter_mut() {
        tool.apply_cutoff(config.cutoff);
        log::info!(
            "\t{} ({}) {} - {} entries",
            tool.ident(),
            tool.method(),
            tool.file().display(),
            tool.table().size(None)
        );
    }
    Ok(tools)
}

/// Load all inputs and merge them. Parsing runs on a pool of `threads`
/// workers; the merge itself is sequential.
pub fn run_merge(
    inputs: &[ToolInput],
    taxonomy: &Taxonomy,
    config: &MergeConfig,
    threads: usize,
) -> Result<MergeRun> {
    config.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| MergeError::InvalidConfig(format!("thread pool: {}", e)))?;

    log::info!("Reading database profiles ...");
    let references = pool.install(|| load_references(inputs, taxonomy, config))?;

    log::info!("Reading profiles ...");
    let tools = pool.install(|| load_tools(inputs, &references, taxonomy, config))?;

    log::info!("Merging profiles ...");
    let support = ReferenceSupport::from_references(&references);
    let result = ConsensusEngine::new(config, taxonomy, &support).merge(&tools)?;

    Ok(MergeRun {
        references,
        tools,
        result,
    })
}
