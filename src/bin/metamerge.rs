use anyhow::{Context, Result};
use clap::Parser;
use metamerge::args::MergeArgs;
use metamerge::pipeline::run_merge;
use metamerge::report::{write_detailed_report, write_report};
use metamerge::taxonomy::Taxonomy;
use std::time::Instant;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = MergeArgs::parse();
    init_logging(args.verbose);

    let inputs = args.tool_inputs()?;
    let config = args.merge_config()?;

    log::info!("- - - - - - - - - - - - - - - - - - - - -");
    log::info!("           metamerge {}", env!("CARGO_PKG_VERSION"));
    log::info!("- - - - - - - - - - - - - - - - - - - - -");
    log::info!("Input files: ");
    for input in &inputs {
        log::info!(
            " {} ({}) {} {}",
            input.ident,
            input.method,
            input.input.display(),
            input.database.display()
        );
    }
    log::info!(
        "Taxonomy: {}, {}, {}",
        args.names_file.display(),
        args.nodes_file.display(),
        args.merged_file.display()
    );
    log::info!("Mode: {}", config.mode);
    log::info!("Cutoff: {}", config.cutoff);
    log::info!("Bins: {}", config.bins);
    log::info!("Ranks: {}", config.ranks);
    log::info!("Normalize output: {}", config.normalize_output);
    log::info!("Detailed: {}", args.detailed_output);
    log::info!(
        "Output file: {}",
        args.output_file
            .as_ref()
            .map_or_else(|| "<stdout>".to_string(), |p| p.display().to_string())
    );

    let start = Instant::now();
    log::info!("Parsing taxonomy (names, nodes, merged) ... ");
    let taxonomy = Taxonomy::from_ncbi(&args.nodes_file, &args.names_file, &args.merged_file)
        .with_context(|| format!("failed to load taxonomy from {:?}", args.nodes_file))?;
    log::info!(
        "\t{} nodes, {} merged ids",
        taxonomy.node_count(),
        taxonomy.merged_count()
    );

    let run = run_merge(&inputs, &taxonomy, &config, args.threads).context("merge failed")?;

    let output = args.output_file.as_deref();
    write_report(output, args.output_format, &run.result, &taxonomy)
        .context("failed to write the merged profile")?;
    if args.detailed_output {
        match output {
            Some(path) => {
                let detailed = write_detailed_report(
                    path,
                    &run.result,
                    &taxonomy,
                    &run.tools,
                    &run.references,
                )
                .with_context(|| format!("failed to write detailed output for {:?}", path))?;
                log::info!("Detailed output: {}", detailed.display());
            }
            None => log::warn!("detailed output requires an output file (-o), skipped"),
        }
    }

    let duration = start.elapsed();
    log::info!("merge took: {:?}", duration);
    Ok(())
}
