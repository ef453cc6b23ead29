use flate2::write::GzEncoder;
use flate2::Compression;
use metamerge::args::ToolInput;
use metamerge::consensus::{CutoffMode, MergeConfig};
use metamerge::rank::{Rank, Ranks};
use metamerge::report::{write_detailed_report, write_report, OutputFormat};
use metamerge::taxonomy::Taxonomy;
use metamerge::tool::{AbundanceCutoff, Method};
use metamerge::{run_merge, MergeRun, TaxId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const NODES: &[(TaxId, TaxId, &str, &str)] = &[
    (1, 1, "no rank", "root"),
    (2, 1, "superkingdom", "Bacteria"),
    (3, 2, "phylum", "Proteobacteria"),
    (4, 3, "class", "Gammaproteobacteria"),
    (5, 4, "order", "Enterobacterales"),
    (6, 5, "family", "Enterobacteriaceae"),
    (7, 6, "genus", "Escherichia"),
    (8, 6, "genus", "Salmonella"),
    (10, 7, "species", "Escherichia coli"),
    (11, 7, "species", "Escherichia albertii"),
    (20, 8, "species", "Salmonella enterica"),
];

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn write_gz(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

fn taxonomy(dir: &Path) -> Taxonomy {
    let mut nodes = String::new();
    let mut names = String::new();
    for (id, parent, rank, name) in NODES {
        nodes.push_str(&format!("{}\t|\t{}\t|\t{}\t|\t\t|\n", id, parent, rank));
        names.push_str(&format!("{}\t|\t{}\t|\t\t|\tscientific name\t|\n", id, name));
    }
    names.push_str("10\t|\tBacterium coli\t|\t\t|\tsynonym\t|\n");
    let nodes = write(dir, "nodes.dmp", &nodes);
    let names = write(dir, "names.dmp", &names);
    let merged = write(dir, "merged.dmp", "99\t|\t10\t|\n");
    Taxonomy::from_ncbi(&nodes, &names, &merged).unwrap()
}

/// t1 profiles three species, t2 bins reads to two of them.
fn inputs(dir: &Path) -> Vec<ToolInput> {
    let db1 = write(
        dir,
        "db1.tsv",
        "species\tEscherichia coli\t1000\n\
         species\tEscherichia albertii\t1000\n\
         species\tSalmonella enterica\t1000\n\
         genus\tEscherichia\t2000\n\
         genus\tSalmonella\t1000\n",
    );
    let db2 = write(
        dir,
        "db2.tsv",
        "species\tEscherichia coli\t1000\n\
         species\tSalmonella enterica\t1000\n\
         genus\tEscherichia\t1000\n\
         genus\tSalmonella\t1000\n",
    );
    let t1 = write(
        dir,
        "t1.tsv",
        "species\t10\t50\n\
         species\tEscherichia albertii\t30\n\
         species\t20\t20\n\
         genus\t7\t80\n\
         genus\t8\t20\n",
    );
    let t2 = write_gz(
        dir,
        "t2.binning.gz",
        "@Version:0.9.1\n\
         @@SEQUENCEID\tTAXID\tLENGTH\n\
         r1\t10\t200\n\
         r2\t99\t100\n\
         r3\t20\t100\n\
         r4\t424242\t500\n",
    );
    vec![
        ToolInput {
            ident: "t1".to_string(),
            method: Method::Profiling,
            input: t1,
            database: db1,
        },
        ToolInput {
            ident: "t2".to_string(),
            method: Method::Binning,
            input: t2,
            database: db2,
        },
    ]
}

fn config(ranks: &str) -> MergeConfig {
    MergeConfig {
        bins: 4,
        mode: CutoffMode::Linear,
        ranks: Ranks::parse_list(ranks).unwrap(),
        cutoff: AbundanceCutoff::Off,
        normalize_output: false,
    }
}

fn abundance(run: &MergeRun, rank: Rank, taxid: TaxId) -> Option<f64> {
    let table = &run.result.table;
    let partition = table.partition(table.ranks().rank_id(rank)?)?;
    partition
        .iter()
        .find(|row| row.taxid == taxid)
        .map(|row| row.abundance)
}

#[test]
fn test_species_merge_reconstructs_upper_ranks() {
    let dir = TempDir::new().unwrap();
    let taxo = taxonomy(dir.path());
    let run = run_merge(&inputs(dir.path()), &taxo, &config("species"), 2).unwrap();

    // t1: 0.5 / 0.3 / 0.2, t2: 300 / 100 reads over 1000 long genomes -> 0.75 / 0.25
    let coli = abundance(&run, Rank::Species, 10).unwrap();
    let albertii = abundance(&run, Rank::Species, 11).unwrap();
    let enterica = abundance(&run, Rank::Species, 20).unwrap();
    assert!((coli - 0.6).abs() < 1e-9);
    assert!((albertii - 0.3).abs() < 1e-9);
    assert!((enterica - 2.0 / 9.0).abs() < 1e-9);

    let species = run
        .result
        .table
        .partition(Ranks::all().rank_id(Rank::Species).unwrap())
        .unwrap();
    assert_eq!(species.taxids(), vec![10, 11, 20]);

    assert!((abundance(&run, Rank::Genus, 7).unwrap() - 0.9).abs() < 1e-9);
    assert!((abundance(&run, Rank::Genus, 8).unwrap() - 2.0 / 9.0).abs() < 1e-9);
    let family = abundance(&run, Rank::Family, 6).unwrap();
    assert!((family - (0.9 + 2.0 / 9.0)).abs() < 1e-9);
    assert!((abundance(&run, Rank::Superkingdom, 2).unwrap() - family).abs() < 1e-12);
    assert_eq!(run.result.table.ranks(), &Ranks::all());

    assert_eq!(run.tools[0].method(), Method::Profiling);
    assert_eq!(run.tools[1].method(), Method::Binning);
    assert!(run.tools[1].file().ends_with("t2.binning.gz"));
    assert!(run.references[1].file().ends_with("db2.tsv"));
}

#[test]
fn test_normalized_output_sums_to_one() {
    let dir = TempDir::new().unwrap();
    let taxo = taxonomy(dir.path());
    let config = MergeConfig {
        normalize_output: true,
        ..config("species")
    };
    let run = run_merge(&inputs(dir.path()), &taxo, &config, 1).unwrap();
    for (_, partition) in run.result.table.iter() {
        if !partition.is_empty() {
            assert!((partition.abundance_sum() - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn test_all_ranks_merge_independently() {
    let dir = TempDir::new().unwrap();
    let taxo = taxonomy(dir.path());
    let run = run_merge(&inputs(dir.path()), &taxo, &config("off"), 2).unwrap();

    // no reconstruction: ranks absent from both databases stay empty
    assert!(abundance(&run, Rank::Family, 6).is_none());
    // genus from t1 (0.8 / 0.2) and t2 clade totals (300 / 100 over 1000 -> 0.75 / 0.25)
    let escherichia = abundance(&run, Rank::Genus, 7).unwrap();
    assert!((escherichia - 2.0 / (1.0 / 0.8 + 1.0 / 0.75)).abs() < 1e-9);
}

#[test]
fn test_reports_are_written() {
    let dir = TempDir::new().unwrap();
    let taxo = taxonomy(dir.path());
    let run = run_merge(&inputs(dir.path()), &taxo, &config("species"), 2).unwrap();

    let output = dir.path().join("merged.tsv");
    write_report(Some(output.as_path()), OutputFormat::Tsv, &run.result, &taxo).unwrap();
    let text = fs::read_to_string(&output).unwrap();
    let first: Vec<&str> = text.lines().next().unwrap().split('\t').collect();
    assert_eq!(first[0], "superkingdom");
    assert_eq!(first[1], "Bacteria");
    assert_eq!(text.lines().count(), run.result.table.size(None));
    let albertii_line = text
        .lines()
        .find(|l| l.starts_with("species\tEscherichia albertii\t"))
        .unwrap();
    let value: f64 = albertii_line.rsplit('\t').next().unwrap().parse().unwrap();
    assert!((value - 0.3).abs() < 1e-9);

    let detailed =
        write_detailed_report(&output, &run.result, &taxo, &run.tools, &run.references).unwrap();
    assert!(detailed.ends_with("merged.tsv.detailed"));
    let text = fs::read_to_string(&detailed).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), "rank\ttaxid\tname\tmetametamerge\tt1\tt2");
    let albertii: Vec<&str> = lines
        .find(|l| l.starts_with("species\t11\t"))
        .unwrap()
        .split('\t')
        .collect();
    assert!((albertii[4].parse::<f64>().unwrap() - 0.3).abs() < 1e-9);
    // db2 does not hold E. albertii
    assert_eq!(albertii[5], "-1");

    let bioboxes = dir.path().join("merged.profile");
    write_report(Some(bioboxes.as_path()), OutputFormat::Bioboxes, &run.result, &taxo).unwrap();
    let text = fs::read_to_string(&bioboxes).unwrap();
    assert!(text.starts_with("@SampleID:merged\n@Version:0.9.1\n"));
    assert!(text.contains("\n20\tspecies\t2|3|4|5|6|8|20\t"));
}

#[test]
fn test_missing_input_fails_with_path() {
    let dir = TempDir::new().unwrap();
    let taxo = taxonomy(dir.path());
    let mut inputs = inputs(dir.path());
    inputs[0].input = dir.path().join("absent.tsv");
    let err = run_merge(&inputs, &taxo, &config("species"), 1).unwrap_err();
    assert!(err.to_string().contains("absent.tsv"));
}
