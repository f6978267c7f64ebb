#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashSet;
use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;

use gnomon_bgen::BgenError;
use gnomon_bgen::accumulate::score_parallel;
use gnomon_bgen::catalog::{
    BuildProgressObserver, Catalog, CatalogOptions, VariantSelection, build_catalog,
    write_identity_list,
};
use gnomon_bgen::config::RunConfig;
use gnomon_bgen::container::BgenContainer;
use gnomon_bgen::types::{InheritanceModel, MissingPolicy, SampleMask, SampleScore};
use gnomon_bgen::weights::EffectWeights;

#[derive(Parser)]
#[command(name = "gnomon-bgen")]
#[command(about = "Quality-filter BGEN variants and compute polygenic scores from them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct BuildArgs {
    /// BGEN containers, scanned in the order given
    #[arg(value_name = "BGEN", required = true)]
    bgen: Vec<PathBuf>,

    /// Output prefix
    #[arg(long, value_name = "PREFIX")]
    out: PathBuf,

    /// File of sample identifiers to keep (first column)
    #[arg(long)]
    keep: Option<PathBuf>,

    /// File of variant identifiers to keep (first column)
    #[arg(long, conflicts_with = "exclude")]
    extract: Option<PathBuf>,

    /// File of variant identifiers to drop (first column)
    #[arg(long)]
    exclude: Option<PathBuf>,

    /// Maximum fraction of missing samples
    #[arg(long, value_name = "F")]
    geno: Option<f64>,

    /// Minimum allele frequency
    #[arg(long, value_name = "F")]
    maf: Option<f64>,

    /// Minimum INFO score
    #[arg(long, value_name = "F")]
    info: Option<f64>,

    /// Probability a genotype needs before it counts as a hard call
    #[arg(long, value_name = "F")]
    hard_threshold: Option<f64>,

    /// Work on thresholded hard calls instead of dosages
    #[arg(long)]
    hard_call: bool,

    /// Keep strand-ambiguous A/T and C/G variants
    #[arg(long)]
    keep_ambiguous: bool,

    /// Keep variants outside chromosomes 1-22
    #[arg(long)]
    keep_non_autosomal: bool,

    /// TOML file with thresholds and scoring options; flags win over it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan containers, filter variants and write the variant catalogue
    #[command(about = "Build a filtered variant catalogue")]
    Build(BuildArgs),

    /// Build the catalogue, attach effect sizes and write per-sample scores
    #[command(about = "Calculate polygenic scores")]
    Score {
        #[command(flatten)]
        build: BuildArgs,

        /// Whitespace-separated file: variant id, effect allele, effect size
        #[arg(long, value_name = "FILE")]
        weights: PathBuf,

        /// Genotype transform applied before weighting
        #[arg(long, value_enum)]
        model: Option<InheritanceModel>,

        /// How samples without a usable call are scored
        #[arg(long, value_enum)]
        missing: Option<MissingPolicy>,

        /// Worker threads (defaults to the number of CPUs)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Build(args)) => run_build(&args).map(|_| ()),
        Some(Commands::Score {
            build,
            weights,
            model,
            missing,
            threads,
        }) => run_score(&build, &weights, model, missing, threads),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_version_info() {
    println!("gnomon-bgen {}", env!("CARGO_PKG_VERSION"));
    match option_env!("GNOMON_RELEASE_TAG") {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }
}

/// Loads the config file, if any, and lays the command-line flags over it.
fn resolve_config(args: &BuildArgs) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let thresholds = &mut config.thresholds;
    if let Some(geno) = args.geno {
        thresholds.max_missingness = geno;
    }
    if let Some(maf) = args.maf {
        thresholds.min_minor_allele_frequency = maf;
    }
    if let Some(info) = args.info {
        thresholds.min_info_score = info;
    }
    if let Some(threshold) = args.hard_threshold {
        thresholds.hard_call_probability_threshold = threshold;
        config.scoring.hard_call_threshold = threshold;
    }
    if args.hard_call {
        config.thresholds.hard_call_mode = true;
        config.scoring.hard_coded = true;
    }
    config.validate()?;
    Ok(config)
}

/// First whitespace-separated column of every non-empty line.
fn read_id_list(path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

/// Sample names come from the first container's identifier block when it has one.
/// The identifiers are returned too, so later containers can be checked against them.
fn sample_mask(args: &BuildArgs) -> Result<(SampleMask, Option<Vec<String>>), Box<dyn Error>> {
    let first = args.bgen.first().ok_or("no BGEN containers given")?;
    let container = BgenContainer::open(first.as_path())?;
    let identifiers = container.sample_identifiers().map(<[String]>::to_vec);
    let names: Vec<String> = match &identifiers {
        Some(ids) => ids.clone(),
        None => (0..container.sample_count())
            .map(|idx| format!("sample_{idx}"))
            .collect(),
    };
    let mask = match &args.keep {
        None => SampleMask::all(names.len()),
        Some(path) => {
            let keep: HashSet<String> = read_id_list(path)?.into_iter().collect();
            let mask = SampleMask::from_flags(names.iter().map(|n| keep.contains(n)).collect());
            if mask.included_count() == 0 {
                return Err(format!(
                    "none of the samples in '{}' occur in '{}'",
                    path.display(),
                    first.display()
                )
                .into());
            }
            mask
        }
    };
    log::info!(
        "{} of {} samples included",
        mask.included_count(),
        mask.len()
    );
    Ok((mask, identifiers))
}

struct BuildProgress {
    bar: ProgressBar,
}

impl BuildProgress {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self { bar }
    }
}

impl BuildProgressObserver for BuildProgress {
    fn on_container_start(&mut self, path: &Path, variant_count: u32) {
        self.bar.set_position(0);
        self.bar.set_length(u64::from(variant_count));
        self.bar.set_message(path.display().to_string());
    }

    fn on_variant(&mut self) {
        self.bar.inc(1);
    }

    fn on_container_finish(&mut self, path: &Path) {
        self.bar.set_message(format!("{} done", path.display()));
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn run_build(args: &BuildArgs) -> Result<(Catalog, SampleMask, RunConfig), Box<dyn Error>> {
    let config = resolve_config(args)?;
    let (mask, identifiers) = sample_mask(args)?;

    let selection = match (&args.extract, &args.exclude) {
        (Some(path), _) => VariantSelection::Extract(read_id_list(path)?.into_iter().collect()),
        (None, Some(path)) => VariantSelection::Exclude(read_id_list(path)?.into_iter().collect()),
        (None, None) => VariantSelection::All,
    };
    let options = CatalogOptions {
        thresholds: config.thresholds,
        selection,
        keep_ambiguous: args.keep_ambiguous,
        keep_non_autosomal: args.keep_non_autosomal,
        expected_samples: identifiers,
    };

    let mut progress = BuildProgress::new();
    let built = build_catalog(&args.bgen, &options, &mask, &mut progress);
    progress.bar.finish_and_clear();

    let catalog = match built {
        Ok(catalog) => catalog,
        Err(BgenError::DuplicateIdentity { duplicates, valid }) => {
            let valid_path = with_suffix(&args.out, ".valid");
            let mut out = BufWriter::new(File::create(&valid_path)?);
            write_identity_list(&mut out, &valid)?;
            out.flush()?;
            return Err(format!(
                "{} duplicated variant identities (first: {}). The {} usable identities were written to '{}'; rerun with --extract {}",
                duplicates.len(),
                duplicates.first().map(String::as_str).unwrap_or("?"),
                valid.len(),
                valid_path.display(),
                valid_path.display()
            )
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    let catalogue_path = with_suffix(&args.out, ".variants.tsv");
    let mut out = BufWriter::new(File::create(&catalogue_path)?);
    writeln!(out, "ID\tCHR\tPOS\tA1\tA2\tSOURCE\tOFFSET")?;
    for record in &catalog.records {
        writeln!(
            out,
            "{}\t{}\t{}",
            record.identity,
            record.source_file.display(),
            record.byte_offset
        )?;
    }
    out.flush()?;
    log::info!(
        "{} variants catalogued; written to '{}'",
        catalog.records.len(),
        catalogue_path.display()
    );
    Ok((catalog, mask, config))
}

fn run_score(
    args: &BuildArgs,
    weights_path: &Path,
    model: Option<InheritanceModel>,
    missing: Option<MissingPolicy>,
    threads: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let (catalog, mask, mut config) = run_build(args)?;
    if let Some(model) = model {
        config.scoring.model = model;
    }
    if let Some(missing) = missing {
        config.scoring.missing_policy = missing;
    }

    let weights = EffectWeights::load(weights_path)?;
    if weights.is_empty() {
        return Err(format!("'{}' holds no effect sizes", weights_path.display()).into());
    }
    let (mut records, weight_report) = weights.attach(catalog.records);
    if weight_report.unweighted > 0 {
        log::info!(
            "{} catalogued variants have no effect size",
            weight_report.unweighted
        );
    }
    if records.is_empty() {
        return Err("no catalogued variant has a usable effect size".into());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or_else(num_cpus::get).max(1))
        .build()?;
    let scores = pool.install(|| score_parallel(&mut records, 0, &config.scoring, &mask))?;
    let invalidated = records.iter().filter(|r| r.is_invalidated()).count();
    if invalidated > 0 {
        log::warn!("{invalidated} variants had no called samples and were skipped");
    }

    let score_path = with_suffix(&args.out, ".sscore");
    write_scores(&score_path, &catalog.sample_names, &mask, &scores)?;
    log::info!(
        "scores for {} samples over {} variants written to '{}'",
        scores.len(),
        records.len() - invalidated,
        score_path.display()
    );
    Ok(())
}

fn write_scores(
    path: &Path,
    names: &[String],
    mask: &SampleMask,
    scores: &[SampleScore],
) -> Result<(), Box<dyn Error>> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "IID\tPRS\tAVG\tVARIANTS")?;
    for (sample_idx, score) in mask.included_indices().zip(scores) {
        let average = if score.variants_counted == 0 {
            0.0
        } else {
            score.score_sum / f64::from(score.variants_counted)
        };
        let name = names.get(sample_idx).map(String::as_str).unwrap_or("?");
        writeln!(
            out,
            "{name}\t{}\t{average}\t{}",
            score.score_sum, score.variants_counted
        )?;
    }
    out.flush()?;
    Ok(())
}
