#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use gsdecomp::checkpoint::pin_seed;
use gsdecomp::classify::{ModelKind, load_classifier};
use gsdecomp::config::{EvaluationPolicy, SearchConfig};
use gsdecomp::data::genesets::{
    filter_to_dataset, load_gene_sets, random_gene_sets, random_set_sizes,
};
use gsdecomp::data::{Dataset, Labels, load_dataset, load_labels};
use gsdecomp::evaluate::{DEFAULT_TEST_FRACTION, Evaluator};
use gsdecomp::pipeline::{RunSummary, SearchRun};
use gsdecomp::seed::{SeedStream, derive_rng, resolve_base_seed};
use gsdecomp::types::Subset;

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelCli {
    Mlp,
    Logistic,
}

impl From<ModelCli> for ModelKind {
    fn from(model: ModelCli) -> Self {
        match model {
            ModelCli::Mlp => ModelKind::Mlp,
            ModelCli::Logistic => ModelKind::Logistic,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OnErrorCli {
    Abort,
    Skip,
}

impl From<OnErrorCli> for EvaluationPolicy {
    fn from(policy: OnErrorCli) -> Self {
        match policy {
            OnErrorCli::Abort => EvaluationPolicy::Abort,
            OnErrorCli::Skip => EvaluationPolicy::Skip,
        }
    }
}

/// Inputs shared by every subcommand that scores subsets.
#[derive(Args)]
pub struct InputArgs {
    /// Expression matrix TSV: sample identifiers in the first column, one column per gene
    #[arg(long, value_name = "PATH")]
    pub dataset: PathBuf,

    /// Headerless TSV of `sample<TAB>label`
    #[arg(long, value_name = "PATH")]
    pub labels: PathBuf,

    /// Model configuration (.toml) with [mlp] and/or [logistic] tables
    #[arg(long, value_name = "PATH")]
    pub model_config: PathBuf,

    /// Classifier used to score subsets
    #[arg(long, value_enum, default_value_t = ModelCli::Mlp)]
    pub model: ModelCli,
}

#[derive(Args)]
pub struct DecomposeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Gene-set file, one `name<TAB>gene1<TAB>gene2...` set per line
    #[arg(long, value_name = "PATH")]
    pub gene_sets: Option<PathBuf>,

    /// Also decompose random gene sets drawn from the dataset's genes
    #[arg(long)]
    pub random: bool,

    /// Inclusive range of random set sizes (defaults to the sizes of the gene sets)
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], requires = "random")]
    pub random_range: Option<Vec<usize>>,

    /// Directory receiving one sub-directory of checkpoints per gene set
    #[arg(long, value_name = "DIR")]
    pub logdir: PathBuf,

    /// Search configuration (.toml); the flags below override its values
    #[arg(long, value_name = "PATH")]
    pub search_config: Option<PathBuf>,

    /// Base seed for subset sampling, data splits and model initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of scoring threads (default: all logical CPUs)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// What to do when a candidate fails to score
    #[arg(long, value_enum)]
    pub on_error: Option<OnErrorCli>,

    /// Give up on a candidate after this many seconds
    #[arg(long, value_name = "SECS")]
    pub candidate_timeout: Option<u64>,

    /// Stop after this subset size
    #[arg(long, value_name = "K")]
    pub max_iterations: Option<usize>,
}

#[derive(Args)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Comma-separated genes forming the subset to score
    #[arg(long, value_delimiter = ',', required = true)]
    pub genes: Vec<String>,

    /// Number of independent train/test splits
    #[arg(long, default_value = "1")]
    pub repeats: usize,

    /// Fraction of samples held out for scoring
    #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
    pub test_fraction: f64,

    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser)]
#[command(
    name = "gsdecomp",
    about = "Decompose gene sets into their most predictive subsets",
    long_about = "Searches the subsets of each gene set, size by size, for the combinations \
                 of genes that best classify the samples. Every iteration is checkpointed, \
                 so interrupted runs resume where they stopped."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the subsets of every gene set
    #[command(about = "Decompose gene sets (outputs: <logdir>/<set>/scores_<k>.txt)")]
    Decompose(DecomposeArgs),

    /// Score a single gene subset
    #[command(about = "Score one gene subset with the configured classifier")]
    Evaluate(EvaluateArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Decompose(args)) => decompose(args),
        Some(Commands::Evaluate(args)) => evaluate(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_inputs(
    input: &InputArgs,
) -> Result<(Arc<Dataset>, Arc<Labels>), Box<dyn std::error::Error>> {
    println!("Loading input dataset from: {}", input.dataset.display());
    let dataset = load_dataset(&input.dataset)?;
    println!(
        "Loaded input dataset ({} genes, {} samples)",
        dataset.n_genes(),
        dataset.n_samples()
    );

    let labels = load_labels(&input.labels, dataset.samples())?;
    println!(
        "Loaded labels with {} classes: {}",
        labels.n_classes(),
        labels.classes().join(", ")
    );

    Ok((Arc::new(dataset), Arc::new(labels)))
}

pub fn decompose(args: DecomposeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.search_config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if let Some(policy) = args.on_error {
        config.on_evaluation_error = policy.into();
    }
    if args.candidate_timeout.is_some() {
        config.candidate_timeout_secs = args.candidate_timeout;
    }
    if args.max_iterations.is_some() {
        config.max_iterations = args.max_iterations;
    }
    // Pin the seed once so every run and the random sets share it.
    let seed = pin_seed(&args.logdir, config.seed)?;
    config.seed = Some(seed);
    config.validate()?;

    let (dataset, labels) = load_inputs(&args.input)?;

    println!("Initializing {} classifier...", ModelKind::from(args.input.model));
    let factory = load_classifier(&args.input.model_config, args.input.model.into())?;
    let evaluator = Evaluator::new(Arc::clone(&dataset), labels, factory)?
        .with_test_fraction(config.test_fraction)
        .with_timeout(config.candidate_timeout());

    let mut sets = match &args.gene_sets {
        Some(path) => {
            let loaded = load_gene_sets(path)?;
            println!("Loaded {} gene sets", loaded.len());
            let (filtered, report) = filter_to_dataset(loaded, &dataset);
            println!("{report}");
            filtered
        }
        None => Vec::new(),
    };

    if args.random {
        let range = match args.random_range.as_deref() {
            Some(&[low, high]) => Some((low, high)),
            Some(_) => return Err("--random-range takes exactly two values: LO HI".into()),
            None => None,
        };
        let sizes = random_set_sizes(range, &sets, dataset.n_genes())?;
        let mut rng = derive_rng(seed, SeedStream::RandomSets, 0, 0);
        let random = random_gene_sets(&sizes, dataset.genes(), &mut rng)?;
        println!("Generated {} random gene sets", random.len());
        sets.extend(random);
    }

    if sets.is_empty() {
        return Err("nothing to decompose: pass --gene-sets and/or --random".into());
    }

    println!("Using seed {seed}");
    for set in &sets {
        println!();
        println!("Decomposing {} ({} genes)...", set.name, set.genes.len());
        let run = SearchRun::new(&set.name, set.genes.iter().cloned(), args.logdir.join(&set.name))?;
        let summary = run.execute(&evaluator, &config)?;
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for it in &summary.iterations {
        let status = if it.resumed {
            " (resumed)".to_string()
        } else if it.skipped > 0 {
            format!(" ({} skipped)", it.skipped)
        } else {
            String::new()
        };
        match &it.best {
            Some(best) => println!(
                "  iteration {:>3} [{}] {} subsets{}: best {} ({:.3})",
                it.iteration, it.mode, it.candidates, status, best.subset, best.score
            ),
            None => println!(
                "  iteration {:>3} [{}] {} subsets{}",
                it.iteration, it.mode, it.candidates, status
            ),
        }
    }
}

pub fn evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.repeats == 0 {
        return Err("--repeats must be at least 1".into());
    }
    if !(args.test_fraction > 0.0 && args.test_fraction < 1.0) {
        return Err(format!(
            "--test-fraction {} must lie strictly between 0 and 1",
            args.test_fraction
        )
        .into());
    }

    let subset = Subset::canonical(
        args.genes
            .iter()
            .map(|gene| gene.trim())
            .filter(|gene| !gene.is_empty()),
    );
    if subset.is_empty() {
        return Err("--genes must name at least one gene".into());
    }

    let (dataset, labels) = load_inputs(&args.input)?;
    let factory = load_classifier(&args.input.model_config, args.input.model.into())?;
    let evaluator = Evaluator::new(dataset, labels, factory)?.with_test_fraction(args.test_fraction);

    let seed = resolve_base_seed(args.seed);
    println!("Scoring {subset} with {} (seed {seed})", evaluator.classifier_name());

    let mut scores = Vec::with_capacity(args.repeats);
    for repeat in 0..args.repeats {
        let mut rng = derive_rng(seed, SeedStream::Evaluate, 0, repeat);
        let score = evaluator.evaluate(&subset, &mut rng)?;
        println!("{}\t{:.3}", repeat + 1, score);
        scores.push(score);
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    println!("mean\t{mean:.3}");

    Ok(())
}

fn print_version_info() {
    println!("gsdecomp {}", env!("CARGO_PKG_VERSION"));
    match option_env!("GSDECOMP_RELEASE_TAG") {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }
}
