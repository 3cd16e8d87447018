mod key_file;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use epimatch::config::{ClusteringStrategy, IndexKind, RankingStrategy};
use epimatch::match_record::{read_pair_records, write_pair_record};
use epimatch::pipeline::{build_grids, match_image_graph, match_image_pair, pair_seed};
use epimatch::spatial_grid::SpatialGrid;
use epimatch::MatchConfig;
use key_file::{load_features, read_dimension_list, read_key_list, resolve_dimensions};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "Epipolar-constrained SIFT descriptor matching.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: MatchOptions,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match one pair of key files.
    Pair {
        /// Key file of the source image
        #[arg(long)]
        source_keys: PathBuf,

        /// Key file of the reference image
        #[arg(long)]
        target_keys: PathBuf,

        /// Source image size as WIDTHxHEIGHT
        #[arg(long, required_unless_present = "source_image")]
        source_dim: Option<String>,

        /// Source image, read for its size only
        #[arg(long)]
        source_image: Option<PathBuf>,

        /// Reference image size as WIDTHxHEIGHT
        #[arg(long, required_unless_present = "target_image")]
        target_dim: Option<String>,

        /// Reference image, read for its size only
        #[arg(long)]
        target_image: Option<PathBuf>,

        /// Output match file (standard output when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Match every pair of a collection.
    Graph {
        /// File listing one key file per line
        #[arg(long)]
        keyfile_list: PathBuf,

        /// File with one `height width` line per image
        #[arg(long)]
        dimension_list: PathBuf,

        /// Output match file
        #[arg(long)]
        matches_file: PathBuf,

        /// Append to an existing match file instead of replacing it
        #[arg(long)]
        append: bool,
    },
}

/// Tuning flags shared by both commands; they override `--config`.
#[derive(Args, Debug)]
struct MatchOptions {
    /// JSON file with matcher settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Percentage of largest-scale features used for global matching
    #[arg(long, global = true)]
    top_percent: Option<usize>,

    /// Keep only global matches confirmed in both directions
    #[arg(long, global = true)]
    two_way: bool,

    /// Compare every epipolar line against every cluster
    #[arg(long, global = true)]
    exact_clustering: bool,

    /// Rank candidates by exhaustive comparison
    #[arg(long, global = true)]
    brute_force: bool,

    /// Use an exact kd-tree for nearest-neighbour search
    #[arg(long, global = true)]
    exact_index: bool,

    /// Seed for the random sampling
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl MatchOptions {
    fn to_config(&self) -> Result<MatchConfig> {
        let mut config = match &self.config {
            Some(path) => MatchConfig::from_json_file(path)
                .with_context(|| format!("could not load config {}", path.display()))?,
            None => MatchConfig::default(),
        };
        if let Some(top_percent) = self.top_percent {
            if !(1..=100).contains(&top_percent) {
                bail!("--top-percent must be between 1 and 100");
            }
            config.top_percent = top_percent;
        }
        if self.two_way {
            config.two_way_global = true;
        }
        if self.exact_clustering {
            config.clustering = ClusteringStrategy::Exact;
        }
        if self.brute_force {
            config.ranking = RankingStrategy::BruteForce;
        }
        if self.exact_index {
            config.index = IndexKind::KdTree;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

fn run_pair(
    config: &MatchConfig,
    source_keys: &Path,
    target_keys: &Path,
    source_dim: (u32, u32),
    target_dim: (u32, u32),
    output: Option<&Path>,
) -> Result<()> {
    let source = load_features(source_keys, source_dim.0, source_dim.1)?;
    let reference = load_features(target_keys, target_dim.0, target_dim.1)?;
    let grid = SpatialGrid::for_image(&reference, config.grid_cell_size);

    let seed = pair_seed(config.seed, 0, 1);
    let pair = match_image_pair(&source, &reference, &grid, config, seed)?;
    log::info!(
        "{} matches from {} global matches",
        pair.matches.len(),
        pair.global_matches
    );

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("could not create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write_pair_record(&mut writer, 0, 1, &pair.matches)?;
            writer.flush()?;
            log::info!("matches written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            write_pair_record(&mut stdout.lock(), 0, 1, &pair.matches)?;
        }
    }
    Ok(())
}

fn run_graph(
    config: &MatchConfig,
    keyfile_list: &Path,
    dimension_list: &Path,
    matches_file: &Path,
    append: bool,
) -> Result<()> {
    let key_files = read_key_list(keyfile_list)?;
    let dimensions = read_dimension_list(dimension_list)?;
    if key_files.len() != dimensions.len() {
        bail!(
            "{} key files but {} dimension lines",
            key_files.len(),
            dimensions.len()
        );
    }

    // An existing file must parse, so that appended records stay readable.
    if append && matches_file.exists() {
        let file = File::open(matches_file)
            .with_context(|| format!("could not open {}", matches_file.display()))?;
        let existing = read_pair_records(BufReader::new(file))
            .with_context(|| format!("{} is not a match file", matches_file.display()))?;
        log::info!("appending to {} existing pairs", existing.len());
    }

    let images = key_files
        .iter()
        .zip(&dimensions)
        .map(|(path, &(width, height))| load_features(path, width, height))
        .collect::<Result<Vec<_>>>()?;
    let grids = build_grids(&images, config.grid_cell_size);
    let outcomes = match_image_graph(&images, &grids, config)?;

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(matches_file)
        .with_context(|| format!("could not open {}", matches_file.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for outcome in &outcomes {
        if let Ok(pair) = &outcome.result {
            write_pair_record(
                &mut writer,
                outcome.source_image,
                outcome.reference_image,
                &pair.matches,
            )?;
            written += 1;
        }
    }
    writer.flush()?;
    log::info!(
        "{written} of {} pairs written to {}",
        outcomes.len(),
        matches_file.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = cli.options.to_config()?;

    match &cli.command {
        Command::Pair {
            source_keys,
            target_keys,
            source_dim,
            source_image,
            target_dim,
            target_image,
            output,
        } => {
            let source_dim = resolve_dimensions(source_dim.as_deref(), source_image.as_deref())?;
            let target_dim = resolve_dimensions(target_dim.as_deref(), target_image.as_deref())?;
            run_pair(
                &config,
                source_keys,
                target_keys,
                source_dim,
                target_dim,
                output.as_deref(),
            )
        }
        Command::Graph {
            keyfile_list,
            dimension_list,
            matches_file,
            append,
        } => run_graph(&config, keyfile_list, dimension_list, matches_file, *append),
    }
}
