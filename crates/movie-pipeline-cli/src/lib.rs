//! `moviedash` command surface over the movie pipeline.
//!
//! Host programs can embed the dashboard views through:
//! - [`run_cli`] for full parsed CLI execution (config, data path, load).
//! - [`run_command`] for executing one [`Command`] against an already opened
//!   [`MoviePipeline`].
//!
//! Every `--json` payload carries a `contract_version`; the schemas live in
//! `contracts/v1/schemas`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use movie_pipeline_core::{
    avg_rating_by_decade, movie_rows, rating_histogram, write_csv, Dashboard, DashboardOptions,
    DataSource, DecadeRating, FilterOptions, FilterSpec, HistogramBin, MoviePipeline, MovieRow,
    TagCount, TagSource, DEFAULT_HISTOGRAM_BINS, DEFAULT_RATING_MAX, DEFAULT_RATING_MIN,
    DEFAULT_TOP_TAGS, MAX_HISTOGRAM_BINS,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

pub const DATA_PATH_ENV: &str = "MOVIEDASH_DATA";
pub const DEFAULT_CONFIG_FILE: &str = "moviedash.toml";
pub const DEFAULT_DATA_FILE: &str = "final_combined_movies.csv";

#[derive(Debug, Parser)]
#[command(name = "moviedash")]
#[command(about = "Movie ratings dashboard views")]
pub struct Cli {
    /// CSV dataset to load (overrides MOVIEDASH_DATA and the config file).
    #[arg(long)]
    data: Option<PathBuf>,

    /// TOML config file; defaults to ./moviedash.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Every aggregate view for one filter.
    Summary(SummaryArgs),
    /// Average rating per decade.
    Decades(DecadesArgs),
    /// Most frequent tags.
    Tags(TagsArgs),
    /// Rating distribution.
    Histogram(HistogramArgs),
    /// Filtered movie listing.
    Movies(MoviesArgs),
    /// Filtered table as CSV.
    Export(ExportArgs),
    /// Selectable decades and tags.
    Options(OptionsArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    #[arg(long = "decade")]
    decades: Vec<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    min_rating: Option<f64>,
    #[arg(long)]
    max_rating: Option<f64>,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    top: Option<usize>,
    #[arg(long)]
    bins: Option<usize>,
    #[arg(long)]
    tag_source: Option<TagSourceArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct DecadesArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct TagsArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    top: Option<usize>,
    #[arg(long)]
    tag_source: Option<TagSourceArg>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct HistogramArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    bins: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct MoviesArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct OptionsArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TagSourceArg {
    Filtered,
    Unfiltered,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatingConfig {
    pub min: f64,
    pub max: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_RATING_MIN,
            max: DEFAULT_RATING_MAX,
        }
    }
}

/// Settings read from `moviedash.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    pub data_path: Option<PathBuf>,
    pub top_tags: usize,
    pub histogram_bins: usize,
    pub tag_source: TagSource,
    pub rating: RatingConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            top_tags: DEFAULT_TOP_TAGS,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            tag_source: TagSource::default(),
            rating: RatingConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Decodes and validates a config document.
    ///
    /// # Errors
    /// Returns an error when the TOML is malformed, has unknown keys, or
    /// decoded values violate config constraints.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid moviedash config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the config file at `path`.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in config file {}", path.display()))
    }

    /// Loads `explicit` when given, else `./moviedash.toml` when it exists,
    /// else the built-in defaults.
    ///
    /// # Errors
    /// Returns an error when a selected config file cannot be loaded.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let implicit = Path::new(DEFAULT_CONFIG_FILE);
        if implicit.is_file() {
            return Self::load(implicit);
        }

        Ok(Self::default())
    }

    /// Validates numeric bounds.
    ///
    /// # Errors
    /// Returns an error for a histogram bin count outside
    /// `1..=MAX_HISTOGRAM_BINS` or an unusable rating range.
    pub fn validate(&self) -> Result<()> {
        check_bin_count("histogram_bins", self.histogram_bins)?;
        if !self.rating.min.is_finite() || !self.rating.max.is_finite() {
            bail!("rating.min and rating.max MUST be finite numbers");
        }
        if self.rating.min > self.rating.max {
            bail!("rating.min MUST be <= rating.max");
        }
        Ok(())
    }
}

fn check_bin_count(name: &str, bins: usize) -> Result<usize> {
    if bins == 0 {
        bail!("{name} MUST be >= 1");
    }
    if bins > MAX_HISTOGRAM_BINS {
        bail!("{name} MUST be <= {MAX_HISTOGRAM_BINS}");
    }
    Ok(bins)
}

/// Picks the dataset path: CLI flag, then environment, then config, then the
/// built-in file name.
#[must_use]
pub fn resolve_data_path(
    cli_arg: Option<&Path>,
    env_value: Option<String>,
    config: &DashboardConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Some(value) = env_value.filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(value);
    }

    if let Some(path) = &config.data_path {
        return path.clone();
    }

    PathBuf::from(DEFAULT_DATA_FILE)
}

impl FilterArgs {
    fn to_spec(&self, config: &DashboardConfig) -> Result<FilterSpec> {
        let mut spec = FilterSpec::default()
            .with_tags(self.tags.iter().cloned())
            .with_rating_range(
                self.min_rating.unwrap_or(config.rating.min),
                self.max_rating.unwrap_or(config.rating.max),
            );
        if !self.decades.is_empty() {
            spec = spec.with_decades(self.decades.iter().cloned());
        }
        spec.validate()?;
        Ok(spec)
    }
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when config resolution fails, the dataset cannot be
/// loaded, or the requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = DashboardConfig::resolve(cli.config.as_deref())?;
    let data_path = resolve_data_path(
        cli.data.as_deref(),
        std::env::var(DATA_PATH_ENV).ok(),
        &config,
    );

    let source = DataSource::new(data_path);
    let pipeline = MoviePipeline::open(&source).with_context(|| {
        format!(
            "failed to load movie dataset from {}",
            source.path().display()
        )
    })?;

    run_command(cli.command, &pipeline, &config)
}

/// Executes one command against an opened pipeline.
///
/// # Errors
/// Returns an error when filter validation, serialization, or output writing
/// fails.
pub fn run_command(
    command: Command,
    pipeline: &MoviePipeline,
    config: &DashboardConfig,
) -> Result<()> {
    match command {
        Command::Summary(args) => {
            let spec = args.filter.to_spec(config)?;
            let options = DashboardOptions {
                top_tags: args.top.unwrap_or(config.top_tags),
                histogram_bins: check_bin_count(
                    "--bins",
                    args.bins.unwrap_or(config.histogram_bins),
                )?,
                tag_source: args
                    .tag_source
                    .map_or(config.tag_source, map_tag_source),
            };
            let dashboard = pipeline.dashboard(&spec, &options)?;
            if args.json {
                print_json(&envelope(SUMMARY_CONTRACT, &dashboard)?)?;
            } else {
                print_summary(&dashboard);
            }
        }
        Command::Decades(args) => {
            let filtered = pipeline.filtered_table(&args.filter.to_spec(config)?);
            let decades = avg_rating_by_decade(&filtered);
            if args.json {
                print_json(&envelope(
                    DECADES_CONTRACT,
                    &DecadesJson {
                        filtered_rows: filtered.len(),
                        decades,
                    },
                )?)?;
            } else {
                print_decade_table(&decades);
            }
        }
        Command::Tags(args) => {
            let filtered = pipeline.filtered_table(&args.filter.to_spec(config)?);
            let limit = args.top.unwrap_or(config.top_tags);
            let tag_source = args.tag_source.map_or(config.tag_source, map_tag_source);
            let tags = pipeline.top_tags_for(&filtered, limit, tag_source);
            if args.json {
                print_json(&envelope(
                    TAGS_CONTRACT,
                    &TagsJson {
                        tag_source,
                        limit,
                        tags,
                    },
                )?)?;
            } else {
                println!("tag_source={}", tag_source.as_str());
                print_tag_table(&tags);
            }
        }
        Command::Histogram(args) => {
            let filtered = pipeline.filtered_table(&args.filter.to_spec(config)?);
            let bin_count = check_bin_count("--bins", args.bins.unwrap_or(config.histogram_bins))?;
            let bins = rating_histogram(&filtered, bin_count);
            if args.json {
                print_json(&envelope(
                    HISTOGRAM_CONTRACT,
                    &HistogramJson {
                        filtered_rows: filtered.len(),
                        bins,
                    },
                )?)?;
            } else {
                print_histogram(&bins);
            }
        }
        Command::Movies(args) => {
            let filtered = pipeline.filtered_table(&args.filter.to_spec(config)?);
            let mut movies = movie_rows(&filtered);
            if let Some(limit) = args.limit {
                movies.truncate(limit);
            }
            if args.json {
                print_json(&envelope(
                    MOVIES_CONTRACT,
                    &MoviesJson {
                        total_rows: filtered.len(),
                        movies,
                    },
                )?)?;
            } else {
                print_movie_table(&movies, filtered.len());
            }
        }
        Command::Export(args) => {
            let filtered = pipeline.filtered_table(&args.filter.to_spec(config)?);
            match args.output {
                Some(path) => {
                    let file = File::create(&path).with_context(|| {
                        format!("failed to create export file {}", path.display())
                    })?;
                    write_csv(&filtered, BufWriter::new(file))?;
                    info!(rows = filtered.len(), path = %path.display(), "filtered table exported");
                }
                None => {
                    let stdout = std::io::stdout();
                    write_csv(&filtered, stdout.lock())?;
                }
            }
        }
        Command::Options(args) => {
            let options = pipeline.filter_options();
            if args.json {
                print_json(&envelope(
                    OPTIONS_CONTRACT,
                    &OptionsJson {
                        decades: options.decades,
                        tags: options.tags,
                        rating_min: config.rating.min,
                        rating_max: config.rating.max,
                    },
                )?)?;
            } else {
                print_options(&options, config);
            }
        }
    }

    Ok(())
}

fn map_tag_source(value: TagSourceArg) -> TagSource {
    match value {
        TagSourceArg::Filtered => TagSource::Filtered,
        TagSourceArg::Unfiltered => TagSource::Unfiltered,
    }
}

const SUMMARY_CONTRACT: &str = "dashboard_summary.v1";
const DECADES_CONTRACT: &str = "decade_ratings.v1";
const TAGS_CONTRACT: &str = "top_tags.v1";
const HISTOGRAM_CONTRACT: &str = "rating_histogram.v1";
const MOVIES_CONTRACT: &str = "movie_listing.v1";
const OPTIONS_CONTRACT: &str = "filter_options.v1";

#[derive(Debug, Serialize)]
struct JsonEnvelope<'a, T>
where
    T: Serialize,
{
    contract_version: &'static str,
    generated_at: String,
    #[serde(flatten)]
    data: &'a T,
}

#[derive(Debug, Serialize)]
struct DecadesJson {
    filtered_rows: usize,
    decades: Vec<DecadeRating>,
}

#[derive(Debug, Serialize)]
struct TagsJson {
    tag_source: TagSource,
    limit: usize,
    tags: Vec<TagCount>,
}

#[derive(Debug, Serialize)]
struct HistogramJson {
    filtered_rows: usize,
    bins: Vec<HistogramBin>,
}

#[derive(Debug, Serialize)]
struct MoviesJson {
    total_rows: usize,
    movies: Vec<MovieRow>,
}

#[derive(Debug, Serialize)]
struct OptionsJson {
    decades: Vec<String>,
    tags: Vec<String>,
    rating_min: f64,
    rating_max: f64,
}

fn envelope<'a, T: Serialize>(
    contract_version: &'static str,
    data: &'a T,
) -> Result<JsonEnvelope<'a, T>> {
    Ok(JsonEnvelope {
        contract_version,
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| anyhow!("failed to format generated_at: {err}"))?,
        data,
    })
}

fn print_json<T: Serialize>(payload: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(payload).context("failed to encode JSON output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{body}").context("failed to write JSON output")?;
    Ok(())
}

fn print_summary(dashboard: &Dashboard) {
    println!(
        "base_rows={} filtered_rows={} tag_source={}",
        dashboard.base_rows,
        dashboard.filtered_rows,
        dashboard.tag_source.as_str()
    );
    println!();
    print_decade_table(&dashboard.avg_rating_by_decade);
    println!();
    print_tag_table(&dashboard.top_tags);
    println!();
    print_histogram(&dashboard.rating_histogram);
}

fn print_decade_table(decades: &[DecadeRating]) {
    println!("{:<10} {:<12} movies", "decade", "mean_rating");
    println!("{}", "-".repeat(32));
    for row in decades {
        println!(
            "{:<10} {:<12.3} {}",
            row.decade, row.mean_rating, row.movies
        );
    }
}

fn print_tag_table(tags: &[TagCount]) {
    println!("{:<32} count", "tag");
    println!("{}", "-".repeat(40));
    for row in tags {
        println!("{:<32} {}", row.tag, row.count);
    }
}

fn print_histogram(bins: &[HistogramBin]) {
    println!("{:<8} {:<8} count", "lower", "upper");
    println!("{}", "-".repeat(40));
    for bin in bins {
        println!(
            "{:<8.2} {:<8.2} {:<5} {}",
            bin.lower,
            bin.upper,
            bin.count,
            "#".repeat(bin.count.min(60))
        );
    }
}

fn print_movie_table(movies: &[MovieRow], total_rows: usize) {
    println!(
        "{:<48} {:<6} {:<6} tag",
        "title", "year", "rating"
    );
    println!("{}", "-".repeat(80));
    for movie in movies {
        println!(
            "{:<48} {:<6} {:<6} {}",
            movie.title,
            movie
                .release_year
                .map_or_else(|| "n/a".to_string(), |value| value.to_string()),
            movie
                .avg_rating
                .map_or_else(|| "n/a".to_string(), |value| format!("{value:.1}")),
            movie.top_relevant_tags.as_deref().unwrap_or("n/a")
        );
    }
    if movies.len() < total_rows {
        println!("showing {} of {total_rows} rows", movies.len());
    }
}

fn print_options(options: &FilterOptions, config: &DashboardConfig) {
    println!("decades={}", options.decades.join(","));
    println!("tags={}", options.tags.join(","));
    println!("rating_range={}..={}", config.rating.min, config.rating.max);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines, clippy::float_cmp)]

    use super::*;
    use movie_pipeline_core::{derive, RawTable};
    use std::sync::Arc;

    const FIXTURE_CSV: &str = "\
title,avg_rating,top_relevant_tags
Sholay (1975),8.2,action
Deewaar (1975),8.0,drama
Dilwale Dulhania Le Jayenge (1995),8.1,romance
3 Idiots (2009),not rated,comedy
Untitled Project,6.5,drama
";

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn fixture_pipeline() -> MoviePipeline {
        let raw = must(RawTable::from_reader(FIXTURE_CSV.as_bytes()).map_err(Into::into));
        let table = must(derive(&raw).map_err(Into::into));
        MoviePipeline::from_table(Arc::new(table))
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let config = tempfile::NamedTempFile::new()?;
        let config_arg = config.path().to_string_lossy().to_string();
        let mut argv = vec!["moviedash", "--config", config_arg.as_str()];
        argv.extend_from_slice(&args[1..]);
        let cli = Cli::try_parse_from(argv)?;
        run_cli(cli)
    }

    #[test]
    fn config_defaults_match_dashboard_widgets() {
        let config = DashboardConfig::default();
        assert_eq!(config.top_tags, 10);
        assert_eq!(config.histogram_bins, 20);
        assert_eq!(config.tag_source, TagSource::Filtered);
        assert_eq!(config.rating, RatingConfig { min: 0.0, max: 10.0 });
    }

    #[test]
    fn config_parses_partial_toml() {
        let config = must(DashboardConfig::from_toml_str(
            "data_path = \"movies.csv\"\ntop_tags = 5\ntag_source = \"unfiltered\"\n\n[rating]\nmax = 9.5\n",
        ));
        assert_eq!(config.data_path, Some(PathBuf::from("movies.csv")));
        assert_eq!(config.top_tags, 5);
        assert_eq!(config.histogram_bins, DEFAULT_HISTOGRAM_BINS);
        assert_eq!(config.tag_source, TagSource::Unfiltered);
        assert_eq!(config.rating.min, 0.0);
        assert_eq!(config.rating.max, 9.5);
    }

    #[test]
    fn config_rejects_unknown_keys_and_bad_bounds() {
        assert!(DashboardConfig::from_toml_str("colour = \"mako\"\n").is_err());
        assert!(DashboardConfig::from_toml_str("histogram_bins = 0\n").is_err());
        assert!(DashboardConfig::from_toml_str("histogram_bins = 1001\n").is_err());
        assert!(DashboardConfig::from_toml_str("histogram_bins = 1000\n").is_ok());
        assert!(DashboardConfig::from_toml_str("[rating]\nmin = 8.0\nmax = 2.0\n").is_err());
    }

    #[test]
    fn data_path_precedence_is_flag_env_config_default() {
        let config = DashboardConfig {
            data_path: Some(PathBuf::from("from-config.csv")),
            ..DashboardConfig::default()
        };

        assert_eq!(
            resolve_data_path(
                Some(Path::new("from-flag.csv")),
                Some("from-env.csv".to_string()),
                &config
            ),
            PathBuf::from("from-flag.csv")
        );
        assert_eq!(
            resolve_data_path(None, Some("from-env.csv".to_string()), &config),
            PathBuf::from("from-env.csv")
        );
        assert_eq!(
            resolve_data_path(None, Some("  ".to_string()), &config),
            PathBuf::from("from-config.csv")
        );
        assert_eq!(
            resolve_data_path(None, None, &DashboardConfig::default()),
            PathBuf::from(DEFAULT_DATA_FILE)
        );
    }

    #[test]
    fn filter_args_fall_back_to_config_rating_range() {
        let config = DashboardConfig {
            rating: RatingConfig { min: 2.0, max: 9.0 },
            ..DashboardConfig::default()
        };
        let args = FilterArgs {
            decades: vec!["1970s".to_string()],
            tags: Vec::new(),
            min_rating: Some(5.0),
            max_rating: None,
        };

        let spec = must(args.to_spec(&config));
        assert_eq!(spec.rating_range.low, 5.0);
        assert_eq!(spec.rating_range.high, 9.0);
        assert!(spec.tags.is_empty());
        assert_eq!(
            spec.decades.map(|set| set.into_iter().collect::<Vec<_>>()),
            Some(vec!["1970s".to_string()])
        );
    }

    #[test]
    fn filter_args_without_decades_keep_every_decade() {
        let spec = must(FilterArgs::default().to_spec(&DashboardConfig::default()));
        assert_eq!(spec.decades, None);
    }

    #[test]
    fn filter_args_reject_inverted_range() {
        let args = FilterArgs {
            min_rating: Some(9.0),
            max_rating: Some(1.0),
            ..FilterArgs::default()
        };
        assert!(args.to_spec(&DashboardConfig::default()).is_err());
    }

    #[test]
    fn envelope_flattens_payload_under_contract_version() {
        let payload = TagsJson {
            tag_source: TagSource::Filtered,
            limit: 2,
            tags: vec![TagCount {
                tag: "drama".to_string(),
                count: 1,
            }],
        };
        let value = must(
            serde_json::to_value(must(envelope(TAGS_CONTRACT, &payload))).map_err(Into::into),
        );

        assert_eq!(value["contract_version"], serde_json::json!("top_tags.v1"));
        assert_eq!(value["tag_source"], serde_json::json!("filtered"));
        assert_eq!(value["limit"], serde_json::json!(2));
        assert_eq!(value["tags"][0]["tag"], serde_json::json!("drama"));
        assert!(value["generated_at"].as_str().is_some_and(|raw| raw.ends_with('Z')));
    }

    #[test]
    fn every_command_runs_against_an_embedded_pipeline() {
        let pipeline = fixture_pipeline();
        let config = DashboardConfig::default();
        let commands = [
            vec!["moviedash", "summary", "--json"],
            vec!["moviedash", "summary", "--tag-source", "unfiltered"],
            vec!["moviedash", "decades", "--decade", "1970s"],
            vec!["moviedash", "tags", "--top", "1", "--json"],
            vec!["moviedash", "histogram", "--bins", "4"],
            vec!["moviedash", "movies", "--limit", "1"],
            vec!["moviedash", "options", "--json"],
            vec!["moviedash", "movies", "--min-rating", "0", "--max-rating", "0", "--json"],
        ];

        for args in commands {
            let cli = match Cli::try_parse_from(&args) {
                Ok(value) => value,
                Err(err) => panic!("failed to parse {args:?}: {err}"),
            };
            must(run_command(cli.command, &pipeline, &config));
        }
    }

    #[test]
    fn histogram_rejects_zero_bins() {
        let pipeline = fixture_pipeline();
        let cli = match Cli::try_parse_from(["moviedash", "histogram", "--bins", "0"]) {
            Ok(value) => value,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        assert!(run_command(cli.command, &pipeline, &DashboardConfig::default()).is_err());
    }

    #[test]
    fn bin_count_above_cap_is_rejected() {
        let pipeline = fixture_pipeline();
        let too_many = (MAX_HISTOGRAM_BINS + 1).to_string();
        for command in ["histogram", "summary"] {
            let cli = match Cli::try_parse_from(["moviedash", command, "--bins", &too_many]) {
                Ok(value) => value,
                Err(err) => panic!("failed to parse args: {err}"),
            };
            let err = match run_command(cli.command, &pipeline, &DashboardConfig::default()) {
                Ok(()) => panic!("expected {command} to reject {too_many} bins"),
                Err(err) => err,
            };
            assert!(err.to_string().contains("--bins MUST be <= 1000"));
        }

        let cli = match Cli::try_parse_from(["moviedash", "histogram", "--bins", "18446744073709551615"]) {
            Ok(value) => value,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        assert!(run_command(cli.command, &pipeline, &DashboardConfig::default()).is_err());
    }

    #[test]
    fn cli_end_to_end_load_filter_and_export() {
        let dir = must(tempfile::tempdir().map_err(Into::into));
        let data_path = dir.path().join("movies.csv");
        let export_path = dir.path().join("filtered.csv");
        must(std::fs::write(&data_path, FIXTURE_CSV).map_err(Into::into));

        let data_arg = data_path.to_string_lossy().to_string();
        let export_arg = export_path.to_string_lossy().to_string();
        must(execute_cli(&[
            "moviedash",
            "--data",
            &data_arg,
            "export",
            "--decade",
            "1970s",
            "--tag",
            "drama",
            "--output",
            &export_arg,
        ]));

        let exported = must(std::fs::read_to_string(&export_path).map_err(Into::into));
        assert_eq!(
            exported,
            "title,avg_rating,top_relevant_tags,release_year,decade\nDeewaar (1975),8,drama,1975,1970s\n"
        );
    }

    #[test]
    fn cli_reports_missing_dataset() {
        let missing = std::env::temp_dir().join("moviedash-missing-dataset.csv");
        let missing_arg = missing.to_string_lossy().to_string();
        let err = match execute_cli(&["moviedash", "--data", &missing_arg, "options"]) {
            Ok(()) => panic!("expected missing dataset to fail"),
            Err(err) => err,
        };
        let rendered = format!("{err:#}");
        assert!(rendered.contains("failed to load movie dataset"));
        assert!(rendered.contains("data source error"));
    }
}
