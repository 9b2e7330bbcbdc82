//! Load, derive, filter and aggregate a movie ratings table.
//!
//! The pipeline is a straight chain consumed by a presentation layer:
//! - [`DataSource::load`] reads the CSV once and caches the derived base table.
//! - [`derive`] adds `release_year` and `decade` and normalizes `avg_rating`.
//! - [`filter`] applies a [`FilterSpec`] and returns a new table.
//! - [`avg_rating_by_decade`], [`top_tags`] and [`rating_histogram`] build the
//!   aggregate views; [`write_csv`] exports a table back to CSV.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

pub const TITLE_COLUMN: &str = "title";
pub const AVG_RATING_COLUMN: &str = "avg_rating";
pub const TAG_COLUMN: &str = "top_relevant_tags";
pub const RELEASE_YEAR_COLUMN: &str = "release_year";
pub const DECADE_COLUMN: &str = "decade";

pub const DEFAULT_TOP_TAGS: usize = 10;
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;
/// Upper bound on the bin count [`rating_histogram`] will allocate.
pub const MAX_HISTOGRAM_BINS: usize = 1_000;
pub const DEFAULT_RATING_MIN: f64 = 0.0;
pub const DEFAULT_RATING_MAX: f64 = 10.0;

#[allow(clippy::expect_used)]
static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([0-9]{4})\)").expect("release year pattern must compile"));

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("data source error: cannot read {}: {source}", .path.display())]
    DataSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Header plus string cells, exactly as read from the source CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Reads a headed CSV document into memory.
    ///
    /// # Errors
    /// Returns [`PipelineError::Csv`] when the document is not valid CSV or a
    /// row's field count differs from the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PipelineError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    fn require_column(&self, name: &str) -> Result<usize, PipelineError> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }
}

/// Reads the CSV at `path` without deriving anything.
///
/// # Errors
/// Returns [`PipelineError::DataSource`] when the file cannot be opened and
/// [`PipelineError::Csv`] when its contents are malformed.
pub fn read_raw_table(path: &Path) -> Result<RawTable, PipelineError> {
    let file = File::open(path).map_err(|source| PipelineError::DataSource {
        path: path.to_path_buf(),
        source,
    })?;
    RawTable::from_reader(file)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub title: String,
    pub avg_rating: Option<f64>,
    pub top_relevant_tags: Option<String>,
    pub release_year: Option<i32>,
    pub decade: Option<String>,
    /// Uninterpreted `(column, value)` cells in source column order.
    pub passthrough: Vec<(String, String)>,
}

impl MovieRecord {
    /// Renders the value of `column` as a CSV cell; nulls become empty cells.
    #[must_use]
    pub fn cell(&self, column: &str) -> String {
        match column {
            TITLE_COLUMN => self.title.clone(),
            AVG_RATING_COLUMN => self
                .avg_rating
                .map(|value| value.to_string())
                .unwrap_or_default(),
            TAG_COLUMN => self.top_relevant_tags.clone().unwrap_or_default(),
            RELEASE_YEAR_COLUMN => self
                .release_year
                .map(|value| value.to_string())
                .unwrap_or_default(),
            DECADE_COLUMN => self.decade.clone().unwrap_or_default(),
            other => self
                .passthrough_value(other)
                .map(str::to_string)
                .unwrap_or_default(),
        }
    }

    /// First passthrough cell stored under `column`.
    #[must_use]
    pub fn passthrough_value(&self, column: &str) -> Option<&str> {
        self.passthrough
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// An ordered set of movie records sharing one column layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieTable {
    columns: Vec<String>,
    records: Vec<MovieRecord>,
}

impl MovieTable {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn records(&self) -> &[MovieRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn with_records(&self, records: Vec<MovieRecord>) -> Self {
        Self {
            columns: self.columns.clone(),
            records,
        }
    }
}

/// Returns the year inside the first `(YYYY)` group of `title`.
#[must_use]
pub fn extract_release_year(title: &str) -> Option<i32> {
    YEAR_PATTERN
        .captures(title)
        .and_then(|captures| captures.get(1))
        .and_then(|year| year.as_str().parse().ok())
}

#[must_use]
pub fn decade_label(year: i32) -> String {
    format!("{}s", year.div_euclid(10) * 10)
}

/// Parses a rating cell; blanks, garbage and non-finite values become `None`.
#[must_use]
pub fn coerce_rating(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn is_modelled_column(name: &str) -> bool {
    matches!(
        name,
        TITLE_COLUMN | AVG_RATING_COLUMN | TAG_COLUMN | RELEASE_YEAR_COLUMN | DECADE_COLUMN
    )
}

/// Flags the columns backed by typed record fields. Only the first occurrence
/// of a modelled name counts; repeated headers are carried as passthrough.
fn modelled_slots(columns: &[String]) -> Vec<bool> {
    let mut seen = BTreeSet::new();
    columns
        .iter()
        .map(|name| is_modelled_column(name) && seen.insert(name.as_str()))
        .collect()
}

/// Builds the typed table from raw cells.
///
/// `release_year` and `decade` are always recomputed from `title`; when the
/// source already carries those columns they keep their position, otherwise
/// they are appended.
///
/// # Errors
/// Returns [`PipelineError::MissingColumn`] when a required column is absent.
pub fn derive(raw: &RawTable) -> Result<MovieTable, PipelineError> {
    let title_index = raw.require_column(TITLE_COLUMN)?;
    let rating_index = raw.require_column(AVG_RATING_COLUMN)?;
    let tag_index = raw.require_column(TAG_COLUMN)?;

    let mut columns = raw.headers.clone();
    for derived in [RELEASE_YEAR_COLUMN, DECADE_COLUMN] {
        if !columns.iter().any(|column| column == derived) {
            columns.push(derived.to_string());
        }
    }

    let slots = modelled_slots(&raw.headers);
    let mut coerced_ratings = 0_usize;
    let mut undated_titles = 0_usize;
    let mut records = Vec::with_capacity(raw.rows.len());

    for row in &raw.rows {
        let cell = |index: usize| row.get(index).map_or("", String::as_str);

        let title = cell(title_index).to_string();
        let release_year = extract_release_year(&title);
        if release_year.is_none() {
            undated_titles += 1;
        }

        let raw_rating = cell(rating_index);
        let avg_rating = coerce_rating(raw_rating);
        if avg_rating.is_none() && !raw_rating.trim().is_empty() {
            coerced_ratings += 1;
        }

        let tag = cell(tag_index);
        let passthrough = raw
            .headers
            .iter()
            .zip(&slots)
            .enumerate()
            .filter(|(_, (_, modelled))| !**modelled)
            .map(|(index, (name, _))| (name.clone(), cell(index).to_string()))
            .collect();

        records.push(MovieRecord {
            title,
            avg_rating,
            top_relevant_tags: (!tag.is_empty()).then(|| tag.to_string()),
            release_year,
            decade: release_year.map(decade_label),
            passthrough,
        });
    }

    if coerced_ratings > 0 {
        debug!(coerced_ratings, "non-numeric avg_rating values coerced to null");
    }
    if undated_titles > 0 {
        debug!(undated_titles, "titles without a (YYYY) release year");
    }

    Ok(MovieTable { columns, records })
}

/// Owns the location of the dataset and caches its derived table.
///
/// The first successful [`DataSource::load`] reads and derives the file; every
/// later call hands back the same `Arc`. Failed loads are not cached.
#[derive(Debug)]
pub struct DataSource {
    path: PathBuf,
    table: OnceCell<Arc<MovieTable>>,
}

impl DataSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.table.get().is_some()
    }

    /// Returns the cached base table, reading it on first use.
    ///
    /// # Errors
    /// Returns [`PipelineError::DataSource`], [`PipelineError::Csv`] or
    /// [`PipelineError::MissingColumn`] when the source cannot be loaded.
    pub fn load(&self) -> Result<Arc<MovieTable>, PipelineError> {
        self.table
            .get_or_try_init(|| {
                let span = info_span!("load", path = %self.path.display());
                let _guard = span.enter();

                let raw = read_raw_table(&self.path)?;
                let table = derive(&raw)?;
                info!(
                    rows = table.len(),
                    columns = table.columns().len(),
                    "movie dataset loaded"
                );
                Ok(Arc::new(table))
            })
            .map(Arc::clone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingRange {
    pub low: f64,
    pub high: f64,
}

impl RatingRange {
    #[must_use]
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }
}

impl Default for RatingRange {
    fn default() -> Self {
        Self::new(DEFAULT_RATING_MIN, DEFAULT_RATING_MAX)
    }
}

/// Decade set, tag set and rating range selecting rows of a table.
///
/// `decades: None` keeps every non-null decade; `Some` of an empty set keeps
/// nothing. An empty `tags` set disables the tag filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub decades: Option<BTreeSet<String>>,
    pub tags: BTreeSet<String>,
    pub rating_range: RatingRange,
}

impl FilterSpec {
    #[must_use]
    pub fn with_decades<I, S>(mut self, decades: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decades = Some(decades.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_rating_range(mut self, low: f64, high: f64) -> Self {
        self.rating_range = RatingRange::new(low, high);
        self
    }

    /// Checks that the rating bounds describe a usable range.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidFilter`] for NaN bounds or when the
    /// lower bound exceeds the upper bound.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let RatingRange { low, high } = self.rating_range;
        if low.is_nan() || high.is_nan() {
            return Err(PipelineError::InvalidFilter(
                "rating bounds must be numbers".to_string(),
            ));
        }
        if low > high {
            return Err(PipelineError::InvalidFilter(format!(
                "minimum rating {low} exceeds maximum rating {high}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn matches(&self, record: &MovieRecord) -> bool {
        let decade_ok = match (record.decade.as_ref(), self.decades.as_ref()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(decade), Some(allowed)) => allowed.contains(decade),
        };
        let rating_ok = record
            .avg_rating
            .is_some_and(|rating| self.rating_range.contains(rating));
        let tag_ok = self.tags.is_empty()
            || record
                .top_relevant_tags
                .as_ref()
                .is_some_and(|tag| self.tags.contains(tag));

        decade_ok && rating_ok && tag_ok
    }
}

/// Returns the rows of `table` matching `spec`, in source order.
#[must_use]
pub fn filter(table: &MovieTable, spec: &FilterSpec) -> MovieTable {
    let records = table
        .records()
        .iter()
        .filter(|record| spec.matches(record))
        .cloned()
        .collect::<Vec<_>>();
    debug!(
        base_rows = table.len(),
        filtered_rows = records.len(),
        "filter applied"
    );
    table.with_records(records)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecadeRating {
    pub decade: String,
    pub mean_rating: f64,
    pub movies: usize,
}

/// Mean rating per decade, ordered by decade label.
///
/// Rows with a null decade or rating are skipped; a decade with no rated rows
/// does not appear.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn avg_rating_by_decade(table: &MovieTable) -> Vec<DecadeRating> {
    // Running mean; a plain sum overflows for ratings near f64::MAX.
    let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for record in table.records() {
        let (Some(decade), Some(rating)) = (record.decade.as_deref(), record.avg_rating) else {
            continue;
        };
        let (mean, movies) = groups.entry(decade).or_insert((0.0, 0));
        *movies += 1;
        let weight = *movies as f64;
        *mean = *mean + rating / weight - *mean / weight;
    }

    groups
        .into_iter()
        .map(|(decade, (mean_rating, movies))| DecadeRating {
            decade: decade.to_string(),
            mean_rating,
            movies,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Which table feeds the tag counts shown next to a filtered view.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    #[default]
    Filtered,
    Unfiltered,
}

impl TagSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Unfiltered => "unfiltered",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "filtered" => Some(Self::Filtered),
            "unfiltered" => Some(Self::Unfiltered),
            _ => None,
        }
    }
}

/// The `n` most frequent non-null tags, most frequent first.
///
/// Equal counts keep the order in which each tag first appears in `table`.
#[must_use]
pub fn top_tags(table: &MovieTable, n: usize) -> Vec<TagCount> {
    let mut counts: Vec<TagCount> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for tag in table
        .records()
        .iter()
        .filter_map(|record| record.top_relevant_tags.as_deref())
    {
        if let Some(&position) = positions.get(tag) {
            counts[position].count += 1;
        } else {
            positions.insert(tag, counts.len());
            counts.push(TagCount {
                tag: tag.to_string(),
                count: 1,
            });
        }
    }

    counts.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count));
    counts.truncate(n);
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram over the non-null ratings of `table`.
///
/// Bins span `[min, max]` of the observed ratings and the last bin is closed
/// on the right. A single distinct rating `v` spans `[v - 0.5, v + 0.5]`.
/// `bins` is capped at [`MAX_HISTOGRAM_BINS`].
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn rating_histogram(table: &MovieTable, bins: usize) -> Vec<HistogramBin> {
    let ratings = table
        .records()
        .iter()
        .filter_map(|record| record.avg_rating)
        .collect::<Vec<_>>();
    if bins == 0 || ratings.is_empty() {
        return Vec::new();
    }
    let bins = bins.min(MAX_HISTOGRAM_BINS);

    let (mut low, mut high) = ratings
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), &value| {
            (low.min(value), high.max(value))
        });
    if high <= low {
        low -= 0.5;
        high += 0.5;
    }

    let width = (high - low) / bins as f64;
    let mut counts = vec![0_usize; bins];
    for rating in ratings {
        let index = (((rating - low) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(index, count)| HistogramBin {
            lower: low + width * index as f64,
            upper: if index + 1 == bins {
                high
            } else {
                low + width * (index + 1) as f64
            },
            count,
        })
        .collect()
}

/// The four columns shown in the movie listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRow {
    pub title: String,
    pub release_year: Option<i32>,
    pub avg_rating: Option<f64>,
    pub top_relevant_tags: Option<String>,
}

#[must_use]
pub fn movie_rows(table: &MovieTable) -> Vec<MovieRow> {
    table
        .records()
        .iter()
        .map(|record| MovieRow {
            title: record.title.clone(),
            release_year: record.release_year,
            avg_rating: record.avg_rating,
            top_relevant_tags: record.top_relevant_tags.clone(),
        })
        .collect()
}

/// Distinct selectable values for building a [`FilterSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub decades: Vec<String>,
    pub tags: Vec<String>,
}

#[must_use]
pub fn filter_options(table: &MovieTable) -> FilterOptions {
    let decades = table
        .records()
        .iter()
        .filter_map(|record| record.decade.clone())
        .collect::<BTreeSet<_>>();
    let tags = table
        .records()
        .iter()
        .filter_map(|record| record.top_relevant_tags.clone())
        .collect::<BTreeSet<_>>();

    FilterOptions {
        decades: decades.into_iter().collect(),
        tags: tags.into_iter().collect(),
    }
}

/// Writes `table` as headed UTF-8 CSV using the table's own column order.
///
/// # Errors
/// Returns [`PipelineError::Csv`] when the underlying writer fails.
pub fn write_csv<W: Write>(table: &MovieTable, writer: W) -> Result<(), PipelineError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(table.columns())?;
    let slots = modelled_slots(table.columns());
    for record in table.records() {
        let mut extra = record.passthrough.iter().map(|(_, value)| value.as_str());
        let row = table
            .columns()
            .iter()
            .zip(&slots)
            .map(|(column, &modelled)| {
                if modelled {
                    record.cell(column)
                } else {
                    extra.next().unwrap_or_default().to_string()
                }
            })
            .collect::<Vec<_>>();
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Renders `table` as CSV text.
///
/// # Errors
/// Returns [`PipelineError::Csv`] when serialization fails.
pub fn to_csv_string(table: &MovieTable) -> Result<String, PipelineError> {
    let mut buffer = Vec::new();
    write_csv(table, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardOptions {
    pub top_tags: usize,
    pub histogram_bins: usize,
    pub tag_source: TagSource,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            top_tags: DEFAULT_TOP_TAGS,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            tag_source: TagSource::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub filter: FilterSpec,
    pub base_rows: usize,
    pub filtered_rows: usize,
    pub avg_rating_by_decade: Vec<DecadeRating>,
    pub tag_source: TagSource,
    pub top_tags: Vec<TagCount>,
    pub rating_histogram: Vec<HistogramBin>,
}

/// Read-only handle over the loaded base table.
#[derive(Debug, Clone)]
pub struct MoviePipeline {
    base: Arc<MovieTable>,
}

impl MoviePipeline {
    /// Opens the pipeline over the cached table of `source`.
    ///
    /// # Errors
    /// Propagates any [`DataSource::load`] failure.
    pub fn open(source: &DataSource) -> Result<Self, PipelineError> {
        Ok(Self {
            base: source.load()?,
        })
    }

    #[must_use]
    pub fn from_table(table: Arc<MovieTable>) -> Self {
        Self { base: table }
    }

    #[must_use]
    pub fn base_table(&self) -> &MovieTable {
        &self.base
    }

    #[must_use]
    pub fn filtered_table(&self, spec: &FilterSpec) -> MovieTable {
        filter(&self.base, spec)
    }

    #[must_use]
    pub fn filter_options(&self) -> FilterOptions {
        filter_options(&self.base)
    }

    /// Tag counts for a view, taken from `filtered` or the base table.
    #[must_use]
    pub fn top_tags_for(&self, filtered: &MovieTable, n: usize, source: TagSource) -> Vec<TagCount> {
        match source {
            TagSource::Filtered => top_tags(filtered, n),
            TagSource::Unfiltered => top_tags(&self.base, n),
        }
    }

    /// Computes every aggregate view for one filter spec.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidFilter`] when `spec` fails validation.
    pub fn dashboard(
        &self,
        spec: &FilterSpec,
        options: &DashboardOptions,
    ) -> Result<Dashboard, PipelineError> {
        spec.validate()?;
        let filtered = self.filtered_table(spec);

        Ok(Dashboard {
            filter: spec.clone(),
            base_rows: self.base.len(),
            filtered_rows: filtered.len(),
            avg_rating_by_decade: avg_rating_by_decade(&filtered),
            tag_source: options.tag_source,
            top_tags: self.top_tags_for(&filtered, options.top_tags, options.tag_source),
            rating_histogram: rating_histogram(&filtered, options.histogram_bins),
        })
    }
}
