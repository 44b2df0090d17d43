use chrono::{FixedOffset, Offset, Utc};
use config::{Config, Environment, File, FileFormat};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};
use validator::Validate;

use crate::error::{ProcessingError, Result};
use crate::models::ColumnType;
use crate::utils::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_ENCODINGS, DEFAULT_MIN_YEAR, ENV_PREFIX, TIMESTAMP_COLUMN,
};

/// One configured sensor channel: the logger's raw column name, the canonical
/// name it is stored under and an optional display alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub raw: String,

    #[serde(default)]
    pub canonical: Option<String>,

    #[serde(default)]
    pub alias: Option<String>,

    /// Explicit irradiance marker; when absent the name decides
    #[serde(default)]
    pub irradiance: Option<bool>,
}

impl VariableSpec {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            canonical: None,
            alias: None,
            irradiance: None,
        }
    }

    pub fn renamed(raw: &str, canonical: &str) -> Self {
        Self {
            canonical: Some(canonical.to_string()),
            ..Self::new(raw)
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_irradiance(mut self, irradiance: bool) -> Self {
        self.irradiance = Some(irradiance);
        self
    }

    pub fn canonical_name(&self) -> &str {
        self.canonical.as_deref().unwrap_or(&self.raw)
    }

    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.canonical_name())
    }

    /// Direct, global, diffuse and UV channels count as irradiance.
    pub fn is_irradiance(&self) -> bool {
        self.irradiance.unwrap_or_else(|| {
            looks_like_irradiance(self.canonical_name()) || looks_like_irradiance(&self.raw)
        })
    }
}

fn looks_like_irradiance(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("i_")
        || lower.contains("irrad")
        || lower.contains("radiation")
        || lower.contains("radiacion")
}

/// Ordered allow-list with raw↔canonical and canonical↔alias lookups.
///
/// Built once when settings are deserialized; duplicate raw names, canonical
/// names or aliases are rejected there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<VariableSpec>", into = "Vec<VariableSpec>")]
pub struct VariableCatalog {
    specs: Vec<VariableSpec>,
    by_raw: HashMap<String, usize>,
    by_canonical: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
}

impl VariableCatalog {
    pub fn new(specs: Vec<VariableSpec>) -> Result<Self> {
        let mut by_raw = HashMap::with_capacity(specs.len());
        let mut by_canonical = HashMap::with_capacity(specs.len());
        let mut by_alias = HashMap::new();

        for (index, spec) in specs.iter().enumerate() {
            if spec.raw.trim().is_empty() {
                return Err(ProcessingError::Config(format!(
                    "Variable #{} has an empty raw name",
                    index + 1
                )));
            }
            if by_raw.insert(spec.raw.clone(), index).is_some() {
                return Err(ProcessingError::Config(format!(
                    "Raw column '{}' is configured more than once",
                    spec.raw
                )));
            }

            let canonical = spec.canonical_name();
            if canonical == TIMESTAMP_COLUMN {
                return Err(ProcessingError::Config(format!(
                    "'{}' is reserved for the timestamp column",
                    TIMESTAMP_COLUMN
                )));
            }
            if by_canonical.insert(canonical.to_string(), index).is_some() {
                return Err(ProcessingError::Config(format!(
                    "Canonical name '{}' is used by more than one variable",
                    canonical
                )));
            }

            if let Some(alias) = &spec.alias {
                if by_alias.insert(alias.clone(), index).is_some() {
                    return Err(ProcessingError::Config(format!(
                        "Alias '{}' is used by more than one variable",
                        alias
                    )));
                }
            }
        }

        Ok(Self {
            specs,
            by_raw,
            by_canonical,
            by_alias,
        })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[VariableSpec] {
        &self.specs
    }

    /// Canonical names in allow-list order
    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(VariableSpec::canonical_name)
    }

    pub fn canonical_for(&self, raw: &str) -> Option<&str> {
        self.by_raw
            .get(raw)
            .map(|&index| self.specs[index].canonical_name())
    }

    pub fn raw_for(&self, canonical: &str) -> Option<&str> {
        self.by_canonical
            .get(canonical)
            .map(|&index| self.specs[index].raw.as_str())
    }

    /// Display alias, falling back to the canonical name itself
    pub fn alias_for<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.spec(canonical)
            .map(VariableSpec::display_name)
            .unwrap_or(canonical)
    }

    pub fn canonical_for_alias(&self, alias: &str) -> Option<&str> {
        self.by_alias
            .get(alias)
            .map(|&index| self.specs[index].canonical_name())
    }

    /// Accepts a canonical name, an alias or a raw name
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some(&index) = self.by_canonical.get(name) {
            return Some(self.specs[index].canonical_name());
        }
        self.canonical_for_alias(name)
            .or_else(|| self.canonical_for(name))
    }

    pub fn spec(&self, canonical: &str) -> Option<&VariableSpec> {
        self.by_canonical.get(canonical).map(|&index| &self.specs[index])
    }

    pub fn contains_canonical(&self, name: &str) -> bool {
        self.by_canonical.contains_key(name)
    }

    pub fn position(&self, canonical: &str) -> Option<usize> {
        self.by_canonical.get(canonical).copied()
    }

    pub fn irradiance_columns(&self) -> Vec<&str> {
        self.specs
            .iter()
            .filter(|spec| spec.is_irradiance())
            .map(VariableSpec::canonical_name)
            .collect()
    }
}

impl TryFrom<Vec<VariableSpec>> for VariableCatalog {
    type Error = ProcessingError;

    fn try_from(specs: Vec<VariableSpec>) -> Result<Self> {
        Self::new(specs)
    }
}

impl From<VariableCatalog> for Vec<VariableSpec> {
    fn from(catalog: VariableCatalog) -> Self {
        catalog.specs
    }
}

/// Fixed offset from UTC for the station clock. No daylight saving.
///
/// Accepts integer hours (positive east of UTC), `"-6"`, `"UTC-06:00"`,
/// `"-05:30"` or a POSIX zone like `"Etc/GMT+6"`, whose sign is inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OffsetSpec", into = "String")]
pub struct UtcOffset(FixedOffset);

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OffsetSpec {
    Hours(i64),
    Text(String),
}

impl UtcOffset {
    const MAX_MINUTES: i32 = 14 * 60;

    pub fn from_hours(hours: i32) -> Result<Self> {
        Self::from_minutes(hours.saturating_mul(60))
    }

    pub fn from_minutes(minutes: i32) -> Result<Self> {
        if minutes.unsigned_abs() > Self::MAX_MINUTES.unsigned_abs() {
            return Err(ProcessingError::Config(format!(
                "UTC offset of {} minutes is outside ±14 hours",
                minutes
            )));
        }
        FixedOffset::east_opt(minutes * 60)
            .map(UtcOffset)
            .ok_or_else(|| ProcessingError::Config(format!("Invalid UTC offset: {} minutes", minutes)))
    }

    pub fn utc() -> Self {
        UtcOffset(Utc.fix())
    }

    pub fn fixed_offset(&self) -> FixedOffset {
        self.0
    }

    pub fn seconds(&self) -> i32 {
        self.0.local_minus_utc()
    }

    pub fn hours(&self) -> f64 {
        self.seconds() as f64 / 3600.0
    }

    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let invalid = || ProcessingError::Config(format!("Invalid UTC offset: '{}'", text));

        if let Some(rest) = trimmed.strip_prefix("Etc/GMT") {
            if rest.is_empty() {
                return Ok(Self::utc());
            }
            let minutes = parse_signed_minutes(rest).ok_or_else(invalid)?;
            return Self::from_minutes(-minutes);
        }

        let rest = trimmed
            .strip_prefix("UTC")
            .or_else(|| trimmed.strip_prefix("GMT"))
            .unwrap_or(trimmed);
        if rest.is_empty() {
            return Ok(Self::utc());
        }
        let minutes = parse_signed_minutes(rest).ok_or_else(invalid)?;
        Self::from_minutes(minutes)
    }
}

fn parse_signed_minutes(text: &str) -> Option<i32> {
    let (sign, digits) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => (1, text),
    };
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (digits.parse::<i32>().ok()?, 0),
    };
    if !(0..60).contains(&minutes) {
        return None;
    }
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    Some(sign * total)
}

impl TryFrom<OffsetSpec> for UtcOffset {
    type Error = ProcessingError;

    fn try_from(spec: OffsetSpec) -> Result<Self> {
        match spec {
            OffsetSpec::Hours(hours) => {
                let hours = i32::try_from(hours)
                    .map_err(|_| ProcessingError::Config(format!("Invalid UTC offset: {}", hours)))?;
                Self::from_hours(hours)
            }
            OffsetSpec::Text(text) => Self::parse(&text),
        }
    }
}

impl From<UtcOffset> for String {
    fn from(offset: UtcOffset) -> Self {
        offset.to_string()
    }
}

impl fmt::Display for UtcOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UTC{}", self.0)
    }
}

/// Whether NaN counting includes the timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NanScope {
    #[default]
    AllColumns,
    ValuesOnly,
}

/// What makes two rows duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    #[default]
    Timestamp,
    FullRow,
}

/// How a sink treats a `(fecha, variable)` key it already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Ignore,
    Replace,
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSettings {
    #[serde(default)]
    pub nan_scope: NanScope,

    #[serde(default)]
    pub duplicate_key: DuplicateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExportSettings {
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 1))]
    pub chunk_size: usize,

    /// Non-numeric residue becomes null instead of a cast error
    #[serde(default = "default_true")]
    pub coerce_non_numeric: bool,

    #[serde(default)]
    pub conflict: ConflictPolicy,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            coerce_non_numeric: true,
            conflict: ConflictPolicy::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

fn default_min_year() -> Option<i32> {
    Some(DEFAULT_MIN_YEAR)
}

fn default_encodings() -> Vec<String> {
    DEFAULT_ENCODINGS.iter().map(|s| s.to_string()).collect()
}

/// Station and pipeline settings. Built once per run and passed by reference
/// to every component.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub site_id: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub utc_offset: UtcOffset,

    pub variables: VariableCatalog,

    /// Mounting height in metres, keyed by canonical name
    #[serde(default)]
    pub sensor_heights: BTreeMap<String, f64>,

    #[serde(default = "default_min_year")]
    pub min_year: Option<i32>,

    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_lossy_decode: bool,

    #[serde(default)]
    pub checks: CheckSettings,

    #[serde(default)]
    #[validate(nested)]
    pub export: ExportSettings,
}

impl Settings {
    pub fn new(
        name: &str,
        latitude: f64,
        longitude: f64,
        utc_offset: UtcOffset,
        variables: Vec<VariableSpec>,
    ) -> Result<Self> {
        let settings = Self {
            name: name.to_string(),
            site_id: None,
            latitude,
            longitude,
            utc_offset,
            variables: VariableCatalog::new(variables)?,
            sensor_heights: BTreeMap::new(),
            min_year: default_min_year(),
            encodings: default_encodings(),
            allow_lossy_decode: true,
            checks: CheckSettings::default(),
            export: ExportSettings::default(),
        };
        settings.check()?;
        Ok(settings)
    }

    /// Load from a TOML/JSON/YAML file with `ESOLMET_*` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.check()?;
        debug!(
            "Loaded settings for '{}' ({} variables) from {}",
            settings.name,
            settings.variables.len(),
            path.display()
        );
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    pub fn with_min_year(mut self, min_year: Option<i32>) -> Self {
        self.min_year = min_year;
        self
    }

    pub fn with_checks(mut self, checks: CheckSettings) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_export(mut self, export: ExportSettings) -> Self {
        self.export = export;
        self
    }

    pub fn with_encodings(mut self, encodings: &[&str], allow_lossy_decode: bool) -> Self {
        self.encodings = encodings.iter().map(|s| s.to_string()).collect();
        self.allow_lossy_decode = allow_lossy_decode;
        self
    }

    fn check(&self) -> Result<()> {
        self.validate()?;

        if self.variables.is_empty() {
            return Err(ProcessingError::Config(
                "At least one variable must be configured".to_string(),
            ));
        }

        for label in &self.encodings {
            if Encoding::for_label(label.as_bytes()).is_none() {
                return Err(ProcessingError::Config(format!(
                    "Unknown encoding label '{}'",
                    label
                )));
            }
        }

        for name in self.sensor_heights.keys() {
            if !self.variables.contains_canonical(name) {
                warn!("Sensor height configured for unknown variable '{}'", name);
            }
        }

        Ok(())
    }

    /// Expected dtype per column of the pruned table
    pub fn expected_types(&self) -> Vec<(String, ColumnType)> {
        std::iter::once((TIMESTAMP_COLUMN.to_string(), ColumnType::DateTime))
            .chain(
                self.variables
                    .canonical_names()
                    .map(|name| (name.to_string(), ColumnType::Float64)),
            )
            .collect()
    }

    /// Configured variables that do not appear in the given header
    pub fn unmatched_variables<'a>(&'a self, headers: &[String]) -> Vec<&'a str> {
        self.variables
            .specs()
            .iter()
            .filter(|spec| {
                !headers
                    .iter()
                    .any(|h| h == &spec.raw || h == spec.canonical_name())
            })
            .map(VariableSpec::canonical_name)
            .collect()
    }
}
