use crate::config::AppConfig;
use crate::error::Result;
use crate::types::{Centroid, RawRow, UsageRecord, Variable};
use crate::util::{add_months, parse_f64_safe, parse_timestamp_utc, text_or};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
    /// Rows whose state has no configured offset and were kept in UTC.
    pub utc_fallback: usize,
}

/// The usage dataset and its lookups. Loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<UsageRecord>,
    pub lga_centroids: HashMap<String, Centroid>,
    /// Postcode to suburb name, first seen wins.
    pub suburbs: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CentroidRow {
    lga_name: String,
    lat: f64,
    lon: f64,
}

pub fn load_usage(
    path: &Path,
    zones: &BTreeMap<String, Tz>,
) -> Result<(Vec<UsageRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut report = LoadReport::default();
    let mut records: Vec<UsageRecord> = Vec::new();
    let mut unmapped: HashSet<String> = HashSet::new();

    for result in rdr.deserialize::<RawRow>() {
        report.total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(_) => {
                report.parse_errors += 1;
                continue;
            }
        };

        let Some(ts) = parse_timestamp_utc(row.interval.as_deref()) else {
            report.parse_errors += 1;
            continue;
        };
        let Some(value) = parse_f64_safe(row.value.as_deref()) else {
            report.parse_errors += 1;
            continue;
        };
        let Some(variable) = row
            .variable
            .as_deref()
            .and_then(|v| v.parse::<Variable>().ok())
        else {
            report.parse_errors += 1;
            continue;
        };

        let state = text_or(row.state, "Unknown");
        let tz = match zones.get(&state) {
            Some(tz) => *tz,
            None => {
                report.utc_fallback += 1;
                unmapped.insert(state.clone());
                Tz::UTC
            }
        };
        let interval: NaiveDateTime = ts.with_timezone(&tz).naive_local();

        records.push(UsageRecord {
            interval,
            state,
            lga_name: text_or(row.lga_name, "Unknown"),
            cpo_name: text_or(row.cpo_name, "Unknown CPO"),
            address1: text_or(row.address1, ""),
            address2: text_or(row.address2, ""),
            postcode: text_or(row.postcode, ""),
            latitude: parse_f64_safe(row.latitude.as_deref()),
            longitude: parse_f64_safe(row.longitude.as_deref()),
            variable,
            value,
        });
    }

    if !unmapped.is_empty() {
        let mut states: Vec<String> = unmapped.into_iter().collect();
        states.sort();
        tracing::warn!(states = ?states, "no timezone for states, keeping UTC");
    }
    report.loaded_rows = records.len();
    Ok((records, report))
}

pub fn load_lga_centroids(path: &Path) -> Result<HashMap<String, Centroid>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut out = HashMap::new();
    for result in rdr.deserialize::<CentroidRow>() {
        let row = result?;
        out.insert(
            row.lga_name.trim().to_string(),
            Centroid {
                lat: row.lat,
                lon: row.lon,
            },
        );
    }
    Ok(out)
}

/// Load the usage data named by `cfg` (or `usage_override`) plus the
/// optional LGA centroid table.
pub fn load_dataset(cfg: &AppConfig, usage_override: Option<&Path>) -> Result<(Dataset, LoadReport)> {
    let zones = cfg.state_zones()?;
    let usage_path = usage_override.unwrap_or(&cfg.data.usage_csv);
    let (records, report) = load_usage(usage_path, &zones)?;
    tracing::info!(
        path = %usage_path.display(),
        total_rows = report.total_rows,
        loaded_rows = report.loaded_rows,
        parse_errors = report.parse_errors,
        "loaded usage data"
    );

    let lga_centroids = match &cfg.data.lga_centroids_csv {
        Some(path) => load_lga_centroids(path)?,
        None => HashMap::new(),
    };
    Ok((Dataset::new(records, lga_centroids), report))
}

impl Dataset {
    pub fn new(records: Vec<UsageRecord>, lga_centroids: HashMap<String, Centroid>) -> Self {
        let mut suburbs: HashMap<String, String> = HashMap::new();
        for r in &records {
            if !r.postcode.is_empty() {
                suburbs
                    .entry(r.postcode.clone())
                    .or_insert_with(|| r.address2.clone());
            }
        }
        Self {
            records,
            lga_centroids,
            suburbs,
        }
    }

    fn year_range(&self) -> Option<(i32, i32)> {
        let first = self.records.iter().map(|r| r.interval.year()).min()?;
        let last = self.records.iter().map(|r| r.interval.year()).max()?;
        Some((first, last))
    }

    /// First day of every month from January of the earliest year to
    /// December of the latest year.
    pub fn month_dates(&self) -> Vec<NaiveDate> {
        let Some((first, last)) = self.year_range() else {
            return Vec::new();
        };
        let months = i64::from(last - first + 1) * 12;
        (0..months).filter_map(|i| add_months(first, 1, i)).collect()
    }

    /// 1-based index into [`Dataset::month_dates`] of `date`'s month.
    pub fn month_index(&self, date: NaiveDate) -> Option<u32> {
        let (first, _) = self.year_range()?;
        u32::try_from((date.year() - first) * 12 + date.month0() as i32 + 1).ok()
    }

    /// (first month, last month + 1): the full period of the data.
    pub fn month_span(&self) -> Option<(u32, u32)> {
        let first = self.records.iter().map(|r| r.interval).min()?;
        let last = self.records.iter().map(|r| r.interval).max()?;
        Some((self.month_index(first.date())?, self.month_index(last.date())? + 1))
    }

    /// First day of month `index` (1-based), resolved by calendar arithmetic
    /// so indexes past the end of [`Dataset::month_dates`] still work.
    pub fn month_start(&self, index: u32) -> Option<NaiveDate> {
        let (first, _) = self.year_range()?;
        add_months(first, 1, i64::from(index) - 1)
    }

    pub fn state_lgas(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for r in &self.records {
            out.entry(r.state.clone())
                .or_default()
                .insert(r.lga_name.clone());
        }
        out
    }

    pub fn default_lga(&self) -> Option<String> {
        self.state_lgas()
            .into_values()
            .next()
            .and_then(|lgas| lgas.into_iter().next())
    }

    pub fn has_lga(&self, lga_name: &str) -> bool {
        self.records.iter().any(|r| r.lga_name == lga_name)
    }

    /// CPO names in order of first appearance.
    pub fn cpo_names(&self) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.cpo_name.as_str()))
            .map(|r| r.cpo_name.clone())
            .collect()
    }

    pub fn suburb(&self, postcode: &str) -> Option<&str> {
        self.suburbs.get(postcode).map(String::as_str)
    }

    pub fn centroid(&self, lga_name: &str) -> Option<Centroid> {
        self.lga_centroids.get(lga_name).copied()
    }
}
