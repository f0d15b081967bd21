use crate::error::{ReportError, Result};
use crate::filters::Computation;
use crate::interval::Interval;
use crate::loader::Dataset;
use crate::pipeline::{AggregatedRow, AggregatedTable};
use crate::types::{
    Centroid, CpoSummary, GroupKey, Measure, PeriodStat, PeriodStatRow, PostcodeArea, SiteMarker,
    StatusCategory, SummaryRow,
};
use crate::util::{clean_string, format_optional, maximum, mean, minimum, sample_std};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

const AVAILABLE: Measure = Measure::Status(StatusCategory::Available);

fn output_id(cpo: &str) -> String {
    format!("output_{}", clean_string(cpo).to_lowercase().replace(' ', "_"))
}

/// Summary statistics for one CPO from the by-CPO table.
pub fn summarise(table: &AggregatedTable, cpo: &str) -> CpoSummary {
    let rows: Vec<_> = table
        .rows
        .iter()
        .filter(|r| table.key_value(r, GroupKey::CpoName) == Some(cpo))
        .collect();
    let column = |m: Measure| -> Vec<Option<f64>> { rows.iter().map(|r| table.value(r, m)).collect() };

    let in_use = column(Measure::InUse);
    let down = column(Measure::UnavailableOutOfOrder);
    let uptime: Vec<Option<f64>> = in_use
        .iter()
        .zip(column(AVAILABLE))
        .map(|(u, a)| Some((*u)? + a?))
        .collect();

    CpoSummary {
        cpo_name: cpo.to_string(),
        output_id: output_id(cpo),
        chargers: rows.iter().map(|r| r.evse_port_site_count).max().unwrap_or(0),
        average_uptime: mean(&uptime),
        minimum_uptime: minimum(&uptime),
        average_utilisation: mean(&in_use),
        maximum_unavailability: maximum(&down),
        average_unavailability: mean(&down),
    }
}

/// One summary per selected CPO that has data, produced lazily in selection
/// order and keyed by output id.
pub fn summary_outputs(c: &Computation) -> impl Iterator<Item = (String, CpoSummary)> + '_ {
    c.selection
        .cpo_names
        .iter()
        .filter(move |cpo| {
            c.by_cpo
                .rows
                .iter()
                .any(|r| c.by_cpo.key_value(r, GroupKey::CpoName) == Some(cpo.as_str()))
        })
        .map(move |cpo| (output_id(cpo), summarise(&c.by_cpo, cpo)))
}

pub fn render_summary(s: &CpoSummary, interval: Interval, single_month: bool) -> String {
    let pct = |v: Option<f64>| format_optional(v, 1);
    if single_month {
        return format!(
            "{}'s {} statistics\nNumber of chargers: {} chargers\nUptime: {}%\nUtilisation: {}%\nUnavailability: {}%",
            s.cpo_name,
            interval.display_name(),
            s.chargers,
            pct(s.average_uptime),
            pct(s.average_utilisation),
            pct(s.maximum_unavailability),
        );
    }
    let unit = interval.unit();
    format!(
        "{}'s {} statistics\nNumber of chargers: {} chargers\nAverage Uptime: {}% per {unit}\nMinimum Uptime: {}% per {unit}\nAverage Utilisation: {}% per {unit}\nMaximum Unavailability: {}% per {unit}",
        s.cpo_name,
        interval.display_name(),
        s.chargers,
        pct(s.average_uptime),
        pct(s.minimum_uptime),
        pct(s.average_utilisation),
        pct(s.maximum_unavailability),
    )
}

pub fn summary_rows(summaries: &[CpoSummary]) -> Vec<SummaryRow> {
    summaries
        .iter()
        .map(|s| SummaryRow {
            cpo_name: s.cpo_name.clone(),
            chargers: s.chargers,
            average_uptime: format_optional(s.average_uptime, 1),
            minimum_uptime: format_optional(s.minimum_uptime, 1),
            average_utilisation: format_optional(s.average_utilisation, 1),
            maximum_unavailability: format_optional(s.maximum_unavailability, 1),
        })
        .collect()
}

/// Mean, sample std, count and standard error of `measure` per
/// (CPO, period number).
pub fn period_stats(
    table: &AggregatedTable,
    measure: Measure,
    interval: Interval,
    start: NaiveDate,
) -> Vec<PeriodStat> {
    let mut groups: BTreeMap<(String, i64), Vec<Option<f64>>> = BTreeMap::new();
    for row in &table.rows {
        let cpo = table.key_value(row, GroupKey::CpoName).unwrap_or_default();
        groups
            .entry((cpo.to_string(), interval.period_number(row.interval, start)))
            .or_default()
            .push(table.value(row, measure));
    }
    groups
        .into_iter()
        .map(|((cpo_name, period_number), values)| {
            let count = values.iter().flatten().count();
            let std = sample_std(&values);
            PeriodStat {
                cpo_name,
                period_number,
                mean_status: mean(&values),
                std_status: std,
                count_status: count,
                std_err: std.map(|s| s / (count as f64).sqrt()),
            }
        })
        .collect()
}

/// Default threshold: the measure's mean over the by-CPO table.
pub fn default_threshold(table: &AggregatedTable, measure: Measure) -> Option<f64> {
    let values: Vec<Option<f64>> = table.rows.iter().map(|r| table.value(r, measure)).collect();
    mean(&values)
}

#[derive(Debug, Clone, Serialize)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub measure: String,
    pub threshold: f64,
    pub threshold_label: String,
    /// Right end of the threshold line.
    pub x_max: i64,
    pub series: Vec<PeriodStat>,
}

pub fn column_graph(c: &Computation, dataset: &Dataset, measure: Measure, threshold: Option<f64>) -> Result<BarChart> {
    let threshold = match threshold {
        Some(t) if !(0.0..=100.0).contains(&t) => {
            return Err(ReportError::invalid("threshold", t.to_string()));
        }
        Some(t) => t,
        None => default_threshold(&c.by_cpo, measure).unwrap_or(50.0),
    };
    let (start, _) = c.selection.window(dataset)?;
    let interval = c.selection.interval;
    let series = period_stats(&c.by_cpo, measure, interval, start.date());
    let x_max = series.iter().map(|s| s.period_number).max().unwrap_or(0) + 1;
    let unit = interval.unit();
    let mut chars = unit.chars();
    let capitalised: String = chars
        .next()
        .map(|f| f.to_uppercase().chain(chars).collect())
        .unwrap_or_default();

    Ok(BarChart {
        title: format!("Average {} by {}", measure.label(), capitalised),
        x_label: unit.to_string(),
        measure: measure.name().to_string(),
        threshold,
        threshold_label: format!("Threshold: {threshold:.1}%"),
        x_max,
        series,
    })
}

pub fn period_rows(chart: &BarChart) -> Vec<PeriodStatRow> {
    chart
        .series
        .iter()
        .map(|s| PeriodStatRow {
            cpo_name: s.cpo_name.clone(),
            period_number: s.period_number,
            mean: format_optional(s.mean_status, 2),
            std_err: format_optional(s.std_err, 2),
            count: s.count_status,
            above_threshold: match s.mean_status {
                Some(m) if m >= chart.threshold => "yes".to_string(),
                Some(_) => "no".to_string(),
                None => "n/a".to_string(),
            },
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MapLayer {
    pub measure: String,
    pub color_scale: Option<&'static str>,
    pub range_color: (f64, f64),
    pub center: Option<Centroid>,
    pub zoom: u8,
    pub areas: Vec<PostcodeArea>,
    pub sites: Vec<SiteMarker>,
}

fn mean_by<'t>(
    table: &'t AggregatedTable,
    rows: &[&'t AggregatedRow],
    measure: Measure,
) -> Option<f64> {
    let values: Vec<Option<f64>> = rows.iter().map(|r| table.value(r, measure)).collect();
    mean(&values)
}

/// Group rows of `table` by their full key.
fn by_key(table: &AggregatedTable) -> BTreeMap<&[String], Vec<&AggregatedRow>> {
    let mut out: BTreeMap<&[String], Vec<_>> = BTreeMap::new();
    for row in &table.rows {
        out.entry(row.key.as_slice()).or_default().push(row);
    }
    out
}

pub fn chloropleth_map(c: &Computation, dataset: &Dataset, measure: Measure) -> MapLayer {
    let postcodes = &c.by_postcode;
    let areas: Vec<PostcodeArea> = by_key(postcodes)
        .into_iter()
        .map(|(key, rows)| {
            let postcode = key.first().cloned().unwrap_or_default();
            PostcodeArea {
                suburb_name: dataset.suburb(&postcode).map(str::to_string),
                value: mean_by(postcodes, &rows, measure),
                evse_port_site_count: rows.iter().map(|r| r.evse_port_site_count).max().unwrap_or(0),
                in_use: mean_by(postcodes, &rows, Measure::InUse),
                unavailable_out_of_order: mean_by(postcodes, &rows, Measure::UnavailableOutOfOrder),
                available: mean_by(postcodes, &rows, AVAILABLE),
                postcode,
            }
        })
        .collect();

    let locations = &c.by_location;
    let sites: Vec<SiteMarker> = by_key(locations)
        .into_iter()
        .map(|(_, rows)| {
            let first = rows[0];
            let text = |k: GroupKey| locations.key_value(first, k).unwrap_or_default().to_string();
            let coord = |k: GroupKey| locations.key_value(first, k).and_then(|v| v.parse::<f64>().ok());
            SiteMarker {
                cpo_name: text(GroupKey::CpoName),
                address1: text(GroupKey::Address1),
                address2: text(GroupKey::Address2),
                postcode: text(GroupKey::Postcode),
                latitude: coord(GroupKey::Latitude),
                longitude: coord(GroupKey::Longitude),
                evse_port_site_count: rows.iter().map(|r| r.evse_port_site_count).max().unwrap_or(0),
                value: mean_by(locations, &rows, measure),
            }
        })
        .collect();

    let color_scale = match measure {
        Measure::InUse => Some("Greens"),
        AVAILABLE => Some("Blues"),
        Measure::UnavailableOutOfOrder => Some("Reds"),
        _ => None,
    };
    // Upper bound is the largest single bucket, not the largest postcode mean.
    let range_color = match color_scale {
        Some(_) => {
            let values: Vec<Option<f64>> = postcodes
                .rows
                .iter()
                .map(|r| postcodes.value(r, measure))
                .collect();
            (0.0, maximum(&values).unwrap_or(100.0))
        }
        None => (0.0, 100.0),
    };

    MapLayer {
        measure: measure.name().to_string(),
        color_scale,
        range_color,
        center: dataset.centroid(&c.selection.lga_name),
        zoom: 8,
        areas,
        sites,
    }
}
