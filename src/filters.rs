// User selection, record filtering and the per-request compute context.

use crate::error::{ReportError, Result};
use crate::interval::Interval;
use crate::loader::Dataset;
use crate::pipeline::{process_data, AggregatedTable, Aggregation};
use crate::types::{GroupKey, UsageRecord};
use chrono::{Duration, NaiveDateTime, NaiveTime};

pub const CPO_KEYS: [GroupKey; 1] = [GroupKey::CpoName];
pub const LOCATION_KEYS: [GroupKey; 6] = [
    GroupKey::CpoName,
    GroupKey::Address1,
    GroupKey::Address2,
    GroupKey::Postcode,
    GroupKey::Latitude,
    GroupKey::Longitude,
];
pub const POSTCODE_KEYS: [GroupKey; 1] = [GroupKey::Postcode];

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Half-open range of 1-based month indexes into `Dataset::month_dates`.
    pub period: (u32, u32),
    pub lga_name: String,
    pub cpo_names: Vec<String>,
    pub interval: Interval,
}

impl Selection {
    /// Whole data period, first LGA, every CPO, monthly buckets.
    pub fn defaults(dataset: &Dataset) -> Option<Selection> {
        Some(Selection {
            period: dataset.month_span()?,
            lga_name: dataset.default_lga()?,
            cpo_names: dataset.cpo_names(),
            interval: Interval::MonthEnd,
        })
    }

    pub fn month_count(&self) -> u32 {
        self.period.1.saturating_sub(self.period.0)
    }

    /// Monthly buckets over exactly one month.
    pub fn is_single_month(&self) -> bool {
        self.interval == Interval::MonthEnd && self.month_count() == 1
    }

    pub fn validate(&self, dataset: &Dataset) -> Result<()> {
        let (start, end) = self.period;
        if start == 0 || start >= end {
            return Err(ReportError::InvalidSelection(format!(
                "month range {start}..{end} is empty"
            )));
        }
        let months = dataset.month_dates().len() as u32;
        if end > months + 1 {
            return Err(ReportError::InvalidSelection(format!(
                "month {end} is past the last data month {months}"
            )));
        }
        if self.cpo_names.is_empty() {
            return Err(ReportError::InvalidSelection(
                "select at least one charge point operator".to_string(),
            ));
        }
        if !dataset.has_lga(&self.lga_name) {
            return Err(ReportError::InvalidSelection(format!(
                "unknown local government area '{}'",
                self.lga_name
            )));
        }
        let span = dataset
            .month_span()
            .map(|(first, last)| last - first)
            .unwrap_or(0);
        if !Interval::available(span).contains(&self.interval) {
            return Err(ReportError::InvalidSelection(format!(
                "interval {} needs at least 3 months of data",
                self.interval.display_name()
            )));
        }
        Ok(())
    }

    /// Local-time window `[first of start month, first of end month)`. The
    /// last selected month is included through its final day.
    pub fn window(&self, dataset: &Dataset) -> Result<(NaiveDateTime, NaiveDateTime)> {
        let bound = |index: u32| {
            dataset
                .month_start(index)
                .map(|d| d.and_time(NaiveTime::MIN))
                .ok_or_else(|| ReportError::InvalidSelection(format!("month {index} is out of range")))
        };
        Ok((bound(self.period.0)?, bound(self.period.1)?))
    }

    pub fn title(&self, dataset: &Dataset) -> Result<String> {
        let (start, end) = self.window(dataset)?;
        let last = end - Duration::days(1);
        Ok(format!(
            "Charge point Utilisation Dashboard - {} to {}",
            start.format("%d %B"),
            last.format("%d %B")
        ))
    }
}

/// Records inside the selection's window, LGA and CPO set.
pub fn filter<'a>(dataset: &'a Dataset, selection: &Selection) -> Result<Vec<&'a UsageRecord>> {
    selection.validate(dataset)?;
    let (start, end) = selection.window(dataset)?;
    Ok(dataset
        .records
        .iter()
        .filter(|r| r.interval >= start && r.interval < end)
        .filter(|r| r.lga_name == selection.lga_name)
        .filter(|r| selection.cpo_names.iter().any(|c| *c == r.cpo_name))
        .collect())
}

/// Everything derived from one selection. Replaced wholesale on every
/// recomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    pub selection: Selection,
    pub by_cpo: AggregatedTable,
    pub by_location: AggregatedTable,
    pub by_postcode: AggregatedTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeOutcome {
    NoData,
    Ready(Computation),
}

pub fn compute(dataset: &Dataset, selection: &Selection) -> Result<ComputeOutcome> {
    let records = filter(dataset, selection)?;
    if records.is_empty() {
        tracing::info!(lga = %selection.lga_name, "no data for selection");
        return Ok(ComputeOutcome::NoData);
    }

    let mut tables = Vec::with_capacity(3);
    for keys in [&CPO_KEYS[..], &LOCATION_KEYS[..], &POSTCODE_KEYS[..]] {
        match process_data(records.iter().copied(), keys, selection.interval, true)? {
            Aggregation::Table(t) => tables.push(t),
            Aggregation::NoData => return Ok(ComputeOutcome::NoData),
        }
    }
    let mut tables = tables.into_iter();
    let (Some(by_cpo), Some(by_location), Some(by_postcode)) =
        (tables.next(), tables.next(), tables.next())
    else {
        return Ok(ComputeOutcome::NoData);
    };

    tracing::info!(
        records = records.len(),
        cpo_rows = by_cpo.rows.len(),
        location_rows = by_location.rows.len(),
        postcode_rows = by_postcode.rows.len(),
        interval = %selection.interval,
        "computation complete"
    );
    Ok(ComputeOutcome::Ready(Computation {
        selection: selection.clone(),
        by_cpo,
        by_location,
        by_postcode,
    }))
}

/// Holds only the latest computation; a new selection supersedes the old
/// result even when the new one has no data.
#[derive(Debug, Default)]
pub struct Session {
    latest: Option<Computation>,
}

impl Session {
    pub fn recompute(&mut self, dataset: &Dataset, selection: &Selection) -> Result<Option<&Computation>> {
        self.latest = None;
        if let ComputeOutcome::Ready(c) = compute(dataset, selection)? {
            self.latest = Some(c);
        }
        Ok(self.latest.as_ref())
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<&Computation> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::tests::{at, observation};
    use crate::types::Measure;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    pub(crate) fn dataset() -> Dataset {
        let mut records = Vec::new();
        for (month, day) in [(1, 10), (2, 12), (3, 14), (4, 16)] {
            records.extend(observation("Chargefox", "1 Main St", "3053", at(month, day, 9), [20.0, 5.0, 5.0, 60.0, 5.0, 0.0, 5.0], 2.0));
            records.extend(observation("Evie", "7 King St", "3000", at(month, day, 9), [10.0, 0.0, 0.0, 80.0, 0.0, 10.0, 0.0], 4.0));
        }
        let mut elsewhere = observation("Evie", "2 Pitt St", "2000", at(2, 1, 0), [1.0; 7], 1.0);
        for r in &mut elsewhere {
            r.lga_name = "Sydney".to_string();
            r.state = "NSW".to_string();
        }
        records.extend(elsewhere);
        Dataset::new(records, HashMap::new())
    }

    fn selection(period: (u32, u32)) -> Selection {
        Selection {
            period,
            lga_name: "Melbourne".to_string(),
            cpo_names: vec!["Chargefox".to_string(), "Evie".to_string()],
            interval: Interval::MonthEnd,
        }
    }

    #[test]
    fn defaults_span_the_whole_dataset() {
        let ds = dataset();
        let sel = Selection::defaults(&ds).unwrap();
        assert_eq!(sel.period, (1, 5));
        assert_eq!(sel.lga_name, "Sydney");
        assert_eq!(sel.cpo_names, vec!["Chargefox", "Evie"]);
    }

    #[test]
    fn window_is_half_open_by_month() {
        let ds = dataset();
        let sel = selection((2, 4));
        let (start, end) = sel.window(&ds).unwrap();
        assert_eq!((start, end), (at(2, 1, 0), at(4, 1, 0)));
        let records = filter(&ds, &sel).unwrap();
        assert!(records.iter().all(|r| r.interval.format("%m").to_string() != "04"));
        assert_eq!(records.len(), 2 * 2 * 9);
        assert_eq!(sel.title(&ds).unwrap(), "Charge point Utilisation Dashboard - 01 February to 31 March");
    }

    #[test]
    fn window_keeps_the_last_day_of_the_end_month() {
        let mut ds = dataset();
        ds.records.extend(observation("Evie", "7 King St", "3000", at(3, 31, 23), [1.0; 7], 4.0));
        ds.records.extend(observation("Evie", "7 King St", "3000", at(4, 1, 0), [1.0; 7], 4.0));
        let records = filter(&ds, &selection((3, 4))).unwrap();
        assert!(records.iter().any(|r| r.interval == at(3, 31, 23)));
        assert!(records.iter().all(|r| r.interval < at(4, 1, 0)));
    }

    #[test]
    fn invalid_selections_are_rejected() {
        let ds = dataset();
        assert!(filter(&ds, &selection((3, 3))).is_err());
        assert!(filter(&ds, &selection((1, 13))).is_ok());
        assert!(filter(&ds, &selection((1, 14))).is_err());
        let mut sel = selection((1, 2));
        sel.lga_name = "Atlantis".to_string();
        assert!(matches!(filter(&ds, &sel), Err(ReportError::InvalidSelection(_))));
        let mut sel = selection((1, 2));
        sel.cpo_names.clear();
        assert!(filter(&ds, &sel).is_err());
    }

    #[test]
    fn compute_builds_three_tables() {
        let ds = dataset();
        let ComputeOutcome::Ready(c) = compute(&ds, &selection((1, 5))).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(c.by_cpo.rows.len(), 8);
        assert_eq!(c.by_location.keys.len(), 6);
        assert_eq!(c.by_postcode.rows.len(), 8);
        let row = &c.by_cpo.rows[0];
        assert_eq!(c.by_cpo.value(row, Measure::InUse), Some(30.0));
        assert_eq!(c.by_cpo.value(row, Measure::UnavailableOutOfOrder), Some(5.0));
    }

    #[test]
    fn operator_absent_from_lga_yields_no_data() {
        let ds = dataset();
        let mut sel = selection((1, 5));
        sel.cpo_names = vec!["Tesla".to_string()];
        assert_eq!(compute(&ds, &sel).unwrap(), ComputeOutcome::NoData);
    }

    #[test]
    fn session_keeps_only_latest() {
        let ds = dataset();
        let mut session = Session::default();
        assert!(session.recompute(&ds, &selection((1, 5))).unwrap().is_some());
        let mut sel = selection((1, 5));
        sel.cpo_names = vec!["Tesla".to_string()];
        assert!(session.recompute(&ds, &sel).unwrap().is_none());
        assert!(session.latest().is_none());
    }
}
