// Long-to-wide aggregation of usage records into status percentages.
//
// The stages are exposed separately so they can be composed or tested on
// their own. `pivot` sums duplicates and widens, `WideTable::combine` merges
// status categories, `WideTable::resample` re-buckets in time and
// `WideTable::percentages` turns counts into shares of `Total`.
// `process_data` runs all of them.

use crate::error::{ReportError, Result};
use crate::interval::Interval;
use crate::types::{GroupKey, Measure, StatusCategory, UsageRecord, Variable};
use crate::util::round2;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Wide table of raw counts: one row per (key values, interval).
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub keys: Vec<GroupKey>,
    pub measures: Vec<Measure>,
    pub has_total: bool,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub key: Vec<String>,
    pub interval: NaiveDateTime,
    pub port_count: Option<f64>,
    pub total: f64,
    /// Aligned with [`WideTable::measures`].
    pub values: Vec<f64>,
}

/// Percentages of `Total` per measure. A `None` value means the bucket's
/// `Total` was zero, so the share is undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTable {
    pub keys: Vec<GroupKey>,
    pub measures: Vec<Measure>,
    pub rows: Vec<AggregatedRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub key: Vec<String>,
    pub evse_port_site_count: u32,
    pub interval: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Nothing matched the caller's filters.
    NoData,
    Table(AggregatedTable),
}

impl Aggregation {
    #[cfg(test)]
    pub fn into_table(self) -> Option<AggregatedTable> {
        match self {
            Aggregation::NoData => None,
            Aggregation::Table(t) => Some(t),
        }
    }
}

const ACTIVE: [StatusCategory; 3] = [
    StatusCategory::Charging,
    StatusCategory::Finishing,
    StatusCategory::Reserved,
];
const DOWN: [StatusCategory; 2] = [StatusCategory::Unavailable, StatusCategory::OutOfOrder];
const KEPT: [StatusCategory; 2] = [StatusCategory::Available, StatusCategory::Unknown];

#[derive(Default)]
struct Cells {
    statuses: BTreeMap<StatusCategory, f64>,
    total: f64,
    port_count: Option<f64>,
}

/// Sum `value` over duplicate (keys, interval, variable) rows and widen to
/// one column per status category present.
pub fn pivot<'a, I>(records: I, keys: &[GroupKey]) -> Result<WideTable>
where
    I: IntoIterator<Item = &'a UsageRecord>,
{
    if keys.is_empty() {
        return Err(ReportError::InvalidSelection(
            "at least one grouping key is required".to_string(),
        ));
    }

    let mut present: BTreeSet<StatusCategory> = BTreeSet::new();
    let mut has_total = false;
    let mut cells: BTreeMap<(Vec<String>, NaiveDateTime), Cells> = BTreeMap::new();

    for r in records {
        let key: Vec<String> = keys.iter().map(|k| r.key_value(*k)).collect();
        let c = cells.entry((key, r.interval)).or_default();
        match r.variable {
            Variable::Status(s) => {
                present.insert(s);
                *c.statuses.entry(s).or_insert(0.0) += r.value;
            }
            Variable::Total => {
                has_total = true;
                c.total += r.value;
            }
            Variable::PortCount => {
                *c.port_count.get_or_insert(0.0) += r.value;
            }
        }
    }

    let categories: Vec<StatusCategory> = StatusCategory::ALL
        .into_iter()
        .filter(|s| present.contains(s))
        .collect();
    let rows = cells
        .into_iter()
        .map(|((key, interval), c)| WideRow {
            key,
            interval,
            port_count: c.port_count,
            total: c.total,
            values: categories
                .iter()
                .map(|s| c.statuses.get(s).copied().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    Ok(WideTable {
        keys: keys.to_vec(),
        measures: categories.into_iter().map(Measure::Status).collect(),
        has_total,
        rows,
    })
}

#[derive(Debug, Clone, Copy)]
struct PortCount(f64);

impl PartialEq for PortCount {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PortCount {}

impl PartialOrd for PortCount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PortCount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl WideTable {
    fn index_of(&self, measure: Measure) -> Option<usize> {
        self.measures.iter().position(|m| *m == measure)
    }

    /// Replace Charging/Finishing/Reserved with `in_use` and
    /// Unavailable/Out of order with `unavailable_out_of_order`.
    pub fn combine(self) -> Result<WideTable> {
        let mut missing: Vec<String> = ACTIVE
            .iter()
            .chain(DOWN.iter())
            .chain(KEPT.iter())
            .filter(|s| self.index_of(Measure::Status(**s)).is_none())
            .map(|s| s.as_str().to_string())
            .collect();
        if !self.has_total {
            missing.push("Total".to_string());
        }
        if !missing.is_empty() {
            return Err(ReportError::MissingCategories(missing));
        }

        let idx = |s: StatusCategory| self.index_of(Measure::Status(s)).unwrap_or_default();
        let active: Vec<usize> = ACTIVE.iter().map(|s| idx(*s)).collect();
        let down: Vec<usize> = DOWN.iter().map(|s| idx(*s)).collect();
        let kept: Vec<usize> = KEPT.iter().map(|s| idx(*s)).collect();

        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                let sum = |ids: &[usize]| ids.iter().map(|i| row.values[*i]).sum::<f64>();
                let values = vec![
                    sum(&active),
                    sum(&down),
                    row.values[kept[0]],
                    row.values[kept[1]],
                ];
                WideRow { values, ..row }
            })
            .collect();

        Ok(WideTable {
            keys: self.keys,
            measures: vec![
                Measure::InUse,
                Measure::UnavailableOutOfOrder,
                Measure::Status(StatusCategory::Available),
                Measure::Status(StatusCategory::Unknown),
            ],
            has_total: true,
            rows,
        })
    }

    /// Re-bucket every (key values, port count) group to `interval`,
    /// summing counts. Buckets between a group's first and last bucket that
    /// saw no rows are emitted with zero counts. Rows without a port count
    /// cannot be grouped and are dropped.
    pub fn resample(&self, interval: Interval) -> Result<WideTable> {
        let mut groups: BTreeMap<(Vec<String>, PortCount), Vec<&WideRow>> = BTreeMap::new();
        let mut dropped = 0usize;
        for row in &self.rows {
            match row.port_count {
                Some(pc) => groups
                    .entry((row.key.clone(), PortCount(pc)))
                    .or_default()
                    .push(row),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "rows without evse_port_site_count left out of resample");
        }

        let width = self.measures.len();
        let mut rows = Vec::new();
        for ((key, port_count), members) in groups {
            let Some(first) = members.iter().map(|r| r.interval).min() else {
                continue;
            };
            let origin = Interval::origin(first);
            let mut buckets: BTreeMap<i64, (f64, Vec<f64>)> = BTreeMap::new();
            for r in &members {
                let b = buckets
                    .entry(interval.ordinal(r.interval, origin))
                    .or_insert_with(|| (0.0, vec![0.0; width]));
                b.0 += r.total;
                for (acc, v) in b.1.iter_mut().zip(&r.values) {
                    *acc += v;
                }
            }
            let (Some(lo), Some(hi)) = (
                buckets.keys().next().copied(),
                buckets.keys().next_back().copied(),
            ) else {
                continue;
            };
            for ordinal in lo..=hi {
                let (total, values) = buckets
                    .remove(&ordinal)
                    .unwrap_or_else(|| (0.0, vec![0.0; width]));
                rows.push(WideRow {
                    key: key.clone(),
                    interval: interval.label(ordinal, origin)?,
                    port_count: Some(port_count.0),
                    total,
                    values,
                });
            }
        }

        Ok(WideTable {
            keys: self.keys.clone(),
            measures: self.measures.clone(),
            has_total: self.has_total,
            rows,
        })
    }

    /// `value * 100 / Total` per measure, rounded half-to-even at 2 dp.
    pub fn percentages(&self) -> Result<AggregatedTable> {
        if !self.has_total {
            return Err(ReportError::MissingCategories(vec!["Total".to_string()]));
        }
        let rows = self
            .rows
            .iter()
            .map(|row| AggregatedRow {
                key: row.key.clone(),
                evse_port_site_count: row.port_count.map_or(0, |p| p.round() as u32),
                interval: row.interval,
                values: row
                    .values
                    .iter()
                    .map(|v| {
                        if row.total == 0.0 {
                            None
                        } else {
                            Some(round2(v * 100.0 / row.total))
                        }
                    })
                    .collect(),
            })
            .collect();
        Ok(AggregatedTable {
            keys: self.keys.clone(),
            measures: self.measures.clone(),
            rows,
        })
    }
}

impl AggregatedTable {
    pub fn measure_index(&self, measure: Measure) -> Option<usize> {
        self.measures.iter().position(|m| *m == measure)
    }

    pub fn key_index(&self, key: GroupKey) -> Option<usize> {
        self.keys.iter().position(|k| *k == key)
    }

    /// Percentage of `measure` in `row`, `None` when undefined or absent.
    pub fn value(&self, row: &AggregatedRow, measure: Measure) -> Option<f64> {
        self.measure_index(measure)
            .and_then(|i| row.values.get(i).copied().flatten())
    }

    pub fn key_value<'r>(&self, row: &'r AggregatedRow, key: GroupKey) -> Option<&'r str> {
        self.key_index(key)
            .and_then(|i| row.key.get(i))
            .map(String::as_str)
    }
}

/// Aggregate filtered records into percentages at `interval`, grouped by
/// `keys`, optionally merging status categories.
pub fn process_data<'a, I>(
    records: I,
    keys: &[GroupKey],
    interval: Interval,
    combine: bool,
) -> Result<Aggregation>
where
    I: IntoIterator<Item = &'a UsageRecord>,
{
    let records: Vec<&UsageRecord> = records.into_iter().collect();
    if records.is_empty() {
        return Ok(Aggregation::NoData);
    }

    let mut wide = pivot(records.iter().copied(), keys)?;
    if combine {
        wide = wide.combine()?;
    }
    let resampled = wide.resample(interval)?;
    if resampled.rows.is_empty() {
        return Ok(Aggregation::NoData);
    }
    tracing::debug!(
        input_rows = records.len(),
        output_rows = resampled.rows.len(),
        interval = %interval,
        combine,
        "aggregated usage records"
    );
    Ok(Aggregation::Table(resampled.percentages()?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    pub(crate) fn at(m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    pub(crate) fn rec(
        cpo: &str,
        site: &str,
        postcode: &str,
        interval: NaiveDateTime,
        variable: &str,
        value: f64,
    ) -> UsageRecord {
        UsageRecord {
            interval,
            state: "VIC".to_string(),
            lga_name: "Melbourne".to_string(),
            cpo_name: cpo.to_string(),
            address1: site.to_string(),
            address2: "Carlton".to_string(),
            postcode: postcode.to_string(),
            latitude: Some(-37.8),
            longitude: Some(144.96),
            variable: variable.parse().unwrap(),
            value,
        }
    }

    /// One full observation: every status plus Total and capacity.
    pub(crate) fn observation(
        cpo: &str,
        site: &str,
        postcode: &str,
        interval: NaiveDateTime,
        counts: [f64; 7],
        ports: f64,
    ) -> Vec<UsageRecord> {
        let mut out: Vec<UsageRecord> = StatusCategory::ALL
            .iter()
            .zip(counts)
            .map(|(s, v)| rec(cpo, site, postcode, interval, s.as_str(), v))
            .collect();
        out.push(rec(cpo, site, postcode, interval, "Total", counts.iter().sum()));
        out.push(rec(cpo, site, postcode, interval, "evse_port_site_count", ports));
        out
    }

    fn table(agg: Aggregation) -> AggregatedTable {
        agg.into_table().expect("expected a table")
    }

    #[test]
    fn month_end_without_combining() {
        let t = at(1, 15, 10);
        let records = vec![
            rec("A", "1 Main St", "3000", t, "Charging", 30.0),
            rec("A", "1 Main St", "3000", t, "Available", 70.0),
            rec("A", "1 Main St", "3000", t, "Total", 100.0),
            rec("A", "1 Main St", "3000", t, "evse_port_site_count", 1.0),
        ];
        let out = table(process_data(&records, &[GroupKey::CpoName], Interval::MonthEnd, false).unwrap());
        assert_eq!(
            out.measures,
            vec![
                Measure::Status(StatusCategory::Charging),
                Measure::Status(StatusCategory::Available)
            ]
        );
        assert_eq!(
            out.rows,
            vec![AggregatedRow {
                key: vec!["A".to_string()],
                evse_port_site_count: 1,
                interval: at(1, 31, 0),
                values: vec![Some(30.0), Some(70.0)],
            }]
        );
    }

    #[test]
    fn month_end_with_combining() {
        let records = observation("A", "1 Main St", "3000", at(1, 15, 10), [30.0, 0.0, 0.0, 70.0, 0.0, 0.0, 0.0], 1.0);
        let out = table(process_data(&records, &[GroupKey::CpoName], Interval::MonthEnd, true).unwrap());
        assert_eq!(out.rows.len(), 1);
        let row = &out.rows[0];
        assert_eq!(out.value(row, Measure::InUse), Some(30.0));
        assert_eq!(out.value(row, Measure::Status(StatusCategory::Available)), Some(70.0));
        assert_eq!(out.value(row, Measure::UnavailableOutOfOrder), Some(0.0));
        assert!(out.measure_index(Measure::Status(StatusCategory::Charging)).is_none());
    }

    #[test]
    fn empty_input_is_no_data() {
        let records: Vec<UsageRecord> = Vec::new();
        let out = process_data(&records, &[GroupKey::CpoName], Interval::Daily, true).unwrap();
        assert_eq!(out, Aggregation::NoData);
    }

    #[test]
    fn combining_without_reserved_fails_fast() {
        let t = at(2, 1, 0);
        let records: Vec<UsageRecord> = ["Charging", "Finishing", "Available", "Unavailable", "Out of order", "Unknown", "Total", "evse_port_site_count"]
            .iter()
            .map(|v| rec("A", "s", "3000", t, v, 1.0))
            .collect();
        let err = process_data(&records, &[GroupKey::CpoName], Interval::MonthEnd, true).unwrap_err();
        match err {
            ReportError::MissingCategories(names) => assert_eq!(names, vec!["Reserved".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_total_is_an_error() {
        let t = at(2, 1, 0);
        let records = vec![
            rec("A", "s", "3000", t, "Charging", 1.0),
            rec("A", "s", "3000", t, "evse_port_site_count", 1.0),
        ];
        assert!(matches!(
            process_data(&records, &[GroupKey::CpoName], Interval::MonthEnd, false),
            Err(ReportError::MissingCategories(_))
        ));
    }

    #[test]
    fn no_grouping_keys_is_rejected() {
        let records = observation("A", "s", "3000", at(1, 1, 0), [1.0; 7], 1.0);
        assert!(matches!(
            process_data(&records, &[], Interval::MonthEnd, false),
            Err(ReportError::InvalidSelection(_))
        ));
    }

    #[test]
    fn duplicate_rows_are_summed_before_pivot() {
        let t = at(3, 4, 9);
        let records = vec![
            rec("A", "s", "3000", t, "Charging", 10.0),
            rec("A", "s", "3000", t, "Charging", 15.0),
            rec("A", "s", "3000", t, "Available", 75.0),
            rec("A", "s", "3000", t, "Total", 100.0),
            rec("A", "s", "3000", t, "evse_port_site_count", 2.0),
        ];
        let wide = pivot(&records, &[GroupKey::CpoName]).unwrap();
        assert_eq!(wide.rows.len(), 1);
        assert_eq!(wide.rows[0].values, vec![25.0, 75.0]);
        assert_eq!(wide.rows[0].port_count, Some(2.0));
    }

    #[test]
    fn zero_total_buckets_are_undefined_and_gaps_are_filled() {
        let mut records = observation("A", "s", "3000", at(1, 1, 0), [1.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0], 1.0);
        records.extend(observation("A", "s", "3000", at(1, 1, 2), [2.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0], 1.0));
        let out = table(process_data(&records, &[GroupKey::CpoName], Interval::Hourly, true).unwrap());
        let intervals: Vec<NaiveDateTime> = out.rows.iter().map(|r| r.interval).collect();
        assert_eq!(intervals, vec![at(1, 1, 0), at(1, 1, 1), at(1, 1, 2)]);
        assert_eq!(out.rows[0].values[0], Some(25.0));
        assert!(out.rows[1].values.iter().all(Option::is_none));
        assert_eq!(out.rows[2].values[0], Some(50.0));
    }

    #[test]
    fn rows_without_capacity_are_dropped() {
        let t = at(1, 1, 0);
        let records = vec![
            rec("A", "s", "3000", t, "Charging", 5.0),
            rec("A", "s", "3000", t, "Total", 5.0),
        ];
        let out = process_data(&records, &[GroupKey::CpoName], Interval::Daily, false).unwrap();
        assert_eq!(out, Aggregation::NoData);
    }

    #[test]
    fn capacity_changes_split_groups() {
        let mut records = observation("A", "s", "3000", at(1, 5, 0), [1.0; 7], 2.0);
        records.extend(observation("A", "s", "3000", at(2, 5, 0), [1.0; 7], 3.0));
        let out = table(process_data(&records, &[GroupKey::CpoName], Interval::MonthEnd, true).unwrap());
        let counts: Vec<(u32, NaiveDateTime)> = out
            .rows
            .iter()
            .map(|r| (r.evse_port_site_count, r.interval))
            .collect();
        assert_eq!(counts, vec![(2, at(1, 31, 0)), (3, at(2, 29, 0))]);
    }

    fn mixed_records() -> Vec<UsageRecord> {
        let mut records = Vec::new();
        let samples = [
            [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            [7.0, 3.0, 1.0, 40.0, 2.0, 1.0, 3.0],
            [0.5, 0.0, 0.25, 11.0, 0.0, 3.0, 1.0],
            [13.0, 2.0, 0.0, 5.0, 9.0, 0.0, 17.0],
        ];
        for (i, counts) in samples.iter().enumerate() {
            let day = i as u32 + 1;
            records.extend(observation("A", "1 Main St", "3000", at(1, day, 8), *counts, 1.0));
            records.extend(observation("A", "9 High St", "3053", at(1, day, 8), counts.map(|c| c * 2.0 + 1.0), 1.0));
            records.extend(observation("B", "2 Side Rd", "3000", at(1, day, 20), counts.map(|c| c + 0.5), 2.0));
        }
        records
    }

    #[test]
    fn status_percentages_sum_to_one_hundred() {
        let records = mixed_records();
        for interval in [Interval::Hourly, Interval::Daily, Interval::MonthEnd] {
            let out = table(process_data(&records, &[GroupKey::CpoName], interval, false).unwrap());
            for row in &out.rows {
                if row.values.iter().all(Option::is_none) {
                    continue;
                }
                let sum: f64 = row.values.iter().flatten().sum();
                assert!((sum - 100.0).abs() <= 0.02 + 1e-9, "{interval}: {sum}");
            }
        }
    }

    #[test]
    fn combined_matches_sum_of_sources() {
        let records = mixed_records();
        let keys = [GroupKey::CpoName, GroupKey::Address1];
        let plain = table(process_data(&records, &keys, Interval::Daily, false).unwrap());
        let combined = table(process_data(&records, &keys, Interval::Daily, true).unwrap());
        assert_eq!(plain.rows.len(), combined.rows.len());
        for (p, c) in plain.rows.iter().zip(&combined.rows) {
            assert_eq!(p.key, c.key);
            let active: f64 = ACTIVE
                .iter()
                .filter_map(|s| plain.value(p, Measure::Status(*s)))
                .sum();
            let down: f64 = DOWN
                .iter()
                .filter_map(|s| plain.value(p, Measure::Status(*s)))
                .sum();
            assert!((combined.value(c, Measure::InUse).unwrap() - active).abs() <= 0.02 + 1e-9);
            assert!((combined.value(c, Measure::UnavailableOutOfOrder).unwrap() - down).abs() <= 0.02 + 1e-9);
        }
    }

    #[test]
    fn resampling_twice_is_idempotent() {
        let records = mixed_records();
        let wide = pivot(&records, &[GroupKey::CpoName]).unwrap().combine().unwrap();
        for interval in Interval::ALL {
            let once = wide.resample(interval).unwrap();
            let twice = once.resample(interval).unwrap();
            assert_eq!(once, twice, "{interval}");
        }
    }

    #[test]
    fn grouping_keys_generalise() {
        let records = mixed_records();
        let by_cpo = pivot(&records, &[GroupKey::CpoName]).unwrap().resample(Interval::MonthEnd).unwrap();
        let by_site = pivot(&records, &[GroupKey::CpoName, GroupKey::Address1, GroupKey::Postcode])
            .unwrap()
            .resample(Interval::MonthEnd)
            .unwrap();

        let manual = |cpo: &str, site: Option<&str>| -> f64 {
            records
                .iter()
                .filter(|r| r.cpo_name == cpo && site.map_or(true, |s| r.address1 == s))
                .filter(|r| r.variable == Variable::Total)
                .map(|r| r.value)
                .sum()
        };

        // Capacity is summed per interval, so A's two single-port sites form one group of 2.
        let a = by_cpo.rows.iter().find(|r| r.key == vec!["A".to_string()]).unwrap();
        assert_eq!(a.port_count, Some(2.0));
        assert_eq!(a.total, manual("A", None));

        assert_eq!(by_site.rows.len(), 3);
        for row in &by_site.rows {
            assert_eq!(row.key.len(), 3);
            assert_eq!(row.total, manual(&row.key[0], Some(&row.key[1])));
        }
        let site_sum: f64 = by_site.rows.iter().filter(|r| r.key[0] == "A").map(|r| r.total).sum();
        assert_eq!(site_sum, a.total);
    }
}
