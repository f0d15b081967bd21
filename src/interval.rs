// Target resampling granularities and their bucket arithmetic.
//
// Fixed-width intervals count whole widths from an origin at midnight of a
// group's first day. Calendar intervals (month, quarter, year) follow
// calendar boundaries and are labelled by the last day of the period.

use crate::error::{ReportError, Result};
use crate::util::{last_day_of_month, week_of_month};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Interval {
    #[value(name = "60min", alias = "hourly")]
    Hourly,
    #[value(name = "1440min", alias = "daily")]
    Daily,
    #[value(name = "10080min", alias = "weekly")]
    Weekly,
    #[value(name = "ME", alias = "monthly")]
    MonthEnd,
    #[value(name = "Q", alias = "quarterly")]
    QuarterEnd,
    #[value(name = "Y", alias = "yearly")]
    YearEnd,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::Hourly,
        Interval::Daily,
        Interval::Weekly,
        Interval::MonthEnd,
        Interval::QuarterEnd,
        Interval::YearEnd,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Interval::Hourly => "60min",
            Interval::Daily => "1440min",
            Interval::Weekly => "10080min",
            Interval::MonthEnd => "ME",
            Interval::QuarterEnd => "Q",
            Interval::YearEnd => "Y",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Interval::Hourly => "Hourly",
            Interval::Daily => "Daily",
            Interval::Weekly => "Weekly",
            Interval::MonthEnd => "Monthly",
            Interval::QuarterEnd => "Quarterly",
            Interval::YearEnd => "Yearly",
        }
    }

    /// Singular unit used in "per {unit}" phrases and axis labels.
    pub fn unit(self) -> &'static str {
        match self {
            Interval::Hourly => "hour",
            Interval::Daily => "day",
            Interval::Weekly => "week",
            Interval::MonthEnd => "month",
            Interval::QuarterEnd => "quarter",
            Interval::YearEnd => "year",
        }
    }

    fn width(self) -> Option<Duration> {
        match self {
            Interval::Hourly => Some(Duration::minutes(60)),
            Interval::Daily => Some(Duration::minutes(1440)),
            Interval::Weekly => Some(Duration::minutes(10080)),
            _ => None,
        }
    }

    /// Intervals offered for a dataset spanning `month_span` months.
    pub fn available(month_span: u32) -> Vec<Interval> {
        Interval::ALL
            .into_iter()
            .filter(|i| month_span >= 3 || !matches!(i, Interval::QuarterEnd | Interval::YearEnd))
            .collect()
    }

    /// Midnight of the first timestamp's day.
    pub fn origin(first: NaiveDateTime) -> NaiveDateTime {
        first.date().and_time(NaiveTime::MIN)
    }

    /// Bucket ordinal of `t`. Fixed-width ordinals count from `origin`;
    /// calendar ordinals are absolute period numbers.
    pub fn ordinal(self, t: NaiveDateTime, origin: NaiveDateTime) -> i64 {
        if let Some(width) = self.width() {
            return (t - origin).num_seconds().div_euclid(width.num_seconds());
        }
        let year = i64::from(t.year());
        let month0 = i64::from(t.month0());
        match self {
            Interval::QuarterEnd => year * 4 + month0 / 3,
            Interval::YearEnd => year,
            _ => year * 12 + month0,
        }
    }

    /// Label timestamp for a bucket ordinal.
    pub fn label(self, ordinal: i64, origin: NaiveDateTime) -> Result<NaiveDateTime> {
        if let Some(width) = self.width() {
            return Ok(origin + width * i32::try_from(ordinal).map_err(|_| out_of_range(ordinal))?);
        }
        let (year, month) = match self {
            Interval::QuarterEnd => (ordinal.div_euclid(4), ordinal.rem_euclid(4) * 3 + 3),
            Interval::YearEnd => (ordinal, 12),
            _ => (ordinal.div_euclid(12), ordinal.rem_euclid(12) + 1),
        };
        let year = i32::try_from(year).map_err(|_| out_of_range(ordinal))?;
        let month = u32::try_from(month).map_err(|_| out_of_range(ordinal))?;
        last_day_of_month(year, month)
            .map(|d| d.and_time(NaiveTime::MIN))
            .ok_or_else(|| out_of_range(ordinal))
    }

    /// X-axis value of the bar chart for a bucket label. Monthly periods
    /// count from the month of `start`.
    pub fn period_number(self, t: NaiveDateTime, start: NaiveDate) -> i64 {
        match self {
            Interval::Hourly => i64::from(t.hour()) + 1,
            Interval::Daily => i64::from(t.weekday().number_from_monday()),
            Interval::Weekly => i64::from(week_of_month(t.date())),
            Interval::MonthEnd => {
                i64::from(t.year() - start.year()) * 12 + i64::from(t.month())
                    - i64::from(start.month())
                    + 1
            }
            Interval::QuarterEnd => i64::from(t.month0() / 3 + 1),
            Interval::YearEnd => i64::from(t.year()),
        }
    }
}

fn out_of_range(ordinal: i64) -> ReportError {
    ReportError::invalid("bucket ordinal", ordinal.to_string())
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Interval {
    type Err = ReportError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Interval::ALL
            .into_iter()
            .find(|i| {
                i.code().eq_ignore_ascii_case(s) || i.display_name().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| ReportError::invalid("interval", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn bucket(interval: Interval, t: NaiveDateTime, first: NaiveDateTime) -> NaiveDateTime {
        let origin = Interval::origin(first);
        interval
            .label(interval.ordinal(t, origin), origin)
            .unwrap()
    }

    #[test]
    fn month_end_labels_last_day_of_month() {
        let first = at(2024, 1, 3, 5);
        assert_eq!(bucket(Interval::MonthEnd, at(2024, 1, 31, 23), first), at(2024, 1, 31, 0));
        assert_eq!(bucket(Interval::MonthEnd, at(2024, 2, 1, 0), first), at(2024, 2, 29, 0));
    }

    #[test]
    fn quarter_and_year_follow_calendar() {
        let first = at(2024, 1, 1, 0);
        assert_eq!(bucket(Interval::QuarterEnd, at(2024, 5, 15, 8), first), at(2024, 6, 30, 0));
        assert_eq!(bucket(Interval::QuarterEnd, at(2024, 12, 31, 23), first), at(2024, 12, 31, 0));
        assert_eq!(bucket(Interval::YearEnd, at(2023, 2, 1, 0), first), at(2023, 12, 31, 0));
    }

    #[test]
    fn fixed_width_buckets_anchor_at_first_midnight() {
        let first = at(2024, 3, 6, 14);
        assert_eq!(bucket(Interval::Hourly, at(2024, 3, 6, 14), first), at(2024, 3, 6, 14));
        assert_eq!(bucket(Interval::Daily, at(2024, 3, 7, 23), first), at(2024, 3, 7, 0));
        // Weeks start on the first day of data, not on a Monday.
        assert_eq!(bucket(Interval::Weekly, at(2024, 3, 12, 23), first), at(2024, 3, 6, 0));
        assert_eq!(bucket(Interval::Weekly, at(2024, 3, 13, 0), first), at(2024, 3, 13, 0));
    }

    #[test]
    fn labels_are_stable_under_rebucketing() {
        for interval in Interval::ALL {
            let first = at(2024, 2, 10, 7);
            let once = bucket(interval, at(2024, 4, 20, 9), first);
            let twice = bucket(interval, once, bucket(interval, first, first));
            assert_eq!(once, twice, "{interval}");
        }
    }

    #[test]
    fn period_numbers() {
        let t = at(2024, 5, 15, 13); // Wednesday
        let jan = at(2024, 1, 1, 0).date();
        let march = at(2024, 3, 1, 0).date();
        assert_eq!(Interval::Hourly.period_number(t, jan), 14);
        assert_eq!(Interval::Daily.period_number(t, jan), 3);
        assert_eq!(Interval::Weekly.period_number(t, jan), 3);
        assert_eq!(Interval::MonthEnd.period_number(t, march), 3);
        assert_eq!(Interval::MonthEnd.period_number(t, at(2023, 11, 1, 0).date()), 7);
        assert_eq!(Interval::QuarterEnd.period_number(t, jan), 2);
        assert_eq!(Interval::YearEnd.period_number(t, jan), 2024);
    }

    #[test]
    fn short_spans_hide_quarter_and_year() {
        assert_eq!(Interval::available(2).len(), 4);
        assert_eq!(Interval::available(3), Interval::ALL.to_vec());
    }

    #[test]
    fn parses_codes_and_names() {
        assert_eq!("ME".parse::<Interval>().unwrap(), Interval::MonthEnd);
        assert_eq!("weekly".parse::<Interval>().unwrap(), Interval::Weekly);
        assert_eq!("60min".parse::<Interval>().unwrap(), Interval::Hourly);
        assert!("fortnightly".parse::<Interval>().is_err());
    }
}
