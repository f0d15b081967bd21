use crate::error::ReportError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

#[derive(Debug, Deserialize)]
pub struct RawRow {
    pub interval: Option<String>,
    pub state: Option<String>,
    pub lga_name: Option<String>,
    pub cpo_name: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub variable: Option<String>,
    pub value: Option<String>,
}

/// Occupancy states a charge point can report. The set is closed and the
/// states partition the observed `Total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCategory {
    Charging,
    Finishing,
    Reserved,
    Available,
    Unavailable,
    OutOfOrder,
    Unknown,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 7] = [
        StatusCategory::Charging,
        StatusCategory::Finishing,
        StatusCategory::Reserved,
        StatusCategory::Available,
        StatusCategory::Unavailable,
        StatusCategory::OutOfOrder,
        StatusCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCategory::Charging => "Charging",
            StatusCategory::Finishing => "Finishing",
            StatusCategory::Reserved => "Reserved",
            StatusCategory::Available => "Available",
            StatusCategory::Unavailable => "Unavailable",
            StatusCategory::OutOfOrder => "Out of order",
            StatusCategory::Unknown => "Unknown",
        }
    }
}

/// Value of the long-format `variable` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Status(StatusCategory),
    Total,
    PortCount,
}

impl Variable {
    pub fn as_str(self) -> &'static str {
        match self {
            Variable::Status(s) => s.as_str(),
            Variable::Total => "Total",
            Variable::PortCount => "evse_port_site_count",
        }
    }
}

impl FromStr for Variable {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("Total") {
            return Ok(Variable::Total);
        }
        if s == "evse_port_site_count" {
            return Ok(Variable::PortCount);
        }
        StatusCategory::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .map(|c| Variable::Status(*c))
            .ok_or_else(|| ReportError::invalid("variable", s))
    }
}

/// Descriptive columns a caller may group by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    State,
    LgaName,
    CpoName,
    Address1,
    Address2,
    Postcode,
    Latitude,
    Longitude,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKey::State => "state",
            GroupKey::LgaName => "lga_name",
            GroupKey::CpoName => "cpo_name",
            GroupKey::Address1 => "address1",
            GroupKey::Address2 => "address2",
            GroupKey::Postcode => "postcode",
            GroupKey::Latitude => "latitude",
            GroupKey::Longitude => "longitude",
        }
    }
}

impl FromStr for GroupKey {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.trim() {
            "state" => GroupKey::State,
            "lga_name" => GroupKey::LgaName,
            "cpo_name" => GroupKey::CpoName,
            "address1" => GroupKey::Address1,
            "address2" => GroupKey::Address2,
            "postcode" => GroupKey::Postcode,
            "latitude" => GroupKey::Latitude,
            "longitude" => GroupKey::Longitude,
            other => return Err(ReportError::invalid("group key", other)),
        };
        Ok(key)
    }
}

/// A percentage column of the aggregated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measure {
    InUse,
    UnavailableOutOfOrder,
    Status(StatusCategory),
}

impl Measure {
    pub fn name(self) -> &'static str {
        match self {
            Measure::InUse => "in_use",
            Measure::UnavailableOutOfOrder => "unavailable_out_of_order",
            Measure::Status(s) => s.as_str(),
        }
    }

    /// Human label used in chart titles and summaries.
    pub fn label(self) -> &'static str {
        match self {
            Measure::InUse => "Utilisation",
            Measure::UnavailableOutOfOrder => "Unavailability",
            Measure::Status(StatusCategory::Available) => "Availability",
            Measure::Status(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Measure {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in_use" => Ok(Measure::InUse),
            "unavailable_out_of_order" => Ok(Measure::UnavailableOutOfOrder),
            other => match other.parse::<Variable>() {
                Ok(Variable::Status(c)) => Ok(Measure::Status(c)),
                _ => Err(ReportError::invalid("measure", other)),
            },
        }
    }
}

/// One long-format usage row after cleaning. `interval` is local wall-clock
/// time for the record's state.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub interval: NaiveDateTime,
    pub state: String,
    pub lga_name: String,
    pub cpo_name: String,
    pub address1: String,
    pub address2: String,
    pub postcode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub variable: Variable,
    pub value: f64,
}

impl UsageRecord {
    pub fn key_value(&self, key: GroupKey) -> String {
        match key {
            GroupKey::State => self.state.clone(),
            GroupKey::LgaName => self.lga_name.clone(),
            GroupKey::CpoName => self.cpo_name.clone(),
            GroupKey::Address1 => self.address1.clone(),
            GroupKey::Address2 => self.address2.clone(),
            GroupKey::Postcode => self.postcode.clone(),
            GroupKey::Latitude => self.latitude.map(|v| v.to_string()).unwrap_or_default(),
            GroupKey::Longitude => self.longitude.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CpoSummary {
    pub cpo_name: String,
    pub output_id: String,
    pub chargers: u32,
    pub average_uptime: Option<f64>,
    pub minimum_uptime: Option<f64>,
    pub average_utilisation: Option<f64>,
    pub maximum_unavailability: Option<f64>,
    pub average_unavailability: Option<f64>,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct SummaryRow {
    #[serde(rename = "CPO")]
    #[tabled(rename = "CPO")]
    pub cpo_name: String,
    #[serde(rename = "Chargers")]
    #[tabled(rename = "Chargers")]
    pub chargers: u32,
    #[serde(rename = "AvgUptime")]
    #[tabled(rename = "AvgUptime")]
    pub average_uptime: String,
    #[serde(rename = "MinUptime")]
    #[tabled(rename = "MinUptime")]
    pub minimum_uptime: String,
    #[serde(rename = "AvgUtilisation")]
    #[tabled(rename = "AvgUtilisation")]
    pub average_utilisation: String,
    #[serde(rename = "MaxUnavailability")]
    #[tabled(rename = "MaxUnavailability")]
    pub maximum_unavailability: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodStat {
    pub cpo_name: String,
    pub period_number: i64,
    pub mean_status: Option<f64>,
    pub std_status: Option<f64>,
    pub count_status: usize,
    pub std_err: Option<f64>,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct PeriodStatRow {
    #[serde(rename = "CPO")]
    #[tabled(rename = "CPO")]
    pub cpo_name: String,
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period_number: i64,
    #[serde(rename = "Mean")]
    #[tabled(rename = "Mean")]
    pub mean: String,
    #[serde(rename = "StdErr")]
    #[tabled(rename = "StdErr")]
    pub std_err: String,
    #[serde(rename = "Count")]
    #[tabled(rename = "Count")]
    pub count: usize,
    #[serde(rename = "AboveThreshold")]
    #[tabled(rename = "AboveThreshold")]
    pub above_threshold: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostcodeArea {
    pub postcode: String,
    pub suburb_name: Option<String>,
    pub value: Option<f64>,
    pub evse_port_site_count: u32,
    pub in_use: Option<f64>,
    pub unavailable_out_of_order: Option<f64>,
    #[serde(rename = "Available")]
    pub available: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteMarker {
    pub cpo_name: String,
    pub address1: String,
    pub address2: String,
    pub postcode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub evse_port_site_count: u32,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub lat: f64,
    pub lon: f64,
}
