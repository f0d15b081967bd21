// CLI argument parsing for ev_report

use crate::interval::Interval;
use crate::types::Measure;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ev_report")]
#[command(version)]
#[command(about = "EV charge point utilisation reports by LGA and operator", long_about = None)]
pub struct Cli {
    /// TOML config file (default: $EV_REPORT_CONFIG or ./ev-report.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Usage CSV, overriding the config
    #[arg(long, value_name = "PATH")]
    pub data: Option<PathBuf>,

    /// Output directory, overriding the config
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Local government area (default: first LGA of the first state)
    #[arg(long, value_name = "NAME")]
    pub lga: Option<String>,

    /// Charge point operator; repeat for several (default: all)
    #[arg(long = "cpo", value_name = "NAME")]
    pub cpos: Vec<String>,

    /// First month of the period, 1-based from January of the first data year
    #[arg(long, value_name = "N")]
    pub from_month: Option<u32>,

    /// Month after the last month of the period
    #[arg(long, value_name = "N")]
    pub to_month: Option<u32>,

    /// Resampling interval
    #[arg(long, value_enum, default_value = "ME")]
    pub interval: Interval,

    /// Measure shown on the map and chart
    #[arg(long, value_name = "MEASURE", default_value = "in_use")]
    pub status: Measure,

    /// Chart threshold in percent (default: mean of the measure)
    #[arg(long, value_name = "PCT")]
    pub threshold: Option<f64>,

    /// Menu-driven mode for changing filters between runs
    #[arg(short, long)]
    pub interactive: bool,
}
