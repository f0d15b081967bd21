// Entry point and high-level CLI flow.
//
// The usage dataset is loaded once at startup. Each report run filters it
// by the current selection, aggregates it three ways and writes the
// dashboard outputs:
// - Per-CPO, per-site and per-postcode tables as CSV.
// - CPO summaries, the bar chart series and the map layer as JSON.
// - Markdown previews of the summaries and chart on the console.
// With `--interactive` the user can change filters and regenerate until
// they choose to exit.
mod cli;
mod config;
mod error;
mod filters;
mod interval;
mod loader;
mod observability;
mod output;
mod pipeline;
mod reports;
mod types;
mod util;

use anyhow::{bail, Context};
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use filters::{Selection, Session};
use interval::Interval;
use loader::Dataset;
use std::io::{self, BufRead, Write};
use std::path::Path;
use types::{CpoSummary, Measure};

/// Display options that do not affect the aggregation.
struct ViewOptions {
    measure: Measure,
    threshold: Option<f64>,
}

/// Read a single line of input after printing the common "Enter choice:" prompt.
/// `None` once stdin is closed.
fn read_choice() -> Option<String> {
    prompt("Enter choice: ")
}

fn prompt(label: &str) -> Option<String> {
    print!("{}", label);
    let _ = io::stdout().flush();
    read_trimmed(&mut io::stdin().lock())
}

/// Field prompts treat a closed stdin like a blank answer.
fn ask(label: &str) -> String {
    prompt(label).unwrap_or_default()
}

fn read_trimmed(input: &mut impl BufRead) -> Option<String> {
    let mut buf = String::new();
    match input.read_line(&mut buf) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buf.trim().to_string()),
    }
}

/// Ask the user whether to go back to the report selection menu after
/// generating reports.
///
/// Returns `true` if the user chose `Y`, `false` if they chose `N` or
/// input ran out.
fn prompt_back_to_menu() -> bool {
    back_to_menu(&mut io::stdin().lock())
}

fn back_to_menu(input: &mut impl BufRead) -> bool {
    loop {
        print!("Back to Report Selection (Y/N): ");
        let _ = io::stdout().flush();
        let Some(resp) = read_trimmed(input) else {
            return false;
        };
        match resp.to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

fn load(cfg: &AppConfig, data: Option<&Path>) -> anyhow::Result<Dataset> {
    let (dataset, load_report) =
        loader::load_dataset(cfg, data).context("failed to load usage data")?;
    println!(
        "Processing dataset... ({} rows read, {} loaded)",
        util::format_int(load_report.total_rows as i64),
        util::format_int(load_report.loaded_rows as i64)
    );
    println!(
        "Note: {} rows skipped due to parse/validation errors.",
        util::format_int(load_report.parse_errors as i64)
    );
    if load_report.utc_fallback > 0 {
        println!(
            "Info: {} rows have no configured timezone and were kept in UTC.",
            util::format_int(load_report.utc_fallback as i64)
        );
    }
    println!();
    Ok(dataset)
}

/// Default selection with the command-line filters applied on top.
fn initial_selection(dataset: &Dataset, cli: &Cli) -> anyhow::Result<Selection> {
    let Some(mut selection) = Selection::defaults(dataset) else {
        bail!("the usage dataset has no loadable rows");
    };
    if let Some(lga) = &cli.lga {
        selection.lga_name = lga.clone();
    }
    if !cli.cpos.is_empty() {
        selection.cpo_names = cli.cpos.clone();
    }
    if let Some(from) = cli.from_month {
        selection.period.0 = from;
    }
    if let Some(to) = cli.to_month {
        selection.period.1 = to;
    }
    selection.interval = cli.interval;
    selection.validate(dataset)?;
    Ok(selection)
}

fn describe(selection: &Selection, view: &ViewOptions) {
    println!("Current filters:");
    println!("  LGA: {}", selection.lga_name);
    println!("  CPOs: {}", selection.cpo_names.join(", "));
    println!(
        "  Months: {} to {} (exclusive)",
        selection.period.0, selection.period.1
    );
    println!("  Interval: {}", selection.interval.display_name());
    println!("  Status: {}", view.measure.label());
    match view.threshold {
        Some(t) => println!("  Threshold: {}%\n", util::format_number(t, 1)),
        None => println!("  Threshold: mean of status\n"),
    }
}

/// Handle option [1]: edit the selection field by field. Blank input
/// keeps the current value; invalid input is reported and ignored.
fn handle_change_filters(dataset: &Dataset, selection: &mut Selection, view: &mut ViewOptions) {
    let mut next = selection.clone();

    for (state, lgas) in dataset.state_lgas() {
        let names: Vec<&str> = lgas.iter().map(String::as_str).collect();
        println!("{}: {}", state, names.join(", "));
    }
    let lga = ask(&format!("LGA [{}]: ", next.lga_name));
    if !lga.is_empty() {
        next.lga_name = lga;
    }

    println!("Operators: {}", dataset.cpo_names().join(", "));
    let cpos = ask("CPOs, comma separated [unchanged]: ");
    if !cpos.is_empty() {
        next.cpo_names = cpos
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }

    if let Some((first, last)) = dataset.month_span() {
        let months: Vec<String> = dataset
            .month_dates()
            .iter()
            .enumerate()
            .map(|(i, d)| format!("{}={}", i + 1, d.format("%b %Y")))
            .collect();
        println!("Months ({}..{}): {}", first, last, months.join(", "));
    }
    let from = ask(&format!("From month [{}]: ", next.period.0));
    match from.parse::<u32>() {
        Ok(v) => next.period.0 = v,
        Err(_) if from.is_empty() => {}
        Err(_) => println!("Invalid month '{}', keeping {}.", from, next.period.0),
    }
    let to = ask(&format!("To month [{}]: ", next.period.1));
    match to.parse::<u32>() {
        Ok(v) => next.period.1 = v,
        Err(_) if to.is_empty() => {}
        Err(_) => println!("Invalid month '{}', keeping {}.", to, next.period.1),
    }

    let span = dataset.month_span().map(|(a, b)| b - a).unwrap_or(0);
    let offered: Vec<&str> = Interval::available(span).into_iter().map(Interval::code).collect();
    let interval = ask(&format!("Interval ({}) [{}]: ", offered.join("/"), next.interval));
    if !interval.is_empty() {
        match interval.parse::<Interval>() {
            Ok(i) => next.interval = i,
            Err(e) => println!("{}, keeping {}.", e, next.interval),
        }
    }

    let status = ask(&format!(
        "Status (in_use/Available/unavailable_out_of_order) [{}]: ",
        view.measure.name()
    ));
    if !status.is_empty() {
        match status.parse::<Measure>() {
            Ok(m) => view.measure = m,
            Err(e) => println!("{}, keeping {}.", e, view.measure.name()),
        }
    }

    let threshold = ask("Threshold % (blank for the mean): ");
    if threshold.is_empty() {
        view.threshold = None;
    } else {
        match threshold.parse::<f64>() {
            Ok(t) if (0.0..=100.0).contains(&t) => view.threshold = Some(t),
            _ => {
                println!("Invalid threshold '{}', using the mean.", threshold);
                view.threshold = None;
            }
        }
    }

    match next.validate(dataset) {
        Ok(()) => *selection = next,
        Err(e) => println!("{}. Filters unchanged.", e),
    }
    println!();
    describe(selection, view);
}

/// Handle option [2]: recompute for the current selection and write every
/// output file, printing Markdown previews along the way.
fn handle_generate_reports(
    dataset: &Dataset,
    cfg: &AppConfig,
    session: &mut Session,
    selection: &Selection,
    view: &ViewOptions,
) -> anyhow::Result<()> {
    println!("{}\n", selection.title(dataset)?);
    let Some(c) = session.recompute(dataset, selection)? else {
        println!("No data Available\n");
        return Ok(());
    };

    let out_dir = &cfg.output.dir;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let preview = cfg.output.preview_rows;

    println!("Generating reports...");
    println!("Outputs saved to {}...\n", out_dir.display());

    for (name, table) in [
        ("cpo_data.csv", &c.by_cpo),
        ("location_data.csv", &c.by_location),
        ("postcode_data.csv", &c.by_postcode),
    ] {
        output::write_table_csv(&out_dir.join(name), table)
            .with_context(|| format!("failed to write {}", name))?;
        println!(
            "{}: {} rows",
            name,
            util::format_int(table.rows.len() as i64)
        );
    }
    println!();

    let summaries: Vec<(String, CpoSummary)> = reports::summary_outputs(c).collect();
    output::write_json(&out_dir.join("cpo_summaries.json"), &summaries)
        .context("failed to write cpo_summaries.json")?;
    let single_month = c.selection.is_single_month();
    for (_, s) in &summaries {
        println!("{}\n", reports::render_summary(s, c.selection.interval, single_month));
    }
    let rows = reports::summary_rows(
        &summaries.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>(),
    );
    output::write_csv(&out_dir.join("cpo_summaries.csv"), &rows)
        .context("failed to write cpo_summaries.csv")?;
    output::preview_table("CPO Summary", None, &rows, preview);
    println!("(Full table exported to cpo_summaries.csv)\n");

    let chart = reports::column_graph(c, dataset, view.measure, view.threshold)?;
    output::write_json(&out_dir.join("column_graph.json"), &chart)
        .context("failed to write column_graph.json")?;
    output::preview_table(&chart.title, Some(chart.threshold_label.as_str()), &reports::period_rows(&chart), preview);
    println!("(Full series exported to column_graph.json)\n");

    let map = reports::chloropleth_map(c, dataset, view.measure);
    output::write_json(&out_dir.join("chloropleth_map.json"), &map)
        .context("failed to write chloropleth_map.json")?;
    println!(
        "Map layer: {} postcodes, {} sites (chloropleth_map.json)\n",
        util::format_int(map.areas.len() as i64),
        util::format_int(map.sites.len() as i64)
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    let mut cfg = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(out) = &cli.out {
        cfg.output.dir = out.clone();
    }
    let dataset = load(&cfg, cli.data.as_deref())?;
    let mut selection = initial_selection(&dataset, &cli)?;
    let mut view = ViewOptions {
        measure: cli.status,
        threshold: cli.threshold,
    };
    let mut session = Session::default();

    if !cli.interactive {
        return handle_generate_reports(&dataset, &cfg, &mut session, &selection, &view);
    }

    describe(&selection, &view);
    loop {
        println!("Select Report Option:");
        println!("[1] Change filters");
        println!("[2] Generate Reports\n");
        let Some(choice) = read_choice() else {
            println!("\nExiting the program.");
            break;
        };
        match choice.as_str() {
            "1" => {
                handle_change_filters(&dataset, &mut selection, &mut view);
            }
            "2" => {
                println!();
                if let Err(e) =
                    handle_generate_reports(&dataset, &cfg, &mut session, &selection, &view)
                {
                    eprintln!("Report error: {:#}\n", e);
                }
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    break;
                }
            }
            _ => {
                println!("Invalid choice. Please enter 1 or 2.\n");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn closed_input_reads_as_none() {
        let mut input = Cursor::new("  2 \n");
        assert_eq!(read_trimmed(&mut input).as_deref(), Some("2"));
        assert_eq!(read_trimmed(&mut input), None);
        assert_eq!(read_trimmed(&mut Cursor::new("\n")).as_deref(), Some(""));
    }

    #[test]
    fn back_to_menu_stops_when_input_runs_out() {
        assert!(back_to_menu(&mut Cursor::new("maybe\ny\n")));
        assert!(!back_to_menu(&mut Cursor::new("n\n")));
        assert!(!back_to_menu(&mut Cursor::new("maybe\n")));
    }
}
