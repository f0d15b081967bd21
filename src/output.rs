use crate::error::{ReportError, Result};
use crate::pipeline::AggregatedTable;
use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush().map_err(|e| ReportError::io(path, e))?;
    Ok(())
}

/// Write an aggregated table: key columns, `evse_port_site_count`,
/// `interval`, then one column per measure. Undefined percentages are
/// written as empty cells.
pub fn write_table_csv(path: &Path, table: &AggregatedTable) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = table.keys.iter().map(|k| k.as_str()).collect();
    header.push("evse_port_site_count");
    header.push("interval");
    header.extend(table.measures.iter().map(|m| m.name()));
    wtr.write_record(&header)?;

    for row in &table.rows {
        let mut record: Vec<String> = row.key.clone();
        record.push(row.evse_port_site_count.to_string());
        record.push(row.interval.format("%Y-%m-%d %H:%M:%S").to_string());
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|p| format!("{p:.2}")).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|e| ReportError::io(path, e))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s).map_err(|e| ReportError::io(path, e))?;
    Ok(())
}

pub fn preview_table<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}", title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    preview_table_rows(rows, max_rows);
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}
