//! Input workbook loading and the final in-place rewrite with results.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::{info, warn};

use crate::config::Columns;
use crate::error::WorkbookError;
use crate::model::{CompanyInput, EnrichedRow};

const EMAIL_HEADER: &str = "邮箱";
const WEBSITE_HEADER: &str = "官网";
const REMARK_HEADER: &str = "备注";

/// Numeric cells render as integers; everything else as its text.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// Drops every whitespace character (line breaks included) plus zero-width
/// space and BOM.
fn clean_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\u{200B}' | '\u{FEFF}'))
        .collect()
}

fn open_sheets(path: &Path) -> Result<Vec<(String, Range<Data>)>, WorkbookError> {
    let mut workbook = open_workbook_auto(path).map_err(|source| WorkbookError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let sheets = workbook.worksheets();
    if sheets.is_empty() {
        return Err(WorkbookError::NoSheet(path.display().to_string()));
    }
    Ok(sheets)
}

/// Reads company rows from the first sheet. Row 0 is the header; rows with
/// an empty name are skipped and a repeated name keeps its first row.
pub fn load_companies(path: impl AsRef<Path>, columns: &Columns) -> Result<Vec<CompanyInput>, WorkbookError> {
    let path = path.as_ref();
    let sheets = open_sheets(path)?;
    let (sheet_name, range) = &sheets[0];

    let Some((end_row, _)) = range.end() else {
        warn!("Sheet '{}' in {} is empty", sheet_name, path.display());
        return Ok(Vec::new());
    };
    let start_row = range.start().map(|(r, _)| r).unwrap_or(0).max(1);

    let mut seen = HashSet::new();
    let mut companies = Vec::new();
    for row in start_row..=end_row {
        let name = range
            .get_value((row, columns.company as u32))
            .map(cell_text)
            .map(|s| clean_name(&s))
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let legal = range
            .get_value((row, columns.legal as u32))
            .map(cell_text)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        if !seen.insert(name.clone()) {
            warn!(company = %name, row, "Duplicate company row ignored");
            continue;
        }
        companies.push(CompanyInput {
            name,
            legal,
            row_index: row,
        });
    }

    info!("Loaded {} companies from {}", companies.len(), path.display());
    Ok(companies)
}

fn copy_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Data) -> Result<(), WorkbookError> {
    match cell {
        Data::Empty => {}
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            sheet.write_string(row, col, s)?;
        }
        Data::Float(f) => {
            sheet.write_number(row, col, *f)?;
        }
        Data::Int(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        Data::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Data::DateTime(dt) => {
            sheet.write_number(row, col, dt.as_f64())?;
        }
        other => {
            sheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}

/// Rewrites the workbook at `source` into `target` (which may be the same
/// path) with the email, website and remark columns filled for every row
/// in `rows`. Cell values of all sheets are carried over; styles are not.
pub fn write_results(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    rows: &[EnrichedRow],
    columns: &Columns,
) -> Result<(), WorkbookError> {
    let source = source.as_ref();
    let target = target.as_ref();
    let sheets = open_sheets(source)?;

    let by_row: HashMap<u32, &EnrichedRow> = rows.iter().map(|r| (r.input.row_index, r)).collect();
    let mut workbook = Workbook::new();

    for (index, (name, range)) in sheets.iter().enumerate() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;

        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        for (r, c, cell) in range.cells() {
            copy_cell(sheet, start_row + r as u32, (start_col as usize + c) as u16, cell)?;
        }

        if index != 0 {
            continue;
        }

        for (col, title) in [
            (columns.email, EMAIL_HEADER),
            (columns.website, WEBSITE_HEADER),
            (columns.remark, REMARK_HEADER),
        ] {
            let present = range
                .get_value((0, col as u32))
                .map(|c| !matches!(c, Data::Empty))
                .unwrap_or(false);
            if !present {
                sheet.write_string(0, col, title)?;
            }
        }

        for (row, enriched) in &by_row {
            let output = &enriched.output;
            let website = if output.is_found() { output.website.as_str() } else { "" };
            sheet.write_string(*row, columns.email, output.joined_emails())?;
            sheet.write_string(*row, columns.website, website)?;
            sheet.write_string(*row, columns.remark, output.remark().as_str())?;
        }
    }

    // write next to the target, then swap in
    let tmp = target.with_extension("tmp.xlsx");
    workbook.save(&tmp)?;
    std::fs::rename(&tmp, target)?;
    info!("Updated workbook {} ({} rows)", target.display(), by_row.len());
    Ok(())
}
