// Clinical reports arrive as one line of `KIND : text` items separated by
// pipes, e.g. `SINTOMA : fiebre| ENFERMEDAD : diabetes`. They are turned into
// a three column table, one list per kind, padded with nulls.
use crate::db::{RecordSet, Value};

pub const REPORT_COLUMNS: [&str; 3] = ["ENFERMEDAD", "SINTOMA", "PROCEDIMIENTO"];

pub fn parse_report(text: &str) -> RecordSet {
    let mut lists: [Vec<String>; 3] = Default::default();

    for item in text.split('|').map(str::trim) {
        let Some(slot) = REPORT_COLUMNS.iter().position(|kind| item.starts_with(kind)) else {
            continue;
        };
        let value = match item.split_once(':') {
            Some((_, rest)) => rest.trim(),
            None => item[REPORT_COLUMNS[slot].len()..].trim(),
        };
        lists[slot].push(value.to_string());
    }

    let height = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut report = RecordSet::new(REPORT_COLUMNS.iter().map(|c| c.to_string()).collect());
    for row in 0..height {
        report.push_row(
            lists
                .iter()
                .map(|list| list.get(row).cloned().map(Value::Text).unwrap_or(Value::Null))
                .collect(),
        );
    }
    report
}
