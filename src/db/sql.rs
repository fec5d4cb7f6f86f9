//! Statement text builders for the Postgres dialect.
//!
//! Identifiers are always double-quoted; values never appear in the text and
//! travel as bound parameters instead. Predicates are caller-supplied SQL and
//! are used verbatim.

use super::value::{Record, Value};
use super::{DbError, Result};

/// Upper bound on bound parameters in a single statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Splits `"id, name"` into trimmed, non-empty column names.
pub fn parse_column_list(column_names: &str) -> Vec<String> {
    column_names
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rows that fit in one INSERT without crossing the parameter limit.
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

pub fn build_insert(schema: &str, table: &str, columns: &[String], rows: usize) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let width = columns.len();
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let placeholders: Vec<String> = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_table(schema, table),
        col_list.join(", "),
        tuples.join(", ")
    )
}

pub fn build_update<'a>(
    schema: &str,
    table: &str,
    columns: impl IntoIterator<Item = &'a str>,
    predicate: &str,
) -> String {
    let assignments: Vec<String> = columns
        .into_iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {}",
        qualify_table(schema, table),
        assignments.join(", "),
        predicate
    )
}

pub fn build_delete(schema: &str, table: &str, predicate: &str) -> String {
    format!("DELETE FROM {} WHERE {}", qualify_table(schema, table), predicate)
}

pub fn build_copy(schema: &str, table: &str, columns: &[String], delimiter: char) -> Result<String> {
    if !delimiter.is_ascii() || matches!(delimiter, '"' | '\\' | '\n' | '\r') {
        return Err(DbError::Query(format!(
            "invalid COPY delimiter {:?}: must be a single ASCII character other than quote, backslash or newline",
            delimiter
        )));
    }
    if columns.is_empty() {
        return Err(DbError::Query("COPY needs at least one column".to_string()));
    }

    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let delimiter = if delimiter == '\'' {
        "''".to_string()
    } else {
        delimiter.to_string()
    };

    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER '{}')",
        qualify_table(schema, table),
        col_list.join(", "),
        delimiter
    ))
}

/// Rewrites `:name` placeholders to `$n` and returns the values in
/// parameter order. Quoted text (including `E'...'` escape strings and
/// `$tag$` bodies), comments and `::` casts are left untouched.
/// Repeated names share one parameter.
pub fn bind_named<'a>(query: &str, params: Option<&'a Record>) -> Result<(String, Vec<&'a Value>)> {
    let Some(params) = params else {
        return Ok((query.to_string(), Vec::new()));
    };

    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut names: Vec<String> = Vec::new();
    let mut values: Vec<&'a Value> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let end = match c {
            '\'' => {
                let escapes = i > 0
                    && matches!(chars[i - 1], 'E' | 'e')
                    && (i < 2 || !is_ident_char(chars[i - 2]));
                quoted_end(&chars, i, '\'', escapes)
            }
            '"' => quoted_end(&chars, i, '"', false),
            '$' if i == 0 || !is_ident_char(chars[i - 1]) => match dollar_tag(&chars, i) {
                Some(tag) => dollar_body_end(&chars, i + tag.len(), &tag),
                None => i + 1,
            },
            '-' if next == Some('-') => chars[i..]
                .iter()
                .position(|&ch| ch == '\n')
                .map_or(chars.len(), |p| i + p + 1),
            '/' if next == Some('*') => find(&chars, i + 2, &['*', '/']).map_or(chars.len(), |p| p + 2),
            ':' if next == Some(':') => i + 2,
            ':' if next.is_some_and(|n| n.is_ascii_alphabetic() || n == '_') => {
                let mut j = i + 1;
                while j < chars.len() && is_ident_char(chars[j]) {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();

                let index = match names.iter().position(|existing| *existing == name) {
                    Some(pos) => pos + 1,
                    None => {
                        let value = params.get(&name).ok_or_else(|| {
                            DbError::Query(format!("no value supplied for parameter :{}", name))
                        })?;
                        names.push(name);
                        values.push(value);
                        names.len()
                    }
                };
                out.push_str(&format!("${}", index));
                i = j;
                continue;
            }
            _ => i + 1,
        };

        out.extend(&chars[i..end]);
        i = end;
    }

    Ok((out, values))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index just past the literal opened at `start`. A doubled quote stays
/// inside; with `escapes` a backslash also protects the next character.
fn quoted_end(chars: &[char], start: usize, quote: char, escapes: bool) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' if escapes => j += 2,
            ch if ch == quote => {
                if chars.get(j + 1) == Some(&quote) {
                    j += 2;
                } else {
                    return j + 1;
                }
            }
            _ => j += 1,
        }
    }
    chars.len()
}

/// `$$` or `$tag$` opening at `start`; `$1` style positional markers are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut j = start + 1;
    if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    (chars.get(j) == Some(&'$')).then(|| chars[start..=j].to_vec())
}

fn dollar_body_end(chars: &[char], body_start: usize, tag: &[char]) -> usize {
    find(chars, body_start, tag).map_or(chars.len(), |p| p + tag.len())
}

fn find(chars: &[char], from: usize, pattern: &[char]) -> Option<usize> {
    if from > chars.len() {
        return None;
    }
    chars[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|p| from + p)
}
