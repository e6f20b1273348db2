use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Column names recognised as the date key, in preference order.
pub const DATE_COLUMN_PREFERENCE: [&str; 4] = ["time", "date", "timestamp", "quotedate"];

/// Explicit formats tried column-wide before falling back to per-cell parsing.
pub const DATE_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
];

/// Picks the date-like column by preference order, case-insensitively.
pub fn detect_date_column<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    DATE_COLUMN_PREFERENCE.iter().find_map(|wanted| {
        names
            .iter()
            .find(|name| name.trim().eq_ignore_ascii_case(wanted))
            .map(|name| name.to_string())
    })
}

fn parse_with_format(raw: &str, format: &str) -> Option<NaiveDate> {
    if format.contains("%H") {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|dt| dt.date())
    } else {
        NaiveDate::parse_from_str(raw, format).ok()
    }
}

/// Best-effort parse of a single cell. Offsets are dropped so the result is
/// the wall-clock date the timestamp was recorded in.
pub fn parse_date_cell(raw: &str) -> Option<NaiveDate> {
    parse_timestamp_cell(raw).map(|dt| dt.date())
}

/// Best-effort parse of a single cell into a naive wall-clock timestamp.
pub fn parse_timestamp_cell(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.naive_local());
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS.iter().skip(1) {
        if let Some(date) = parse_with_format(raw, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Parses a whole date column. The first explicit format that parses at
/// least one cell is applied to every cell; otherwise each cell goes through
/// [`parse_date_cell`].
pub fn parse_date_column<S: AsRef<str>>(cells: &[Option<S>]) -> Vec<Option<NaiveDate>> {
    for format in DATE_FORMATS {
        let parsed: Vec<Option<NaiveDate>> = cells
            .iter()
            .map(|cell| {
                cell.as_ref()
                    .and_then(|raw| parse_with_format(raw.as_ref().trim(), format))
            })
            .collect();
        if parsed.iter().any(Option::is_some) {
            return parsed;
        }
    }
    cells
        .iter()
        .map(|cell| cell.as_ref().and_then(|raw| parse_date_cell(raw.as_ref())))
        .collect()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
