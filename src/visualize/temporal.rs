use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::CellValue;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

pub fn parse_temporal(value: &CellValue) -> Option<NaiveDateTime> {
    match value {
        CellValue::Text(text) => parse_temporal_text(text),
        CellValue::Integer(year) if (1000..=9999).contains(year) => {
            NaiveDate::from_ymd_opt(i32::try_from(*year).ok()?, 1, 1).and_then(start_of_day)
        }
        CellValue::Null | CellValue::Integer(_) | CellValue::Real(_) => None,
    }
}

pub fn parse_temporal_text(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return start_of_day(parsed);
        }
    }

    let all_digits = |part: &str| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit());
    if let Some((year, month)) = trimmed.split_once('-') {
        if year.len() == 4 && month.len() == 2 && all_digits(year) && all_digits(month) {
            return NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
                .ok()
                .and_then(start_of_day);
        }
    }
    if trimmed.len() == 4 && all_digits(trimmed) {
        let year = trimmed.parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1).and_then(start_of_day);
    }
    None
}

pub fn format_temporal(value: NaiveDateTime) -> String {
    if value.time() == NaiveTime::default() {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn start_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}
