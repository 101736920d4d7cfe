use serde::Serialize;

use crate::model::{ColumnMeta, StorageClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Temporal,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub index: usize,
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnCounts {
    pub numeric: usize,
    pub temporal: usize,
    pub categorical: usize,
}

impl ColumnCounts {
    pub fn from_profiles(profiles: &[ColumnProfile]) -> Self {
        let mut counts = Self::default();
        for profile in profiles {
            match profile.kind {
                ColumnKind::Numeric => counts.numeric += 1,
                ColumnKind::Temporal => counts.temporal += 1,
                ColumnKind::Categorical => counts.categorical += 1,
            }
        }
        counts
    }
}

const TEMPORAL_NAME_TOKENS: &[&str] = &[
    "date",
    "time",
    "datetime",
    "timestamp",
    "day",
    "week",
    "month",
    "quarter",
    "year",
    "period",
];

/// Temporal wins over numeric, so an integer `year` column is a time axis.
pub fn classify_column(column: &ColumnMeta) -> ColumnKind {
    if declared_temporal(column.declared_type.as_deref()) || name_looks_temporal(&column.name) {
        ColumnKind::Temporal
    } else if column.storage.is_numeric()
        || (column.storage == StorageClass::Empty
            && declared_numeric(column.declared_type.as_deref()))
    {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

pub fn classify_columns(columns: &[ColumnMeta]) -> Vec<ColumnProfile> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| ColumnProfile {
            index,
            name: column.name.clone(),
            kind: classify_column(column),
        })
        .collect()
}

pub fn name_looks_temporal(name: &str) -> bool {
    let lower = name.to_lowercase();
    let tokens = lower
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<&str>>();

    if tokens
        .iter()
        .any(|token| TEMPORAL_NAME_TOKENS.contains(token))
    {
        return true;
    }
    if tokens.len() > 1 && tokens.last() == Some(&"at") {
        return true;
    }
    lower.ends_with("date") || lower.ends_with("timestamp")
}

fn declared_temporal(declared_type: Option<&str>) -> bool {
    declared_type.is_some_and(|declared| {
        let upper = declared.to_ascii_uppercase();
        upper.contains("DATE") || upper.contains("TIME")
    })
}

fn declared_numeric(declared_type: Option<&str>) -> bool {
    declared_type.is_some_and(|declared| {
        let upper = declared.to_ascii_uppercase();
        ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"]
            .iter()
            .any(|marker| upper.contains(marker))
    })
}
