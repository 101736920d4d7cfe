use std::fmt;

use serde::Serialize;

use super::columns::ColumnCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Scatter,
    Pie,
    Table,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Scatter => "scatter",
            Self::Pie => "pie",
            Self::Table => "table",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        let normalized = normalized.trim_end_matches("_chart");
        match normalized {
            "line" | "time_series" | "timeseries" | "area" => Some(Self::Line),
            "bar" | "column" | "histogram" | "grouped_bar" | "stacked_bar" => Some(Self::Bar),
            "scatter" | "point" | "bubble" => Some(Self::Scatter),
            "pie" | "donut" | "doughnut" => Some(Self::Pie),
            "table" => Some(Self::Table),
            _ => None,
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn select_chart_type(counts: ColumnCounts) -> ChartType {
    if counts.temporal >= 1 && counts.numeric >= 1 {
        ChartType::Line
    } else if counts.categorical >= 1 && counts.numeric >= 1 {
        ChartType::Bar
    } else if counts.numeric >= 2 {
        ChartType::Scatter
    } else if counts.categorical >= 1 {
        ChartType::Pie
    } else {
        ChartType::Table
    }
}
