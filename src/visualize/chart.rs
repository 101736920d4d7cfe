use std::borrow::Cow;

use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{CellValue, ExecutionResult};

use super::VisualizationError;
use super::aggregate::{
    BAR_TOP_GROUPS, PIE_TOP_SLICES, Reduction, SAMPLE_SEED, evenly_spaced, project, seeded_sample,
    top_groups,
};
use super::columns::{ColumnCounts, ColumnKind, ColumnProfile, classify_columns};
use super::select::{ChartType, select_chart_type};

pub const MAX_SERIES: usize = 3;
pub const NO_DATA_MESSAGE: &str = "No data available";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub x: Vec<serde_json::Value>,
    pub y: Vec<serde_json::Value>,
}

/// Derived from column names only, never from cell values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutHints {
    pub title: String,
    pub x_axis_label: Option<String>,
    pub y_axis_label: Option<String>,
    pub show_legend: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub series: Vec<Series>,
    pub table: Option<TablePayload>,
    pub layout_hints: LayoutHints,
    pub source_rows: usize,
    pub plotted_rows: usize,
    pub reductions: Vec<Reduction>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "display", rename_all = "snake_case")]
pub enum Visualization {
    NoData { message: String },
    Chart(ChartSpec),
}

pub fn auto_chart_type(result: &ExecutionResult) -> ChartType {
    select_chart_type(ColumnCounts::from_profiles(&classify_columns(&result.columns)))
}

pub fn visualize(result: &ExecutionResult, requested: Option<ChartType>, cap: usize) -> Visualization {
    if result.rows.is_empty() {
        return Visualization::NoData {
            message: NO_DATA_MESSAGE.to_string(),
        };
    }

    let chart_type = requested.unwrap_or_else(|| auto_chart_type(result));
    match build_chart_spec(result, chart_type, cap) {
        Ok(spec) => {
            debug!(
                chart_type = %spec.chart_type,
                source_rows = spec.source_rows,
                plotted_rows = spec.plotted_rows,
                "chart spec built"
            );
            Visualization::Chart(spec)
        }
        Err(err) => {
            warn!(chart_type = %chart_type, error = %err, "chart spec failed, falling back to table");
            Visualization::Chart(fallback_table(result, cap, err.to_string()))
        }
    }
}

pub fn build_chart_spec(
    result: &ExecutionResult,
    chart_type: ChartType,
    cap: usize,
) -> Result<ChartSpec, VisualizationError> {
    if result.columns.is_empty() {
        return Err(VisualizationError::NoColumns);
    }
    let profiles = classify_columns(&result.columns);
    let plan = ChartPlan {
        rows: &result.rows,
        counts: ColumnCounts::from_profiles(&profiles),
        profiles,
        cap: cap.max(1),
    };

    match chart_type {
        ChartType::Line => plan.line(),
        ChartType::Bar => plan.bar(),
        ChartType::Scatter => plan.scatter(),
        ChartType::Pie => plan.pie(),
        ChartType::Table => Ok(plan.table(None)),
    }
}

pub fn fallback_table(result: &ExecutionResult, cap: usize, reason: impl Into<String>) -> ChartSpec {
    let plan = ChartPlan {
        rows: &result.rows,
        counts: ColumnCounts::default(),
        profiles: classify_columns(&result.columns),
        cap: cap.max(1),
    };
    plan.table(Some(reason.into()))
}

struct ChartPlan<'a> {
    rows: &'a [Vec<CellValue>],
    profiles: Vec<ColumnProfile>,
    counts: ColumnCounts,
    cap: usize,
}

impl ChartPlan<'_> {
    fn of_kind(&self, kind: ColumnKind) -> Vec<&ColumnProfile> {
        self.profiles
            .iter()
            .filter(|profile| profile.kind == kind)
            .collect()
    }

    fn first_of(&self, kind: ColumnKind) -> Option<&ColumnProfile> {
        self.profiles.iter().find(|profile| profile.kind == kind)
    }

    fn incompatible(&self, chart_type: ChartType, needs: &'static str) -> VisualizationError {
        VisualizationError::IncompatibleColumns {
            chart_type,
            needs,
            counts: self.counts,
        }
    }

    fn over_cap(&self) -> bool {
        self.rows.len() > self.cap
    }

    fn line(&self) -> Result<ChartSpec, VisualizationError> {
        let needs = "a temporal and a numeric column";
        let x = self
            .first_of(ColumnKind::Temporal)
            .ok_or_else(|| self.incompatible(ChartType::Line, needs))?;
        let ys = self
            .of_kind(ColumnKind::Numeric)
            .into_iter()
            .take(MAX_SERIES)
            .collect::<Vec<&ColumnProfile>>();
        if ys.is_empty() {
            return Err(self.incompatible(ChartType::Line, needs));
        }

        let mut reductions = Vec::<Reduction>::new();
        let (data, x_at, y_at): (Cow<'_, [Vec<CellValue>]>, usize, Vec<usize>) = if self.over_cap() {
            let keep = std::iter::once(x.index)
                .chain(ys.iter().map(|column| column.index))
                .collect::<Vec<usize>>();
            let spaced = evenly_spaced(self.rows, x.index, &keep, self.cap);
            if spaced.rows.is_empty() {
                return Err(VisualizationError::UnparseableTimeAxis {
                    column: x.name.clone(),
                    rows: self.rows.len(),
                });
            }
            reductions.push(Reduction::EvenlySpaced {
                step: spaced.step,
                dropped_unparseable: spaced.dropped_unparseable,
            });
            (Cow::Owned(spaced.rows), 0, (1..=ys.len()).collect())
        } else {
            (
                Cow::Borrowed(self.rows),
                x.index,
                ys.iter().map(|column| column.index).collect(),
            )
        };

        Ok(self.xy_spec(ChartType::Line, x, &ys, &data, x_at, &y_at, reductions))
    }

    fn bar(&self) -> Result<ChartSpec, VisualizationError> {
        let needs = "a categorical and a numeric column";
        let x = self
            .first_of(ColumnKind::Categorical)
            .or_else(|| self.first_of(ColumnKind::Temporal))
            .ok_or_else(|| self.incompatible(ChartType::Bar, needs))?;
        let ys = self
            .of_kind(ColumnKind::Numeric)
            .into_iter()
            .take(MAX_SERIES)
            .collect::<Vec<&ColumnProfile>>();
        let Some(first_y) = ys.first().copied() else {
            return Err(self.incompatible(ChartType::Bar, needs));
        };

        if self.over_cap() {
            let grouped = top_groups(
                self.rows,
                x.index,
                Some(first_y.index),
                BAR_TOP_GROUPS.min(self.cap),
            );
            let reductions = vec![Reduction::TopGroups {
                group_column: x.name.clone(),
                value_column: Some(first_y.name.clone()),
                groups: grouped.groups,
                kept: grouped.rows.len(),
            }];
            return Ok(self.xy_spec(ChartType::Bar, x, &[first_y], &grouped.rows, 0, &[1], reductions));
        }

        let y_at = ys.iter().map(|column| column.index).collect::<Vec<usize>>();
        Ok(self.xy_spec(ChartType::Bar, x, &ys, self.rows, x.index, &y_at, Vec::new()))
    }

    fn scatter(&self) -> Result<ChartSpec, VisualizationError> {
        let numeric = self.of_kind(ColumnKind::Numeric);
        let (Some(x), Some(y)) = (numeric.first().copied(), numeric.get(1).copied()) else {
            return Err(self.incompatible(ChartType::Scatter, "two numeric columns"));
        };

        let mut reductions = Vec::<Reduction>::new();
        let data = if self.over_cap() {
            reductions.push(Reduction::SeededSample {
                seed: SAMPLE_SEED,
                size: self.cap,
            });
            Cow::Owned(seeded_sample(self.rows, self.cap))
        } else {
            Cow::Borrowed(self.rows)
        };

        let series = vec![Series {
            name: format!("{} vs {}", y.name, x.name),
            x: column_values(&data, x.index),
            y: column_values(&data, y.index),
        }];
        Ok(ChartSpec {
            chart_type: ChartType::Scatter,
            layout_hints: LayoutHints {
                title: format!("{} vs {}", y.name, x.name),
                x_axis_label: Some(x.name.clone()),
                y_axis_label: Some(y.name.clone()),
                show_legend: false,
            },
            source_rows: self.rows.len(),
            plotted_rows: data.len(),
            series,
            table: None,
            reductions,
            fallback_reason: None,
        })
    }

    fn pie(&self) -> Result<ChartSpec, VisualizationError> {
        let label = self
            .first_of(ColumnKind::Categorical)
            .or_else(|| self.first_of(ColumnKind::Temporal))
            .ok_or_else(|| self.incompatible(ChartType::Pie, "a categorical column"))?;
        let value = self.first_of(ColumnKind::Numeric);

        let mut reductions = Vec::<Reduction>::new();
        let sampled = if self.over_cap() {
            reductions.push(Reduction::SeededSample {
                seed: SAMPLE_SEED,
                size: self.cap,
            });
            Cow::Owned(seeded_sample(self.rows, self.cap))
        } else {
            Cow::Borrowed(self.rows)
        };

        let grouped = top_groups(
            &sampled,
            label.index,
            value.map(|column| column.index),
            PIE_TOP_SLICES.min(self.cap),
        );
        reductions.push(Reduction::TopGroups {
            group_column: label.name.clone(),
            value_column: value.map(|column| column.name.clone()),
            groups: grouped.groups,
            kept: grouped.rows.len(),
        });

        let value_name = value
            .map(|column| column.name.clone())
            .unwrap_or_else(|| "count".to_string());
        Ok(ChartSpec {
            chart_type: ChartType::Pie,
            series: vec![Series {
                name: value_name.clone(),
                x: column_values(&grouped.rows, 0),
                y: column_values(&grouped.rows, 1),
            }],
            table: None,
            layout_hints: LayoutHints {
                title: format!("{value_name} by {}", label.name),
                x_axis_label: None,
                y_axis_label: None,
                show_legend: true,
            },
            source_rows: self.rows.len(),
            plotted_rows: grouped.rows.len(),
            reductions,
            fallback_reason: None,
        })
    }

    fn table(&self, fallback_reason: Option<String>) -> ChartSpec {
        let mut reductions = Vec::<Reduction>::new();
        let data = if self.over_cap() {
            reductions.push(Reduction::SeededSample {
                seed: SAMPLE_SEED,
                size: self.cap,
            });
            Cow::Owned(seeded_sample(self.rows, self.cap))
        } else {
            Cow::Borrowed(self.rows)
        };

        let all_columns = (0..self.profiles.len()).collect::<Vec<usize>>();
        let rows = project(&data, &all_columns)
            .into_iter()
            .map(|row| row.iter().map(CellValue::to_json).collect())
            .collect::<Vec<Vec<serde_json::Value>>>();

        ChartSpec {
            chart_type: ChartType::Table,
            series: Vec::new(),
            table: Some(TablePayload {
                columns: self
                    .profiles
                    .iter()
                    .map(|profile| profile.name.clone())
                    .collect(),
                rows,
            }),
            layout_hints: LayoutHints {
                title: "Query results".to_string(),
                x_axis_label: None,
                y_axis_label: None,
                show_legend: false,
            },
            source_rows: self.rows.len(),
            plotted_rows: data.len(),
            reductions,
            fallback_reason,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn xy_spec(
        &self,
        chart_type: ChartType,
        x: &ColumnProfile,
        ys: &[&ColumnProfile],
        data: &[Vec<CellValue>],
        x_at: usize,
        y_at: &[usize],
        reductions: Vec<Reduction>,
    ) -> ChartSpec {
        let x_values = column_values(data, x_at);
        let series = ys
            .iter()
            .zip(y_at)
            .map(|(column, &position)| Series {
                name: column.name.clone(),
                x: x_values.clone(),
                y: column_values(data, position),
            })
            .collect::<Vec<Series>>();

        let y_names = ys
            .iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<&str>>();
        let y_axis_label = if ys.len() == 1 {
            y_names[0].to_string()
        } else {
            "Value".to_string()
        };

        ChartSpec {
            chart_type,
            layout_hints: LayoutHints {
                title: format!("{} by {}", y_names.join(", "), x.name),
                x_axis_label: Some(x.name.clone()),
                y_axis_label: Some(y_axis_label),
                show_legend: series.len() > 1,
            },
            series,
            table: None,
            source_rows: self.rows.len(),
            plotted_rows: data.len(),
            reductions,
            fallback_reason: None,
        }
    }
}

fn column_values(rows: &[Vec<CellValue>], position: usize) -> Vec<serde_json::Value> {
    rows.iter()
        .map(|row| {
            row.get(position)
                .map(CellValue::to_json)
                .unwrap_or(serde_json::Value::Null)
        })
        .collect()
}
