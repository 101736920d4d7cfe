mod aggregate;
mod chart;
mod columns;
mod select;
mod temporal;

use columns::ColumnCounts;

pub use chart::{ChartSpec, Visualization, visualize};
pub use select::ChartType;

pub const DEFAULT_CHART_ROW_CAP: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisualizationError {
    #[error(
        "{chart_type} chart needs {needs}; result has {} numeric, {} temporal and {} categorical columns",
        .counts.numeric,
        .counts.temporal,
        .counts.categorical
    )]
    IncompatibleColumns {
        chart_type: ChartType,
        needs: &'static str,
        counts: ColumnCounts,
    },

    #[error("result has no columns to chart")]
    NoColumns,

    #[error("line chart time axis '{column}' has no parseable value in {rows} rows")]
    UnparseableTimeAxis { column: String, rows: usize },
}
