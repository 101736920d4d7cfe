use std::collections::HashMap;

use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::Serialize;

use crate::model::CellValue;

use super::temporal::{format_temporal, parse_temporal};

pub const SAMPLE_SEED: u64 = 42;
pub const BAR_TOP_GROUPS: usize = 50;
pub const PIE_TOP_SLICES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reduction {
    TopGroups {
        group_column: String,
        value_column: Option<String>,
        groups: usize,
        kept: usize,
    },
    EvenlySpaced {
        step: usize,
        dropped_unparseable: usize,
    },
    SeededSample {
        seed: u64,
        size: usize,
    },
}

pub fn seeded_sample<T: Clone>(rows: &[T], size: usize) -> Vec<T> {
    if rows.len() <= size {
        return rows.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut picked = index::sample(&mut rng, rows.len(), size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|position| rows[position].clone()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRows {
    pub rows: Vec<Vec<CellValue>>,
    pub groups: usize,
}

struct GroupTotal {
    key: CellValue,
    integer_sum: Option<i64>,
    real_sum: f64,
}

impl GroupTotal {
    fn new(key: CellValue) -> Self {
        Self {
            key,
            integer_sum: Some(0),
            real_sum: 0.0,
        }
    }

    fn add(&mut self, value: &CellValue) {
        match value {
            CellValue::Integer(number) => {
                self.real_sum += *number as f64;
                self.integer_sum = self.integer_sum.and_then(|sum| sum.checked_add(*number));
            }
            CellValue::Real(number) => {
                self.real_sum += number;
                self.integer_sum = None;
            }
            CellValue::Null | CellValue::Text(_) => {}
        }
    }

    fn total(&self) -> CellValue {
        match self.integer_sum {
            Some(sum) => CellValue::Integer(sum),
            None => CellValue::Real(self.real_sum),
        }
    }
}

/// Ties keep first-appearance order.
pub fn top_groups(
    rows: &[Vec<CellValue>],
    group_index: usize,
    value_index: Option<usize>,
    limit: usize,
) -> GroupedRows {
    let mut totals = Vec::<GroupTotal>::new();
    let mut positions = HashMap::<String, usize>::new();
    let one = CellValue::Integer(1);

    for row in rows {
        let key = row.get(group_index).cloned().unwrap_or(CellValue::Null);
        let slot = *positions.entry(format!("{key:?}")).or_insert_with(|| {
            totals.push(GroupTotal::new(key));
            totals.len() - 1
        });
        let addend = match value_index {
            Some(position) => row.get(position).unwrap_or(&CellValue::Null),
            None => &one,
        };
        totals[slot].add(addend);
    }

    let groups = totals.len();
    totals.sort_by(|left, right| right.real_sum.total_cmp(&left.real_sum));
    totals.truncate(limit);

    GroupedRows {
        rows: totals
            .into_iter()
            .map(|group| {
                let total = group.total();
                vec![group.key, total]
            })
            .collect(),
        groups,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpacedRows {
    pub rows: Vec<Vec<CellValue>>,
    pub step: usize,
    pub dropped_unparseable: usize,
}

pub fn evenly_spaced(
    rows: &[Vec<CellValue>],
    time_index: usize,
    keep: &[usize],
    cap: usize,
) -> SpacedRows {
    let mut parsed = Vec::<(NaiveDateTime, &Vec<CellValue>)>::with_capacity(rows.len());
    let mut dropped_unparseable = 0usize;
    for row in rows {
        match row.get(time_index).and_then(parse_temporal) {
            Some(timestamp) => parsed.push((timestamp, row)),
            None => dropped_unparseable += 1,
        }
    }
    parsed.sort_by(|left, right| left.0.cmp(&right.0));

    let step = parsed.len().div_ceil(cap.max(1)).max(1);
    let out = parsed
        .iter()
        .step_by(step)
        .map(|(timestamp, row)| {
            keep.iter()
                .map(|&position| {
                    if position == time_index {
                        CellValue::Text(format_temporal(*timestamp))
                    } else {
                        row.get(position).cloned().unwrap_or(CellValue::Null)
                    }
                })
                .collect::<Vec<CellValue>>()
        })
        .collect::<Vec<Vec<CellValue>>>();

    SpacedRows {
        rows: out,
        step,
        dropped_unparseable,
    }
}

pub fn project(rows: &[Vec<CellValue>], keep: &[usize]) -> Vec<Vec<CellValue>> {
    rows.iter()
        .map(|row| {
            keep.iter()
                .map(|&position| row.get(position).cloned().unwrap_or(CellValue::Null))
                .collect()
        })
        .collect()
}
