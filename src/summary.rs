use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::equipment::EquipmentRecord;

/// Summary statistics over a set of equipment records
///
/// All float aggregates are rounded to two decimal places. An empty record
/// set yields zeros everywhere and an empty distribution; no field is ever
/// NaN.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Number of records summarized
    pub total_count: usize,

    pub avg_flowrate: f64,
    pub min_flowrate: f64,
    pub max_flowrate: f64,

    pub avg_pressure: f64,
    pub min_pressure: f64,
    pub max_pressure: f64,

    pub avg_temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,

    /// Count of records per equipment type; only types present are listed
    pub type_distribution: BTreeMap<String, usize>,
}

// Running min/max/mean for one parameter column
#[derive(Clone, Copy, Debug)]
struct Accumulator {
    mean: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    fn push(mut self, value: f64) -> Self {
        // Non-finite values never get past the loader; guard anyway so
        // one bad record cannot poison the whole column.
        if value.is_finite() {
            self.count += 1;
            // Both terms are divided before subtracting so values near
            // f64::MAX cannot overflow the running mean.
            let n = self.count as f64;
            self.mean += value / n - self.mean / n;
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.mean)
        }
    }

    fn min(&self) -> f64 {
        if self.count == 0 { 0.0 } else { round2(self.min) }
    }

    fn max(&self) -> f64 {
        if self.count == 0 { 0.0 } else { round2(self.max) }
    }
}

/// Compute summary statistics for a slice of records
///
/// # Arguments
/// * `records` - The records to aggregate, in any order
///
/// # Returns
/// * `SummaryStatistics` - zeros and an empty distribution when `records` is empty
///
/// # Examples
/// ```
/// use equipviz::summary::summarize;
///
/// let summary = summarize(&[]);
/// assert_eq!(summary.total_count, 0);
/// assert_eq!(summary.avg_flowrate, 0.0);
/// ```
pub fn summarize(records: &[EquipmentRecord]) -> SummaryStatistics {
    let (flow, pressure, temperature, type_distribution) = records.iter().fold(
        (
            Accumulator::new(),
            Accumulator::new(),
            Accumulator::new(),
            BTreeMap::new(),
        ),
        |(flow, pressure, temperature, mut types), record| {
            *types
                .entry(record.equipment_type.to_string())
                .or_insert(0usize) += 1;
            (
                flow.push(record.flowrate),
                pressure.push(record.pressure),
                temperature.push(record.temperature),
                types,
            )
        },
    );

    SummaryStatistics {
        total_count: records.len(),
        avg_flowrate: flow.avg(),
        min_flowrate: flow.min(),
        max_flowrate: flow.max(),
        avg_pressure: pressure.avg(),
        min_pressure: pressure.min(),
        max_pressure: pressure.max(),
        avg_temperature: temperature.avg(),
        min_temperature: temperature.min(),
        max_temperature: temperature.max(),
        type_distribution,
    }
}

/// Round to two decimal places
///
/// Values too large to scale by 100 have no fractional part left to round
/// and are returned unchanged.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    }
}
