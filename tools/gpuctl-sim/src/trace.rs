//! Recorded temperature traces.
//!
//! A trace is a CSV file with a header row and two columns:
//!
//! ```text
//! elapsed_s,temperature_c
//! 0,48
//! 2,51
//! 4,57
//! ```
//!
//! The recording cadence need not match the control interval; [`resample`]
//! turns a trace into one temperature per controller tick.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TracePoint {
    pub elapsed_s: f64,
    pub temperature_c: i32,
}

pub fn read_trace(path: &Path) -> Result<Vec<TracePoint>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_trace(file).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_trace<R: Read>(reader: R) -> Result<Vec<TracePoint>> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut points = Vec::new();
    for (row, record) in csv.deserialize::<TracePoint>().enumerate() {
        let point = record.with_context(|| format!("Bad record at row {}", row + 1))?;
        if !point.elapsed_s.is_finite() {
            bail!("Row {} has no usable timestamp", row + 1);
        }
        if let Some(prev) = points.last().map(|p: &TracePoint| p.elapsed_s) {
            if point.elapsed_s < prev {
                bail!(
                    "Row {} goes back in time ({}s after {}s)",
                    row + 1,
                    point.elapsed_s,
                    prev
                );
            }
        }
        points.push(point);
    }

    if points.is_empty() {
        bail!("Trace has no samples");
    }
    Ok(points)
}

/// Temperature seen at each tick of `interval`, starting at the first point
/// and ending at the last. Each tick holds the most recent recorded value.
pub fn resample(points: &[TracePoint], interval: Duration) -> Vec<i32> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    let step = interval.as_secs_f64();
    if step <= 0.0 {
        return points.iter().map(|p| p.temperature_c).collect();
    }

    let mut temperatures = Vec::new();
    let mut current = 0;
    for tick in 0u32.. {
        let at = first.elapsed_s + step * f64::from(tick);
        if at > last.elapsed_s {
            break;
        }
        while current + 1 < points.len() && points[current + 1].elapsed_s <= at {
            current += 1;
        }
        temperatures.push(points[current].temperature_c);
    }
    temperatures
}
