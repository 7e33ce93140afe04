//! Fixed-step time series
//!
//! A series covers `[from, from + step * len)` with one value per step.
//! Missing samples are stored as NaN and never take part in reductions.

use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Point-wise combination rule for two values of the same metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Keep the first present value
    Any,
    /// Sum of present values
    NanSum,
    /// Maximum of present values
    Max,
}

impl Reducer {
    /// Combine two values; NaN is treated as absent.
    pub fn apply(self, acc: f32, v: f32) -> f32 {
        if acc.is_nan() {
            return v;
        }
        if v.is_nan() {
            return acc;
        }
        match self {
            Reducer::Any => acc,
            Reducer::NanSum => acc + v,
            Reducer::Max => acc.max(v),
        }
    }
}

/// A fixed-step series of `f32` samples
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RawSeries", into = "RawSeries")]
pub struct TimeSeries {
    from: Timestamp,
    step: i64,
    data: Vec<f32>,
}

impl TimeSeries {
    pub fn new(from: Timestamp, step: i64, data: Vec<f32>) -> Self {
        Self { from, step, data }
    }

    /// Build a series where `None` marks a missing sample
    pub fn from_values(from: Timestamp, step: i64, values: &[Option<f32>]) -> Self {
        Self::new(
            from,
            step,
            values.iter().map(|v| v.unwrap_or(f32::NAN)).collect(),
        )
    }

    /// Series of `len` missing samples
    pub fn empty_like(from: Timestamp, step: i64, len: usize) -> Self {
        Self::new(from, step, vec![f32::NAN; len])
    }

    pub fn from(&self) -> Timestamp {
        self.from
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Timestamp one step past the last point
    pub fn end(&self) -> Timestamp {
        self.from + self.step * self.data.len() as i64
    }

    /// True when the series has no present samples
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|v| v.is_nan())
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Samples as options, `None` for missing
    pub fn values(&self) -> Vec<Option<f32>> {
        self.data
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect()
    }

    /// Value at an exact timestamp on this series' grid
    pub fn get(&self, ts: Timestamp) -> Option<f32> {
        self.index_of(ts)
            .map(|i| self.data[i])
            .filter(|v| !v.is_nan())
    }

    pub(crate) fn index_of(&self, ts: Timestamp) -> Option<usize> {
        if self.step <= 0 || ts < self.from || (ts - self.from) % self.step != 0 {
            return None;
        }
        let i = ((ts - self.from) / self.step) as usize;
        (i < self.data.len()).then_some(i)
    }

    /// Last present value
    pub fn last(&self) -> Option<f32> {
        self.data.iter().rev().copied().find(|v| !v.is_nan())
    }

    /// Timestamp of the last present value
    pub fn last_time(&self) -> Option<Timestamp> {
        self.data
            .iter()
            .rposition(|v| !v.is_nan())
            .map(|i| self.from + self.step * i as i64)
    }

    /// Fold all present values with `reducer`; `None` if nothing is present
    pub fn reduce(&self, reducer: Reducer) -> Option<f32> {
        let v = self
            .data
            .iter()
            .fold(f32::NAN, |acc, v| reducer.apply(acc, *v));
        (!v.is_nan()).then_some(v)
    }
}

#[derive(Serialize, Deserialize)]
struct RawSeries {
    #[serde(default)]
    from: Timestamp,
    #[serde(default)]
    step: i64,
    #[serde(default)]
    values: Vec<Option<f32>>,
}

impl From<RawSeries> for TimeSeries {
    fn from(raw: RawSeries) -> Self {
        TimeSeries::from_values(raw.from, raw.step, &raw.values)
    }
}

impl From<TimeSeries> for RawSeries {
    fn from(ts: TimeSeries) -> Self {
        RawSeries {
            from: ts.from,
            step: ts.step,
            values: ts.values(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reducer_ignores_missing() {
        assert_eq!(Reducer::NanSum.apply(f32::NAN, 2.0), 2.0);
        assert_eq!(Reducer::NanSum.apply(1.0, f32::NAN), 1.0);
        assert_eq!(Reducer::Any.apply(1.0, 2.0), 1.0);
        assert_eq!(Reducer::Max.apply(1.0, 2.0), 2.0);
        assert!(Reducer::Max.apply(f32::NAN, f32::NAN).is_nan());
    }

    #[test]
    fn test_last_and_reduce() {
        let ts = TimeSeries::from_values(100, 15, &[Some(1.0), Some(3.0), None]);
        assert_eq!(ts.last(), Some(3.0));
        assert_eq!(ts.last_time(), Some(115));
        assert_eq!(ts.reduce(Reducer::NanSum), Some(4.0));
        assert_eq!(ts.reduce(Reducer::Max), Some(3.0));
        assert_eq!(ts.get(115), Some(3.0));
        assert_eq!(ts.get(130), None);
        assert_eq!(ts.get(101), None);
    }

    #[test]
    fn test_empty_series() {
        let ts = TimeSeries::from_values(0, 15, &[None, None]);
        assert!(ts.is_empty());
        assert_eq!(ts.reduce(Reducer::NanSum), None);
        assert!(TimeSeries::default().is_empty());
    }

    #[test]
    fn test_json_uses_null_for_missing() {
        let ts = TimeSeries::from_values(0, 30, &[Some(1.5), None]);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, r#"{"from":0,"step":30,"values":[1.5,null]}"#);

        let back: TimeSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back.values(), vec![Some(1.5), None]);
    }
}
