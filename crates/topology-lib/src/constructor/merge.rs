//! Combining repeated samples of one metric into an entity's series

use crate::model::ScrapeJobStatus;
use crate::timeseries::{Reducer, TimeSeries};
use tracing::warn;

/// Upper bound on the length of a merged series (a week at 1s resolution)
const MAX_MERGED_POINTS: i64 = 7 * 24 * 3600;

/// Merge `new` into `existing` point-wise with `reducer`
///
/// An empty `existing` yields `new` unchanged. Otherwise the result covers
/// the union of both grids; both series must share the same step.
pub fn merge(existing: &TimeSeries, new: &TimeSeries, reducer: Reducer) -> TimeSeries {
    if existing.is_empty() {
        return new.clone();
    }
    if new.len() == 0 {
        return existing.clone();
    }

    let step = existing.step();
    if step <= 0 || new.step() != step || (new.from() - existing.from()) % step != 0 {
        warn!(
            existing_step = existing.step(),
            new_step = new.step(),
            "Cannot merge series on different grids, keeping existing"
        );
        return existing.clone();
    }

    let from = existing.from().min(new.from());
    let end = existing.end().max(new.end());
    let points = (end - from) / step;
    if points > MAX_MERGED_POINTS {
        warn!(
            existing_from = existing.from(),
            new_from = new.from(),
            step = step,
            points = points,
            "Merged series would span too many points, keeping existing"
        );
        return existing.clone();
    }
    let mut result = TimeSeries::empty_like(from, step, points as usize);

    for series in [existing, new] {
        let offset = ((series.from() - from) / step) as usize;
        let out = result.raw_mut();
        for (i, v) in series.raw().iter().enumerate() {
            out[offset + i] = reducer.apply(out[offset + i], *v);
        }
    }
    result
}

/// In-place form of [`merge`]
pub fn merge_into(target: &mut TimeSeries, new: &TimeSeries, reducer: Reducer) {
    let same_grid = target.from() == new.from()
        && target.step() == new.step()
        && target.len() == new.len();
    if same_grid && !target.is_empty() {
        for (t, v) in target.raw_mut().iter_mut().zip(new.raw()) {
            *t = reducer.apply(*t, *v);
        }
        return;
    }
    *target = merge(target, new, reducer);
}

/// Convert a monotonic counter into its per-step increase
///
/// A drop in value is a counter reset and counts the new value. The previous
/// sample is searched back over one scrape interval, so sparse scrapes still
/// produce increases; the first point has no increase.
pub fn increase(series: &TimeSeries, status: Option<&ScrapeJobStatus>) -> TimeSeries {
    let lookback = match status {
        Some(s) if series.step() > 0 && s.scrape_interval_secs > series.step() => {
            (s.scrape_interval_secs + series.step() - 1) / series.step()
        }
        _ => 1,
    } as usize;

    let mut out = TimeSeries::empty_like(series.from(), series.step(), series.len());
    let mut prev: Option<(usize, f32)> = None;
    for (i, v) in series.raw().iter().copied().enumerate() {
        if v.is_nan() {
            continue;
        }
        if let Some((j, p)) = prev {
            if i - j <= lookback {
                out.raw_mut()[i] = if v >= p { v - p } else { v };
            }
        }
        prev = Some((i, v));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(values: &[Option<f32>]) -> TimeSeries {
        TimeSeries::from_values(0, 30, values)
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let s = ts(&[Some(1.0), None, Some(3.0)]);
        for reducer in [Reducer::Any, Reducer::NanSum, Reducer::Max] {
            let merged = merge(&TimeSeries::default(), &s, reducer);
            assert_eq!(merged.values(), s.values());
            assert_eq!(merged.from(), s.from());
        }
    }

    #[test]
    fn test_merge_sum_and_max() {
        let a = ts(&[Some(1.0), Some(5.0), None]);
        let b = ts(&[Some(2.0), Some(3.0), None]);
        assert_eq!(
            merge(&a, &b, Reducer::NanSum).values(),
            vec![Some(3.0), Some(8.0), None]
        );
        assert_eq!(
            merge(&a, &b, Reducer::Max).values(),
            vec![Some(2.0), Some(5.0), None]
        );
        assert_eq!(
            merge(&a, &b, Reducer::Any).values(),
            vec![Some(1.0), Some(5.0), None]
        );
    }

    #[test]
    fn test_missing_values_never_contribute_to_sum() {
        let a = ts(&[None, Some(4.0)]);
        let b = ts(&[Some(2.0), None]);
        assert_eq!(merge(&a, &b, Reducer::NanSum).values(), vec![Some(2.0), Some(4.0)]);
    }

    #[test]
    fn test_merge_union_of_grids() {
        let a = TimeSeries::from_values(30, 30, &[Some(1.0), Some(1.0)]);
        let b = TimeSeries::from_values(0, 30, &[Some(2.0), Some(2.0)]);
        let merged = merge(&a, &b, Reducer::NanSum);
        assert_eq!(merged.from(), 0);
        assert_eq!(merged.values(), vec![Some(2.0), Some(3.0), Some(1.0)]);
    }

    #[test]
    fn test_merge_step_mismatch_keeps_existing() {
        let a = TimeSeries::from_values(0, 30, &[Some(1.0)]);
        let b = TimeSeries::from_values(0, 60, &[Some(2.0)]);
        assert_eq!(merge(&a, &b, Reducer::NanSum).values(), vec![Some(1.0)]);
    }

    #[test]
    fn test_merge_far_apart_grids_keeps_existing() {
        let a = TimeSeries::from_values(1_700_000_000, 1, &[Some(1.0)]);
        let b = TimeSeries::from_values(0, 1, &[Some(2.0)]);
        let merged = merge(&a, &b, Reducer::NanSum);
        assert_eq!(merged.from(), 1_700_000_000);
        assert_eq!(merged.values(), vec![Some(1.0)]);

        let mut target = a.clone();
        merge_into(&mut target, &b, Reducer::Any);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_merge_into_same_grid() {
        let mut target = ts(&[Some(1.0), None]);
        merge_into(&mut target, &ts(&[Some(1.0), Some(2.0)]), Reducer::NanSum);
        assert_eq!(target.values(), vec![Some(2.0), Some(2.0)]);

        let mut empty = TimeSeries::default();
        merge_into(&mut empty, &ts(&[Some(7.0)]), Reducer::Any);
        assert_eq!(empty.values(), vec![Some(7.0)]);
    }

    #[test]
    fn test_increase_handles_resets() {
        let counter = ts(&[Some(1.0), Some(3.0), Some(3.0), Some(1.0), None]);
        assert_eq!(
            increase(&counter, None).values(),
            vec![None, Some(2.0), Some(0.0), Some(1.0), None]
        );
    }

    #[test]
    fn test_increase_looks_back_one_scrape_interval() {
        let counter = ts(&[Some(1.0), None, Some(4.0), None, None, Some(5.0)]);
        let status = ScrapeJobStatus {
            job: "agent".into(),
            instance: "n1".into(),
            scrape_interval_secs: 60,
        };
        assert_eq!(
            increase(&counter, Some(&status)).values(),
            vec![None, None, Some(3.0), None, None, None]
        );
        assert_eq!(
            increase(&counter, None).values(),
            vec![None, None, None, None, None, None]
        );
    }
}
