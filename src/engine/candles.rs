use super::models::{Bar, BarSeries, RawSample, Sample};
use crate::error::{SignalError, SignalResult};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

/// Aggregate parsed samples into fixed-width bars.
///
/// Samples must be strictly increasing by timestamp; anything else is
/// rejected rather than sorted. A bucket holding a non-finite price is
/// dropped whole.
pub fn aggregate(samples: &[Sample], bucket_width: TimeDelta) -> SignalResult<BarSeries> {
    build_series(
        samples.iter().map(|s| (s.timestamp, s.is_finite().then_some(*s))),
        bucket_width,
    )
}

/// Aggregate raw gateway rows, skipping what cannot be parsed.
///
/// - a row with an unparsable timestamp is dropped (it has no bucket)
/// - a bucket holding any row with an unparsable price is dropped whole
pub fn aggregate_raw(rows: &[RawSample], bucket_width: TimeDelta) -> SignalResult<BarSeries> {
    let mut skipped = 0usize;
    let parsed = rows.iter().filter_map(|row| match row.timestamp() {
        Some(ts) => {
            let sample = row
                .prices()
                .map(|(open, high, low, close)| Sample::new(ts, open, high, low, close));
            Some((ts, sample))
        }
        None => {
            skipped += 1;
            None
        }
    });

    let series = build_series(parsed, bucket_width)?;
    if skipped > 0 {
        debug!(skipped, "dropped rows with unparsable timestamps");
    }
    Ok(series)
}

/// Start of the bucket holding `ts`, floored toward negative infinity.
pub fn bucket_start(ts: DateTime<Utc>, bucket_secs: i64) -> SignalResult<DateTime<Utc>> {
    let floored = ts.timestamp().div_euclid(bucket_secs) * bucket_secs;
    DateTime::from_timestamp(floored, 0)
        .ok_or_else(|| SignalError::invalid(format!("bucket start out of range for {}", ts)))
}

/// Bucket being filled. `bar` is `None` once a bad row poisoned it.
struct OpenBucket {
    start: DateTime<Utc>,
    bar: Option<Bar>,
}

fn build_series<I>(rows: I, bucket_width: TimeDelta) -> SignalResult<BarSeries>
where
    I: Iterator<Item = (DateTime<Utc>, Option<Sample>)>,
{
    let bucket_secs = bucket_width.num_seconds();
    if bucket_secs <= 0 {
        return Err(SignalError::invalid(format!(
            "bucket width must be at least one second, got {}s",
            bucket_secs
        )));
    }

    let mut bars = Vec::new();
    let mut dropped_buckets = 0usize;
    let mut previous: Option<DateTime<Utc>> = None;
    let mut open: Option<OpenBucket> = None;

    for (ts, sample) in rows {
        if let Some(prev) = previous {
            if ts <= prev {
                return Err(SignalError::invalid(format!(
                    "samples not strictly increasing: {} follows {}",
                    ts, prev
                )));
            }
        }
        previous = Some(ts);

        let start = bucket_start(ts, bucket_secs)?;
        let same_bucket = open.as_ref().is_some_and(|b| b.start == start);

        if !same_bucket {
            if let Some(done) = open.take() {
                match done.bar {
                    Some(bar) => bars.push(bar),
                    None => dropped_buckets += 1,
                }
            }
            open = Some(OpenBucket {
                start,
                bar: sample.as_ref().map(|s| Bar::opened_by(start, s)),
            });
            continue;
        }

        if let Some(bucket) = open.as_mut() {
            bucket.bar = match (bucket.bar.take(), sample) {
                (Some(mut bar), Some(s)) => {
                    bar.absorb(&s);
                    Some(bar)
                }
                _ => None,
            };
        }
    }

    if let Some(done) = open {
        match done.bar {
            Some(bar) => bars.push(bar),
            None => dropped_buckets += 1,
        }
    }

    if dropped_buckets > 0 {
        debug!(dropped_buckets, "dropped buckets with unparsable prices");
    }

    Ok(BarSeries { bucket_secs, bars })
}
