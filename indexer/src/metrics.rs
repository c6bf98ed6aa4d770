//! Progress counters/gauges emitted throughout indexing (spec.md §2, §7; SPEC_FULL.md §10.5).
//! Recording goes through the `metrics` facade so whatever recorder the binary installs (a
//! Prometheus recorder in `indexer-standalone`) receives these; this module never talks to an
//! exposition surface itself.

const EWMA_SMOOTHING: f64 = 0.2;

pub fn record_block_indexed() {
    metrics::counter!("blocks_indexed_total").increment(1);
}

pub fn record_transactions_indexed(count: u64) {
    metrics::counter!("txs_indexed_total").increment(count);
}

pub fn record_failed_block() {
    metrics::counter!("failed_blocks_total").increment(1);
}

pub fn record_progress(progress_percent: f64, blocks_per_second: f64, eta_seconds: f64) {
    metrics::gauge!("historical_progress_percent").set(progress_percent);
    metrics::gauge!("historical_blocks_per_second").set(blocks_per_second);
    metrics::gauge!("historical_eta_seconds").set(eta_seconds);
}

/// Exponentially-weighted moving average of blocks/second, folding in the instantaneous rate
/// observed for the most recently committed batch. `None` previous value seeds the EWMA with
/// the instantaneous rate rather than biasing it toward zero.
pub fn blocks_per_second_ewma(previous: Option<f64>, blocks: i64, elapsed_secs: f64) -> f64 {
    let instantaneous = blocks as f64 / elapsed_secs.max(0.001);

    match previous {
        Some(previous) => EWMA_SMOOTHING * instantaneous + (1.0 - EWMA_SMOOTHING) * previous,
        None => instantaneous,
    }
}

/// Seconds remaining at the current rate; zero if the rate is not yet known or nothing remains.
pub fn eta_seconds(remaining_blocks: i64, blocks_per_second: f64) -> f64 {
    if blocks_per_second <= 0.0 || remaining_blocks <= 0 {
        0.0
    } else {
        remaining_blocks as f64 / blocks_per_second
    }
}

/// Percentage of `[start, tip]` completed once `done_through` has been committed.
pub fn progress_percent(start: i64, tip: i64, done_through: i64) -> f64 {
    let total = (tip - start + 1).max(1) as f64;
    let done = (done_through - start + 1).max(0) as f64;
    (done / total * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ewma_seeds_with_instantaneous_rate_on_first_sample() {
        let bps = blocks_per_second_ewma(None, 100, 10.0);
        assert_eq!(bps, 10.0);
    }

    #[test]
    fn ewma_smooths_toward_new_sample() {
        let bps = blocks_per_second_ewma(Some(10.0), 100, 20.0);
        assert!((bps - 9.0).abs() < 0.01);
    }

    #[test]
    fn eta_is_zero_when_rate_unknown() {
        assert_matches!(eta_seconds(100, 0.0), eta if eta == 0.0);
    }

    #[test]
    fn eta_divides_remaining_by_rate() {
        assert_eq!(eta_seconds(100, 10.0), 10.0);
    }

    #[test]
    fn progress_caps_at_100_percent() {
        assert_eq!(progress_percent(1, 500, 500), 100.0);
        assert_eq!(progress_percent(1, 500, 250), 50.0);
    }
}
