//! Jacobson/Karn RTT estimation and RTO derivation.
//!
//! Follows `rtt-estimator.cpp` exactly: a fixed-length history of the last
//! `N_SAMPLES` clamped RTT observations feeds an EWMA mean/variance pair
//! with asymmetric gain on the rising vs. falling edge, and the minimum RTT
//! floor is only updated from unambiguous (non-retransmitted) samples, per
//! Karn's algorithm.

use std::time::{Duration, Instant};

const INITIAL_RTO_MS: f64 = 250.0;
const MAX_RTT_MS: f64 = 2000.0;
const MIN_RTT_MS: f64 = 10.0;
const N_SAMPLES: usize = 5;
const MEAN_WEIGHT_OLD: f64 = 0.3;
const MEAN_WEIGHT_NEW: f64 = 0.7;
const VAR_WEIGHT_OLD: f64 = 0.125;
const VAR_WEIGHT_NEW: f64 = 0.875;

/// Tracks smoothed RTT/variance and derives the retransmission timeout.
pub struct RttEstimator {
    mean: Option<f64>,
    var: Option<f64>,
    last_rtt: Option<f64>,
    rtt_min_calc: Option<f64>,
    rto_multiplier: u32,
    history: Vec<f64>,
}

impl RttEstimator {
    pub fn new() -> Self {
        RttEstimator {
            mean: None,
            var: None,
            last_rtt: None,
            rtt_min_calc: None,
            rto_multiplier: 1,
            history: Vec::with_capacity(N_SAMPLES),
        }
    }

    /// Records an observation. `transmissions` holds every send timestamp
    /// for the segment in send order (one entry if never retransmitted);
    /// `arrival` is when the Data came in. Returns the raw, unclamped RTT
    /// sample in milliseconds.
    ///
    /// Mirrors `RttEstimator::addRttMeasurement`: a singly-transmitted
    /// segment yields an unambiguous sample and is allowed to lower
    /// `rtt_min_calc`; a retransmitted segment instead walks the
    /// transmission list newest-first and takes the first send whose
    /// implied RTT is still at or above the current floor (Karn's rule:
    /// ambiguous samples never update the floor). If none clears the
    /// floor, the loop's last checked entry — the oldest transmission —
    /// is used, matching `rtt-estimator.cpp`'s `for (i = size; i >= 1; --i)`
    /// leaving `transmissionTimes[0]` as the fallthrough value.
    pub fn add_measurement(&mut self, transmissions: &[Instant], arrival: Instant) -> f64 {
        let floor = self.rtt_min_calc.unwrap_or(MIN_RTT_MS);

        let raw_rtt_ms = if transmissions.len() == 1 {
            let rtt = duration_ms(arrival.saturating_duration_since(transmissions[0]));
            self.rtt_min_calc = Some(self.rtt_min_calc.map_or(rtt, |m| m.min(rtt)));
            rtt
        } else {
            transmissions
                .iter()
                .rev()
                .map(|t| duration_ms(arrival.saturating_duration_since(*t)))
                .find(|rtt| *rtt >= floor)
                .unwrap_or_else(|| duration_ms(arrival.saturating_duration_since(*transmissions.first().unwrap())))
        };

        let clamped = raw_rtt_ms.clamp(floor, MAX_RTT_MS);
        self.last_rtt = Some(clamped);

        if self.history.len() == N_SAMPLES {
            self.history.remove(0);
        }
        self.history.push(clamped);
        self.recompute();

        raw_rtt_ms
    }

    fn recompute(&mut self) {
        let mut iter = self.history.iter();
        let Some(&first) = iter.next() else {
            return;
        };
        let mut mean = first;
        let mut var = first / 2.0;
        for &sample in iter {
            var = VAR_WEIGHT_OLD * var + VAR_WEIGHT_NEW * (sample - mean).abs();
            mean = MEAN_WEIGHT_OLD * mean + MEAN_WEIGHT_NEW * sample;
        }
        self.mean = Some(mean);
        self.var = Some(var);
    }

    /// Returns the current retransmission timeout, or `None` before the
    /// first sample (callers fall back to the configured default).
    pub fn rto_ms(&self) -> Option<f64> {
        let mean = self.mean?;
        let var = self.var?;
        Some(self.rto_multiplier as f64 * (mean + 4.0 * var))
    }

    pub fn last_rtt_ms(&self) -> Option<f64> {
        self.last_rtt
    }

    /// Doubles the RTO multiplier, up to a ceiling of 32x, mirroring
    /// `incrementRtoMultiplier`'s no-op above 16.
    pub fn increment_rto_multiplier(&mut self) {
        if self.rto_multiplier <= 16 {
            self.rto_multiplier *= 2;
        }
    }

    /// Halves the RTO multiplier, down to a floor of 1x.
    pub fn decrement_rto_multiplier(&mut self) {
        if self.rto_multiplier >= 2 {
            self.rto_multiplier /= 2;
        }
    }

    pub fn reset(&mut self) {
        self.mean = None;
        self.var = None;
        self.last_rtt = None;
        self.rtt_min_calc = None;
        self.rto_multiplier = 1;
        self.history.clear();
    }

    /// The default RTO to use before any sample has been taken.
    pub fn initial_rto_ms() -> f64 {
        INITIAL_RTO_MS
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
