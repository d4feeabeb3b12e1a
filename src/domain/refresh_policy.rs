//! Delayed-refresh policy normalization and shot planning.
//!
//! After a signal that fresh data may appear soon, the watcher re-polls the
//! upstream platform several times across a bounded cycle. The cadence is
//! jittered inside per-shot feasibility windows so it is not trivially
//! predictable, with a deterministic fallback to the exact window centers
//! whenever the windows cannot be satisfied — planning never fails.
//!
//! All of this is pure: [`RefreshPolicy::normalized`] and
//! [`plan_refresh_delays`] have no side effects, and randomness enters only
//! through the narrow [`RandomSource`] seam so tests can pin exact output.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_CYCLE_SECONDS: i64 = 120;
const DEFAULT_MINIMUM_SECONDS: i64 = 20;
const DEFAULT_AVERAGE_SECONDS: i64 = 30;
const DEFAULT_SPREAD_SECONDS: i64 = 0;
const MIN_ALLOWED_MINIMUM_SECONDS: i64 = 1;
const MIN_ALLOWED_AVERAGE_SECONDS: i64 = 5;
const MAX_ALLOWED_MINIMUM_SECONDS: i64 = 60;
const MAX_ALLOWED_AVERAGE_SECONDS: i64 = 60;
const MAX_ALLOWED_SPREAD_SECONDS: i64 = 60;

/// Delayed-refresh cadence policy, in whole seconds.
///
/// The raw shape is what callers submit; it is always normalized through
/// [`RefreshPolicy::normalized`] before use and never persisted raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RefreshPolicy {
    /// Minimum delay between consecutive shots.
    #[serde(default)]
    pub minimum_delay_seconds: i64,
    /// Target average spacing between shots.
    #[serde(default)]
    pub average_delay_seconds: i64,
    /// Half-width of each shot's jitter window.
    #[serde(default)]
    pub spread_seconds: i64,
    /// Total window the shots are spread across.
    #[serde(default)]
    pub cycle_seconds: i64,
}

impl RefreshPolicy {
    /// Normalizes a raw policy into its effective form.
    ///
    /// Defaults apply for any field the caller left non-positive. The cycle
    /// is clamped to ≥2s (else reset to the default), the average into
    /// [5, 60]s, the minimum into [1, 60]s and additionally capped at half
    /// the computed shot spacing, and the spread to [0, min(60, spacing/2)].
    ///
    /// Note the minimum cap is derived from the cycle/average segmentation,
    /// so it can land below the minimum's own default — the default policy
    /// normalizes to a 15s minimum, not 20s.
    #[must_use]
    pub fn normalized(raw: Option<&Self>) -> Self {
        let mut cfg = Self {
            minimum_delay_seconds: DEFAULT_MINIMUM_SECONDS,
            average_delay_seconds: DEFAULT_AVERAGE_SECONDS,
            spread_seconds: DEFAULT_SPREAD_SECONDS,
            cycle_seconds: DEFAULT_CYCLE_SECONDS,
        };
        if let Some(raw) = raw {
            if raw.minimum_delay_seconds > 0 {
                cfg.minimum_delay_seconds = raw.minimum_delay_seconds;
            }
            if raw.average_delay_seconds > 0 {
                cfg.average_delay_seconds = raw.average_delay_seconds;
            }
            if raw.cycle_seconds > 0 {
                cfg.cycle_seconds = raw.cycle_seconds;
            }
            if raw.spread_seconds > 0 {
                cfg.spread_seconds = raw.spread_seconds;
            }
        }

        if cfg.cycle_seconds < 2 {
            cfg.cycle_seconds = DEFAULT_CYCLE_SECONDS;
        }
        cfg.average_delay_seconds = cfg
            .average_delay_seconds
            .clamp(MIN_ALLOWED_AVERAGE_SECONDS, MAX_ALLOWED_AVERAGE_SECONDS);

        let calculated_cycle =
            calculated_cycle_seconds(cfg.cycle_seconds, cfg.average_delay_seconds);

        let max_minimum = (calculated_cycle / 2)
            .clamp(MIN_ALLOWED_MINIMUM_SECONDS, MAX_ALLOWED_MINIMUM_SECONDS);
        if cfg.minimum_delay_seconds < MIN_ALLOWED_MINIMUM_SECONDS {
            cfg.minimum_delay_seconds = MIN_ALLOWED_MINIMUM_SECONDS;
        }
        if cfg.minimum_delay_seconds > max_minimum {
            cfg.minimum_delay_seconds = max_minimum;
        }

        if cfg.spread_seconds < 0 {
            cfg.spread_seconds = 0;
        }
        let max_spread = (calculated_cycle / 2).min(MAX_ALLOWED_SPREAD_SECONDS);
        if cfg.spread_seconds > max_spread {
            cfg.spread_seconds = max_spread;
        }

        cfg
    }
}

/// Natural shot spacing: the cycle divided into `floor(cycle/average)`
/// equal segments, floored at one segment of at least one second.
fn calculated_cycle_seconds(cycle_seconds: i64, average_delay_seconds: i64) -> i64 {
    let cycle_seconds = if cycle_seconds < 1 {
        DEFAULT_CYCLE_SECONDS
    } else {
        cycle_seconds
    };
    let average_delay_seconds = if average_delay_seconds < 1 {
        DEFAULT_AVERAGE_SECONDS
    } else {
        average_delay_seconds
    };

    let count_by_average = ((cycle_seconds / average_delay_seconds) - 1).max(0);
    let segments = (count_by_average + 1).max(1);

    (cycle_seconds / segments).max(1)
}

/// Number of shots the normalized policy yields; zero means no scheduling.
#[must_use]
pub fn planned_shot_count(cfg: &RefreshPolicy) -> i64 {
    let max_by_minimum = (cfg.cycle_seconds / cfg.minimum_delay_seconds) - 1;
    let max_by_average = (cfg.cycle_seconds / cfg.average_delay_seconds) - 1;
    max_by_minimum.min(max_by_average).max(0)
}

/// Source of uniform floats in `[0, 1)` for jitter placement.
///
/// Production uses [`ThreadRngSource`]; deterministic tests inject a fixed
/// source and assert exact shot placement.
pub trait RandomSource: Send {
    /// Returns the next uniform float in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

/// Default [`RandomSource`] backed by the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random()
    }
}

/// Computes the fire delays for a normalized policy.
///
/// Shot centers are evenly spaced across the cycle. Each center grows a
/// ±spread feasibility window, clipped so every shot keeps `minimum` room
/// to the cycle edges and its neighbors, then tightened by a forward pass
/// (`low[i] ≥ low[i-1] + minimum`) and a backward pass (`high[i] ≤
/// high[i+1] − minimum`). If any window empties, jitter is abandoned and
/// the exact centers are used. Otherwise each shot picks a whole second
/// inside its window, at least `minimum` after the previously chosen value.
#[must_use]
pub fn plan_refresh_delays(cfg: &RefreshPolicy, rng: &mut dyn RandomSource) -> Vec<Duration> {
    let count = planned_shot_count(cfg);
    if count <= 0 {
        return Vec::new();
    }
    let count = usize::try_from(count).unwrap_or(0);

    let cycle = cfg.cycle_seconds as f64;
    let min_gap = cfg.minimum_delay_seconds as f64;
    let spread = cfg.spread_seconds as f64;
    let segments = (count + 1) as f64;

    let centers: Vec<f64> = (0..count)
        .map(|i| cycle * (i + 1) as f64 / segments)
        .collect();

    let mut windows: Vec<(f64, f64)> = centers
        .iter()
        .enumerate()
        .map(|(i, &center)| {
            let min_by_boundary = (i + 1) as f64 * min_gap;
            let max_by_boundary = cycle - (count - i) as f64 * min_gap;
            let low = (center - spread).max(min_by_boundary);
            let high = (center + spread).min(max_by_boundary);
            (low, high)
        })
        .collect();

    let mut prev_low = f64::NEG_INFINITY;
    for window in &mut windows {
        let min_allowed = prev_low + min_gap;
        if window.0 < min_allowed {
            window.0 = min_allowed;
        }
        prev_low = window.0;
    }

    let mut next_high = f64::INFINITY;
    for window in windows.iter_mut().rev() {
        let max_allowed = next_high - min_gap;
        if window.1 > max_allowed {
            window.1 = max_allowed;
        }
        next_high = window.1;
    }

    if windows.iter().any(|&(low, high)| low > high) {
        return centers.into_iter().map(Duration::from_secs_f64).collect();
    }

    let mut chosen: Vec<f64> = Vec::with_capacity(count);
    for &(window_low, window_high) in &windows {
        let mut low = window_low;
        if let Some(&prev) = chosen.last() {
            let min_allowed = prev + min_gap;
            if low < min_allowed {
                low = min_allowed;
            }
        }
        let high = window_high;
        if low > high {
            low = high;
        }

        if high <= low {
            chosen.push(low);
            continue;
        }

        // Whole-second schedule points so spread produces visibly different
        // cadence in logs and clients.
        let mut low_int = low.ceil() as i64;
        let high_int = high.floor() as i64;
        if low_int > high_int {
            chosen.push(low);
            continue;
        }
        if let Some(&prev) = chosen.last() {
            let min_allowed_int = (prev.floor() as i64) + cfg.minimum_delay_seconds;
            if low_int < min_allowed_int {
                low_int = min_allowed_int;
            }
            if low_int > high_int {
                chosen.push(high_int as f64);
                continue;
            }
        }

        let span = high_int - low_int + 1;
        let pick = if span > 1 {
            let offset = (rng.next_f64() * span as f64).floor() as i64;
            low_int + offset.clamp(0, span - 1)
        } else {
            low_int
        };
        chosen.push(pick as f64);
    }

    chosen.into_iter().map(Duration::from_secs_f64).collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    /// Fixed-value source for deterministic placement assertions.
    struct FixedSource(f64);

    impl RandomSource for FixedSource {
        fn next_f64(&mut self) -> f64 {
            self.0
        }
    }

    fn delays_secs(cfg: &RefreshPolicy, rng: &mut dyn RandomSource) -> Vec<u64> {
        plan_refresh_delays(cfg, rng)
            .into_iter()
            .map(|d| d.as_secs())
            .collect()
    }

    #[test]
    fn zero_spread_collapses_to_exact_centers() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            minimum_delay_seconds: 20,
            average_delay_seconds: 30,
            spread_seconds: 0,
            cycle_seconds: 120,
        }));
        assert_eq!(planned_shot_count(&cfg), 3);

        let mut rng = FixedSource(0.5);
        assert_eq!(delays_secs(&cfg, &mut rng), vec![30, 60, 90]);
    }

    #[test]
    fn default_policy_self_clamps_minimum() {
        let cfg = RefreshPolicy::normalized(None);
        // calculated spacing for 120s/30s is 30s, so the minimum caps at 15s,
        // below its own 20s default.
        assert_eq!(cfg.minimum_delay_seconds, 15);
        assert_eq!(cfg.average_delay_seconds, 30);
        assert_eq!(cfg.spread_seconds, 0);
        assert_eq!(cfg.cycle_seconds, 120);
        assert_eq!(planned_shot_count(&cfg), 3);
    }

    #[test]
    fn caller_overrides_apply_only_when_positive() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            minimum_delay_seconds: -3,
            average_delay_seconds: 10,
            spread_seconds: -1,
            cycle_seconds: 0,
        }));
        assert_eq!(cfg.cycle_seconds, 120);
        assert_eq!(cfg.average_delay_seconds, 10);
        assert_eq!(cfg.spread_seconds, 0);
        // calculated spacing 120/12 = 10s caps the 20s default minimum at 5s.
        assert_eq!(cfg.minimum_delay_seconds, 5);
    }

    #[test]
    fn tiny_cycle_resets_to_default() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            cycle_seconds: 1,
            ..RefreshPolicy::default()
        }));
        assert_eq!(cfg.cycle_seconds, 120);
    }

    #[test]
    fn average_clamped_into_range() {
        let low = RefreshPolicy::normalized(Some(&RefreshPolicy {
            average_delay_seconds: 2,
            ..RefreshPolicy::default()
        }));
        assert_eq!(low.average_delay_seconds, 5);

        let high = RefreshPolicy::normalized(Some(&RefreshPolicy {
            average_delay_seconds: 300,
            ..RefreshPolicy::default()
        }));
        assert_eq!(high.average_delay_seconds, 60);
    }

    #[test]
    fn jitter_respects_window_edges() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            minimum_delay_seconds: 5,
            average_delay_seconds: 30,
            spread_seconds: 10,
            cycle_seconds: 120,
        }));
        assert_eq!(cfg.spread_seconds, 10);
        assert_eq!(planned_shot_count(&cfg), 3);

        let mut low_rng = FixedSource(0.0);
        assert_eq!(delays_secs(&cfg, &mut low_rng), vec![20, 50, 80]);

        let mut high_rng = FixedSource(0.999_999);
        assert_eq!(delays_secs(&cfg, &mut high_rng), vec![40, 70, 100]);
    }

    #[test]
    fn consecutive_picks_keep_minimum_gap() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            minimum_delay_seconds: 15,
            average_delay_seconds: 30,
            spread_seconds: 20,
            cycle_seconds: 120,
        }));

        let mut rng = FixedSource(0.999_999);
        let delays = plan_refresh_delays(&cfg, &mut rng);
        let mut previous: Option<Duration> = None;
        for delay in delays {
            if let Some(prev) = previous {
                assert!(delay >= prev + Duration::from_secs(cfg.minimum_delay_seconds as u64));
            }
            previous = Some(delay);
        }
    }

    #[test]
    fn oversized_minimum_yields_no_shots() {
        let cfg = RefreshPolicy::normalized(Some(&RefreshPolicy {
            minimum_delay_seconds: 60,
            average_delay_seconds: 60,
            spread_seconds: 0,
            cycle_seconds: 60,
        }));
        assert_eq!(planned_shot_count(&cfg), 0);

        let mut rng = FixedSource(0.5);
        assert!(plan_refresh_delays(&cfg, &mut rng).is_empty());
    }
}
