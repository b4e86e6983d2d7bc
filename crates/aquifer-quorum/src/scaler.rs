//! Predictive auto-scaler (spec §4.7 "Predictive scaler", §9 Open
//! Questions 3/4).
//!
//! Maintains the last hour of cluster-level aggregates and, at each
//! decision tick, standardizes the feature history and fits a
//! closed-form ordinary-least-squares model of `past[i] -> past[i+1]`
//! (spec §9: "a simple standardized linear fit with a confidence
//! score" — no external ML crate, since the corpus has none to reach
//! for; see `SPEC_FULL.md` §4.7). `Predictor` is a trait so a real
//! model can be substituted without touching [`AutoScaler`].

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};

/// One cluster-level sample the predictor trains and predicts on.
#[derive(Debug, Clone, Copy)]
pub struct ClusterSample {
    pub memory_used_avg: f64,
    pub cpu_usage_avg:   f64,
    pub total_keys:      u64,
    pub node_count:      usize,
    pub timestamp:        DateTime<Utc>,
}

/// A one-step-ahead prediction with a model confidence score.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub predicted_cpu:    f64,
    pub predicted_memory: f64,
    pub confidence:       f64,
}

/// Pluggable forecaster over cluster history. `LinearFitPredictor` is
/// the spec-documented default; any model with the same input/output
/// shape can substitute it.
pub trait Predictor: Send + Sync {
    /// Predict the next interval's cpu/memory from `history`, if
    /// there is enough data. Returns `None` rather than a low-quality
    /// guess when `history.len() < 2`.
    fn predict(&self, history: &[ClusterSample]) -> Option<Prediction>;
}

/// Standardized (z-score) ordinary-least-squares fit of
/// `feature[i] -> feature[i+1]`, solved in closed form, run
/// independently for the cpu and memory series.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFitPredictor;

impl Predictor for LinearFitPredictor {
    fn predict(&self, history: &[ClusterSample]) -> Option<Prediction> {
        if history.len() < 2 {
            return None;
        }
        let cpu: Vec<f64> = history.iter().map(|s| s.cpu_usage_avg).collect();
        let memory: Vec<f64> = history.iter().map(|s| s.memory_used_avg).collect();

        let (predicted_cpu, r2_cpu) = fit_next(&cpu);
        let (predicted_memory, r2_memory) = fit_next(&memory);
        let confidence = (r2_cpu + r2_memory) / 2.0;

        Some(Prediction { predicted_cpu, predicted_memory, confidence })
    }
}

/// Fit `series[i] -> series[i+1]` via standardized OLS and return
/// `(predicted_next, r_squared)`. `series` must have at least 2
/// points; fewer than 2 training pairs (i.e. `series.len() < 3`)
/// yields a naive last-value forecast with `r_squared = 0.0`.
fn fit_next(series: &[f64]) -> (f64, f64) {
    let n = series.len();
    if n < 3 {
        return (*series.last().unwrap_or(&0.0), 0.0);
    }
    let xs = &series[..n - 1];
    let ys = &series[1..];

    let (x_mean, x_std) = mean_std(xs);
    let (y_mean, y_std) = mean_std(ys);
    let x_std = if x_std.abs() < f64::EPSILON { 1.0 } else { x_std };
    let y_std = if y_std.abs() < f64::EPSILON { 1.0 } else { y_std };

    let zx: Vec<f64> = xs.iter().map(|v| (v - x_mean) / x_std).collect();
    let zy: Vec<f64> = ys.iter().map(|v| (v - y_mean) / y_std).collect();

    let count = zx.len() as f64;
    let sum_xy: f64 = zx.iter().zip(&zy).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = zx.iter().map(|x| x * x).sum();
    let slope = if sum_xx.abs() < f64::EPSILON { 0.0 } else { sum_xy / sum_xx };
    let intercept = (zy.iter().sum::<f64>() - slope * zx.iter().sum::<f64>()) / count;

    let last_z = (series[n - 1] - x_mean) / x_std;
    let predicted_z = slope * last_z + intercept;
    let predicted = predicted_z * y_std + y_mean;

    let predicted_fits: Vec<f64> = zx.iter().map(|x| slope * x + intercept).collect();
    let ss_res: f64 = zy.iter().zip(&predicted_fits).map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = zy.iter().map(|y| y * y).sum();
    let r2 = if ss_tot.abs() < f64::EPSILON { 0.0 } else { (1.0 - ss_res / ss_tot).clamp(0.0, 1.0) };

    (predicted, r2)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Thresholds, scaling factors, cooldown, and node bounds — all
/// operator-configurable (spec §9 Open Question 3).
#[derive(Debug, Clone, Copy)]
pub struct ScalerConfig {
    pub cpu_threshold:     f64,
    pub memory_threshold:  f64,
    pub scale_up_factor:   f64,
    pub scale_down_factor: f64,
    pub cooldown:          Duration,
    pub min_nodes:         usize,
    pub max_nodes:         usize,
    pub decision_interval: Duration,
    pub min_samples:       usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            cpu_threshold:     80.0,
            memory_threshold:  80.0,
            scale_up_factor:   1.5,
            scale_down_factor: 0.5,
            cooldown:          Duration::from_secs(300),
            min_nodes:         1,
            max_nodes:         usize::MAX,
            decision_interval: Duration::from_secs(60),
            min_samples:       10,
        }
    }
}

/// What the scaler decided to do at one decision tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleDecision {
    ScaleUp { target_nodes: usize },
    ScaleDown { target_nodes: usize },
    NoChange,
}

/// Drives scale decisions from a rolling history of cluster samples.
/// The scaler is the only component permitted to add/remove nodes
/// from the cluster view (spec §4.7 "Concurrency").
pub struct AutoScaler<P: Predictor = LinearFitPredictor> {
    config:          ScalerConfig,
    predictor:       P,
    history:         VecDeque<ClusterSample>,
    last_scale_time: Option<DateTime<Utc>>,
}

impl<P: Predictor> AutoScaler<P> {
    /// A scaler using `predictor` and `config`, with no history yet.
    pub fn with_predictor(config: ScalerConfig, predictor: P) -> Self {
        Self { config, predictor, history: VecDeque::new(), last_scale_time: None }
    }

    /// Record one cluster-level sample, retaining the last hour
    /// (spec §4.7).
    pub fn record_sample(&mut self, sample: ClusterSample) {
        self.history.push_back(sample);
        while let Some(front) = self.history.front() {
            if sample.timestamp - front.timestamp > chrono::Duration::hours(1) {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Decide whether to scale, given `now` and `current_node_count`.
    /// Respects the minimum-sample gate, the cooldown, and the
    /// `[min_nodes, max_nodes]` clamp (spec §8 invariant 7).
    pub fn decide(&mut self, now: DateTime<Utc>, current_node_count: usize) -> ScaleDecision {
        if self.history.len() < self.config.min_samples {
            return ScaleDecision::NoChange;
        }
        if let Some(last) = self.last_scale_time {
            if now - last < chrono::Duration::from_std(self.config.cooldown).unwrap_or_default() {
                return ScaleDecision::NoChange;
            }
        }

        let samples: Vec<ClusterSample> = self.history.iter().copied().collect();
        let Some(prediction) = self.predictor.predict(&samples) else {
            return ScaleDecision::NoChange;
        };

        let decision = if prediction.predicted_cpu > self.config.cpu_threshold || prediction.predicted_memory > self.config.memory_threshold {
            let target = ((current_node_count as f64) * self.config.scale_up_factor).ceil() as usize;
            ScaleDecision::ScaleUp { target_nodes: target.clamp(self.config.min_nodes, self.config.max_nodes) }
        } else if prediction.predicted_cpu < self.config.cpu_threshold * 0.5 && prediction.predicted_memory < self.config.memory_threshold * 0.5 {
            let target = ((current_node_count as f64) * self.config.scale_down_factor).floor().max(1.0) as usize;
            ScaleDecision::ScaleDown { target_nodes: target.clamp(self.config.min_nodes, self.config.max_nodes) }
        } else {
            ScaleDecision::NoChange
        };

        if !matches!(decision, ScaleDecision::NoChange) {
            self.last_scale_time = Some(now);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, memory: f64, t_secs: i64) -> ClusterSample {
        ClusterSample { memory_used_avg: memory, cpu_usage_avg: cpu, total_keys: 0, node_count: 3, timestamp: DateTime::from_timestamp(t_secs, 0).unwrap() }
    }

    #[test]
    fn fewer_than_min_samples_never_scales() {
        let mut scaler = AutoScaler::with_predictor(ScalerConfig::default(), LinearFitPredictor);
        for i in 0..5 {
            scaler.record_sample(sample(90.0, 90.0, i));
        }
        assert_eq!(scaler.decide(DateTime::from_timestamp(100, 0).unwrap(), 3), ScaleDecision::NoChange);
    }

    #[test]
    fn rising_load_triggers_scale_up() {
        let mut scaler = AutoScaler::with_predictor(ScalerConfig::default(), LinearFitPredictor);
        for i in 0..12 {
            let load = 50.0 + i as f64 * 5.0;
            scaler.record_sample(sample(load, load, i));
        }
        let decision = scaler.decide(DateTime::from_timestamp(100, 0).unwrap(), 4);
        assert!(matches!(decision, ScaleDecision::ScaleUp { .. }));
    }

    #[test]
    fn low_stable_load_triggers_scale_down() {
        let mut scaler = AutoScaler::with_predictor(ScalerConfig::default(), LinearFitPredictor);
        for i in 0..12 {
            scaler.record_sample(sample(5.0, 5.0, i));
        }
        let decision = scaler.decide(DateTime::from_timestamp(100, 0).unwrap(), 4);
        assert!(matches!(decision, ScaleDecision::ScaleDown { .. }));
    }

    #[test]
    fn scale_targets_are_clamped_to_bounds() {
        let config = ScalerConfig { min_nodes: 2, max_nodes: 5, ..ScalerConfig::default() };
        let mut scaler = AutoScaler::with_predictor(config, LinearFitPredictor);
        for i in 0..12 {
            let load = 50.0 + i as f64 * 10.0;
            scaler.record_sample(sample(load, load, i));
        }
        if let ScaleDecision::ScaleUp { target_nodes } = scaler.decide(DateTime::from_timestamp(100, 0).unwrap(), 10) {
            assert!(target_nodes <= 5);
        }
    }

    #[test]
    fn cooldown_blocks_a_second_immediate_decision() {
        let mut scaler = AutoScaler::with_predictor(ScalerConfig::default(), LinearFitPredictor);
        for i in 0..12 {
            let load = 50.0 + i as f64 * 10.0;
            scaler.record_sample(sample(load, load, i));
        }
        let t0 = DateTime::from_timestamp(1_000, 0).unwrap();
        let first = scaler.decide(t0, 4);
        assert_ne!(first, ScaleDecision::NoChange);
        let second = scaler.decide(t0 + chrono::Duration::seconds(1), 4);
        assert_eq!(second, ScaleDecision::NoChange);
    }
}
