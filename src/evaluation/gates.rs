//! Quality gates.
//!
//! A gate failure is data, not an error: [`QualityThresholds::check`] returns
//! one message per violated threshold and leaves pass/fail policy to the
//! caller.

use super::EvaluationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configured thresholds. `None` disables a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityThresholds {
    pub min_precision_at_k: Option<f64>,
    /// K at which the precision gate is measured.
    pub precision_gate_k: usize,
    pub min_mrr: Option<f64>,
    pub max_latency_p95_ms: Option<u64>,
    pub min_success_rate: Option<f64>,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_precision_at_k: Some(0.70),
            precision_gate_k: 5,
            min_mrr: Some(0.60),
            max_latency_p95_ms: Some(2000),
            min_success_rate: Some(0.95),
        }
    }
}

/// Aggregate values the gates are checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateInputs<'a> {
    pub precision_at_k: &'a BTreeMap<usize, f64>,
    pub mean_reciprocal_rank: f64,
    pub latency_p95_ms: u64,
    pub success_rate: f64,
}

/// Ratio gates allow for float rounding in means of per-query ratios.
const RATIO_TOLERANCE: f64 = 1e-9;

fn below(measured: f64, min: f64) -> bool {
    measured + RATIO_TOLERANCE < min
}

fn check_ratio(name: &str, value: Option<f64>) -> Result<(), EvaluationError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(EvaluationError::InvalidConfiguration(
            format!("{} must be between 0 and 1, got {}", name, v),
        )),
        _ => Ok(()),
    }
}

impl QualityThresholds {
    /// Gates with no thresholds set. Every run passes.
    pub fn disabled() -> Self {
        Self {
            min_precision_at_k: None,
            precision_gate_k: 5,
            min_mrr: None,
            max_latency_p95_ms: None,
            min_success_rate: None,
        }
    }

    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.precision_gate_k == 0 {
            return Err(EvaluationError::InvalidConfiguration(
                "precision_gate_k must be greater than zero".into(),
            ));
        }
        check_ratio("min_precision_at_k", self.min_precision_at_k)?;
        check_ratio("min_mrr", self.min_mrr)?;
        check_ratio("min_success_rate", self.min_success_rate)?;
        Ok(())
    }

    /// Messages for every violated threshold, citing measured and required
    /// values. Empty means all gates passed.
    pub fn check(&self, inputs: &GateInputs<'_>) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(min) = self.min_precision_at_k {
            let k = self.precision_gate_k;
            let measured = inputs.precision_at_k.get(&k).copied().unwrap_or(0.0);
            if below(measured, min) {
                failures.push(format!(
                    "Precision@{} {:.3} below required {:.3}",
                    k, measured, min
                ));
            }
        }

        if let Some(min) = self.min_mrr {
            if below(inputs.mean_reciprocal_rank, min) {
                failures.push(format!(
                    "MRR {:.3} below required {:.3}",
                    inputs.mean_reciprocal_rank, min
                ));
            }
        }

        if let Some(max) = self.max_latency_p95_ms {
            if inputs.latency_p95_ms > max {
                failures.push(format!(
                    "Latency p95 {}ms above allowed {}ms",
                    inputs.latency_p95_ms, max
                ));
            }
        }

        if let Some(min) = self.min_success_rate {
            if below(inputs.success_rate, min) {
                failures.push(format!(
                    "Success rate {:.3} below required {:.3}",
                    inputs.success_rate, min
                ));
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(precision: &BTreeMap<usize, f64>) -> GateInputs<'_> {
        GateInputs {
            precision_at_k: precision,
            mean_reciprocal_rank: 0.8,
            latency_p95_ms: 150,
            success_rate: 1.0,
        }
    }

    #[test]
    fn test_all_gates_pass() {
        let precision = BTreeMap::from([(5, 0.8)]);
        assert!(QualityThresholds::default().check(&inputs(&precision)).is_empty());
    }

    #[test]
    fn test_precision_failure_cites_both_values() {
        let precision = BTreeMap::from([(5, 0.65)]);
        let failures = QualityThresholds::default().check(&inputs(&precision));
        assert_eq!(failures, vec!["Precision@5 0.650 below required 0.700"]);
    }

    #[test]
    fn test_every_violation_is_reported() {
        let precision = BTreeMap::from([(5, 0.1)]);
        let failures = QualityThresholds::default().check(&GateInputs {
            precision_at_k: &precision,
            mean_reciprocal_rank: 0.2,
            latency_p95_ms: 2500,
            success_rate: 0.5,
        });
        assert_eq!(failures.len(), 4);
        assert!(failures[2].contains("2500ms"));
        assert!(failures[2].contains("2000ms"));
    }

    #[test]
    fn test_rounding_at_threshold_passes() {
        // (0.6 * 3 + 0.8 * 3) / 6 in f64
        let precision = BTreeMap::from([(5, 0.6999999999999998)]);
        let failures = QualityThresholds::default().check(&GateInputs {
            precision_at_k: &precision,
            mean_reciprocal_rank: 0.6 - 1e-15,
            latency_p95_ms: 2000,
            success_rate: 0.95 - 1e-15,
        });
        assert!(failures.is_empty(), "{:?}", failures);

        let precision = BTreeMap::from([(5, 0.699)]);
        assert_eq!(
            QualityThresholds::default().check(&inputs(&precision)),
            vec!["Precision@5 0.699 below required 0.700"]
        );
    }

    #[test]
    fn test_disabled_gates_never_fail() {
        let precision = BTreeMap::new();
        let failures = QualityThresholds::disabled().check(&GateInputs {
            precision_at_k: &precision,
            mean_reciprocal_rank: 0.0,
            latency_p95_ms: u64::MAX,
            success_rate: 0.0,
        });
        assert!(failures.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(QualityThresholds::default().validate().is_ok());

        let mut bad = QualityThresholds::default();
        bad.min_mrr = Some(1.5);
        assert!(matches!(
            bad.validate(),
            Err(EvaluationError::InvalidConfiguration(_))
        ));

        let mut zero_k = QualityThresholds::default();
        zero_k.precision_gate_k = 0;
        assert!(zero_k.validate().is_err());
    }
}
