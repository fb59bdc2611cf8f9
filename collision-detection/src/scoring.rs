use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::EngineType;

pub fn clamp_unit(value: f32) -> f32 {
    value.max(0.0).min(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    Linear,
    Sigmoid,
    Softmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    Sum,
    Average,
    Max,
    HarmonicMean,
}

/// Per-engine fusion weights with a fallback for unlisted engines.
#[derive(Debug, Clone)]
pub struct EngineWeights {
    weights: HashMap<EngineType, f32>,
    default_weight: f32,
}

impl Default for EngineWeights {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: 1.0,
        }
    }
}

impl EngineWeights {
    pub fn new(weights: HashMap<EngineType, f32>, default_weight: f32) -> Self {
        Self {
            weights,
            default_weight,
        }
    }

    pub fn with_weight(mut self, engine: EngineType, weight: f32) -> Self {
        self.weights.insert(engine, weight);
        self
    }

    pub fn weight_for(&self, engine: EngineType) -> f32 {
        self.weights
            .get(&engine)
            .copied()
            .unwrap_or(self.default_weight)
            .max(0.0)
    }
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

fn sigmoid_normalize(scores: &[f32]) -> Vec<f32> {
    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                // Centered at 0.5 so raw unit-range scores spread usefully.
                1.0 / (1.0 + (-10.0 * (score - 0.5)).exp())
            } else {
                0.0
            }
        })
        .collect()
}

fn softmax_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(f32::MIN, f32::max);
    if !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    let exps: Vec<f32> = scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                (score - max).exp()
            } else {
                0.0
            }
        })
        .collect();
    let sum: f32 = exps.iter().sum();
    if sum <= f32::EPSILON {
        return scores.iter().map(|_| 0.0).collect();
    }
    exps.iter().map(|e| e / sum).collect()
}

/// Normalizes one engine's scores across all candidate targets.
pub fn normalize_scores(scores: &[f32], method: NormalizationMethod) -> Vec<f32> {
    match method {
        NormalizationMethod::Linear => min_max_normalize(scores),
        NormalizationMethod::Sigmoid => sigmoid_normalize(scores),
        NormalizationMethod::Softmax => softmax_normalize(scores),
    }
}

/// Combines one target's weighted per-engine scores into a single value.
/// `Sum` is clamped to the unit range; the others are bounded already when
/// the inputs are.
pub fn combine_scores(values: &[f32], method: CombineMethod) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f32;
    match method {
        CombineMethod::Sum => clamp_unit(values.iter().sum()),
        CombineMethod::Average => clamp_unit(values.iter().sum::<f32>() / count),
        CombineMethod::Max => clamp_unit(values.iter().copied().fold(f32::MIN, f32::max)),
        CombineMethod::HarmonicMean => {
            if values.iter().any(|v| *v <= f32::EPSILON) {
                return 0.0;
            }
            let reciprocal_sum: f32 = values.iter().map(|v| 1.0 / v).sum();
            clamp_unit(count / reciprocal_sum)
        }
    }
}
