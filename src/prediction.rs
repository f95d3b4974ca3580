use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::label_encoder::LabelEncoder;

pub const HIGH_CONFIDENCE: f32 = 0.99;
pub const MEDIUM_CONFIDENCE: f32 = 0.95;

/// Tier of the recommended label's probability. Lower bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "high (>=.99)")]
    High,
    #[serde(rename = "medium (<.99|>=.95)")]
    Medium,
    #[serde(rename = "low (<.95)")]
    Low,
}

impl Confidence {
    /// Compares in `f32`, so the `f32` nearest a threshold counts as reaching
    /// it. `0.95f32` is slightly below `0.95f64` and still rates medium.
    pub fn from_probability(probability: f32) -> Self {
        if probability >= HIGH_CONFIDENCE {
            Self::High
        } else if probability >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high (>=.99)",
            Self::Medium => "medium (<.99|>=.95)",
            Self::Low => "low (<.95)",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one input text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Label with the highest probability.
    pub recommended: String,
    pub confidence: Confidence,
    /// Independent sigmoid probability of every known label; these do not
    /// sum to one.
    pub probabilities: BTreeMap<String, f32>,
}

/// Index and value of the largest element; the first one wins ties.
fn argmax(row: &[f32]) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, max)) if p <= max => best,
            _ => Some((i, p)),
        })
}

/// Turns per-input probability rows into predictions, in row order.
pub fn postprocess(probabilities: Vec<Vec<f32>>, labels: &LabelEncoder) -> Result<Vec<Prediction>> {
    probabilities
        .into_iter()
        .map(|row| {
            if row.len() != labels.len() {
                return Err(Error::LabelEncoder(format!(
                    "model produced {} scores for {} labels",
                    row.len(),
                    labels.len()
                )));
            }
            let (index, max) = argmax(&row)
                .ok_or_else(|| Error::LabelEncoder("empty probability row".to_string()))?;
            let recommended = labels.inverse_transform(index)?.to_string();
            let probabilities = labels.classes().iter().cloned().zip(row).collect();
            Ok(Prediction {
                recommended,
                confidence: Confidence::from_probability(max),
                probabilities,
            })
        })
        .collect()
}
