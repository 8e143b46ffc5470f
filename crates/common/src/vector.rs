//! Embedding vector value type
//!
//! An [`Embedding`] is an immutable, fixed-length `f32` vector. Stores check
//! its dimension against the configured model dimension before persisting
//! or ranking with it.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Fail with [`AppError::DimensionMismatch`] unless the vector has `expected` entries
    pub fn ensure_dimension(&self, expected: usize) -> Result<()> {
        if self.dimension() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: self.dimension(),
            });
        }
        Ok(())
    }

    /// Render as a pgvector text literal, e.g. `[0.1,0.2,0.3]`
    pub fn to_pg_literal(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        format!("[{}]", parts.join(","))
    }

    /// Parse the pgvector text form returned by `embedding::text`
    pub fn parse_pg_literal(literal: &str) -> Result<Self> {
        let inner = literal
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| AppError::Internal {
                message: format!("Malformed vector literal: {}", truncate(literal, 32)),
            })?;

        if inner.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }

        inner
            .split(',')
            .map(|part| {
                part.trim().parse::<f32>().map_err(|e| AppError::Internal {
                    message: format!("Malformed vector component '{}': {}", part, e),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Cosine similarity in `[-1, 1]`
///
/// Returns 0.0 when the lengths differ or either vector has zero norm, so
/// callers never see NaN. Equivalent to `1 - (a <=> b)` in pgvector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
