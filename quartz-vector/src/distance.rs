//! Distance strategies used for scan-time comparisons.
//!
//! All three are expressed "lower is better", matching the ordering the
//! graph engine's search and pruning already assume. Insertion always uses
//! [`DistanceMetric::L2`] internally regardless of the scan's strategy —
//! only the query path varies by strategy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean distance: `sqrt(sum((a-b)^2))`.
    L2,
    /// `1 - cosine_similarity`; 2.0 if either vector has zero norm.
    Cosine,
    /// `-(a . b)`, for "larger dot product is closer" orderings.
    NegativeInnerProduct,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "distance operands must share dimension");
        match self {
            DistanceMetric::L2 => l2(a, b),
            DistanceMetric::Cosine => cosine(a, b),
            DistanceMetric::NegativeInnerProduct => -dot(a, b),
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[inline]
fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

#[inline]
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return 2.0;
    }
    1.0 - dot(a, b) / (mag_a * mag_b)
}
