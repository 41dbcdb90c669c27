//! Temperature-scaled softmax and cumulative-probability sampling.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reject temperatures that would divide by zero or invert the ranking.
pub fn check_temperature(temperature: f64) -> Result<()> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "temperature must be a finite value greater than zero, got {}",
            temperature
        )))
    }
}

/// Convert one position's logits to a probability distribution.
///
/// The maximum is subtracted before exponentiating, so every exponent is
/// `<= 0` and the largest term is exactly 1; the sum can neither overflow nor
/// vanish.
pub fn softmax(logits: &[f32], temperature: f64) -> Result<Vec<f64>> {
    check_temperature(temperature)?;
    if logits.is_empty() {
        return Err(Error::Backend("empty logits slice".into()));
    }
    if logits.iter().any(|v| v.is_nan()) {
        return Err(Error::Backend("logits contain NaN".into()));
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    if !max.is_finite() {
        return Err(Error::Backend(format!("logits have non-finite maximum {}", max)));
    }

    let mut probs: Vec<f64> = logits
        .iter()
        .map(|&v| ((v as f64 - max) / temperature).exp())
        .collect();
    let sum: f64 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
    Ok(probs)
}

/// Select the first id whose running probability exceeds `r`.
///
/// When rounding keeps the running sum at or below `r` the last id is
/// returned.
pub fn pick(probs: &[f64], r: f64) -> usize {
    let mut cumsum = 0.0;
    for (id, p) in probs.iter().enumerate() {
        cumsum += p;
        if cumsum > r {
            return id;
        }
    }
    probs.len().saturating_sub(1)
}

/// Index of the largest logit, first one on ties.
pub fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Draws ids from logits with its own random stream.
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// Reproducible sampler: equal seeds give equal draws.
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Seeded if `seed` is set, otherwise from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    /// Sample one id in `0..logits.len()`.
    pub fn sample(&mut self, logits: &[f32], temperature: f64) -> Result<usize> {
        let probs = softmax(logits, temperature)?;
        let r: f64 = self.rng.gen();
        Ok(pick(&probs, r))
    }
}
