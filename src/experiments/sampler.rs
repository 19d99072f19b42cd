use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Pick one index with probability `weights[i] / sum(weights)`.
///
/// Negative and non-finite entries count as zero. When nothing carries weight the
/// draw is uniform over every index. Returns `None` only for an empty slice.
///
/// The sampler keeps no history: callers emulate sampling without replacement by
/// zeroing the weight of each index they have already taken.
pub fn sample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let usable = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let total: f64 = weights.iter().map(|&w| usable(w)).sum();

    if total > 0.0 && total.is_finite() {
        if let Ok(dist) = WeightedIndex::new(weights.iter().map(|&w| usable(w))) {
            return Some(dist.sample(rng));
        }
    }

    Some(rng.gen_range(0..weights.len()))
}
