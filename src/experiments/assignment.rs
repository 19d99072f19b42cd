use rand::Rng;
use serde::Serialize;

use super::config::{Experiment, ExperimentError, Variant};
use super::{sampler, token};

/// The variant slots one visitor holds in one experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Distinct variant indexes, one per section, in slot order.
    pub variant_indexes: Vec<usize>,
    /// Variants at `variant_indexes`, same order.
    pub active_variants: Vec<Variant>,
    /// `exp-{name}-{index}` labels, same order.
    pub classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub assignment: Assignment,
    /// Canonical token for `assignment`.
    pub token: String,
    /// True when `token` differs from the prior token, or there was none.
    pub changed: bool,
    /// How many slots were filled by fresh sampling.
    pub sampled: usize,
}

/// Resolve a visitor's assignment, reusing whatever the prior token still
/// validly provides and sampling the remaining slots without replacement.
///
/// Recovered indexes keep their token order. Any textual difference between the
/// prior token and the canonical re-encoding counts as a change.
pub fn resolve<R: Rng + ?Sized>(
    experiment: &Experiment,
    prior_token: Option<&str>,
    rng: &mut R,
) -> Result<Resolution, ExperimentError> {
    let variant_count = experiment.variants.len();
    let sections = experiment.sections;
    if variant_count == 0 || sections == 0 || sections > variant_count {
        return Err(ExperimentError::InvalidConfig(format!(
            "experiment '{}': cannot assign {} section(s) from {} variant(s)",
            experiment.name, sections, variant_count
        )));
    }

    let decoded = prior_token.map(token::decode).unwrap_or_default();

    let mut indexes: Vec<usize> = Vec::with_capacity(sections);
    for index in decoded.indexes {
        if index < variant_count && !indexes.contains(&index) {
            indexes.push(index);
        }
    }
    indexes.truncate(sections);

    // Working copy; the experiment's own weights are never touched.
    let mut weights: Vec<f64> = experiment
        .variants
        .iter()
        .map(Variant::effective_weight)
        .collect();
    for &index in &indexes {
        weights[index] = 0.0;
    }

    let mut sampled = 0;
    while indexes.len() < sections {
        let remaining: f64 = weights.iter().sum();
        if !(remaining.is_finite() && remaining > 0.0) {
            // Exhausted or overflowing: spread evenly over what is left.
            for (i, w) in weights.iter_mut().enumerate() {
                *w = if indexes.contains(&i) { 0.0 } else { 1.0 };
            }
        }
        let drawn = sampler::sample(&weights, rng).ok_or_else(|| {
            ExperimentError::InvalidConfig(format!(
                "experiment '{}' has no variants to sample",
                experiment.name
            ))
        })?;
        let index = if indexes.contains(&drawn) {
            pick_open(variant_count, &indexes, rng)
        } else {
            drawn
        };
        weights[index] = 0.0;
        indexes.push(index);
        sampled += 1;
    }

    let token = token::encode(&experiment.id, &indexes);
    let changed = prior_token != Some(token.as_str());

    let assignment = Assignment {
        active_variants: indexes
            .iter()
            .map(|&i| experiment.variants[i].clone())
            .collect(),
        classes: indexes
            .iter()
            .map(|&i| experiment.display_class(i))
            .collect(),
        variant_indexes: indexes,
    };

    Ok(Resolution {
        assignment,
        token,
        changed,
        sampled,
    })
}

/// Uniform pick among indexes not yet taken. Callers guarantee at least one.
fn pick_open<R: Rng + ?Sized>(variant_count: usize, taken: &[usize], rng: &mut R) -> usize {
    let open: Vec<usize> = (0..variant_count).filter(|i| !taken.contains(i)).collect();
    open[rng.gen_range(0..open.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn exp_with_weights(weights: &[f64], sections: usize) -> Experiment {
        Experiment::new(
            "e1",
            "hero",
            weights.iter().map(|&w| Variant::weighted(w)).collect(),
        )
        .with_sections(sections)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(2024)
    }

    #[test]
    fn fresh_visitor_gets_sampled_and_changed() {
        let exp = exp_with_weights(&[1.0, 3.0], 1);
        let r = resolve(&exp, None, &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes.len(), 1);
        assert!(r.assignment.variant_indexes[0] < 2);
        assert!(r.changed);
        assert_eq!(r.sampled, 1);
    }

    #[test]
    fn fresh_assignment_follows_weights() {
        let exp = exp_with_weights(&[1.0, 3.0], 1);
        let mut rng = rng();
        let n = 20_000;
        let ones = (0..n)
            .filter(|_| resolve(&exp, None, &mut rng).unwrap().assignment.variant_indexes[0] == 1)
            .count();
        let ratio = ones as f64 / n as f64;
        assert!((ratio - 0.75).abs() < 0.02, "ratio was {}", ratio);
    }

    #[test]
    fn valid_prior_token_is_reused_without_sampling() {
        let exp = exp_with_weights(&[1.0, 3.0], 1);
        let r = resolve(&exp, Some("e1.1"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes, vec![1]);
        assert!(!r.changed);
        assert_eq!(r.sampled, 0);
    }

    #[test]
    fn out_of_range_index_is_discarded_and_resampled() {
        let exp = exp_with_weights(&[1.0, 3.0], 1);
        let r = resolve(&exp, Some("e1.5"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes.len(), 1);
        assert!(r.assignment.variant_indexes[0] < 2);
        assert!(r.changed);
        assert_eq!(r.sampled, 1);
    }

    #[test]
    fn partially_valid_token_keeps_valid_slots_and_fills_rest() {
        let exp = exp_with_weights(&[1.0, 1.0, 1.0], 2);
        let r = resolve(&exp, Some("e1.2-7"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes[0], 2);
        assert_ne!(r.assignment.variant_indexes[1], 2);
        assert!(r.changed);
        assert_eq!(r.sampled, 1);
    }

    #[test]
    fn full_sections_yield_a_permutation() {
        let exp = exp_with_weights(&[1.0, 1.0], 2);
        let mut rng = rng();
        for _ in 0..200 {
            let mut idx = resolve(&exp, Some(""), &mut rng)
                .unwrap()
                .assignment
                .variant_indexes;
            idx.sort_unstable();
            assert_eq!(idx, vec![0, 1]);
        }
    }

    #[test]
    fn indexes_never_repeat() {
        let exp = exp_with_weights(&[5.0, 1.0, 0.5, 2.0, 1.0], 4);
        let mut rng = rng();
        for _ in 0..500 {
            let mut idx = resolve(&exp, None, &mut rng).unwrap().assignment.variant_indexes;
            assert_eq!(idx.len(), 4);
            idx.sort_unstable();
            idx.dedup();
            assert_eq!(idx.len(), 4);
        }
    }

    #[test]
    fn exhausted_weights_fill_remaining_slots_without_duplicates() {
        let exp = exp_with_weights(&[1.0, 0.0, 0.0], 3);
        let mut rng = rng();
        for _ in 0..200 {
            let idx = resolve(&exp, None, &mut rng).unwrap().assignment.variant_indexes;
            assert_eq!(idx[0], 0);
            let mut sorted = idx.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, vec![0, 1, 2]);
        }
    }

    #[test]
    fn fresh_picks_never_collide_with_recovered_indexes() {
        let exp = exp_with_weights(&[100.0, 1.0, 1.0], 2);
        let mut rng = rng();
        for _ in 0..200 {
            let idx = resolve(&exp, Some("e1.0"), &mut rng)
                .unwrap()
                .assignment
                .variant_indexes;
            assert_eq!(idx[0], 0);
            assert_ne!(idx[1], 0);
        }
    }

    #[test]
    fn duplicate_indexes_in_token_are_collapsed() {
        let exp = exp_with_weights(&[1.0, 1.0, 1.0], 2);
        let r = resolve(&exp, Some("e1.1-1"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes[0], 1);
        assert_ne!(r.assignment.variant_indexes[1], 1);
        assert!(r.changed);
    }

    #[test]
    fn surplus_indexes_are_truncated_to_sections() {
        let exp = exp_with_weights(&[1.0, 1.0, 1.0], 1);
        let r = resolve(&exp, Some("e1.2-0"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes, vec![2]);
        assert_eq!(r.token, "e1.2");
        assert!(r.changed);
        assert_eq!(r.sampled, 0);
    }

    #[test]
    fn token_order_is_preserved_and_unchanged() {
        let exp = exp_with_weights(&[1.0, 1.0, 1.0], 2);
        let r = resolve(&exp, Some("e1.2-0"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes, vec![2, 0]);
        assert!(!r.changed);
    }

    #[test]
    fn token_from_other_experiment_id_is_reused_but_marked_changed() {
        let exp = exp_with_weights(&[1.0, 1.0], 1);
        let r = resolve(&exp, Some("old.1"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes, vec![1]);
        assert_eq!(r.token, "e1.1");
        assert!(r.changed);
    }

    #[test]
    fn malformed_token_is_treated_as_absent() {
        let exp = exp_with_weights(&[1.0, 1.0], 1);
        let r = resolve(&exp, Some("garbage"), &mut rng()).unwrap();
        assert_eq!(r.assignment.variant_indexes.len(), 1);
        assert!(r.changed);
        assert_eq!(r.sampled, 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let exp = exp_with_weights(&[2.0, 1.0, 1.0, 4.0], 3);
        let mut rng = rng();
        for _ in 0..100 {
            let first = resolve(&exp, None, &mut rng).unwrap();
            let second = resolve(&exp, Some(&first.token), &mut rng).unwrap();
            assert!(!second.changed);
            assert_eq!(second.sampled, 0);
            assert_eq!(
                first.assignment.variant_indexes,
                second.assignment.variant_indexes
            );
        }
    }

    #[test]
    fn derived_views_follow_index_order() {
        let mut exp = exp_with_weights(&[1.0, 1.0, 1.0], 2);
        for (i, v) in exp.variants.iter_mut().enumerate() {
            v.payload.insert("label".to_string(), serde_json::json!(i));
        }
        let r = resolve(&exp, Some("e1.2-0"), &mut rng()).unwrap();
        assert_eq!(r.assignment.active_variants[0].payload["label"], 2);
        assert_eq!(r.assignment.active_variants[1].payload["label"], 0);
        assert_eq!(r.assignment.classes, vec!["exp-hero-2", "exp-hero-0"]);
    }

    #[test]
    fn resolve_does_not_mutate_experiment_weights() {
        let exp = exp_with_weights(&[1.0, 3.0], 2);
        resolve(&exp, None, &mut rng()).unwrap();
        assert_eq!(exp.variants[0].weight, Some(1.0));
        assert_eq!(exp.variants[1].weight, Some(3.0));
    }

    #[test]
    fn sections_exceeding_variants_is_a_config_error() {
        let exp = exp_with_weights(&[1.0, 1.0], 3);
        assert!(matches!(
            resolve(&exp, None, &mut rng()),
            Err(ExperimentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_variant_list_is_a_config_error() {
        let exp = exp_with_weights(&[], 1);
        assert!(resolve(&exp, None, &mut rng()).is_err());
    }

    #[test]
    fn overflowing_weight_sum_never_repeats_an_index() {
        let exp = exp_with_weights(&[1e308, 1e308, 1e308], 2);
        let mut rng = rng();
        for _ in 0..1_000 {
            let r = resolve(&exp, Some("e1.0"), &mut rng).unwrap();
            let idx = &r.assignment.variant_indexes;
            assert_eq!(idx[0], 0);
            assert_ne!(idx[0], idx[1]);
            assert!(idx[1] < 3);
        }
    }

    #[test]
    fn overflowing_weights_still_cover_every_open_index() {
        let exp = exp_with_weights(&[f64::MAX, f64::MAX, f64::MAX], 3);
        let mut rng = rng();
        for _ in 0..200 {
            let mut idx = resolve(&exp, None, &mut rng).unwrap().assignment.variant_indexes;
            idx.sort_unstable();
            assert_eq!(idx, vec![0, 1, 2]);
        }
    }
}
