use std::collections::BTreeMap;

use crate::caller::{Latents, VariantCall, VariantCaller};
use crate::genotype::Genotype;
use crate::haplotype::HaplotypeArena;
use crate::likelihood::read_index_at_ref_pos;
use crate::prob_utils::error_prob_to_phred;
use crate::read_pipeline::ReadMap;
use crate::variant::VariantClass;

/// Probability that a single spanning read misreports the phase of a site pair
const READ_PHASE_ERROR_RATE: f64 = 0.05;

#[derive(Clone)]
pub struct PhaserSettings {
    /// Minimum phred phase score for two calls to share a phase set
    pub min_phase_score: f64,
    /// Score co-occurrence directly instead of agreement with the MAP genotype's configuration
    pub use_unconditional_phase_score: bool,
    /// Use genotype posteriors only, ignoring spanning-read evidence
    pub disable_read_guided_phasing: bool,
}

impl Default for PhaserSettings {
    fn default() -> Self {
        Self {
            min_phase_score: 10.0,
            use_unconditional_phase_score: false,
            disable_read_guided_phasing: false,
        }
    }
}

pub struct Phaser {
    pub settings: PhaserSettings,
}

impl Phaser {
    /// Group the calls of one active sub-region into phase sets
    ///
    /// Returns, per call index, the index of the phase set representative (the first call of
    /// the set). Calls in singleton sets map to themselves and get no PS annotation.
    ///
    pub fn phase(
        &self,
        calls: &[VariantCall],
        caller: &VariantCaller,
        latents: &Latents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> BTreeMap<usize, usize> {
        let mut set_of = (0..calls.len()).collect::<Vec<_>>();

        for i in 0..calls.len() {
            for j in i + 1..calls.len() {
                let score = self.phase_score(&calls[i], &calls[j], caller, latents, arena, reads);
                if score >= self.settings.min_phase_score {
                    union(&mut set_of, i, j);
                }
            }
        }

        (0..calls.len())
            .map(|index| (index, find(&mut set_of, index)))
            .collect()
    }

    /// Phred-scaled confidence that two calls are phased correctly
    ///
    /// The genotype-posterior component marginalises the co-occurrence event over each sample's
    /// genotype distribution; spanning reads contribute their own phase votes unless read
    /// guidance is disabled. The pair score is the weakest sample's score.
    ///
    pub fn phase_score(
        &self,
        call1: &VariantCall,
        call2: &VariantCall,
        caller: &VariantCaller,
        latents: &Latents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> f64 {
        let alt1 = call1.variant.alt_allele();
        let alt2 = call2.variant.alt_allele();
        let (genotypes, sample_posteriors) = caller.genotype_posteriors(latents);

        let mut pair_score = f64::INFINITY;
        for (sample, posteriors) in sample_posteriors {
            let in_sample1 = call1
                .sample_calls
                .get(sample)
                .map(|c| c.alt_count > 0)
                .unwrap_or(false);
            let in_sample2 = call2
                .sample_calls
                .get(sample)
                .map(|c| c.alt_count > 0)
                .unwrap_or(false);
            if !in_sample1 || !in_sample2 {
                continue;
            }

            let cis = |genotype: &Genotype| {
                genotype.ids().iter().any(|&id| {
                    let haplotype = arena.get(id);
                    haplotype.carries(&alt1) && haplotype.carries(&alt2)
                })
            };

            let prob_correct_genotype = if self.settings.use_unconditional_phase_score {
                genotypes
                    .iter()
                    .zip(posteriors.iter())
                    .filter(|(genotype, _)| cis(genotype))
                    .map(|(_, p)| p)
                    .sum::<f64>()
            } else {
                let map_index = posteriors
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map(|(index, _)| index)
                    .unwrap();
                let map_config = cis(&genotypes[map_index]);
                genotypes
                    .iter()
                    .zip(posteriors.iter())
                    .filter(|(genotype, _)| cis(genotype) == map_config)
                    .map(|(_, p)| p)
                    .sum::<f64>()
            }
            .min(1.0);

            let sample_score = if self.settings.disable_read_guided_phasing {
                error_prob_to_phred(1.0 - prob_correct_genotype)
            } else {
                let (concordant, discordant) =
                    count_read_phase_votes(&call1.variant, &call2.variant, reads, sample);
                combine_with_read_votes(prob_correct_genotype, concordant, discordant)
            };
            pair_score = pair_score.min(sample_score);
        }

        if pair_score == f64::INFINITY {
            0.0
        } else {
            pair_score
        }
    }
}

fn find(set_of: &mut [usize], index: usize) -> usize {
    let mut root = index;
    while set_of[root] != root {
        root = set_of[root];
    }
    let mut walk = index;
    while set_of[walk] != root {
        let next = set_of[walk];
        set_of[walk] = root;
        walk = next;
    }
    root
}

fn union(set_of: &mut [usize], a: usize, b: usize) {
    let root_a = find(set_of, a);
    let root_b = find(set_of, b);
    // The smaller index becomes the representative so PS is the first call of the set
    let (keep, merge) = if root_a < root_b {
        (root_a, root_b)
    } else {
        (root_b, root_a)
    };
    set_of[merge] = keep;
}

/// Count spanning reads voting for (concordant) and against (discordant) the cis configuration
///
/// Only SNV pairs get read votes; an indel's exact read placement is ambiguous enough that the
/// genotype posterior alone is the safer evidence.
///
fn count_read_phase_votes(
    variant1: &crate::variant::Variant,
    variant2: &crate::variant::Variant,
    reads: &ReadMap,
    sample: &str,
) -> (u32, u32) {
    if variant1.classify() != VariantClass::Snv || variant2.classify() != VariantClass::Snv {
        return (0, 0);
    }
    let pos1 = variant1.region.range.start;
    let pos2 = variant2.region.range.start;
    let sample_reads = match reads.get(sample) {
        Some(x) => x,
        None => return (0, 0),
    };

    let mut concordant = 0;
    let mut discordant = 0;
    for read in sample_reads {
        let index1 = match read_index_at_ref_pos(read, pos1) {
            Some(x) => x,
            None => continue,
        };
        let index2 = match read_index_at_ref_pos(read, pos2) {
            Some(x) => x,
            None => continue,
        };
        if index1 >= read.read_len() || index2 >= read.read_len() {
            continue;
        }
        let is_alt1 = read.seq[index1] == variant1.alt_seq[0];
        let is_ref1 = read.seq[index1] == variant1.ref_seq[0];
        let is_alt2 = read.seq[index2] == variant2.alt_seq[0];
        let is_ref2 = read.seq[index2] == variant2.ref_seq[0];
        if (is_alt1 && is_alt2) || (is_ref1 && is_ref2) {
            concordant += 1;
        } else if (is_alt1 && is_ref2) || (is_ref1 && is_alt2) {
            discordant += 1;
        }
    }
    (concordant, discordant)
}

/// Combine the genotype-posterior phase probability with spanning-read votes in odds space
///
fn combine_with_read_votes(prob_correct: f64, concordant: u32, discordant: u32) -> f64 {
    let ln_odds_genotype = (prob_correct.min(1.0 - 1e-12).max(1e-12)).ln()
        - (1.0 - prob_correct.min(1.0 - 1e-12).max(1e-12)).ln();
    let ln_odds_reads = (concordant as f64 - discordant as f64)
        * ((1.0 - READ_PHASE_ERROR_RATE).ln() - READ_PHASE_ERROR_RATE.ln());
    let ln_odds = ln_odds_genotype + ln_odds_reads;
    // phred of 1 - sigmoid(ln_odds)
    let ln_prob_error = -crate::prob_utils::ln_add_exp(0.0, ln_odds);
    crate::prob_utils::ln_error_prob_to_phred(ln_prob_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_with_read_votes_monotonic() {
        let base = combine_with_read_votes(0.9, 0, 0);
        let supported = combine_with_read_votes(0.9, 10, 0);
        let contradicted = combine_with_read_votes(0.9, 0, 10);
        assert!(supported > base);
        assert!(contradicted < base);
    }

    #[test]
    fn test_union_find_transitivity() {
        let mut set_of = (0..4).collect::<Vec<_>>();
        union(&mut set_of, 0, 1);
        union(&mut set_of, 1, 2);
        assert_eq!(find(&mut set_of, 2), 0);
        assert_eq!(find(&mut set_of, 3), 3);
    }
}
