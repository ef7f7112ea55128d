use std::collections::BTreeMap;

use statrs::function::gamma::digamma;

use super::priors::{CoalescentPrior, PriorSettings};
use super::{
    marginal_haplotype_posteriors, sample_depth, GenotypeLikelihoods, RefCall, SampleCall,
    VariantCall,
};
use crate::genome_region::GenomeRegion;
use crate::genotype::generate_all_genotypes;
use crate::haplotype::HaplotypeArena;
use crate::likelihood::HaplotypeLikelihoodCache;
use crate::prob_utils::{error_prob_to_phred, get_complement_prob, normalize_ln_distro};
use crate::read::SampleName;
use crate::read_pipeline::ReadMap;
use crate::variant::Variant;

const MAX_VB_ITERATIONS: usize = 50;
const VB_TOLERANCE: f64 = 1e-4;

#[derive(Clone)]
pub struct PopulationCallerSettings {
    pub samples: Vec<SampleName>,
    pub ploidy: usize,
    pub prior: PriorSettings,
    /// When set, haplotype frequencies get a flat prior instead of the coalescent pseudo-counts
    pub uniform_population_prior: bool,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub refcalls: bool,
}

pub struct PopulationLatents {
    pub likelihoods: GenotypeLikelihoods,
    /// Per-sample genotype responsibilities, indexed [sample][genotype]
    pub posteriors: Vec<Vec<f64>>,
    pub map_genotype_indices: Vec<usize>,
    pub haplotype_posteriors: Vec<f64>,
}

/// Joint multi-sample caller with a variational Dirichlet model of population haplotype
/// frequencies
///
/// The exact joint over all samples is intractable, so per-sample genotype responsibilities and
/// haplotype pseudo-counts are updated alternately until the pseudo-counts stop moving.
///
pub struct PopulationCaller {
    pub settings: PopulationCallerSettings,
}

impl PopulationCaller {
    pub fn infer_latents(
        &self,
        region: &GenomeRegion,
        region_ref: &[u8],
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihood_cache: &mut HaplotypeLikelihoodCache,
    ) -> PopulationLatents {
        let genotypes = generate_all_genotypes(arena.len(), self.settings.ploidy);
        let likelihoods = GenotypeLikelihoods::evaluate(
            genotypes,
            &self.settings.samples,
            region,
            reads,
            arena,
            likelihood_cache,
        );
        let prior = CoalescentPrior::new(self.settings.prior.clone(), arena, region_ref);

        let num_samples = self.settings.samples.len();
        let num_haplotypes = arena.len();

        // Haplotype pseudo-count prior: flat, or seeded from the coalescent single-haplotype
        // weights
        let prior_pseudo_counts: Vec<f64> = if self.settings.uniform_population_prior {
            vec![1.0; num_haplotypes]
        } else {
            (0..num_haplotypes)
                .map(|id| {
                    let solo = crate::genotype::Genotype::new(vec![id]);
                    (prior.ln_genotype_prior(&solo).exp() * num_haplotypes as f64).max(0.01)
                })
                .collect()
        };

        let mut pseudo_counts = prior_pseudo_counts.clone();
        let mut posteriors = vec![vec![0.0; likelihoods.genotypes.len()]; num_samples];

        for _iteration in 0..MAX_VB_ITERATIONS {
            // E step: per-sample genotype responsibilities under the expected ln frequencies
            let alpha_total: f64 = pseudo_counts.iter().sum();
            let expected_ln_freq = pseudo_counts
                .iter()
                .map(|&alpha| digamma(alpha) - digamma(alpha_total))
                .collect::<Vec<_>>();

            for (sample_index, sample_posteriors) in posteriors.iter_mut().enumerate() {
                for (genotype_index, genotype) in likelihoods.genotypes.iter().enumerate() {
                    let ln_freq_weight: f64 = genotype
                        .ids()
                        .iter()
                        .map(|&id| expected_ln_freq[id])
                        .sum();
                    sample_posteriors[genotype_index] =
                        likelihoods.ln_likelihoods[sample_index][genotype_index] + ln_freq_weight;
                }
                normalize_ln_distro(sample_posteriors);
            }

            // M step: update pseudo-counts from the responsibilities
            let mut new_pseudo_counts = prior_pseudo_counts.clone();
            for sample_posteriors in posteriors.iter() {
                for (genotype, &responsibility) in
                    likelihoods.genotypes.iter().zip(sample_posteriors.iter())
                {
                    for &id in genotype.ids() {
                        new_pseudo_counts[id] += responsibility;
                    }
                }
            }

            let max_rel_change = pseudo_counts
                .iter()
                .zip(new_pseudo_counts.iter())
                .map(|(old, new)| ((new - old) / old.max(1e-10)).abs())
                .fold(0f64, f64::max);
            pseudo_counts = new_pseudo_counts;
            if max_rel_change < VB_TOLERANCE {
                break;
            }
        }

        let map_genotype_indices = posteriors
            .iter()
            .map(|sample_posteriors| {
                sample_posteriors
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map(|(index, _)| index)
                    .unwrap()
            })
            .collect();

        let haplotype_posteriors =
            marginal_haplotype_posteriors(&likelihoods.genotypes, &posteriors, num_haplotypes);

        PopulationLatents {
            likelihoods,
            posteriors,
            map_genotype_indices,
            haplotype_posteriors,
        }
    }

    pub fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &PopulationLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<VariantCall> {
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();

            // P(no sample carries the allele) under the per-sample marginals
            let mut prob_absent_everywhere = 1f64;
            for sample_posteriors in latents.posteriors.iter() {
                let absent: f64 = latents
                    .likelihoods
                    .genotypes
                    .iter()
                    .zip(sample_posteriors.iter())
                    .filter(|(genotype, _)| !genotype.contains_allele(arena, &alt))
                    .map(|(_, posterior)| posterior)
                    .sum();
                prob_absent_everywhere *= absent.min(1.0);
            }
            let posterior = error_prob_to_phred(prob_absent_everywhere);
            if posterior < self.settings.min_variant_posterior {
                continue;
            }

            let mut sample_calls = BTreeMap::new();
            let mut any_carrier = false;
            for (sample_index, sample) in self.settings.samples.iter().enumerate() {
                let map_index = latents.map_genotype_indices[sample_index];
                let map_genotype = &latents.likelihoods.genotypes[map_index];
                let alt_count = map_genotype.count_allele(arena, &alt);
                any_carrier = any_carrier || alt_count > 0;
                sample_calls.insert(
                    sample.clone(),
                    SampleCall {
                        alt_count,
                        ploidy: self.settings.ploidy,
                        genotype_quality: error_prob_to_phred(get_complement_prob(
                            &latents.posteriors[sample_index],
                            map_index,
                        )),
                        depth: sample_depth(reads, sample, &candidate.region),
                    },
                );
            }
            if !any_carrier {
                continue;
            }
            calls.push(VariantCall {
                variant: candidate.clone(),
                posterior,
                sample_calls,
                somatic: None,
                denovo_posterior: None,
            });
        }
        calls
    }

    pub fn call_reference(
        &self,
        candidates: &[Variant],
        latents: &PopulationLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<RefCall> {
        if !self.settings.refcalls {
            return Vec::new();
        }
        let mut refcalls = Vec::new();
        for candidate in candidates {
            let ref_allele = candidate.ref_allele();
            let mut prob_all_hom_ref = 1f64;
            for sample_posteriors in latents.posteriors.iter() {
                let hom_ref: f64 = latents
                    .likelihoods
                    .genotypes
                    .iter()
                    .zip(sample_posteriors.iter())
                    .filter(|(genotype, _)| {
                        genotype.count_allele(arena, &ref_allele) == genotype.ploidy()
                    })
                    .map(|(_, posterior)| posterior)
                    .sum();
                prob_all_hom_ref *= hom_ref.min(1.0);
            }
            let posterior = error_prob_to_phred(1.0 - prob_all_hom_ref);
            if posterior < self.settings.min_refcall_posterior {
                continue;
            }
            let sample_depths = self
                .settings
                .samples
                .iter()
                .map(|sample| (sample.clone(), sample_depth(reads, sample, &candidate.region)))
                .collect();
            refcalls.push(RefCall {
                region: candidate.region.clone(),
                ref_seq: candidate.ref_seq.clone(),
                posterior,
                sample_depths,
            });
        }
        refcalls
    }
}
