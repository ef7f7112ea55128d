use std::collections::BTreeMap;

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

#[derive(Clone)]
pub struct IndividualCallerSettings {
    pub sample: SampleName,
    pub ploidy: usize,
    pub prior: PriorSettings,
    /// Minimum phred posterior to call a variant
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub refcalls: bool,
}

pub struct IndividualLatents {
    pub likelihoods: GenotypeLikelihoods,
    /// Normalized genotype posteriors for the sample
    pub posteriors: Vec<f64>,
    pub map_genotype_index: usize,
    pub haplotype_posteriors: Vec<f64>,
}

/// Single-sample caller over all genotypes at a fixed ploidy
///
pub struct IndividualCaller {
    pub settings: IndividualCallerSettings,
}

impl IndividualCaller {
    pub fn infer_latents(
        &self,
        region: &GenomeRegion,
        region_ref: &[u8],
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihood_cache: &mut HaplotypeLikelihoodCache,
    ) -> IndividualLatents {
        let genotypes = generate_all_genotypes(arena.len(), self.settings.ploidy);
        let samples = vec![self.settings.sample.clone()];
        let likelihoods = GenotypeLikelihoods::evaluate(
            genotypes,
            &samples,
            region,
            reads,
            arena,
            likelihood_cache,
        );

        let prior = CoalescentPrior::new(self.settings.prior.clone(), arena, region_ref);

        let mut posteriors = likelihoods
            .genotypes
            .iter()
            .zip(likelihoods.ln_likelihoods[0].iter())
            .map(|(genotype, ln_lik)| prior.ln_genotype_prior(genotype) + ln_lik)
            .collect::<Vec<_>>();
        let map_genotype_index = normalize_ln_distro(&mut posteriors).unwrap();

        let haplotype_posteriors = marginal_haplotype_posteriors(
            &likelihoods.genotypes,
            std::slice::from_ref(&posteriors),
            arena.len(),
        );

        IndividualLatents {
            likelihoods,
            posteriors,
            map_genotype_index,
            haplotype_posteriors,
        }
    }

    pub fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &IndividualLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<VariantCall> {
        let map_genotype = &latents.likelihoods.genotypes[latents.map_genotype_index];
        let genotype_quality =
            error_prob_to_phred(get_complement_prob(&latents.posteriors, latents.map_genotype_index));

        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();

            // Alt allele posterior: 1 - sum of posteriors of genotypes not carrying the allele
            let prob_absent: f64 = latents
                .likelihoods
                .genotypes
                .iter()
                .zip(latents.posteriors.iter())
                .filter(|(genotype, _)| !genotype.contains_allele(arena, &alt))
                .map(|(_, posterior)| posterior)
                .sum();
            let posterior = error_prob_to_phred(prob_absent);
            if posterior < self.settings.min_variant_posterior {
                continue;
            }
            let alt_count = map_genotype.count_allele(arena, &alt);
            if alt_count == 0 {
                // The evidence favors the allele overall but the MAP genotype dropped it
                continue;
            }

            let mut sample_calls = BTreeMap::new();
            sample_calls.insert(
                self.settings.sample.clone(),
                SampleCall {
                    alt_count,
                    ploidy: self.settings.ploidy,
                    genotype_quality,
                    depth: sample_depth(reads, &self.settings.sample, &candidate.region),
                },
            );
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
        latents: &IndividualLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<RefCall> {
        if !self.settings.refcalls {
            return Vec::new();
        }
        let mut refcalls = Vec::new();
        for candidate in candidates {
            let ref_allele = candidate.ref_allele();

            // Posterior that the genotype is homozygous for the site reference allele
            let prob_hom_ref: f64 = latents
                .likelihoods
                .genotypes
                .iter()
                .zip(latents.posteriors.iter())
                .filter(|(genotype, _)| {
                    genotype.count_allele(arena, &ref_allele) == genotype.ploidy()
                })
                .map(|(_, posterior)| posterior)
                .sum();
            let posterior = error_prob_to_phred(1.0 - prob_hom_ref.min(1.0));
            if posterior < self.settings.min_refcall_posterior {
                continue;
            }
            let mut sample_depths = BTreeMap::new();
            sample_depths.insert(
                self.settings.sample.clone(),
                sample_depth(reads, &self.settings.sample, &candidate.region),
            );
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
