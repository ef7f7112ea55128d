use std::collections::BTreeMap;

use statrs::distribution::{Beta, Continuous};

use super::priors::{CoalescentPrior, PriorSettings};
use super::{
    sample_depth, GenotypeLikelihoods, RefCall, SampleCall, SomaticAnnotation, VariantCall,
};
use crate::genome_region::GenomeRegion;
use crate::genotype::generate_all_genotypes;
use crate::haplotype::{HaplotypeArena, HaplotypeId};
use crate::likelihood::{overlapping_reads, HaplotypeLikelihoodCache};
use crate::prob_utils::{error_prob_to_phred, ln_sum_exp, normalize_ln_distro};
use crate::read::SampleName;
use crate::read_pipeline::ReadMap;
use crate::variant::Variant;

/// Somatic allele frequency grid resolution
const VAF_GRID_SIZE: usize = 20;

#[derive(Clone)]
pub struct CancerCallerSettings {
    pub samples: Vec<SampleName>,
    /// The designated normal sample; all others are treated as tumour
    pub normal: Option<SampleName>,
    pub ploidy: usize,
    pub prior: PriorSettings,
    pub somatic_mutation_rate: f64,
    pub min_somatic_frequency: f64,
    pub credible_mass: f64,
    pub min_variant_posterior: f64,
    pub min_somatic_posterior: f64,
    pub min_refcall_posterior: f64,
    pub refcalls: bool,
}

/// One latent configuration: a shared germline genotype, optionally joined by a somatic
/// haplotype carried at frequency theta by the tumour samples
///
struct Config {
    genotype_index: usize,
    somatic: Option<HaplotypeId>,
    /// Per tumour sample, the posterior over the frequency grid (normalized), only for somatic
    /// configs
    theta_posteriors: Vec<Vec<f64>>,
}

pub struct CancerLatents {
    pub likelihoods: GenotypeLikelihoods,
    /// Shared germline genotype posterior, repeated per sample for the phasing interface
    pub germline_posteriors: Vec<Vec<f64>>,
    pub haplotype_posteriors: Vec<f64>,
    configs: Vec<Config>,
    config_posteriors: Vec<f64>,
    map_config_index: usize,
    theta_grid: Vec<f64>,
    tumour_samples: Vec<SampleName>,
}

/// Tumour-normal caller: a shared germline genotype with per-tumour somatic haplotype mixture
///
pub struct CancerCaller {
    pub settings: CancerCallerSettings,
}

impl CancerCaller {
    fn tumour_samples(&self) -> Vec<SampleName> {
        self.settings
            .samples
            .iter()
            .filter(|sample| self.settings.normal.as_ref() != Some(sample))
            .cloned()
            .collect()
    }

    /// Log-space weights of the truncated Beta prior over the frequency grid
    ///
    /// The prior mean is somatic_mutation_rate x region_size, truncated to
    /// [min_somatic_frequency, 1]. Shape parameters are floored so the Beta stays well defined
    /// when the mean sits on the upper bound.
    ///
    fn theta_prior(&self, region_size: i64) -> (Vec<f64>, Vec<f64>) {
        let min_freq = self.settings.min_somatic_frequency;
        let mean = (self.settings.somatic_mutation_rate * region_size as f64)
            .clamp(min_freq, 1.0);
        let concentration = 2.0;
        let beta = Beta::new(
            (mean * concentration).max(1e-3),
            ((1.0 - mean) * concentration).max(1e-3),
        )
        .unwrap();

        let mut grid = Vec::with_capacity(VAF_GRID_SIZE);
        let mut ln_weights = Vec::with_capacity(VAF_GRID_SIZE);
        for i in 0..VAF_GRID_SIZE {
            let fraction = (i as f64 + 0.5) / VAF_GRID_SIZE as f64;
            // Log-spaced grid over [min_freq, 1]
            let theta = min_freq * (1.0 / min_freq).powf(fraction);
            grid.push(theta);
            ln_weights.push(beta.pdf(theta).max(f64::MIN_POSITIVE).ln() + theta.ln());
        }
        let norm = ln_sum_exp(&ln_weights);
        for w in ln_weights.iter_mut() {
            *w -= norm;
        }
        (grid, ln_weights)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn infer_latents(
        &self,
        region: &GenomeRegion,
        region_ref: &[u8],
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihood_cache: &mut HaplotypeLikelihoodCache,
    ) -> CancerLatents {
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
        let tumour_samples = self.tumour_samples();
        let (theta_grid, theta_ln_weights) = self.theta_prior(region.size());

        // Per tumour sample and read: ln P(read | h) for each haplotype, and ln P(read | g)
        // aggregated per genotype, to build the mixture likelihoods
        let ln_somatic_event_prior = (self.settings.somatic_mutation_rate * region.size() as f64)
            .min(0.5)
            .ln()
            - (arena.len() as f64).ln();
        let ln_no_somatic_prior =
            (1.0 - (self.settings.somatic_mutation_rate * region.size() as f64).min(0.5)).ln();

        let mut configs = Vec::new();
        let mut config_ln_posteriors = Vec::new();
        for (genotype_index, genotype) in likelihoods.genotypes.iter().enumerate() {
            let ln_prior = prior.ln_genotype_prior(genotype);

            // All-sample germline likelihood for this genotype
            let ln_lik_all: f64 = (0..self.settings.samples.len())
                .map(|sample_index| likelihoods.ln_likelihoods[sample_index][genotype_index])
                .sum();

            configs.push(Config {
                genotype_index,
                somatic: None,
                theta_posteriors: Vec::new(),
            });
            config_ln_posteriors.push(ln_prior + ln_no_somatic_prior + ln_lik_all);

            for somatic_id in arena.ids() {
                if genotype.contains(somatic_id) {
                    continue;
                }
                let mut ln_posterior = ln_prior + ln_somatic_event_prior;

                // Normal sample stays germline-only
                for (sample_index, sample) in self.settings.samples.iter().enumerate() {
                    if self.settings.normal.as_ref() == Some(sample) {
                        ln_posterior += likelihoods.ln_likelihoods[sample_index][genotype_index];
                    }
                }

                // Each tumour sample marginalises its own somatic frequency
                let mut theta_posteriors = Vec::with_capacity(tumour_samples.len());
                for sample in tumour_samples.iter() {
                    let sample_reads = reads
                        .get(sample)
                        .map(|all| overlapping_reads(all, region))
                        .unwrap_or_default();
                    let mut ln_theta_posterior = theta_ln_weights.clone();
                    for (k, &theta) in theta_grid.iter().enumerate() {
                        for read in sample_reads.iter() {
                            let ln_germline_parts = genotype
                                .ids()
                                .iter()
                                .map(|&id| likelihood_cache.ln_probability(read, id, arena))
                                .collect::<Vec<_>>();
                            let ln_germline = ln_sum_exp(&ln_germline_parts)
                                - (genotype.ploidy() as f64).ln();
                            let ln_somatic =
                                likelihood_cache.ln_probability(read, somatic_id, arena);
                            ln_theta_posterior[k] += ln_sum_exp(&[
                                (1.0 - theta).ln() + ln_germline,
                                theta.ln() + ln_somatic,
                            ]);
                        }
                    }
                    ln_posterior += ln_sum_exp(&ln_theta_posterior);
                    let mut theta_posterior = ln_theta_posterior;
                    normalize_ln_distro(&mut theta_posterior);
                    theta_posteriors.push(theta_posterior);
                }

                configs.push(Config {
                    genotype_index,
                    somatic: Some(somatic_id),
                    theta_posteriors,
                });
                config_ln_posteriors.push(ln_posterior);
            }
        }

        let mut config_posteriors = config_ln_posteriors;
        let map_config_index = normalize_ln_distro(&mut config_posteriors).unwrap();

        // Marginal germline genotype posterior, shared by all samples
        let mut germline_marginal = vec![0f64; likelihoods.genotypes.len()];
        for (config, &posterior) in configs.iter().zip(config_posteriors.iter()) {
            germline_marginal[config.genotype_index] += posterior;
        }
        let haplotype_posteriors = (0..arena.len())
            .map(|haplotype_id| {
                let absent: f64 = configs
                    .iter()
                    .zip(config_posteriors.iter())
                    .filter(|(config, _)| {
                        !likelihoods.genotypes[config.genotype_index].contains(haplotype_id)
                            && config.somatic != Some(haplotype_id)
                    })
                    .map(|(_, posterior)| posterior)
                    .sum();
                1.0 - absent.min(1.0)
            })
            .collect();

        let germline_posteriors = vec![germline_marginal; self.settings.samples.len()];

        CancerLatents {
            likelihoods,
            germline_posteriors,
            haplotype_posteriors,
            configs,
            config_posteriors,
            map_config_index,
            theta_grid,
            tumour_samples,
        }
    }

    pub fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &CancerLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<VariantCall> {
        let map_config = &latents.configs[latents.map_config_index];
        let map_genotype = &latents.likelihoods.genotypes[map_config.genotype_index];
        let germline_gq = error_prob_to_phred(
            1.0 - latents.germline_posteriors[0][map_config.genotype_index].min(1.0),
        );

        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();

            // Germline presence: the allele is on some germline haplotype
            let prob_absent_germline: f64 = latents
                .configs
                .iter()
                .zip(latents.config_posteriors.iter())
                .filter(|(config, _)| {
                    !latents.likelihoods.genotypes[config.genotype_index]
                        .contains_allele(arena, &alt)
                })
                .map(|(_, posterior)| posterior)
                .sum();
            let germline_posterior = error_prob_to_phred(prob_absent_germline);

            // Somatic: on the somatic haplotype and absent from the germline genotype
            let prob_not_somatic: f64 = latents
                .configs
                .iter()
                .zip(latents.config_posteriors.iter())
                .filter(|(config, _)| !config_is_somatic_for(config, &alt, latents, arena))
                .map(|(_, posterior)| posterior)
                .sum();
            let somatic_posterior = error_prob_to_phred(prob_not_somatic);

            let is_germline_call = germline_posterior >= self.settings.min_variant_posterior
                && map_genotype.contains_allele(arena, &alt);
            let is_somatic_call = somatic_posterior >= self.settings.min_somatic_posterior
                && config_is_somatic_for(map_config, &alt, latents, arena);

            if !is_germline_call && !is_somatic_call {
                continue;
            }

            // Tumour sample genotypes gain the somatic haplotype as an extra copy, so a somatic
            // call's alt allele is present in the tumour genotype and absent from the normal's
            let mut sample_calls = BTreeMap::new();
            for sample in self.settings.samples.iter() {
                let is_tumour = self.settings.normal.as_ref() != Some(sample);
                let germline_alt_count = map_genotype.count_allele(arena, &alt);
                let (alt_count, ploidy) = if is_somatic_call && is_tumour {
                    (germline_alt_count + 1, self.settings.ploidy + 1)
                } else {
                    (germline_alt_count, self.settings.ploidy)
                };
                sample_calls.insert(
                    sample.clone(),
                    SampleCall {
                        alt_count,
                        ploidy,
                        genotype_quality: germline_gq,
                        depth: sample_depth(reads, sample, &candidate.region),
                    },
                );
            }

            let somatic = if is_somatic_call {
                let mut vaf = BTreeMap::new();
                let mut vaf_credible = BTreeMap::new();
                for (tumour_index, sample) in latents.tumour_samples.iter().enumerate() {
                    let theta_posterior = &map_config.theta_posteriors[tumour_index];
                    let mean: f64 = latents
                        .theta_grid
                        .iter()
                        .zip(theta_posterior.iter())
                        .map(|(theta, p)| theta * p)
                        .sum();
                    vaf.insert(sample.clone(), mean);
                    vaf_credible.insert(
                        sample.clone(),
                        credible_interval(
                            &latents.theta_grid,
                            theta_posterior,
                            self.settings.credible_mass,
                        ),
                    );
                }
                Some(SomaticAnnotation {
                    posterior: somatic_posterior,
                    vaf,
                    vaf_credible,
                })
            } else {
                None
            };

            calls.push(VariantCall {
                variant: candidate.clone(),
                posterior: if is_germline_call {
                    germline_posterior
                } else {
                    somatic_posterior
                },
                sample_calls,
                somatic,
                denovo_posterior: None,
            });
        }
        calls
    }

    pub fn call_reference(
        &self,
        candidates: &[Variant],
        latents: &CancerLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<RefCall> {
        if !self.settings.refcalls {
            return Vec::new();
        }
        let mut refcalls = Vec::new();
        for candidate in candidates {
            let ref_allele = candidate.ref_allele();
            let prob_hom_ref: f64 = latents
                .configs
                .iter()
                .zip(latents.config_posteriors.iter())
                .filter(|(config, _)| {
                    let genotype = &latents.likelihoods.genotypes[config.genotype_index];
                    genotype.count_allele(arena, &ref_allele) == genotype.ploidy()
                        && config.somatic.is_none()
                })
                .map(|(_, posterior)| posterior)
                .sum();
            let posterior = error_prob_to_phred(1.0 - prob_hom_ref.min(1.0));
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

/// True when the config explains the allele as somatic: carried by the somatic haplotype and
/// absent from the germline genotype
///
fn config_is_somatic_for(
    config: &Config,
    alt: &crate::allele::Allele,
    latents: &CancerLatents,
    arena: &HaplotypeArena,
) -> bool {
    match config.somatic {
        Some(somatic_id) => {
            arena.get(somatic_id).carries(alt)
                && !latents.likelihoods.genotypes[config.genotype_index]
                    .contains_allele(arena, alt)
        }
        None => false,
    }
}

/// Central credible interval over a discrete frequency grid
///
fn credible_interval(grid: &[f64], posterior: &[f64], credible_mass: f64) -> (f64, f64) {
    let tail = (1.0 - credible_mass) / 2.0;
    let mut cumulative = 0f64;
    let mut lower = grid[0];
    let mut upper = grid[grid.len() - 1];
    let mut lower_set = false;
    for (theta, p) in grid.iter().zip(posterior.iter()) {
        let next = cumulative + p;
        if !lower_set && next > tail {
            lower = *theta;
            lower_set = true;
        }
        if next >= 1.0 - tail {
            upper = *theta;
            break;
        }
        cumulative = next;
    }
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credible_interval_concentrated() {
        let grid = vec![0.01, 0.05, 0.1, 0.2, 0.4];
        let posterior = vec![0.0, 0.001, 0.009, 0.98, 0.01];
        let (lower, upper) = credible_interval(&grid, &posterior, 0.95);
        assert_eq!(lower, 0.2);
        assert_eq!(upper, 0.2);
    }

    #[test]
    fn test_credible_interval_spread() {
        let grid = vec![0.1, 0.2, 0.3, 0.4];
        let posterior = vec![0.25, 0.25, 0.25, 0.25];
        let (lower, upper) = credible_interval(&grid, &posterior, 0.99);
        assert_eq!(lower, 0.1);
        assert_eq!(upper, 0.4);
    }
}
