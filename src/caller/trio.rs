use std::collections::BTreeMap;

use log::debug;

use super::priors::{CoalescentPrior, DeNovoModel, PriorSettings};
use super::{sample_depth, GenotypeLikelihoods, RefCall, SampleCall, VariantCall};
use crate::genome_region::GenomeRegion;
use crate::genotype::{generate_all_genotypes, Genotype};
use crate::haplotype::HaplotypeArena;
use crate::likelihood::HaplotypeLikelihoodCache;
use crate::prob_utils::{error_prob_to_phred, ln_sum_exp, normalize_ln_distro};
use crate::read::SampleName;
use crate::read_pipeline::ReadMap;
use crate::variant::Variant;

#[derive(Clone)]
pub struct TrioCallerSettings {
    pub maternal_sample: SampleName,
    pub paternal_sample: SampleName,
    pub child_sample: SampleName,
    pub maternal_ploidy: usize,
    pub paternal_ploidy: usize,
    pub child_ploidy: usize,
    pub prior: PriorSettings,
    pub denovo_mutation_rate: f64,
    /// Bound on the joint genotype enumeration; beyond it each sample keeps only its top
    /// genotypes by marginal likelihood
    pub max_joint_genotypes: usize,
    pub min_variant_posterior: f64,
    pub min_denovo_posterior: f64,
    pub min_refcall_posterior: f64,
    pub refcalls: bool,
}

/// One enumerated joint genotype assignment (mother, father, child)
///
struct Triple {
    maternal: usize,
    paternal: usize,
    child: usize,
}

pub struct TrioLatents {
    pub likelihoods: GenotypeLikelihoods,
    /// Marginal genotype posteriors per sample, ordered mother, father, child
    pub marginal_posteriors: Vec<Vec<f64>>,
    pub haplotype_posteriors: Vec<f64>,
    triples: Vec<Triple>,
    triple_posteriors: Vec<f64>,
    map_triple_index: usize,
}

/// Mother-father-child joint caller with Mendelian transmission and a de novo mutation model
///
pub struct TrioCaller {
    pub settings: TrioCallerSettings,
}

impl TrioCaller {
    fn samples(&self) -> Vec<SampleName> {
        vec![
            self.settings.maternal_sample.clone(),
            self.settings.paternal_sample.clone(),
            self.settings.child_sample.clone(),
        ]
    }

    pub fn infer_latents(
        &self,
        region: &GenomeRegion,
        region_ref: &[u8],
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihood_cache: &mut HaplotypeLikelihoodCache,
    ) -> TrioLatents {
        // The shared genotype list covers every ploidy in play; per-sample enumeration selects
        // the subset with the right cardinality. Child genotypes draw on the union of parental
        // haplotypes, which intentionally keeps the model symmetric when parental ploidies
        // differ.
        let mut genotypes = Vec::new();
        let mut ploidies = vec![
            self.settings.maternal_ploidy,
            self.settings.paternal_ploidy,
            self.settings.child_ploidy,
        ];
        ploidies.sort_unstable();
        ploidies.dedup();
        for ploidy in ploidies {
            genotypes.extend(generate_all_genotypes(arena.len(), ploidy));
        }

        let samples = self.samples();
        let likelihoods = GenotypeLikelihoods::evaluate(
            genotypes,
            &samples,
            region,
            reads,
            arena,
            likelihood_cache,
        );
        let prior = CoalescentPrior::new(self.settings.prior.clone(), arena, region_ref);
        let denovo_model = DeNovoModel {
            mutation_rate: self.settings.denovo_mutation_rate,
        };

        let maternal_indices = self.select_genotype_indices(
            &likelihoods,
            0,
            self.settings.maternal_ploidy,
            &prior,
        );
        let paternal_indices = self.select_genotype_indices(
            &likelihoods,
            1,
            self.settings.paternal_ploidy,
            &prior,
        );
        let child_indices =
            self.select_genotype_indices(&likelihoods, 2, self.settings.child_ploidy, &prior);

        let mut triples = Vec::new();
        let mut triple_ln_posteriors = Vec::new();
        for &maternal in maternal_indices.iter() {
            let maternal_genotype = &likelihoods.genotypes[maternal];
            let ln_maternal = prior.ln_genotype_prior(maternal_genotype)
                + likelihoods.ln_likelihoods[0][maternal];
            for &paternal in paternal_indices.iter() {
                let paternal_genotype = &likelihoods.genotypes[paternal];
                let ln_paternal = prior.ln_genotype_prior(paternal_genotype)
                    + likelihoods.ln_likelihoods[1][paternal];
                for &child in child_indices.iter() {
                    let child_genotype = &likelihoods.genotypes[child];
                    let ln_transmission = ln_transmission_prob(
                        child_genotype,
                        maternal_genotype,
                        paternal_genotype,
                        &prior,
                        &denovo_model,
                    );
                    triples.push(Triple {
                        maternal,
                        paternal,
                        child,
                    });
                    triple_ln_posteriors.push(
                        ln_maternal
                            + ln_paternal
                            + ln_transmission
                            + likelihoods.ln_likelihoods[2][child],
                    );
                }
            }
        }

        let mut triple_posteriors = triple_ln_posteriors;
        let map_triple_index = normalize_ln_distro(&mut triple_posteriors).unwrap();

        // Per-sample marginals over the shared genotype list
        let mut marginal_posteriors = vec![vec![0f64; likelihoods.genotypes.len()]; 3];
        for (triple, &posterior) in triples.iter().zip(triple_posteriors.iter()) {
            marginal_posteriors[0][triple.maternal] += posterior;
            marginal_posteriors[1][triple.paternal] += posterior;
            marginal_posteriors[2][triple.child] += posterior;
        }

        let haplotype_posteriors = super::marginal_haplotype_posteriors(
            &likelihoods.genotypes,
            &marginal_posteriors,
            arena.len(),
        );

        TrioLatents {
            likelihoods,
            marginal_posteriors,
            haplotype_posteriors,
            triples,
            triple_posteriors,
            map_triple_index,
        }
    }

    /// Genotype indices of the right ploidy for one sample, pruned by marginal likelihood when
    /// the full joint enumeration would exceed the bound
    ///
    fn select_genotype_indices(
        &self,
        likelihoods: &GenotypeLikelihoods,
        sample_index: usize,
        ploidy: usize,
        prior: &CoalescentPrior,
    ) -> Vec<usize> {
        let mut indices = likelihoods
            .genotypes
            .iter()
            .enumerate()
            .filter(|(_, genotype)| genotype.ploidy() == ploidy)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        let per_sample_bound = (self.settings.max_joint_genotypes as f64)
            .cbrt()
            .ceil() as usize;
        if indices.len() > per_sample_bound {
            debug!(
                "Pruning sample {} genotype space {} -> {per_sample_bound}",
                likelihoods.samples[sample_index],
                indices.len()
            );
            indices.sort_by(|&a, &b| {
                let score_a =
                    likelihoods.ln_likelihoods[sample_index][a] + prior.ln_genotype_prior(&likelihoods.genotypes[a]);
                let score_b =
                    likelihoods.ln_likelihoods[sample_index][b] + prior.ln_genotype_prior(&likelihoods.genotypes[b]);
                score_b.total_cmp(&score_a)
            });
            indices.truncate(per_sample_bound);
        }
        indices
    }

    pub fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &TrioLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<VariantCall> {
        let samples = self.samples();
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();

            // Alt presence in any family member
            let prob_absent: f64 = latents
                .triples
                .iter()
                .zip(latents.triple_posteriors.iter())
                .filter(|(triple, _)| {
                    !triple_contains_allele(triple, &alt, latents, arena)
                })
                .map(|(_, posterior)| posterior)
                .sum();
            let posterior = error_prob_to_phred(prob_absent);
            if posterior < self.settings.min_variant_posterior {
                continue;
            }

            // De novo: in the child's genotype, absent from both parents'
            let prob_not_denovo: f64 = latents
                .triples
                .iter()
                .zip(latents.triple_posteriors.iter())
                .filter(|(triple, _)| !triple_is_denovo(triple, &alt, latents, arena))
                .map(|(_, posterior)| posterior)
                .sum();
            let denovo_posterior = error_prob_to_phred(prob_not_denovo);
            let is_denovo = denovo_posterior >= self.settings.min_denovo_posterior;

            let map_triple = self.select_viable_map_triple(candidates, latents, arena);
            let genotype_indices = [map_triple.maternal, map_triple.paternal, map_triple.child];
            if !triple_contains_allele(map_triple, &alt, latents, arena) {
                continue;
            }

            let ploidies = [
                self.settings.maternal_ploidy,
                self.settings.paternal_ploidy,
                self.settings.child_ploidy,
            ];
            let mut sample_calls = BTreeMap::new();
            for ((sample, &genotype_index), ploidy) in samples
                .iter()
                .zip(genotype_indices.iter())
                .zip(ploidies.iter())
            {
                let genotype = &latents.likelihoods.genotypes[genotype_index];
                let sample_slot = samples.iter().position(|s| s == sample).unwrap();
                sample_calls.insert(
                    sample.clone(),
                    SampleCall {
                        alt_count: genotype.count_allele(arena, &alt),
                        ploidy: *ploidy,
                        genotype_quality: error_prob_to_phred(
                            1.0 - latents.marginal_posteriors[sample_slot][genotype_index]
                                .min(1.0),
                        ),
                        depth: sample_depth(reads, sample, &candidate.region),
                    },
                );
            }

            calls.push(VariantCall {
                variant: candidate.clone(),
                posterior,
                sample_calls,
                somatic: None,
                denovo_posterior: if is_denovo {
                    Some(denovo_posterior)
                } else {
                    None
                },
            });
        }
        calls
    }

    /// The highest-posterior triple whose child alleles are all either inherited or credibly
    /// de novo
    ///
    /// When the unconstrained MAP triple implies an incredible de novo allele, the MAP is
    /// re-selected among viable triples; if none is viable the unconstrained MAP stands.
    ///
    fn select_viable_map_triple<'a>(
        &self,
        candidates: &[Variant],
        latents: &'a TrioLatents,
        arena: &HaplotypeArena,
    ) -> &'a Triple {
        let is_viable = |triple: &Triple| {
            candidates.iter().all(|candidate| {
                let alt = candidate.alt_allele();
                if !triple_is_denovo(triple, &alt, latents, arena) {
                    return true;
                }
                let prob_not_denovo: f64 = latents
                    .triples
                    .iter()
                    .zip(latents.triple_posteriors.iter())
                    .filter(|(t, _)| !triple_is_denovo(t, &alt, latents, arena))
                    .map(|(_, p)| p)
                    .sum();
                error_prob_to_phred(prob_not_denovo) >= self.settings.min_denovo_posterior
            })
        };

        let map_triple = &latents.triples[latents.map_triple_index];
        if is_viable(map_triple) {
            return map_triple;
        }
        latents
            .triples
            .iter()
            .zip(latents.triple_posteriors.iter())
            .filter(|(triple, _)| is_viable(triple))
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(triple, _)| triple)
            .unwrap_or(map_triple)
    }

    pub fn call_reference(
        &self,
        candidates: &[Variant],
        latents: &TrioLatents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<RefCall> {
        if !self.settings.refcalls {
            return Vec::new();
        }
        let samples = self.samples();
        let mut refcalls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();
            let prob_absent: f64 = latents
                .triples
                .iter()
                .zip(latents.triple_posteriors.iter())
                .filter(|(triple, _)| !triple_contains_allele(triple, &alt, latents, arena))
                .map(|(_, posterior)| posterior)
                .sum();
            let posterior = error_prob_to_phred(1.0 - prob_absent.min(1.0));
            if posterior < self.settings.min_refcall_posterior {
                continue;
            }
            let sample_depths = samples
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

fn triple_contains_allele(
    triple: &Triple,
    alt: &crate::allele::Allele,
    latents: &TrioLatents,
    arena: &HaplotypeArena,
) -> bool {
    [triple.maternal, triple.paternal, triple.child]
        .iter()
        .any(|&index| latents.likelihoods.genotypes[index].contains_allele(arena, alt))
}

fn triple_is_denovo(
    triple: &Triple,
    alt: &crate::allele::Allele,
    latents: &TrioLatents,
    arena: &HaplotypeArena,
) -> bool {
    let genotypes = &latents.likelihoods.genotypes;
    genotypes[triple.child].contains_allele(arena, alt)
        && !genotypes[triple.maternal].contains_allele(arena, alt)
        && !genotypes[triple.paternal].contains_allele(arena, alt)
}

/// ln P(child genotype | parental genotypes) under Mendelian transmission convolved with the de
/// novo model
///
/// A diploid child draws one haplotype from each parent; a haploid child draws one haplotype
/// from the union of both parents. Higher child ploidies fall back to independent draws from
/// the union.
///
fn ln_transmission_prob(
    child: &Genotype,
    maternal: &Genotype,
    paternal: &Genotype,
    prior: &CoalescentPrior,
    denovo_model: &DeNovoModel,
) -> f64 {
    let ln_single = |child_hap: usize, parent: &Genotype| -> f64 {
        let parts = parent
            .ids()
            .iter()
            .map(|&parent_hap| {
                denovo_model.ln_transmission_prob(prior.haplotype_distance(child_hap, parent_hap))
            })
            .collect::<Vec<_>>();
        ln_sum_exp(&parts) - (parent.ploidy() as f64).ln()
    };

    match child.ploidy() {
        2 => {
            let c1 = child.ids()[0];
            let c2 = child.ids()[1];
            let both_orders = [
                ln_single(c1, maternal) + ln_single(c2, paternal),
                ln_single(c2, maternal) + ln_single(c1, paternal),
            ];
            let ln_prob = ln_sum_exp(&both_orders);
            if c1 == c2 {
                ln_prob - 2f64.ln()
            } else {
                ln_prob
            }
        }
        _ => {
            // Union-of-parents draw for each child haplotype
            let union_parts = |child_hap: usize| {
                let parts = maternal
                    .ids()
                    .iter()
                    .chain(paternal.ids().iter())
                    .map(|&parent_hap| {
                        denovo_model
                            .ln_transmission_prob(prior.haplotype_distance(child_hap, parent_hap))
                    })
                    .collect::<Vec<_>>();
                ln_sum_exp(&parts) - ((maternal.ploidy() + paternal.ploidy()) as f64).ln()
            };
            child.ids().iter().map(|&id| union_parts(id)).sum()
        }
    }
}
