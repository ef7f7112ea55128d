mod cancer;
mod individual;
mod population;
mod priors;
mod trio;

use std::collections::BTreeMap;

pub use self::cancer::{CancerCaller, CancerCallerSettings};
pub use self::individual::{IndividualCaller, IndividualCallerSettings};
pub use self::population::{PopulationCaller, PopulationCallerSettings};
pub use self::priors::{CoalescentPrior, DeNovoModel, PriorSettings};
pub use self::trio::{TrioCaller, TrioCallerSettings};

use crate::genome_region::GenomeRegion;
use crate::genotype::Genotype;
use crate::haplotype::HaplotypeArena;
use crate::likelihood::{overlapping_reads, HaplotypeLikelihoodCache};
use crate::prob_utils::ln_sum_exp;
use crate::read::SampleName;
use crate::read_pipeline::ReadMap;
use crate::variant::Variant;

/// One sample's part of an emitted variant call
///
#[derive(Clone, Debug)]
pub struct SampleCall {
    /// Copies of the alt allele in the called genotype
    pub alt_count: usize,
    pub ploidy: usize,
    /// Genotype posterior, phred scaled
    pub genotype_quality: f64,
    pub depth: u32,
}

#[derive(Clone, Debug)]
pub struct SomaticAnnotation {
    pub posterior: f64,
    /// Posterior mean somatic allele frequency in each tumour sample
    pub vaf: BTreeMap<SampleName, f64>,
    /// Credible interval for the somatic allele frequency
    pub vaf_credible: BTreeMap<SampleName, (f64, f64)>,
}

/// A called variant with per-sample genotypes and posterior annotations
///
#[derive(Clone, Debug)]
pub struct VariantCall {
    pub variant: Variant,
    /// Alt allele posterior, phred scaled
    pub posterior: f64,
    pub sample_calls: BTreeMap<SampleName, SampleCall>,
    pub somatic: Option<SomaticAnnotation>,
    /// De novo posterior, phred scaled, for trio calls
    pub denovo_posterior: Option<f64>,
}

/// A reference (non-variant) call at a candidate site
///
#[derive(Clone, Debug)]
pub struct RefCall {
    pub region: GenomeRegion,
    pub ref_seq: Vec<u8>,
    /// Posterior that every sample is homozygous reference here, phred scaled
    pub posterior: f64,
    pub sample_depths: BTreeMap<SampleName, u32>,
}

/// Per-sample, per-genotype log likelihood table for one active sub-region
///
pub struct GenotypeLikelihoods {
    pub genotypes: Vec<Genotype>,
    pub samples: Vec<SampleName>,
    /// ln P(reads of sample s | genotype g), indexed [sample][genotype]
    pub ln_likelihoods: Vec<Vec<f64>>,
}

impl GenotypeLikelihoods {
    /// Evaluate every genotype against every sample's overlapping reads
    ///
    /// P(read | g) averages the per-haplotype likelihoods over the genotype multiset, so
    /// homozygous genotypes weight their single haplotype fully.
    ///
    pub fn evaluate(
        genotypes: Vec<Genotype>,
        samples: &[SampleName],
        region: &GenomeRegion,
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihoods: &mut HaplotypeLikelihoodCache,
    ) -> Self {
        let mut ln_likelihoods = Vec::with_capacity(samples.len());
        for sample in samples {
            let sample_reads = reads
                .get(sample)
                .map(|all| overlapping_reads(all, region))
                .unwrap_or_default();
            let mut sample_row = Vec::with_capacity(genotypes.len());
            for genotype in genotypes.iter() {
                let ln_ploidy = (genotype.ploidy() as f64).ln();
                let mut ln_lik = 0f64;
                for read in sample_reads.iter() {
                    let per_hap = genotype
                        .ids()
                        .iter()
                        .map(|&id| likelihoods.ln_probability(read, id, arena))
                        .collect::<Vec<_>>();
                    ln_lik += ln_sum_exp(&per_hap) - ln_ploidy;
                }
                sample_row.push(ln_lik);
            }
            ln_likelihoods.push(sample_row);
        }
        Self {
            genotypes,
            samples: samples.to_vec(),
            ln_likelihoods,
        }
    }
}

/// Marginal haplotype posteriors: 1 - P(haplotype in no sample's genotype)
///
/// Used both to prune the haplotype tree between generator rounds and to rank holdout
/// ambiguity.
///
pub fn marginal_haplotype_posteriors(
    genotypes: &[Genotype],
    sample_genotype_posteriors: &[Vec<f64>],
    num_haplotypes: usize,
) -> Vec<f64> {
    let mut result = Vec::with_capacity(num_haplotypes);
    for haplotype_id in 0..num_haplotypes {
        let mut prob_not_observed = 1f64;
        for sample_posteriors in sample_genotype_posteriors {
            let not_in_sample: f64 = genotypes
                .iter()
                .zip(sample_posteriors.iter())
                .filter(|(g, _)| !g.contains(haplotype_id))
                .map(|(_, p)| p)
                .sum();
            prob_not_observed *= not_in_sample.min(1.0);
        }
        result.push(1.0 - prob_not_observed);
    }
    result
}

/// The latent state of whichever model ran, as handed between pipeline stages
///
pub enum Latents {
    Individual(individual::IndividualLatents),
    Population(population::PopulationLatents),
    Cancer(cancer::CancerLatents),
    Trio(trio::TrioLatents),
}

impl Latents {
    /// Marginal per-haplotype posteriors for generator feedback
    ///
    pub fn haplotype_posteriors(&self) -> &[f64] {
        match self {
            Latents::Individual(x) => &x.haplotype_posteriors,
            Latents::Population(x) => &x.haplotype_posteriors,
            Latents::Cancer(x) => &x.haplotype_posteriors,
            Latents::Trio(x) => &x.haplotype_posteriors,
        }
    }
}

/// Tagged dispatch over the four calling models
///
pub enum VariantCaller {
    Individual(IndividualCaller),
    Population(PopulationCaller),
    Cancer(CancerCaller),
    Trio(TrioCaller),
}

impl VariantCaller {
    pub fn infer_latents(
        &self,
        region: &GenomeRegion,
        region_ref: &[u8],
        reads: &ReadMap,
        arena: &HaplotypeArena,
        likelihoods: &mut HaplotypeLikelihoodCache,
    ) -> Latents {
        match self {
            VariantCaller::Individual(caller) => Latents::Individual(caller.infer_latents(
                region,
                region_ref,
                reads,
                arena,
                likelihoods,
            )),
            VariantCaller::Population(caller) => Latents::Population(caller.infer_latents(
                region,
                region_ref,
                reads,
                arena,
                likelihoods,
            )),
            VariantCaller::Cancer(caller) => {
                Latents::Cancer(caller.infer_latents(region, region_ref, reads, arena, likelihoods))
            }
            VariantCaller::Trio(caller) => {
                Latents::Trio(caller.infer_latents(region, region_ref, reads, arena, likelihoods))
            }
        }
    }

    pub fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &Latents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<VariantCall> {
        match (self, latents) {
            (VariantCaller::Individual(caller), Latents::Individual(latents)) => {
                caller.call_variants(candidates, latents, arena, reads)
            }
            (VariantCaller::Population(caller), Latents::Population(latents)) => {
                caller.call_variants(candidates, latents, arena, reads)
            }
            (VariantCaller::Cancer(caller), Latents::Cancer(latents)) => {
                caller.call_variants(candidates, latents, arena, reads)
            }
            (VariantCaller::Trio(caller), Latents::Trio(latents)) => {
                caller.call_variants(candidates, latents, arena, reads)
            }
            _ => panic!("Latents passed to a different caller model than produced them"),
        }
    }

    pub fn call_reference(
        &self,
        candidates: &[Variant],
        latents: &Latents,
        arena: &HaplotypeArena,
        reads: &ReadMap,
    ) -> Vec<RefCall> {
        match (self, latents) {
            (VariantCaller::Individual(caller), Latents::Individual(latents)) => {
                caller.call_reference(candidates, latents, arena, reads)
            }
            (VariantCaller::Population(caller), Latents::Population(latents)) => {
                caller.call_reference(candidates, latents, arena, reads)
            }
            (VariantCaller::Cancer(caller), Latents::Cancer(latents)) => {
                caller.call_reference(candidates, latents, arena, reads)
            }
            (VariantCaller::Trio(caller), Latents::Trio(latents)) => {
                caller.call_reference(candidates, latents, arena, reads)
            }
            _ => panic!("Latents passed to a different caller model than produced them"),
        }
    }

    /// Per-sample genotype posteriors over the shared genotype list, for the phaser
    ///
    pub fn genotype_posteriors<'a>(
        &self,
        latents: &'a Latents,
    ) -> (&'a [Genotype], Vec<(&'a SampleName, &'a [f64])>) {
        match latents {
            Latents::Individual(x) => (
                &x.likelihoods.genotypes,
                vec![(&x.likelihoods.samples[0], x.posteriors.as_slice())],
            ),
            Latents::Population(x) => (
                &x.likelihoods.genotypes,
                x.likelihoods
                    .samples
                    .iter()
                    .zip(x.posteriors.iter().map(|p| p.as_slice()))
                    .collect(),
            ),
            Latents::Cancer(x) => (
                &x.likelihoods.genotypes,
                x.likelihoods
                    .samples
                    .iter()
                    .zip(x.germline_posteriors.iter().map(|p| p.as_slice()))
                    .collect(),
            ),
            Latents::Trio(x) => (
                &x.likelihoods.genotypes,
                x.likelihoods
                    .samples
                    .iter()
                    .zip(x.marginal_posteriors.iter().map(|p| p.as_slice()))
                    .collect(),
            ),
        }
    }
}

/// Number of one sample's reads overlapping a region
///
pub fn sample_depth(reads: &ReadMap, sample: &SampleName, region: &GenomeRegion) -> u32 {
    let sample_reads = match reads.get(sample) {
        Some(x) => x,
        None => return 0,
    };
    overlapping_reads(sample_reads, region).len() as u32
}
