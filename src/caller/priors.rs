use crate::allele::Allele;
use crate::genotype::Genotype;
use crate::haplotype::{HaplotypeArena, HaplotypeId};

#[derive(Clone)]
pub struct PriorSettings {
    pub snp_heterozygosity: f64,
    pub indel_heterozygosity: f64,
}

impl Default for PriorSettings {
    fn default() -> Self {
        Self {
            snp_heterozygosity: 1e-3,
            indel_heterozygosity: 1e-4,
        }
    }
}

/// Coalescent-style germline genotype prior
///
/// Each distinct non-reference allele carried by a genotype contributes its mutation class
/// heterozygosity, scaled down by the allele's multiplicity in the genotype following the Ewens
/// frequency spectrum. Reference-only genotypes get the residual mass.
///
pub struct CoalescentPrior {
    settings: PriorSettings,
    /// Non-reference alleles carried by each haplotype in the arena
    variant_alleles: Vec<Vec<Allele>>,
}

impl CoalescentPrior {
    /// # Arguments
    ///
    /// * `region_ref` - reference sequence of the haplotype region, used to classify each
    ///   explicit allele as reference or variant
    ///
    pub fn new(settings: PriorSettings, arena: &HaplotypeArena, region_ref: &[u8]) -> Self {
        let mut variant_alleles = Vec::with_capacity(arena.len());
        for (_, haplotype) in arena.iter() {
            let region_start = haplotype.region.range.start;
            let alleles = haplotype
                .alleles
                .iter()
                .filter(|allele| {
                    let begin = (allele.region.range.start - region_start) as usize;
                    let end = (allele.region.range.end - region_start) as usize;
                    allele.seq != region_ref[begin..end]
                })
                .cloned()
                .collect();
            variant_alleles.push(alleles);
        }
        Self {
            settings,
            variant_alleles,
        }
    }

    fn heterozygosity(&self, allele: &Allele) -> f64 {
        if allele.region.size() == allele.seq.len() as i64 {
            self.settings.snp_heterozygosity
        } else {
            self.settings.indel_heterozygosity
        }
    }

    /// ln prior of a genotype over arena haplotypes
    ///
    pub fn ln_genotype_prior(&self, genotype: &Genotype) -> f64 {
        // Multiplicity of each distinct variant allele over the genotype's haplotypes
        let mut seen: Vec<(&Allele, usize)> = Vec::new();
        for &id in genotype.ids() {
            for allele in self.variant_alleles[id].iter() {
                match seen.iter_mut().find(|(a, _)| *a == allele) {
                    Some((_, count)) => *count += 1,
                    None => seen.push((allele, 1)),
                }
            }
        }
        seen.iter()
            .map(|(allele, multiplicity)| {
                (self.heterozygosity(allele) / *multiplicity as f64).ln()
            })
            .sum()
    }

    /// Number of variant alleles distinguishing two haplotypes
    ///
    pub fn haplotype_distance(&self, a: HaplotypeId, b: HaplotypeId) -> usize {
        let alleles_a = &self.variant_alleles[a];
        let alleles_b = &self.variant_alleles[b];
        let only_a = alleles_a
            .iter()
            .filter(|allele| !alleles_b.contains(allele))
            .count();
        let only_b = alleles_b
            .iter()
            .filter(|allele| !alleles_a.contains(allele))
            .count();
        only_a + only_b
    }
}

/// Single-generation de novo mutation model
///
/// The probability of a child haplotype given a transmitted parental haplotype decays
/// geometrically in the number of alleles separating them.
///
pub struct DeNovoModel {
    pub mutation_rate: f64,
}

impl Default for DeNovoModel {
    fn default() -> Self {
        Self {
            mutation_rate: 1e-7,
        }
    }
}

impl DeNovoModel {
    /// ln P(child haplotype | transmitted parental haplotype)
    ///
    pub fn ln_transmission_prob(&self, distance: usize) -> f64 {
        if distance == 0 {
            // Residual mass after all possible mutation outcomes
            (1.0 - self.mutation_rate).ln()
        } else {
            distance as f64 * self.mutation_rate.ln()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_region::GenomeRegion;
    use crate::haplotype::Haplotype;

    fn build_arena() -> HaplotypeArena {
        let region = GenomeRegion::new(0, 0, 8);
        let ref_seq = b"ACGTACGT";
        let mut arena = HaplotypeArena::default();
        // id 0: reference; id 1: SNV; id 2: deletion
        arena.insert(Haplotype::reference(region.clone(), ref_seq));
        arena.insert(Haplotype::new(
            region.clone(),
            vec![Allele::new(GenomeRegion::new(0, 3, 4), b"A")],
            ref_seq,
        ));
        arena.insert(Haplotype::new(
            region,
            vec![Allele::new(GenomeRegion::new(0, 3, 5), b"")],
            ref_seq,
        ));
        arena
    }

    #[test]
    fn test_reference_genotype_most_probable() {
        let arena = build_arena();
        let prior = CoalescentPrior::new(PriorSettings::default(), &arena, b"ACGTACGT");

        let hom_ref = prior.ln_genotype_prior(&Genotype::new(vec![0, 0]));
        let het_snv = prior.ln_genotype_prior(&Genotype::new(vec![0, 1]));
        let het_del = prior.ln_genotype_prior(&Genotype::new(vec![0, 2]));
        let hom_snv = prior.ln_genotype_prior(&Genotype::new(vec![1, 1]));

        assert!(hom_ref > het_snv);
        assert!(het_snv > het_del);
        assert!(het_snv > hom_snv);
    }

    #[test]
    fn test_haplotype_distance() {
        let arena = build_arena();
        let prior = CoalescentPrior::new(PriorSettings::default(), &arena, b"ACGTACGT");
        assert_eq!(prior.haplotype_distance(0, 0), 0);
        assert_eq!(prior.haplotype_distance(0, 1), 1);
        assert_eq!(prior.haplotype_distance(1, 2), 2);
    }

    #[test]
    fn test_denovo_transmission() {
        let model = DeNovoModel::default();
        assert!(model.ln_transmission_prob(0) > model.ln_transmission_prob(1));
        assert!(model.ln_transmission_prob(1) > model.ln_transmission_prob(2));
    }
}
