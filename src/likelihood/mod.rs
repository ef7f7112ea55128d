mod indel_model;
mod pair_hmm;

use std::collections::HashMap;
use std::sync::Arc;

pub use self::indel_model::IndelErrorModel;
pub use self::pair_hmm::{read_index_at_ref_pos, PairHmm, PairHmmSettings};
use crate::haplotype::{HaplotypeArena, HaplotypeId};
use crate::read::AlignedRead;

/// Read-haplotype log likelihoods for one active sub-region
///
/// Scores are computed on demand and cached on (read id, haplotype id); the whole cache is
/// dropped at the sub-region boundary.
///
pub struct HaplotypeLikelihoodCache {
    hmm: PairHmm,
    cache: HashMap<(u64, HaplotypeId), f64>,
}

impl HaplotypeLikelihoodCache {
    pub fn new(settings: PairHmmSettings) -> Self {
        Self {
            hmm: PairHmm::new(settings),
            cache: HashMap::new(),
        }
    }

    /// ln P(read | haplotype), cached
    ///
    pub fn ln_probability(
        &mut self,
        read: &AlignedRead,
        haplotype_id: HaplotypeId,
        arena: &HaplotypeArena,
    ) -> f64 {
        let key = (read.id, haplotype_id);
        if let Some(&cached) = self.cache.get(&key) {
            return cached;
        }
        let score = self.hmm.ln_probability(read, arena.get(haplotype_id));
        self.cache.insert(key, score);
        score
    }

}

/// Select the reads of one sample overlapping a region
///
pub fn overlapping_reads<'a>(
    reads: &'a [Arc<AlignedRead>],
    region: &crate::genome_region::GenomeRegion,
) -> Vec<&'a Arc<AlignedRead>> {
    reads
        .iter()
        .filter(|read| read.region().intersect(region))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_region::GenomeRegion;
    use crate::haplotype::Haplotype;
    use crate::read::test_utils::make_test_read;

    #[test]
    fn test_cache_returns_stable_scores() {
        let mut arena = HaplotypeArena::default();
        let hap = Haplotype::reference(GenomeRegion::new(0, 100, 112), b"ACGTACGTACGT");
        let hap_id = arena.insert(hap);

        let mut cache = HaplotypeLikelihoodCache::new(PairHmmSettings::default());
        let mut read = make_test_read(0, 102, b"GTACGTAC", 30);
        read.id = 7;

        let first = cache.ln_probability(&read, hap_id, &arena);
        let second = cache.ln_probability(&read, hap_id, &arena);
        assert_eq!(first, second);
        assert!(first <= 0.0);
    }
}
