mod assembler;
mod cigar_scanner;
mod vcf_source;

pub use self::assembler::{AssemblerSettings, LocalAssembler};
pub use self::cigar_scanner::{
    CigarScanner, CigarScannerSettings, InclusionPolicy, MisalignmentParameters,
};
pub use self::vcf_source::VcfCandidateSource;

use strum::EnumCount;

use crate::genome_region::GenomeRegion;
use crate::read::SampleName;
use crate::variant::{Variant, VariantClass};

/// The pluggable candidate sources, in merge priority order
///
#[derive(Clone, Copy, Debug, strum::EnumCount)]
pub enum CandidateSource {
    Cigar,
    Assembly,
    External,
}

/// Which sources proposed a candidate; carried through to VCF INFO output
///
#[derive(Clone, Copy, Default)]
pub struct SourceMask {
    flags: [bool; CandidateSource::COUNT],
}

impl SourceMask {
    pub fn set(&mut self, source: CandidateSource) {
        self.flags[source as usize] = true;
    }

    pub fn labels(&self) -> Vec<&'static [u8]> {
        const LABELS: [&[u8]; CandidateSource::COUNT] = [b"cigar", b"assembly", b"external"];
        let labels = self
            .flags
            .iter()
            .zip(LABELS.iter())
            .filter(|(&flag, _)| flag)
            .map(|(_, &label)| label)
            .collect::<Vec<_>>();
        if labels.is_empty() {
            vec![b"unknown"]
        } else {
            labels
        }
    }
}

/// Per-sample summary of the reads supporting one candidate variant
///
pub struct SampleObservation {
    pub sample: SampleName,
    pub depth: u32,
    pub forward_depth: u32,
    /// Summed base quality of the supporting segment of each supporting read
    pub observed_base_qualities: Vec<u32>,
    pub observed_mapping_qualities: Vec<u8>,
    pub forward_support: u32,
    /// Number of supporting reads where the variant lies at a read edge
    pub edge_support: u32,
}

impl SampleObservation {
    pub fn support(&self) -> u32 {
        self.observed_base_qualities.len() as u32
    }
}

/// All sample evidence collected for one candidate variant
///
pub struct VariantObservation {
    pub variant: Variant,
    pub total_depth: u32,
    pub sample_observations: Vec<SampleObservation>,
}

/// The candidate matching predicate used to group equivalent proposals before deduplication
///
/// SNVs and MNVs match only on exact equality. Insertions match when they sit at the same site
/// with the same length and the same placeholder-N count. Deletions match when their regions
/// overlap.
///
pub fn variants_match(lhs: &Variant, rhs: &Variant) -> bool {
    let lhs_class = lhs.classify();
    if lhs_class != rhs.classify() || matches!(lhs_class, VariantClass::Snv | VariantClass::Mnv) {
        return lhs == rhs;
    }
    if lhs_class == VariantClass::Insertion {
        let count_n = |seq: &[u8]| seq.iter().filter(|&&b| b == b'N').count();
        return lhs.region == rhs.region
            && lhs.alt_seq.len() == rhs.alt_seq.len()
            && count_n(&lhs.alt_seq) == count_n(&rhs.alt_seq);
    }
    lhs.region.intersect(&rhs.region)
}

/// Merge per-source candidate lists into the final deduplicated candidate set, in region order
///
pub fn merge_candidates(source_results: Vec<Vec<Variant>>, region: &GenomeRegion) -> Vec<Variant> {
    use itertools::Itertools;
    source_results
        .into_iter()
        .flatten()
        .filter(|v| region.contains(&v.region) || region.intersect(&v.region))
        .sorted()
        .dedup()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: i64, end: i64) -> GenomeRegion {
        GenomeRegion::new(0, start, end)
    }

    #[test]
    fn test_snv_match_is_exact() {
        let a = Variant::new(region(5, 6), b"A", b"G");
        let b = Variant::new(region(5, 6), b"A", b"G");
        let c = Variant::new(region(5, 6), b"A", b"T");
        assert!(variants_match(&a, &b));
        assert!(!variants_match(&a, &c));
    }

    #[test]
    fn test_insertion_match_by_length_and_n_count() {
        let a = Variant::new(region(5, 5), b"", b"ACT");
        let b = Variant::new(region(5, 5), b"", b"ANT");
        let c = Variant::new(region(5, 5), b"", b"AAN");
        assert!(!variants_match(&a, &b));
        assert!(variants_match(&b, &c));
        assert!(!variants_match(&a, &Variant::new(region(5, 5), b"", b"AC")));
    }

    #[test]
    fn test_deletion_match_by_overlap() {
        let a = Variant::new(region(5, 9), b"AAAA", b"");
        let b = Variant::new(region(7, 12), b"AAAAA", b"");
        let c = Variant::new(region(9, 12), b"AAA", b"");
        assert!(variants_match(&a, &b));
        assert!(!variants_match(&a, &c));
    }

    #[test]
    fn test_merge_dedup() {
        let r = region(0, 100);
        let v1 = Variant::new(region(5, 6), b"A", b"G");
        let v2 = Variant::new(region(9, 9), b"", b"T");
        let merged = merge_candidates(
            vec![vec![v1.clone(), v2.clone()], vec![v2.clone(), v1.clone()]],
            &r,
        );
        assert_eq!(merged, vec![v1, v2]);
    }
}
