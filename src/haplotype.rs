use std::collections::HashMap;
use std::fmt;

use crate::allele::Allele;
use crate::genome_region::GenomeRegion;

/// Index of a haplotype within the arena of one active sub-region
pub type HaplotypeId = usize;

/// A sequence of non-overlapping alleles spanning a contiguous region, materialised into an
/// explicit nucleotide sequence
///
/// The allele list is sorted by region and includes an explicit allele (alt or reference) at
/// every candidate site of the active sub-region; gaps between alleles are implicitly filled
/// with reference sequence during materialisation.
///
#[derive(Clone)]
pub struct Haplotype {
    pub region: GenomeRegion,
    pub alleles: Vec<Allele>,
    seq: Vec<u8>,
}

impl Haplotype {
    /// Materialise a haplotype from its explicit alleles over the reference fill
    ///
    /// # Arguments
    ///
    /// * `region_ref_seq` - reference sequence for the full haplotype region
    ///
    pub fn new(region: GenomeRegion, alleles: Vec<Allele>, region_ref_seq: &[u8]) -> Self {
        assert_eq!(region.size(), region_ref_seq.len() as i64);
        let mut seq = Vec::with_capacity(region_ref_seq.len());
        let mut pos = region.range.start;
        for allele in alleles.iter() {
            assert_eq!(allele.region.chrom_index, region.chrom_index);
            assert!(
                allele.region.range.start >= pos,
                "Haplotype alleles overlap or are unsorted"
            );
            let gap_start = (pos - region.range.start) as usize;
            let gap_end = (allele.region.range.start - region.range.start) as usize;
            seq.extend_from_slice(&region_ref_seq[gap_start..gap_end]);
            seq.extend_from_slice(&allele.seq);
            pos = allele.region.range.end;
        }
        let tail_start = (pos - region.range.start) as usize;
        seq.extend_from_slice(&region_ref_seq[tail_start..]);
        Self {
            region,
            alleles,
            seq,
        }
    }

    /// Materialise the all-reference haplotype for a region
    ///
    pub fn reference(region: GenomeRegion, region_ref_seq: &[u8]) -> Self {
        Self::new(region, Vec::new(), region_ref_seq)
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    /// True if the haplotype carries this exact allele at this exact site
    ///
    /// Only explicit alleles are tested; every candidate site of the active sub-region is
    /// represented explicitly on each haplotype, so this is a complete carrier test for
    /// candidate alleles.
    ///
    pub fn contains(&self, allele: &Allele) -> bool {
        self.alleles
            .binary_search_by(|probe| {
                probe
                    .region
                    .cmp(&allele.region)
                    .then_with(|| probe.seq.cmp(&allele.seq))
            })
            .is_ok()
    }

    /// True if the haplotype carries the allele, explicitly or through its reference fill
    ///
    /// An allele landing in a gap between explicit alleles is carried iff it reads as reference
    /// there; an allele overlapping a different explicit allele is not carried.
    ///
    pub fn carries(&self, allele: &Allele) -> bool {
        if self.contains(allele) {
            return true;
        }
        if !self.region.contains(&allele.region) {
            return false;
        }
        let conflicted = self.alleles.iter().any(|explicit| {
            explicit.region == allele.region || explicit.region.intersect(&allele.region)
        });
        if conflicted {
            return false;
        }
        // Map the reference interval into haplotype coordinates through the length changes of
        // the preceding explicit alleles; the gap itself is pure reference fill.
        let mut delta: i64 = 0;
        for explicit in self.alleles.iter() {
            if explicit.region.range.end <= allele.region.range.start {
                delta += explicit.seq.len() as i64 - explicit.region.size();
            }
        }
        if allele.seq.len() as i64 != allele.region.size() {
            return false;
        }
        let begin = (allele.region.range.start - self.region.range.start + delta) as usize;
        let end = begin + allele.seq.len();
        end <= self.seq.len() && self.seq[begin..end] == allele.seq[..]
    }
}

/// Haplotype equality is defined by the materialised sequence over the haplotype region
///
impl PartialEq for Haplotype {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.seq == other.seq
    }
}

impl Eq for Haplotype {}

impl std::hash::Hash for Haplotype {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.region.hash(state);
        self.seq.hash(state);
    }
}

impl fmt::Debug for Haplotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Haplotype{{{:?} {} alleles, seq {}bp}}",
            self.region,
            self.alleles.len(),
            self.seq.len()
        )
    }
}

/// Arena of deduplicated haplotypes for one active sub-region
///
/// Genotypes refer to haplotypes through small integer ids, which keeps genotype equality and
/// hashing cheap while the genotype count grows polynomially in the haplotype count.
///
#[derive(Default)]
pub struct HaplotypeArena {
    haplotypes: Vec<Haplotype>,
    seq_index: HashMap<Vec<u8>, HaplotypeId>,
}

impl HaplotypeArena {
    pub fn insert(&mut self, haplotype: Haplotype) -> HaplotypeId {
        if let Some(&id) = self.seq_index.get(haplotype.seq()) {
            return id;
        }
        let id = self.haplotypes.len();
        self.seq_index.insert(haplotype.seq().to_vec(), id);
        self.haplotypes.push(haplotype);
        id
    }

    pub fn get(&self, id: HaplotypeId) -> &Haplotype {
        &self.haplotypes[id]
    }

    pub fn len(&self) -> usize {
        self.haplotypes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HaplotypeId, &Haplotype)> {
        self.haplotypes.iter().enumerate()
    }

    pub fn ids(&self) -> impl Iterator<Item = HaplotypeId> {
        0..self.haplotypes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_region::IntRange;

    fn region(start: i64, end: i64) -> GenomeRegion {
        GenomeRegion {
            chrom_index: 0,
            range: IntRange::from_pair(start, end),
        }
    }

    #[test]
    fn test_materialisation_with_gap_fill() {
        //                 0123456789
        let ref_seq = b"GATTACAGGT";
        let alleles = vec![
            Allele::new(region(2, 3), b"G"),
            Allele::new(region(5, 5), b"TT"),
            Allele::new(region(7, 9), b""),
        ];
        let hap = Haplotype::new(region(0, 10), alleles, ref_seq);
        assert_eq!(hap.seq(), b"GAGTATTCAT");
    }

    #[test]
    fn test_contains_explicit_allele() {
        let ref_seq = b"GATTACA";
        let snv = Allele::new(region(2, 3), b"G");
        let hap = Haplotype::new(region(0, 7), vec![snv.clone()], ref_seq);
        assert!(hap.contains(&snv));
        assert!(!hap.contains(&Allele::new(region(2, 3), b"T")));
    }

    #[test]
    fn test_arena_dedup_by_sequence() {
        let ref_seq = b"GATTACA";
        let mut arena = HaplotypeArena::default();

        // Two haplotypes with different allele decompositions but equal sequence share an id
        let h1 = Haplotype::new(
            region(0, 7),
            vec![Allele::new(region(2, 3), b"T")],
            ref_seq,
        );
        let h2 = Haplotype::reference(region(0, 7), ref_seq);
        let id1 = arena.insert(h1);
        let id2 = arena.insert(h2);
        assert_eq!(id1, id2);
        assert_eq!(arena.len(), 1);

        let h3 = Haplotype::new(
            region(0, 7),
            vec![Allele::new(region(2, 3), b"C")],
            ref_seq,
        );
        let id3 = arena.insert(h3);
        assert_ne!(id1, id3);
    }
}
