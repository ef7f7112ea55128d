use std::fmt;

use crate::allele::Allele;
use crate::genome_region::GenomeRegion;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VariantClass {
    Snv,
    Mnv,
    Insertion,
    Deletion,
    Complex,
}

/// An ordered (ref allele, alt allele) pair sharing one region
///
/// Variants are normalised (left-aligned, minimal representation) before they enter the calling
/// core, so bitwise equality is also representational equality.
///
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Variant {
    pub region: GenomeRegion,
    pub ref_seq: Vec<u8>,
    pub alt_seq: Vec<u8>,
}

impl Variant {
    pub fn new(region: GenomeRegion, ref_seq: &[u8], alt_seq: &[u8]) -> Self {
        assert_eq!(region.size(), ref_seq.len() as i64);
        Self {
            region,
            ref_seq: ref_seq.to_vec(),
            alt_seq: alt_seq.to_vec(),
        }
    }

    pub fn classify(&self) -> VariantClass {
        match (self.ref_seq.len(), self.alt_seq.len()) {
            (1, 1) => VariantClass::Snv,
            (r, a) if r == a => VariantClass::Mnv,
            (0, _) => VariantClass::Insertion,
            (_, 0) => VariantClass::Deletion,
            _ => VariantClass::Complex,
        }
    }

    pub fn is_snv(&self) -> bool {
        self.classify() == VariantClass::Snv
    }

    pub fn is_indel(&self) -> bool {
        matches!(
            self.classify(),
            VariantClass::Insertion | VariantClass::Deletion
        )
    }

    pub fn ref_allele(&self) -> Allele {
        Allele::new(self.region.clone(), &self.ref_seq)
    }

    pub fn alt_allele(&self) -> Allele {
        Allele::new(self.region.clone(), &self.alt_seq)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}:{}>{}",
            self.region,
            std::str::from_utf8(&self.ref_seq).unwrap_or("?"),
            std::str::from_utf8(&self.alt_seq).unwrap_or("?"),
        )
    }
}

/// Reduce a variant to its normalised form: shared prefix/suffix bases are trimmed away and pure
/// indels are shifted to their left-most equivalent position
///
/// # Arguments
///
/// * `ref_base_at` - reference base lookup for positions on the variant's chromosome, needed for
///   the left shift
///
pub fn normalize_variant<F: Fn(i64) -> u8>(mut variant: Variant, ref_base_at: F) -> Variant {
    // Trim the shared suffix
    while !variant.ref_seq.is_empty()
        && !variant.alt_seq.is_empty()
        && variant.ref_seq.last() == variant.alt_seq.last()
    {
        variant.ref_seq.pop();
        variant.alt_seq.pop();
        variant.region.range.end -= 1;
    }

    // Trim the shared prefix
    let mut shared_prefix = 0;
    while shared_prefix < variant.ref_seq.len()
        && shared_prefix < variant.alt_seq.len()
        && variant.ref_seq[shared_prefix] == variant.alt_seq[shared_prefix]
    {
        shared_prefix += 1;
    }
    if shared_prefix > 0 {
        variant.ref_seq.drain(..shared_prefix);
        variant.alt_seq.drain(..shared_prefix);
        variant.region.range.start += shared_prefix as i64;
    }

    // Left shift pure indels while the preceding reference base matches the indel's last base
    let is_pure_indel = variant.ref_seq.is_empty() != variant.alt_seq.is_empty();
    if is_pure_indel {
        while variant.region.range.start > 0 {
            let prev = ref_base_at(variant.region.range.start - 1);
            let indel_seq = if variant.ref_seq.is_empty() {
                &mut variant.alt_seq
            } else {
                &mut variant.ref_seq
            };
            if *indel_seq.last().unwrap() != prev {
                break;
            }
            indel_seq.pop();
            indel_seq.insert(0, prev);
            variant.region.range.start -= 1;
            variant.region.range.end -= 1;
        }
    }

    variant
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_seq() -> Vec<u8> {
        //         0123456789
        b"GATTTTAACG".to_vec()
    }

    fn base_at(pos: i64) -> u8 {
        ref_seq()[pos as usize]
    }

    #[test]
    fn test_classify() {
        let snv = Variant::new(GenomeRegion::new(0, 2, 3), b"T", b"A");
        assert_eq!(snv.classify(), VariantClass::Snv);

        let ins = Variant::new(GenomeRegion::new(0, 2, 2), b"", b"AA");
        assert_eq!(ins.classify(), VariantClass::Insertion);

        let del = Variant::new(GenomeRegion::new(0, 2, 4), b"TT", b"");
        assert_eq!(del.classify(), VariantClass::Deletion);
    }

    #[test]
    fn test_normalize_trims_shared_bases() {
        // GAT > GAC reduces to T>C at the last position
        let v = Variant::new(GenomeRegion::new(0, 0, 3), b"GAT", b"GAC");
        let n = normalize_variant(v, base_at);
        assert_eq!(n, Variant::new(GenomeRegion::new(0, 2, 3), b"T", b"C"));
    }

    #[test]
    fn test_normalize_left_shifts_deletion() {
        // Deleting one T from the homopolymer run at [2,6) in any position is equivalent;
        // the normalised form deletes the left-most T.
        let v = Variant::new(GenomeRegion::new(0, 5, 6), b"T", b"");
        let n = normalize_variant(v, base_at);
        assert_eq!(n, Variant::new(GenomeRegion::new(0, 2, 3), b"T", b""));
    }

    #[test]
    fn test_normalize_left_shifts_insertion() {
        let v = Variant::new(GenomeRegion::new(0, 6, 6), b"", b"T");
        let n = normalize_variant(v, base_at);
        assert_eq!(n, Variant::new(GenomeRegion::new(0, 2, 2), b"", b"T"));
    }

    #[test]
    fn test_normalize_at_contig_start() {
        // An indel shifted all the way to position 0 stops there
        let v = Variant::new(GenomeRegion::new(0, 0, 0), b"", b"G");
        let n = normalize_variant(v, base_at);
        assert_eq!(n.region.range.start, 0);
    }
}
