use std::fmt;

use crate::genome_region::GenomeRegion;

/// A (region, sequence) pair
///
/// An insertion allele has an empty region and non-empty sequence; a deletion has a non-empty
/// region and an empty sequence. Equality is bitwise on both fields.
///
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Allele {
    pub region: GenomeRegion,
    pub seq: Vec<u8>,
}

impl Allele {
    pub fn new(region: GenomeRegion, seq: &[u8]) -> Self {
        Self {
            region,
            seq: seq.to_vec(),
        }
    }

    pub fn is_insertion(&self) -> bool {
        self.region.range.is_empty() && !self.seq.is_empty()
    }

    pub fn is_deletion(&self) -> bool {
        !self.region.range.is_empty() && self.seq.is_empty()
    }

    /// True if this allele's sequence equals the given reference slice for its region
    ///
    pub fn is_reference(&self, region_ref_seq: &[u8]) -> bool {
        self.region.size() == region_ref_seq.len() as i64 && self.seq == region_ref_seq
    }
}

impl fmt::Debug for Allele {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}:{}",
            self.region,
            std::str::from_utf8(&self.seq).unwrap_or("<non-utf8>")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allele_classification() {
        let ins = Allele::new(GenomeRegion::new(0, 5, 5), b"ACT");
        assert!(ins.is_insertion());
        assert!(!ins.is_deletion());

        let del = Allele::new(GenomeRegion::new(0, 5, 8), b"");
        assert!(del.is_deletion());
        assert!(!del.is_insertion());
    }

    #[test]
    fn test_is_reference() {
        let allele = Allele::new(GenomeRegion::new(0, 5, 8), b"ACT");
        assert!(allele.is_reference(b"ACT"));
        assert!(!allele.is_reference(b"ACG"));
    }
}
