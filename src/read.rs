use rust_htslib::bam;
use rust_htslib::bam::record::Cigar;

use crate::genome_region::{GenomeRegion, IntRange};

/// Sample identifier taken from the read group SM tag of an alignment file header
pub type SampleName = String;

/// An owned decode of one BAM alignment record
///
/// Reads are decoded out of the htslib record representation so that the transform stage can
/// mask base qualities in place. After transformation, reads are immutable and shared across
/// all downstream pipeline stages.
///
#[derive(Clone)]
pub struct AlignedRead {
    /// Sequential read id, unique within one calling window and used as a likelihood cache key
    pub id: u64,

    pub qname: Vec<u8>,
    pub chrom_index: usize,
    pub pos: i64,
    pub mapq: u8,
    pub cigar: Vec<Cigar>,
    pub seq: Vec<u8>,
    pub quals: Vec<u8>,

    pub is_reverse: bool,
    pub is_duplicate: bool,
    pub is_secondary: bool,
    pub is_supplementary: bool,
    pub is_qc_fail: bool,
    pub is_paired: bool,
    pub is_mate_mapped: bool,
    pub is_mate_reverse: bool,

    /// Mate alignment start position, meaningful only when is_mate_mapped is set
    pub mate_pos: i64,

    /// True when the mate maps to the same chromosome
    pub is_mate_same_chrom: bool,

    /// Observed template length from the alignment record
    pub insert_size: i64,
}

impl AlignedRead {
    pub fn from_bam_record(chrom_index: usize, record: &bam::Record) -> Self {
        Self {
            id: 0,
            qname: record.qname().to_vec(),
            chrom_index,
            pos: record.pos(),
            mapq: record.mapq(),
            cigar: record.cigar().iter().copied().collect(),
            seq: record.seq().as_bytes(),
            quals: record.qual().to_vec(),
            is_reverse: record.is_reverse(),
            is_duplicate: record.is_duplicate(),
            is_secondary: record.is_secondary(),
            is_supplementary: record.is_supplementary(),
            is_qc_fail: record.is_quality_check_failed(),
            is_paired: record.is_paired(),
            is_mate_mapped: record.is_paired() && !record.is_mate_unmapped(),
            is_mate_reverse: record.is_mate_reverse(),
            mate_pos: record.mpos(),
            is_mate_same_chrom: record.tid() == record.mtid(),
            insert_size: record.insert_size(),
        }
    }

    pub fn read_len(&self) -> usize {
        self.seq.len()
    }

    /// Length of the reference span consumed by the alignment
    ///
    pub fn ref_span(&self) -> i64 {
        self.cigar
            .iter()
            .map(|op| match op {
                Cigar::Match(len)
                | Cigar::Equal(len)
                | Cigar::Diff(len)
                | Cigar::Del(len)
                | Cigar::RefSkip(len) => *len as i64,
                _ => 0,
            })
            .sum()
    }

    pub fn region(&self) -> GenomeRegion {
        GenomeRegion {
            chrom_index: self.chrom_index,
            range: IntRange::from_pair(self.pos, self.pos + self.ref_span()),
        }
    }

    pub fn mean_base_quality(&self) -> f64 {
        if self.quals.is_empty() {
            return 0.0;
        }
        self.quals.iter().map(|&q| q as f64).sum::<f64>() / self.quals.len() as f64
    }

    /// Sizes of leading and trailing soft-clip segments in read coordinates
    ///
    pub fn soft_clipped_sizes(&self) -> (usize, usize) {
        let front = match self.cigar.first() {
            Some(Cigar::SoftClip(len)) => *len as usize,
            _ => 0,
        };
        let back = match self.cigar.last() {
            Some(Cigar::SoftClip(len)) => *len as usize,
            _ => 0,
        };
        (front, back)
    }

    /// True for a paired read whose template length is shorter than the read, indicating the
    /// alignment runs through the adapter on the far end
    ///
    pub fn is_chimeric(&self) -> bool {
        self.is_paired
            && self.is_mate_mapped
            && self.insert_size != 0
            && (self.insert_size.unsigned_abs() as usize) < self.read_len()
    }

    /// Well-formed cigar check: read-consuming op lengths must sum to the sequence length
    ///
    pub fn is_cigar_consistent(&self) -> bool {
        let read_consumed: usize = self
            .cigar
            .iter()
            .map(|op| match op {
                Cigar::Match(len)
                | Cigar::Equal(len)
                | Cigar::Diff(len)
                | Cigar::Ins(len)
                | Cigar::SoftClip(len) => *len as usize,
                _ => 0,
            })
            .sum();
        !self.cigar.is_empty() && read_consumed == self.read_len()
    }

    pub fn zero_front_qualities(&mut self, num_bases: usize) {
        let n = std::cmp::min(num_bases, self.quals.len());
        for q in self.quals.iter_mut().take(n) {
            *q = 0;
        }
    }

    pub fn zero_back_qualities(&mut self, num_bases: usize) {
        let len = self.quals.len();
        let n = std::cmp::min(num_bases, len);
        for q in self.quals.iter_mut().skip(len - n) {
            *q = 0;
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Build a simple fully-aligned test read
    ///
    pub fn make_test_read(chrom_index: usize, pos: i64, seq: &[u8], qual: u8) -> AlignedRead {
        AlignedRead {
            id: 0,
            qname: b"test_read".to_vec(),
            chrom_index,
            pos,
            mapq: 60,
            cigar: vec![Cigar::Match(seq.len() as u32)],
            seq: seq.to_vec(),
            quals: vec![qual; seq.len()],
            is_reverse: false,
            is_duplicate: false,
            is_secondary: false,
            is_supplementary: false,
            is_qc_fail: false,
            is_paired: true,
            is_mate_mapped: true,
            is_mate_reverse: true,
            mate_pos: pos,
            is_mate_same_chrom: true,
            insert_size: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::make_test_read;
    use super::*;

    #[test]
    fn test_ref_span_with_indels() {
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.cigar = vec![
            Cigar::SoftClip(2),
            Cigar::Match(3),
            Cigar::Del(4),
            Cigar::Ins(1),
            Cigar::Match(2),
        ];
        assert_eq!(read.ref_span(), 9);
        assert!(read.is_cigar_consistent());
        assert_eq!(read.region().range, IntRange::from_pair(100, 109));
    }

    #[test]
    fn test_quality_masking() {
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.zero_front_qualities(2);
        read.zero_back_qualities(3);
        assert_eq!(read.quals, vec![0, 0, 30, 30, 30, 0, 0, 0]);

        // Masking never extends past the read
        read.zero_back_qualities(100);
        assert_eq!(read.quals, vec![0; 8]);
    }

    #[test]
    fn test_chimeric_detection() {
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        assert!(!read.is_chimeric());
        read.insert_size = 5;
        assert!(read.is_chimeric());
    }
}
