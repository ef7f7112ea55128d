use crate::read::AlignedRead;

/// In-place base quality masking applied between filtering and downsampling
///
/// All transforms only zero qualities, never raise them, so their combined effect is independent
/// of application order.
///
pub struct ReadTransformer {
    /// Extra bases masked on the aligned side of each soft-clip boundary
    pub soft_clip_boundary: usize,
    /// Number of bases masked from the 3' tail of every read; 0 disables
    pub mask_tail_length: usize,
    pub mask_adapters: bool,
    pub mask_overlapped_segment: bool,
}

impl Default for ReadTransformer {
    fn default() -> Self {
        Self {
            soft_clip_boundary: 2,
            mask_tail_length: 0,
            mask_adapters: true,
            mask_overlapped_segment: true,
        }
    }
}

impl ReadTransformer {
    pub fn apply(&self, read: &mut AlignedRead) {
        self.mask_soft_clipped(read);
        if self.mask_adapters {
            mask_adapters(read);
        }
        if self.mask_tail_length > 0 {
            mask_tail(read, self.mask_tail_length);
        }
        if self.mask_overlapped_segment {
            mask_overlapped_segment(read);
        }
    }

    /// Zero qualities of soft-clipped bases, extending into the aligned sequence by the
    /// configured boundary width on each clipped end
    ///
    fn mask_soft_clipped(&self, read: &mut AlignedRead) {
        let (front, back) = read.soft_clipped_sizes();
        if front > 0 {
            read.zero_front_qualities(front + self.soft_clip_boundary);
        }
        if back > 0 {
            read.zero_back_qualities(back + self.soft_clip_boundary);
        }
    }
}

/// Zero qualities of the adapter run-through segment of a chimeric read
///
/// When the template is shorter than the read, the difference at the far end of the read is
/// adapter sequence.
///
fn mask_adapters(read: &mut AlignedRead) {
    if read.is_chimeric() {
        let num_adapter_bases = read.read_len() - read.insert_size.unsigned_abs() as usize;
        if read.is_reverse {
            read.zero_front_qualities(num_adapter_bases);
        } else {
            read.zero_back_qualities(num_adapter_bases);
        }
    }
}

/// Zero a fixed number of 3' tail qualities
///
fn mask_tail(read: &mut AlignedRead, num_bases: usize) {
    if read.is_reverse {
        read.zero_front_qualities(num_bases);
    } else {
        read.zero_back_qualities(num_bases);
    }
}

/// Zero the mate-overlapping qualities of the forward read of a short template pair
///
/// Only the forward-mapped read is masked so the overlap is not double-masked on both reads of
/// the pair.
///
fn mask_overlapped_segment(read: &mut AlignedRead) {
    if read.is_paired && read.is_mate_mapped && read.is_mate_same_chrom && !read.is_reverse {
        let read_end = read.pos + read.ref_span();
        if read.mate_pos < read_end && read.mate_pos > read.pos {
            let overlapped_size = (read_end - read.mate_pos) as usize;
            read.zero_back_qualities(overlapped_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;
    use rust_htslib::bam::record::Cigar;

    #[test]
    fn test_soft_clip_boundary_masking() {
        let transformer = ReadTransformer {
            soft_clip_boundary: 1,
            mask_tail_length: 0,
            mask_adapters: false,
            mask_overlapped_segment: false,
        };
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.cigar = vec![Cigar::SoftClip(2), Cigar::Match(6)];
        transformer.apply(&mut read);
        assert_eq!(read.quals, vec![0, 0, 0, 30, 30, 30, 30, 30]);
    }

    #[test]
    fn test_adapter_masking_forward() {
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.insert_size = 6;
        mask_adapters(&mut read);
        assert_eq!(read.quals, vec![30, 30, 30, 30, 30, 30, 0, 0]);
    }

    #[test]
    fn test_overlap_masking_only_on_forward_read() {
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.mate_pos = 106;
        mask_overlapped_segment(&mut read);
        assert_eq!(read.quals, vec![30, 30, 30, 30, 30, 30, 0, 0]);

        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.mate_pos = 106;
        read.is_reverse = true;
        mask_overlapped_segment(&mut read);
        assert_eq!(read.quals, vec![30; 8]);
    }

    #[test]
    fn test_transforms_commute_on_quality() {
        // Applying the same transform set twice changes nothing further
        let transformer = ReadTransformer::default();
        let mut read = make_test_read(0, 100, b"ACGTACGT", 30);
        read.cigar = vec![Cigar::SoftClip(2), Cigar::Match(6)];
        transformer.apply(&mut read);
        let once = read.quals.clone();
        transformer.apply(&mut read);
        assert_eq!(read.quals, once);
    }
}
