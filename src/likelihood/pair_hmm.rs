use rust_htslib::bam::record::Cigar;

use super::indel_model::IndelErrorModel;
use crate::haplotype::Haplotype;
use crate::prob_utils::phred_to_ln_error_prob;
use crate::read::AlignedRead;
use crate::reference::bases_match;

/// Log probability of an unexplained base hanging over the haplotype edge, per base
///
/// The overhang is scored against a uniform random base model.
const FLANK_BASE_LN_PROB: f64 = -1.3862943611198906; // ln(0.25)

/// Error probability ceiling, ln(3/4)
///
/// A fully masked base (quality zero) hits this ceiling, where match and mismatch emissions
/// coincide at ln(1/4) and the base carries no information.
const LN_MAX_ERROR_PROB: f64 = -0.2876820724517809;

#[derive(Clone)]
pub struct PairHmmSettings {
    /// Half-width of the alignment band around the mapped diagonal
    pub band: usize,
    /// When set, read bases outside the haplotype contribute nothing to the score
    pub disable_inactive_flank_scoring: bool,
}

impl Default for PairHmmSettings {
    fn default() -> Self {
        Self {
            band: 32,
            disable_inactive_flank_scoring: false,
        }
    }
}

/// Banded pair-HMM computing ln P(read | haplotype)
///
/// Substitution penalties come from per-base qualities; gap-open penalties are position
/// dependent through the repeat-context indel error model, with a constant gap extension.
/// The score is the best alignment path in log space and is always <= 0.
///
pub struct PairHmm {
    settings: PairHmmSettings,
}

struct HaplotypeProfile {
    gap_open_ln: Vec<f64>,
    gap_extend_ln: f64,
}

impl HaplotypeProfile {
    fn new(haplotype: &Haplotype) -> Self {
        let gap_open_ln = IndelErrorModel::gap_open_penalties(haplotype.seq())
            .into_iter()
            .map(|phred| phred_to_ln_error_prob(phred as f64))
            .collect();
        Self {
            gap_open_ln,
            gap_extend_ln: phred_to_ln_error_prob(IndelErrorModel::extension_penalty() as f64),
        }
    }
}

impl PairHmm {
    pub fn new(settings: PairHmmSettings) -> Self {
        Self { settings }
    }

    /// Score one read against one haplotype
    ///
    /// A read extending beyond the haplotype is scored on the overlapping span only, with a
    /// fixed per-base penalty for the overhanging flanks.
    ///
    pub fn ln_probability(&self, read: &AlignedRead, haplotype: &Haplotype) -> f64 {
        let (clip_front, clip_back) = read_overhang(read, haplotype);
        let read_begin = clip_front;
        let read_end = read.read_len() - std::cmp::min(clip_back, read.read_len());
        if read_begin >= read_end {
            // No overlap at all; the entire read is flank
            return self.flank_penalty(read.read_len());
        }

        let profile = HaplotypeProfile::new(haplotype);
        let core =
            self.align_core(read, read_begin, read_end, haplotype, &profile);
        core + self.flank_penalty(clip_front + std::cmp::min(clip_back, read.read_len()))
    }

    fn flank_penalty(&self, num_bases: usize) -> f64 {
        if self.settings.disable_inactive_flank_scoring {
            0.0
        } else {
            num_bases as f64 * FLANK_BASE_LN_PROB
        }
    }

    /// Banded Viterbi over the clipped read span against the full haplotype sequence
    ///
    fn align_core(
        &self,
        read: &AlignedRead,
        read_begin: usize,
        read_end: usize,
        haplotype: &Haplotype,
        profile: &HaplotypeProfile,
    ) -> f64 {
        let read_seq = &read.seq[read_begin..read_end];
        let read_quals = &read.quals[read_begin..read_end];
        let hap_seq = haplotype.seq();
        let n = read_seq.len();
        let m = hap_seq.len();
        let band = self.settings.band as i64;

        // Expected haplotype column of the first scored read base
        let diagonal = read.pos + read_begin as i64 - haplotype.region.range.start;

        let emit = |i: usize, j: usize| -> f64 {
            let ln_error =
                phred_to_ln_error_prob(read_quals[i] as f64).min(LN_MAX_ERROR_PROB);
            if bases_match(read_seq[i], hap_seq[j]) {
                (-ln_error.exp()).ln_1p()
            } else {
                ln_error - 3f64.ln()
            }
        };

        let column_range = |i: usize| -> (usize, usize) {
            let center = diagonal + i as i64;
            let lo = std::cmp::max(center - band, 0) as usize;
            let hi = std::cmp::min(center + band + 1, m as i64) as usize;
            (lo, std::cmp::max(hi, lo))
        };

        const NEG_INF: f64 = f64::NEG_INFINITY;
        let mut match_prev = vec![NEG_INF; m];
        let mut ins_prev = vec![NEG_INF; m];
        let mut del_prev = vec![NEG_INF; m];

        let (lo, hi) = column_range(0);
        if lo >= hi {
            return self.flank_penalty(read_end - read_begin);
        }
        // Free start anywhere on the haplotype: the read is global, the haplotype local
        for j in lo..hi {
            match_prev[j] = emit(0, j);
        }

        for i in 1..n {
            let mut match_row = vec![NEG_INF; m];
            let mut ins_row = vec![NEG_INF; m];
            let mut del_row = vec![NEG_INF; m];
            let (lo, hi) = column_range(i);
            for j in lo..hi {
                // Read-insertion state: consumes a read base, stays on the same column
                ins_row[j] = f64::max(
                    match_prev[j] + profile.gap_open_ln[j],
                    ins_prev[j] + profile.gap_extend_ln,
                );
                if j > 0 {
                    let best_prev = match_prev[j - 1]
                        .max(ins_prev[j - 1])
                        .max(del_prev[j - 1]);
                    if best_prev != NEG_INF {
                        match_row[j] = best_prev + emit(i, j);
                    }
                    // Deletion state: consumes haplotype bases within the row
                    del_row[j] = f64::max(
                        match_row[j - 1] + profile.gap_open_ln[j - 1],
                        del_row[j - 1] + profile.gap_extend_ln,
                    );
                }
            }
            match_prev = match_row;
            ins_prev = ins_row;
            del_prev = del_row;
        }

        let best = match_prev
            .iter()
            .chain(ins_prev.iter())
            .cloned()
            .fold(NEG_INF, f64::max);
        best.min(0.0)
    }
}

/// Number of read bases hanging over each haplotype edge, located through the read's alignment
///
fn read_overhang(read: &AlignedRead, haplotype: &Haplotype) -> (usize, usize) {
    let hap_range = &haplotype.region.range;
    let front = read_index_at_ref_pos(read, hap_range.start).unwrap_or(0);
    let back = match read_index_at_ref_pos(read, hap_range.end) {
        Some(index) => read.read_len() - index,
        None => 0,
    };
    (front, back)
}

/// Read coordinate of the first base at or after a reference position, if inside the read
///
pub fn read_index_at_ref_pos(read: &AlignedRead, target: i64) -> Option<usize> {
    if target <= read.pos {
        return None;
    }
    let mut ref_pos = read.pos;
    let mut read_index = 0usize;
    for op in read.cigar.iter() {
        match op {
            Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
                if ref_pos + *len as i64 > target {
                    return Some(read_index + (target - ref_pos) as usize);
                }
                ref_pos += *len as i64;
                read_index += *len as usize;
            }
            Cigar::Ins(len) | Cigar::SoftClip(len) => {
                read_index += *len as usize;
            }
            Cigar::Del(len) | Cigar::RefSkip(len) | Cigar::Pad(len) => {
                if ref_pos + *len as i64 > target {
                    return Some(read_index);
                }
                ref_pos += *len as i64;
            }
            Cigar::HardClip(_) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_region::GenomeRegion;
    use crate::read::test_utils::make_test_read;

    fn make_haplotype(start: i64, seq: &[u8]) -> Haplotype {
        Haplotype::reference(
            GenomeRegion::new(0, start, start + seq.len() as i64),
            seq,
        )
    }

    #[test]
    fn test_perfect_match_scores_near_zero() {
        let hmm = PairHmm::new(PairHmmSettings::default());
        let haplotype = make_haplotype(100, b"ACGTACGTACGT");
        let read = make_test_read(0, 102, b"GTACGTAC", 30);
        let score = hmm.ln_probability(&read, &haplotype);
        assert!(score <= 0.0);
        assert!(score > -0.1);
    }

    #[test]
    fn test_mismatch_scores_lower() {
        let hmm = PairHmm::new(PairHmmSettings::default());
        let haplotype = make_haplotype(100, b"ACGTACGTACGT");
        let clean = make_test_read(0, 102, b"GTACGTAC", 30);
        let dirty = make_test_read(0, 102, b"GTACTTAC", 30);
        let clean_score = hmm.ln_probability(&clean, &haplotype);
        let dirty_score = hmm.ln_probability(&dirty, &haplotype);
        assert!(dirty_score < clean_score - 3.0);
    }

    #[test]
    fn test_matching_haplotype_preferred() {
        // A read carrying an SNV scores higher on the alt haplotype than the ref haplotype
        let hmm = PairHmm::new(PairHmmSettings::default());
        let ref_hap = make_haplotype(100, b"ACGTACGTACGT");
        let alt_hap = make_haplotype(100, b"ACGTTCGTACGT");
        let read = make_test_read(0, 100, b"ACGTTCGTACGT", 30);
        assert!(hmm.ln_probability(&read, &alt_hap) > hmm.ln_probability(&read, &ref_hap));
    }

    #[test]
    fn test_flank_policy() {
        let haplotype = make_haplotype(100, b"ACGTAC");
        // The read extends 4 bases beyond the haplotype on the right
        let read = make_test_read(0, 102, b"GTACGTAC", 30);

        let scored = PairHmm::new(PairHmmSettings::default());
        let unscored = PairHmm::new(PairHmmSettings {
            disable_inactive_flank_scoring: true,
            ..Default::default()
        });
        let with_flanks = scored.ln_probability(&read, &haplotype);
        let without_flanks = unscored.ln_probability(&read, &haplotype);
        approx::assert_ulps_eq!(
            with_flanks - without_flanks,
            4.0 * FLANK_BASE_LN_PROB,
            max_ulps = 4
        );
    }

    #[test]
    fn test_deletion_read_prefers_deletion_haplotype() {
        let hmm = PairHmm::new(PairHmmSettings::default());
        let ref_hap = make_haplotype(100, b"AAATTTAAAGGG");
        let del_hap = make_haplotype(100, b"AAAAAAGGG");
        let mut read = make_test_read(0, 100, b"AAAAAAGGG", 30);
        read.cigar = vec![
            Cigar::Match(3),
            Cigar::Del(3),
            Cigar::Match(6),
        ];
        assert!(hmm.ln_probability(&read, &del_hap) > hmm.ln_probability(&read, &ref_hap));
    }
}
