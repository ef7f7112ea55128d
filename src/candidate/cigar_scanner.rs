use std::collections::BTreeMap;

use log::debug;
use rust_htslib::bam::record::Cigar;
use statrs::distribution::{Beta, ContinuousCDF};

use super::{SampleObservation, VariantObservation};
use crate::genome_region::GenomeRegion;
use crate::prob_utils::ln_poisson_sf;
use crate::read::{AlignedRead, SampleName};
use crate::variant::{normalize_variant, Variant, VariantClass};

#[derive(Clone)]
pub struct MisalignmentParameters {
    pub snv_penalty: f64,
    /// Mismatches only count toward the penalty at or above this base quality
    pub snv_threshold: u8,
    pub indel_penalty: f64,
    pub clip_penalty: f64,
    pub max_unpenalised_clip_size: u32,
    pub max_expected_mutation_rate: f64,
    pub min_ln_prob_correctly_aligned: f64,
}

impl Default for MisalignmentParameters {
    fn default() -> Self {
        Self {
            snv_penalty: 1.0,
            snv_threshold: 20,
            indel_penalty: 1.0,
            clip_penalty: 1.0,
            max_unpenalised_clip_size: 2,
            max_expected_mutation_rate: 1e-3,
            min_ln_prob_correctly_aligned: -10.0,
        }
    }
}

/// Inclusion rule family applied to candidate observations
///
#[derive(Clone)]
pub enum InclusionPolicy {
    Germline,
    /// Tumour samples get the somatic support rules; the normal sample, when named, keeps the
    /// germline rules
    Somatic {
        normal: Option<SampleName>,
        min_expected_vaf: f64,
    },
}

#[derive(Clone)]
pub struct CigarScannerSettings {
    pub misalignment: MisalignmentParameters,
    pub inclusion: InclusionPolicy,
}

impl Default for CigarScannerSettings {
    fn default() -> Self {
        Self {
            misalignment: MisalignmentParameters::default(),
            inclusion: InclusionPolicy::Germline,
        }
    }
}

struct Candidate {
    variant: Variant,
    sample: SampleName,
    sum_base_quality: u32,
    mapping_quality: u8,
    is_forward: bool,
    is_edge: bool,
}

#[derive(Default)]
struct CoverageTracker {
    depth: Vec<u32>,
    forward_depth: Vec<u32>,
}

impl CoverageTracker {
    fn new(window_size: usize) -> Self {
        Self {
            depth: vec![0; window_size],
            forward_depth: vec![0; window_size],
        }
    }

    fn add(&mut self, begin: usize, end: usize, is_forward: bool) {
        let end = std::cmp::min(end, self.depth.len());
        for pos in begin..end {
            self.depth[pos] += 1;
            if is_forward {
                self.forward_depth[pos] += 1;
            }
        }
    }

    fn min_depth(&self, begin: usize, end: usize) -> (u32, u32) {
        let end = std::cmp::min(std::cmp::max(end, begin + 1), self.depth.len());
        let begin = std::cmp::min(begin, end - 1);
        let depth = self.depth[begin..end].iter().min().copied().unwrap_or(0);
        let forward = self.forward_depth[begin..end]
            .iter()
            .min()
            .copied()
            .unwrap_or(0);
        (depth, forward)
    }
}

/// Candidate variant generation from read CIGAR strings
///
/// Each read contributes an SNV per mismatch, an insertion per I op and a deletion per D op. A
/// per-read misalignment penalty accumulates over these events; reads whose probability of
/// correct alignment falls below threshold route their candidates to a likely-misaligned bucket
/// that is excluded from generation.
///
pub struct CigarScanner {
    settings: CigarScannerSettings,
    window: GenomeRegion,
    window_ref: Vec<u8>,
    combined_tracker: CoverageTracker,
    sample_trackers: BTreeMap<SampleName, CoverageTracker>,
    candidates: Vec<Candidate>,
    likely_misaligned_candidates: Vec<Candidate>,
}

impl CigarScanner {
    pub fn new(settings: CigarScannerSettings, window: GenomeRegion, window_ref: &[u8]) -> Self {
        assert_eq!(window.size(), window_ref.len() as i64);
        let window_size = window_ref.len();
        Self {
            settings,
            window,
            window_ref: window_ref.to_vec(),
            combined_tracker: CoverageTracker::new(window_size),
            sample_trackers: BTreeMap::new(),
            candidates: Vec::new(),
            likely_misaligned_candidates: Vec::new(),
        }
    }

    pub fn add_read(&mut self, sample: &str, read: &AlignedRead) {
        let mut buffer = Vec::new();
        let mut misalignment_penalty = 0f64;
        let params = &self.settings.misalignment;

        let mut ref_pos = read.pos;
        let mut read_index = 0usize;
        for op in read.cigar.iter() {
            match op {
                Cigar::Match(len) | Cigar::Diff(len) => {
                    misalignment_penalty += self.scan_match_range(
                        sample,
                        read,
                        ref_pos,
                        read_index,
                        *len as usize,
                        &mut buffer,
                    );
                    ref_pos += *len as i64;
                    read_index += *len as usize;
                }
                Cigar::Equal(len) => {
                    ref_pos += *len as i64;
                    read_index += *len as usize;
                }
                Cigar::Ins(len) => {
                    let region = GenomeRegion::new(read.chrom_index, ref_pos, ref_pos);
                    let alt = &read.seq[read_index..read_index + *len as usize];
                    self.push_candidate(region, b"", alt, sample, read, read_index, &mut buffer);
                    read_index += *len as usize;
                    misalignment_penalty += params.indel_penalty;
                }
                Cigar::Del(len) => {
                    let region =
                        GenomeRegion::new(read.chrom_index, ref_pos, ref_pos + *len as i64);
                    if let Some(ref_seq) = self.window_slice(&region) {
                        let ref_seq = ref_seq.to_vec();
                        self.push_candidate(
                            region,
                            &ref_seq,
                            b"",
                            sample,
                            read,
                            read_index,
                            &mut buffer,
                        );
                    }
                    ref_pos += *len as i64;
                    misalignment_penalty += params.indel_penalty;
                }
                Cigar::SoftClip(len) => {
                    read_index += *len as usize;
                    if *len > params.max_unpenalised_clip_size {
                        misalignment_penalty += params.clip_penalty;
                    }
                }
                Cigar::HardClip(len) => {
                    if *len > params.max_unpenalised_clip_size {
                        misalignment_penalty += params.clip_penalty;
                    }
                }
                Cigar::RefSkip(len) | Cigar::Pad(len) => {
                    ref_pos += *len as i64;
                }
            }
        }

        // Track coverage over the clipped alignment span
        let span_begin = self.window_offset(read.pos);
        let span_end = self.window_offset(read.pos + read.ref_span());
        self.combined_tracker
            .add(span_begin, span_end, !read.is_reverse);
        self.sample_trackers
            .entry(sample.to_string())
            .or_insert_with(|| CoverageTracker::new(self.window_ref.len()))
            .add(span_begin, span_end, !read.is_reverse);

        if self.is_likely_misaligned(read, misalignment_penalty) {
            self.likely_misaligned_candidates.append(&mut buffer);
        } else {
            self.candidates.append(&mut buffer);
        }
    }

    /// Scan an alignment-match range for SNVs, returning the accumulated misalignment penalty
    ///
    fn scan_match_range(
        &self,
        sample: &str,
        read: &AlignedRead,
        ref_pos: i64,
        read_index: usize,
        len: usize,
        buffer: &mut Vec<Candidate>,
    ) -> f64 {
        let params = &self.settings.misalignment;
        let mut penalty = 0f64;
        for offset in 0..len {
            let pos = ref_pos + offset as i64;
            if !self.window.range.intersect_pos(pos) {
                continue;
            }
            let ref_base = self.window_ref[(pos - self.window.range.start) as usize];
            let read_base = read.seq[read_index + offset];
            if ref_base != read_base && ref_base != b'N' && read_base != b'N' {
                let region = GenomeRegion::new(read.chrom_index, pos, pos + 1);
                buffer.push(self.make_candidate(
                    region,
                    &[ref_base],
                    &[read_base],
                    sample,
                    read,
                    read_index + offset,
                ));
                if read.quals[read_index + offset] >= params.snv_threshold {
                    penalty += params.snv_penalty;
                }
            }
        }
        penalty
    }

    #[allow(clippy::too_many_arguments)]
    fn push_candidate(
        &self,
        region: GenomeRegion,
        ref_seq: &[u8],
        alt_seq: &[u8],
        sample: &str,
        read: &AlignedRead,
        read_index: usize,
        buffer: &mut Vec<Candidate>,
    ) {
        if !self.window.contains(&region) && !self.window.intersect(&region) {
            return;
        }
        buffer.push(self.make_candidate(region, ref_seq, alt_seq, sample, read, read_index));
    }

    fn make_candidate(
        &self,
        region: GenomeRegion,
        ref_seq: &[u8],
        alt_seq: &[u8],
        sample: &str,
        read: &AlignedRead,
        read_index: usize,
    ) -> Candidate {
        let raw = Variant::new(region, ref_seq, alt_seq);
        let window_start = self.window.range.start;
        let window_ref = &self.window_ref;
        let variant = normalize_variant(raw, |pos| {
            if pos < window_start || pos >= window_start + window_ref.len() as i64 {
                // Positions outside the window stop the left shift
                0
            } else {
                window_ref[(pos - window_start) as usize]
            }
        });

        let alt_len = variant.alt_seq.len();
        let sum_base_quality = read.quals[read_index..]
            .iter()
            .take(alt_len)
            .map(|&q| q as u32)
            .sum();
        let is_edge = read_index == 0 || read_index + std::cmp::max(alt_len, 1) >= read.read_len();

        Candidate {
            variant,
            sample: sample.to_string(),
            sum_base_quality,
            mapping_quality: read.mapq,
            is_forward: !read.is_reverse,
            is_edge,
        }
    }

    fn window_offset(&self, pos: i64) -> usize {
        std::cmp::min(
            std::cmp::max(pos - self.window.range.start, 0) as usize,
            self.window_ref.len(),
        )
    }

    fn window_slice(&self, region: &GenomeRegion) -> Option<&[u8]> {
        if !self.window.contains(region) {
            return None;
        }
        let begin = (region.range.start - self.window.range.start) as usize;
        let end = (region.range.end - self.window.range.start) as usize;
        Some(&self.window_ref[begin..end])
    }

    fn is_likely_misaligned(&self, read: &AlignedRead, penalty: f64) -> bool {
        let params = &self.settings.misalignment;
        let k = penalty.floor() as u32;
        if k == 0 {
            return false;
        }
        let ln_prob_mismapped = -(read.mapq as f64) * std::f64::consts::LN_10 / 10.0;
        let ln_prob_mapped = (-ln_prob_mismapped.exp()).ln_1p();
        let mu = params.max_expected_mutation_rate * read.read_len() as f64;
        let ln_prob_correctly_aligned = ln_prob_mapped + ln_poisson_sf(k, mu);
        ln_prob_correctly_aligned < params.min_ln_prob_correctly_aligned
    }

    /// Generate the candidate variant set for the scanned window
    ///
    /// Matching proposals are grouped into one observation per variant, the inclusion predicate
    /// is applied, and the surviving unique variants are returned in region order.
    ///
    pub fn generate(&mut self) -> Vec<Variant> {
        self.candidates
            .sort_by(|a, b| a.variant.cmp(&b.variant).then(a.sample.cmp(&b.sample)));

        let mut result: Vec<Variant> = Vec::new();
        let mut group_start = 0;
        while group_start < self.candidates.len() {
            let first_variant = self.candidates[group_start].variant.clone();
            let group_end = self.candidates[group_start..]
                .iter()
                .position(|c| !super::variants_match(&c.variant, &first_variant))
                .map(|offset| group_start + offset)
                .unwrap_or(self.candidates.len());

            let observation = self.make_observation(group_start, group_end);
            if self.include(&observation) {
                for candidate in self.candidates[group_start..group_end].iter() {
                    if result.last() != Some(&candidate.variant) {
                        result.push(candidate.variant.clone());
                    }
                }
            }
            group_start = group_end;
        }
        result.dedup();

        if !self.likely_misaligned_candidates.is_empty() {
            let novel = self
                .likely_misaligned_candidates
                .iter()
                .filter(|c| !result.contains(&c.variant))
                .count();
            if novel > 0 {
                debug!(
                    "CigarScanner: ignoring {novel} candidate observations from likely misaligned reads in {:?}",
                    self.window
                );
            }
        }

        result
    }

    fn make_observation(&self, group_start: usize, group_end: usize) -> VariantObservation {
        let variant = self.candidates[group_start].variant.clone();
        let (total_depth, _) = self.min_depth_for_variant(&variant, &self.combined_tracker);

        let mut group = self.candidates[group_start..group_end].iter().collect::<Vec<_>>();
        group.sort_by(|a, b| a.sample.cmp(&b.sample));

        let mut sample_observations: Vec<SampleObservation> = Vec::new();
        for candidate in group {
            if sample_observations
                .last()
                .map(|o| o.sample != candidate.sample)
                .unwrap_or(true)
            {
                let tracker = &self.sample_trackers[&candidate.sample];
                let (depth, forward_depth) = self.min_depth_for_variant(&variant, tracker);
                sample_observations.push(SampleObservation {
                    sample: candidate.sample.clone(),
                    depth,
                    forward_depth,
                    observed_base_qualities: Vec::new(),
                    observed_mapping_qualities: Vec::new(),
                    forward_support: 0,
                    edge_support: 0,
                });
            }
            let observation = sample_observations.last_mut().unwrap();
            observation
                .observed_base_qualities
                .push(candidate.sum_base_quality);
            observation
                .observed_mapping_qualities
                .push(candidate.mapping_quality);
            if candidate.is_forward {
                observation.forward_support += 1;
            }
            if candidate.is_edge {
                observation.edge_support += 1;
            }
        }

        // Depth can never be below the observation count at this site
        for observation in sample_observations.iter_mut() {
            observation.depth = std::cmp::max(observation.depth, observation.support());
        }

        VariantObservation {
            variant,
            total_depth,
            sample_observations,
        }
    }

    fn min_depth_for_variant(&self, variant: &Variant, tracker: &CoverageTracker) -> (u32, u32) {
        let range = &variant.region.range;
        let (begin, end) = if variant.classify() == VariantClass::Insertion {
            let begin = std::cmp::max(range.start - 1, self.window.range.start);
            (self.window_offset(begin), self.window_offset(range.end + 1))
        } else {
            (
                self.window_offset(range.start),
                self.window_offset(range.end),
            )
        };
        tracker.min_depth(begin, end)
    }

    fn include(&self, observation: &VariantObservation) -> bool {
        match &self.settings.inclusion {
            InclusionPolicy::Germline => {
                let any_good = observation
                    .sample_observations
                    .iter()
                    .any(|o| is_good_germline(&observation.variant, o));
                any_good
                    || (observation.sample_observations.len() > 1
                        && is_good_germline_pooled(observation))
            }
            InclusionPolicy::Somatic {
                normal,
                min_expected_vaf,
            } => observation.sample_observations.iter().any(|o| {
                if normal.as_deref() == Some(o.sample.as_str()) {
                    is_good_germline(&observation.variant, o)
                } else {
                    is_good_somatic(&observation.variant, o, *min_expected_vaf)
                }
            }),
        }
    }
}

fn sum(observed_qualities: &[u32]) -> u32 {
    observed_qualities.iter().sum()
}

fn erase_below(observed_qualities: &mut Vec<u32>, min: u32) {
    observed_qualities.retain(|&q| q >= min);
}

fn median(values: &mut [u32]) -> u32 {
    values.sort_unstable();
    values[values.len() / 2]
}

fn is_completely_strand_biased(forward_support: u32, reverse_support: u32) -> bool {
    let support = forward_support + reverse_support;
    support > 0 && (forward_support == 0 || forward_support == support)
}

fn is_almost_completely_strand_biased(forward_support: u32, reverse_support: u32) -> bool {
    let support = forward_support + reverse_support;
    support > 0 && (forward_support <= 1 || forward_support >= support - 1)
}

/// Strand bias test on the posterior of the forward-strand fraction
///
/// True when nearly all Beta posterior mass sits in the tails, i.e. the strand split is
/// credibly far from balanced.
///
fn is_strand_biased(forward_support: u32, reverse_support: u32, tail_mass: f64) -> bool {
    let beta = Beta::new(forward_support as f64 + 0.5, reverse_support as f64 + 0.5).unwrap();
    let tail_probability = beta.cdf(tail_mass) + (1.0 - beta.cdf(1.0 - tail_mass));
    tail_probability >= 0.99
}

fn is_strongly_strand_biased(forward_support: u32, reverse_support: u32) -> bool {
    is_strand_biased(forward_support, reverse_support, 0.01)
}

/// Detect sequencer runthrough artifacts: deep, fully strand-biased support at low base quality
///
fn is_likely_runthrough_artifact(
    forward_support: u32,
    reverse_support: u32,
    observed_qualities: &mut [u32],
) -> bool {
    let num_observations = forward_support + reverse_support;
    if num_observations < 10 || !is_completely_strand_biased(forward_support, reverse_support) {
        return false;
    }
    assert!(!observed_qualities.is_empty());
    median(observed_qualities) < 15
}

/// True if seq is a whole number of repetitions of a motif with period at most max_period
///
fn is_tandem_repeat(seq: &[u8], max_period: usize) -> bool {
    for period in 1..=std::cmp::min(max_period, seq.len() / 2) {
        if seq.len() % period == 0 && seq.iter().zip(seq.iter().skip(period)).all(|(a, b)| a == b)
        {
            return true;
        }
    }
    false
}

fn is_good_germline(variant: &Variant, observation: &SampleObservation) -> bool {
    is_good_germline_stats(
        variant,
        observation.depth,
        observation.forward_depth,
        observation.forward_support,
        observation.observed_base_qualities.clone(),
    )
}

fn is_good_germline_stats(
    variant: &Variant,
    depth: u32,
    forward_depth: u32,
    forward_support: u32,
    mut observed_qualities: Vec<u32>,
) -> bool {
    let support = observed_qualities.len() as u32;
    let is_deletion = variant.classify() == VariantClass::Deletion;
    if depth < 4 {
        return support > 1 || sum(&observed_qualities) >= 30 || is_deletion;
    }
    let reverse_depth = depth - forward_depth;
    let reverse_support = support - forward_support;
    if support > 20
        && std::cmp::min(forward_depth, reverse_depth) > 1
        && is_completely_strand_biased(forward_support, reverse_support)
    {
        return false;
    }
    match variant.classify() {
        VariantClass::Snv => {
            if is_likely_runthrough_artifact(
                forward_support,
                reverse_support,
                &mut observed_qualities,
            ) {
                return false;
            }
            erase_below(&mut observed_qualities, 20);
            if depth <= 10 {
                return observed_qualities.len() > 1;
            }
            observed_qualities.len() > 2
                && observed_qualities.len() as f64 / depth as f64 > 0.1
        }
        VariantClass::Insertion => {
            let alt_size = variant.alt_seq.len();
            if support == 1 && alt_size > 10 {
                return false;
            }
            if depth < 10 {
                support > 1 || (alt_size > 3 && is_tandem_repeat(&variant.alt_seq, 4))
            } else if depth <= 30 {
                support > 1
            } else if depth <= 60 {
                if support == 1 {
                    return false;
                }
                if support as f64 / depth as f64 > 0.3 {
                    return true;
                }
                erase_below(&mut observed_qualities, 25);
                if observed_qualities.len() <= 1 {
                    return false;
                }
                if observed_qualities.len() > 2 {
                    return true;
                }
                observed_qualities.sort_unstable_by(|a, b| b.cmp(a));
                observed_qualities[0] as f64 / alt_size as f64 > 20.0
            } else {
                if support == 1 {
                    return false;
                }
                if support as f64 / depth as f64 > 0.35 {
                    return true;
                }
                erase_below(&mut observed_qualities, 20);
                if observed_qualities.len() <= 1 {
                    return false;
                }
                if observed_qualities.len() > 3 {
                    return true;
                }
                observed_qualities.sort_unstable_by(|a, b| b.cmp(a));
                observed_qualities[0] as f64 / alt_size as f64 > 20.0
            }
        }
        _ => {
            // Deletion or MNV
            if variant.region.size() < 10 {
                support > 1 && support as f64 / depth as f64 > 0.05
            } else {
                support as f64 / (depth as f64 - (depth as f64).sqrt()) > 0.1
            }
        }
    }
}

fn is_good_germline_pooled(observation: &VariantObservation) -> bool {
    let forward_depth = observation
        .sample_observations
        .iter()
        .map(|o| o.forward_depth)
        .sum();
    let forward_support = observation
        .sample_observations
        .iter()
        .map(|o| o.forward_support)
        .sum();
    let observed_qualities = observation
        .sample_observations
        .iter()
        .flat_map(|o| o.observed_base_qualities.iter().copied())
        .collect::<Vec<_>>();
    is_good_germline_stats(
        &observation.variant,
        observation.total_depth,
        forward_depth,
        forward_support,
        observed_qualities,
    )
}

fn is_good_somatic(
    variant: &Variant,
    observation: &SampleObservation,
    min_expected_vaf: f64,
) -> bool {
    let depth = std::cmp::max(observation.depth, 1);
    let support = observation.support();
    let forward_support = observation.forward_support;
    let reverse_support = support - forward_support;
    let mut observed_qualities = observation.observed_base_qualities.clone();

    if support > 15 && is_completely_strand_biased(forward_support, reverse_support) {
        return false;
    }
    if support > 25 && is_almost_completely_strand_biased(forward_support, reverse_support) {
        return false;
    }
    if support > 50 && is_strongly_strand_biased(forward_support, reverse_support) {
        return false;
    }

    let adjusted_depth =
        depth - std::cmp::min((depth as f64).sqrt() as u32, depth.saturating_sub(1));
    let approx_vaf = support as f64 / adjusted_depth as f64;

    match variant.classify() {
        VariantClass::Snv => {
            if is_likely_runthrough_artifact(
                forward_support,
                reverse_support,
                &mut observed_qualities,
            ) {
                return false;
            }
            erase_below(&mut observed_qualities, 15);
            if observed_qualities.len() >= 2
                && approx_vaf >= min_expected_vaf
                && observation.edge_support < support
            {
                approx_vaf >= 0.01
                    || !is_completely_strand_biased(forward_support, reverse_support)
            } else {
                false
            }
        }
        VariantClass::Insertion => {
            let alt_size = variant.alt_seq.len();
            if support == 1 && alt_size > 8 {
                return false;
            }
            erase_below(&mut observed_qualities, 15);
            if alt_size < 10 {
                observed_qualities.len() >= 2 && approx_vaf >= min_expected_vaf
            } else {
                observed_qualities.len() >= 2 && approx_vaf >= min_expected_vaf / 3.0
            }
        }
        _ => {
            if variant.region.size() < 10 {
                support > 1 && approx_vaf >= min_expected_vaf
            } else {
                approx_vaf >= min_expected_vaf / 3.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;

    fn make_scanner(window_ref: &[u8]) -> CigarScanner {
        let window = GenomeRegion::new(0, 0, window_ref.len() as i64);
        CigarScanner::new(CigarScannerSettings::default(), window, window_ref)
    }

    fn add_reads(scanner: &mut CigarScanner, count: usize, pos: i64, seq: &[u8], reverse_half: bool) {
        for i in 0..count {
            let mut read = make_test_read(0, pos, seq, 30);
            if reverse_half && i % 2 == 1 {
                read.is_reverse = true;
            }
            scanner.add_read("sample1", &read);
        }
    }

    #[test]
    fn test_snv_candidate_generation() {
        //              0123456789
        let ref_seq = b"ACGTACGTAC";
        let mut scanner = make_scanner(ref_seq);

        // 10 reads with a mismatch at position 4, mixed strands
        add_reads(&mut scanner, 10, 0, b"ACGTTCGTAC", true);
        let candidates = scanner.generate();
        assert_eq!(
            candidates,
            vec![Variant::new(GenomeRegion::new(0, 4, 5), b"A", b"T")]
        );
    }

    #[test]
    fn test_low_support_snv_not_included() {
        let ref_seq = b"ACGTACGTAC";
        let mut scanner = make_scanner(ref_seq);

        add_reads(&mut scanner, 1, 0, b"ACGTTCGTAC", false);
        add_reads(&mut scanner, 30, 0, b"ACGTACGTAC", true);
        let candidates = scanner.generate();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_deletion_candidate_generation() {
        use rust_htslib::bam::record::Cigar;
        let ref_seq = b"AAATTTAAAC";
        let mut scanner = make_scanner(ref_seq);

        for i in 0..6 {
            let mut read = make_test_read(0, 0, b"AAAAAAC", 30);
            read.cigar = vec![Cigar::Match(3), Cigar::Del(3), Cigar::Match(4)];
            read.is_reverse = i % 2 == 1;
            scanner.add_read("sample1", &read);
        }
        let candidates = scanner.generate();
        assert_eq!(
            candidates,
            vec![Variant::new(GenomeRegion::new(0, 3, 6), b"TTT", b"")]
        );
    }

    #[test]
    fn test_is_tandem_repeat() {
        assert!(is_tandem_repeat(b"ATATAT", 4));
        assert!(is_tandem_repeat(b"AAAA", 4));
        assert!(!is_tandem_repeat(b"ATCG", 4));
        assert!(!is_tandem_repeat(b"ATATA", 4));
    }

    #[test]
    fn test_strand_bias_helpers() {
        assert!(is_completely_strand_biased(10, 0));
        assert!(!is_completely_strand_biased(5, 5));
        assert!(is_almost_completely_strand_biased(9, 1));
        assert!(is_strongly_strand_biased(60, 0));
        assert!(!is_strongly_strand_biased(30, 30));
    }
}
