use crate::read::AlignedRead;

#[derive(Clone)]
pub struct DownsampleSettings {
    /// Downsampling triggers where per-position coverage exceeds this value
    pub max_coverage: u32,
    /// Coverage is reduced to this value in triggered windows
    pub target_coverage: u32,
}

impl Default for DownsampleSettings {
    fn default() -> Self {
        Self {
            max_coverage: 1000,
            target_coverage: 500,
        }
    }
}

/// Greedily discard reads until no position in the window exceeds the target coverage
///
/// Removal prefers discarding reads with lower mean base quality, then shorter reads, with
/// remaining ties broken by input order so the result is deterministic for a fixed input order.
///
/// Returns the number of reads removed.
///
pub fn downsample_reads(reads: &mut Vec<AlignedRead>, settings: &DownsampleSettings) -> usize {
    assert!(settings.target_coverage <= settings.max_coverage);
    if reads.is_empty() {
        return 0;
    }

    let window_start = reads.iter().map(|r| r.pos).min().unwrap();
    let window_end = reads.iter().map(|r| r.pos + r.ref_span()).max().unwrap();
    let window_size = (window_end - window_start) as usize;
    if window_size == 0 {
        return 0;
    }

    let mut coverage = vec![0u32; window_size];
    for read in reads.iter() {
        let begin = (read.pos - window_start) as usize;
        let end = begin + read.ref_span() as usize;
        for depth in coverage[begin..end].iter_mut() {
            *depth += 1;
        }
    }

    if coverage.iter().all(|&d| d <= settings.max_coverage) {
        return 0;
    }

    let mut removed = vec![false; reads.len()];
    let mut removed_count = 0;
    loop {
        let (peak_pos, peak_depth) = coverage
            .iter()
            .enumerate()
            .max_by_key(|(_, &d)| d)
            .map(|(pos, &d)| (pos as i64 + window_start, d))
            .unwrap();
        if peak_depth <= settings.target_coverage {
            break;
        }

        // Worst read covering the peak position: lowest mean base quality, then shortest, then
        // latest in input order
        let victim = reads
            .iter()
            .enumerate()
            .filter(|(index, read)| {
                !removed[*index] && read.pos <= peak_pos && peak_pos < read.pos + read.ref_span()
            })
            .min_by(|(ai, a), (bi, b)| {
                a.mean_base_quality()
                    .partial_cmp(&b.mean_base_quality())
                    .unwrap()
                    .then(a.read_len().cmp(&b.read_len()))
                    .then(bi.cmp(ai))
            })
            .map(|(index, _)| index)
            .unwrap();

        removed[victim] = true;
        removed_count += 1;
        let begin = (reads[victim].pos - window_start) as usize;
        let end = begin + reads[victim].ref_span() as usize;
        for depth in coverage[begin..end].iter_mut() {
            *depth -= 1;
        }
    }

    let mut index = 0;
    reads.retain(|_| {
        let keep = !removed[index];
        index += 1;
        keep
    });
    removed_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;

    #[test]
    fn test_no_downsampling_below_threshold() {
        let settings = DownsampleSettings {
            max_coverage: 10,
            target_coverage: 5,
        };
        let mut reads = (0..5)
            .map(|_| make_test_read(0, 100, b"ACGTACGT", 30))
            .collect::<Vec<_>>();
        assert_eq!(downsample_reads(&mut reads, &settings), 0);
        assert_eq!(reads.len(), 5);
    }

    #[test]
    fn test_downsampling_prefers_low_quality_reads() {
        let settings = DownsampleSettings {
            max_coverage: 3,
            target_coverage: 2,
        };
        let mut reads = vec![
            make_test_read(0, 100, b"ACGTACGT", 35),
            make_test_read(0, 100, b"ACGTACGT", 10),
            make_test_read(0, 100, b"ACGTACGT", 30),
            make_test_read(0, 100, b"ACGTACGT", 12),
        ];
        let removed = downsample_reads(&mut reads, &settings);
        assert_eq!(removed, 2);
        let kept_quals = reads
            .iter()
            .map(|r| r.quals[0])
            .collect::<Vec<_>>();
        assert_eq!(kept_quals, vec![35, 30]);
    }

    #[test]
    fn test_downsampling_is_deterministic() {
        let settings = DownsampleSettings {
            max_coverage: 2,
            target_coverage: 1,
        };
        let build = || {
            vec![
                make_test_read(0, 100, b"ACGTACGT", 30),
                make_test_read(0, 104, b"ACGTACGT", 30),
                make_test_read(0, 100, b"ACGTACGT", 30),
            ]
        };
        let mut a = build();
        let mut b = build();
        downsample_reads(&mut a, &settings);
        downsample_reads(&mut b, &settings);
        let positions = |v: &Vec<AlignedRead>| v.iter().map(|r| r.pos).collect::<Vec<_>>();
        assert_eq!(positions(&a), positions(&b));
    }
}
