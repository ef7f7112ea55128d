mod downsample;
mod filter;
mod transform;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

pub use self::downsample::{downsample_reads, DownsampleSettings};
pub use self::filter::{ReadFilter, StandardFilterSettings};
pub use self::transform::ReadTransformer;
use crate::read::{AlignedRead, SampleName};

/// Reads for one calling window grouped by sample, ordered by region within each sample
pub type ReadMap = BTreeMap<SampleName, Vec<Arc<AlignedRead>>>;

/// The read preparation pipeline: filter, then transform, then downsample
///
/// Filtering is pure, transformation mutates base qualities in place, and downsampling discards
/// whole reads. After the pipeline reads are frozen behind shared handles.
///
pub struct ReadPipeline {
    pub filter: ReadFilter,
    pub transformer: ReadTransformer,
    pub downsample: DownsampleSettings,
}

impl ReadPipeline {
    /// Run all pipeline stages over raw sample reads and freeze the survivors
    ///
    /// Read ids are assigned sequentially over the post-pipeline reads of all samples, and are
    /// unique within the calling window.
    ///
    pub fn process(&self, sample_reads: BTreeMap<SampleName, Vec<AlignedRead>>) -> ReadMap {
        let mut next_read_id = 0;
        let mut result = ReadMap::new();
        for (sample, reads) in sample_reads {
            let input_count = reads.len();
            let mut reads = reads
                .into_iter()
                .filter(|read| {
                    let keep = self.filter.keep(read);
                    if !keep {
                        trace_filtered_read(read, self.filter.first_rejection(read).unwrap());
                    }
                    keep
                })
                .collect::<Vec<_>>();
            let filtered_count = input_count - reads.len();

            for read in reads.iter_mut() {
                self.transformer.apply(read);
            }

            let downsampled_count = downsample_reads(&mut reads, &self.downsample);

            debug!(
                "Sample '{sample}': {input_count} reads in window, {filtered_count} filtered, {downsampled_count} downsampled"
            );

            reads.sort_by(|a, b| a.region().cmp(&b.region()));
            let reads = reads
                .into_iter()
                .map(|mut read| {
                    read.id = next_read_id;
                    next_read_id += 1;
                    Arc::new(read)
                })
                .collect();
            result.insert(sample, reads);
        }
        result
    }
}

fn trace_filtered_read(read: &AlignedRead, reason: &str) {
    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            "Filtered read {} at {}:{} ({reason})",
            String::from_utf8_lossy(&read.qname),
            read.chrom_index,
            read.pos
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;

    #[test]
    fn test_pipeline_assigns_unique_ids() {
        let pipeline = ReadPipeline {
            filter: ReadFilter::default(),
            transformer: ReadTransformer::default(),
            downsample: DownsampleSettings::default(),
        };
        let mut input = BTreeMap::new();
        input.insert(
            String::from("sampleA"),
            vec![
                make_test_read(0, 100, b"ACGTACGT", 30),
                make_test_read(0, 110, b"ACGTACGT", 30),
            ],
        );
        input.insert(
            String::from("sampleB"),
            vec![make_test_read(0, 100, b"ACGTACGT", 30)],
        );

        let result = pipeline.process(input);
        let mut ids = result
            .values()
            .flatten()
            .map(|read| read.id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
