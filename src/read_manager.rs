use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use rust_htslib::bam::{self, Read};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::errors::{MorayError, MorayResult};
use crate::genome_region::GenomeRegion;
use crate::read::{AlignedRead, SampleName};

struct ReadFileInfo {
    filename: String,
    file_size: u64,
    samples: Vec<SampleName>,
}

struct ReadManagerState {
    /// Readers for currently open files, keyed by file index
    open: HashMap<usize, bam::IndexedReader>,
}

/// Process-wide manager of read alignment files
///
/// Open file handles are pooled under a hard bound; when the pool is full the open file with the
/// smallest size is closed first, being the cheapest to reopen later. The open set, closed set
/// and the sample to file index are all guarded by one mutex so the manager can be shared across
/// worker threads.
///
pub struct ReadManager {
    files: Vec<ReadFileInfo>,
    sample_to_files: HashMap<SampleName, Vec<usize>>,
    state: Mutex<ReadManagerState>,
    max_open_files: usize,
}

impl ReadManager {
    /// Register all alignment files, reading each header for sample names and contigs
    ///
    /// Headers are read through a short-lived non-indexed reader, so registration never counts
    /// against the open file bound. All files must agree on contig order.
    ///
    pub fn new(filenames: &[String], max_open_files: usize) -> MorayResult<(Self, ChromList)> {
        assert!(max_open_files > 0);
        let mut files = Vec::new();
        let mut sample_to_files: HashMap<SampleName, Vec<usize>> = HashMap::new();
        let mut chrom_list: Option<ChromList> = None;

        for (file_index, filename) in filenames.iter().enumerate() {
            let reader = bam::Reader::from_path(filename).map_err(|e| {
                MorayError::input(format!("Unable to open alignment file '{filename}': {e}"))
            })?;

            if let Some(existing) = &chrom_list {
                existing.check_header_compatibility(reader.header(), filename);
            } else {
                chrom_list = Some(ChromList::from_bam_header(reader.header()));
            }

            let samples = {
                let mut samples = get_sample_names(reader.header());
                if samples.is_empty() {
                    samples.push(default_sample_name(filename));
                }
                samples
            };
            for sample in samples.iter() {
                sample_to_files
                    .entry(sample.clone())
                    .or_default()
                    .push(file_index);
            }

            let file_size = std::fs::metadata(filename)
                .map_err(|e| {
                    MorayError::input(format!("Unable to stat alignment file '{filename}': {e}"))
                })?
                .len();

            files.push(ReadFileInfo {
                filename: filename.clone(),
                file_size,
                samples,
            });
        }

        let chrom_list = chrom_list
            .ok_or_else(|| MorayError::usage("At least one read alignment file is required"))?;

        Ok((
            Self {
                files,
                sample_to_files,
                state: Mutex::new(ReadManagerState {
                    open: HashMap::new(),
                }),
                max_open_files,
            },
            chrom_list,
        ))
    }

    /// All sample names over all registered files, in registration order
    ///
    pub fn samples(&self) -> Vec<SampleName> {
        let mut samples = Vec::new();
        for file in self.files.iter() {
            for sample in file.samples.iter() {
                if !samples.contains(sample) {
                    samples.push(sample.clone());
                }
            }
        }
        samples
    }

    /// Fetch mapped reads for one sample overlapping a region, ordered by position
    ///
    pub fn fetch_reads(&self, sample: &str, region: &GenomeRegion) -> Vec<AlignedRead> {
        let file_indices = match self.sample_to_files.get(sample) {
            Some(x) => x.clone(),
            None => return Vec::new(),
        };

        let mut reads = Vec::new();
        for file_index in file_indices {
            self.with_open_reader(file_index, |reader| {
                unwrap!(
                    reader.fetch((
                        region.chrom_index as u32,
                        region.range.start,
                        region.range.end
                    )),
                    "Failed to fetch region {:?} from alignment file",
                    region
                );
                let mut record = bam::Record::new();
                while let Some(r) = reader.read(&mut record) {
                    unwrap!(r, "Failed to parse alignment record");
                    if record.is_unmapped() {
                        continue;
                    }
                    reads.push(AlignedRead::from_bam_record(region.chrom_index, &record));
                }
            });
        }
        reads.sort_by(|a, b| a.region().cmp(&b.region()));
        reads
    }

    /// Run an operation against the pooled indexed reader for one file
    ///
    fn with_open_reader(&self, file_index: usize, operation: impl FnOnce(&mut bam::IndexedReader)) {
        let mut state = self.state.lock().unwrap();
        if !state.open.contains_key(&file_index) {
            if state.open.len() >= self.max_open_files {
                // Evict the smallest open file, which is the cheapest to reopen
                let evict_index = *state
                    .open
                    .keys()
                    .min_by_key(|&&index| self.files[index].file_size)
                    .unwrap();
                state.open.remove(&evict_index);
                debug!(
                    "Read file pool full, closed '{}'",
                    self.files[evict_index].filename
                );
            }
            let filename = &self.files[file_index].filename;
            let reader = unwrap!(
                bam::IndexedReader::from_path(filename),
                "Unable to open indexed alignment file: '{}'",
                filename
            );
            state.open.insert(file_index, reader);
        }
        let reader = state.open.get_mut(&file_index).unwrap();
        operation(reader);
    }
}

fn get_sample_names(header_view: &bam::HeaderView) -> Vec<SampleName> {
    let header = bam::Header::from_template(header_view);
    let mut samples = Vec::new();
    for (key, records) in header.to_hashmap() {
        if key != "RG" {
            continue;
        }
        for record in records {
            if let Some(sample) = record.get("SM") {
                if !samples.contains(sample) {
                    samples.push(sample.clone());
                }
            }
        }
    }
    // The header map iterates in arbitrary order, so fix the sample order here to keep the
    // output sample columns stable across runs
    samples.sort_unstable();
    samples
}

/// Fall back to the file stem when no read group sample name is present
///
fn default_sample_name(filename: &str) -> SampleName {
    std::path::Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("UnknownSampleName")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sample_name() {
        assert_eq!(default_sample_name("/data/runs/na12878.bam"), "na12878");
    }
}
