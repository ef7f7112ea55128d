use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::globals::PROGRAM_VERSION;

#[derive(Default, Deserialize, Serialize)]
pub struct RunStats {
    pub version: String,
    pub sample_count: usize,
    pub candidate_count: u64,
    pub emitted_record_count: u64,
    pub refcall_record_count: u64,
    pub phased_call_count: u64,
    pub skipped_region_count: u64,
    pub runtime_seconds: f64,
}

impl RunStats {
    pub fn new(sample_count: usize) -> Self {
        Self {
            version: PROGRAM_VERSION.to_string(),
            sample_count,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.candidate_count += other.candidate_count;
        self.emitted_record_count += other.emitted_record_count;
        self.refcall_record_count += other.refcall_record_count;
        self.phased_call_count += other.phased_call_count;
        self.skipped_region_count += other.skipped_region_count;
    }
}

/// Write the end-of-run stats summary next to the VCF output
///
/// Besides the statistics themselves this file marks a successfully completed run.
///
pub fn write_run_stats(stats: &RunStats, output_path: &Utf8Path) {
    let stats_path = {
        let mut path = output_path.to_owned();
        path.set_extension("stats.json");
        path
    };
    let file = unwrap!(
        std::fs::File::create(&stats_path),
        "Unable to create run stats file: '{}'",
        stats_path
    );
    let writer = std::io::BufWriter::new(file);
    unwrap!(
        serde_json::to_writer_pretty(writer, stats),
        "Failed to serialize run stats"
    );
    info!("Wrote run statistics to {stats_path}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_accumulates() {
        let mut total = RunStats::new(2);
        let part = RunStats {
            candidate_count: 10,
            emitted_record_count: 4,
            skipped_region_count: 1,
            ..RunStats::new(2)
        };
        total.merge(&part);
        total.merge(&part);
        assert_eq!(total.candidate_count, 20);
        assert_eq!(total.emitted_record_count, 8);
        assert_eq!(total.skipped_region_count, 2);
    }
}
