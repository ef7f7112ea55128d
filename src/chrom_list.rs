use std::collections::HashMap;

use rust_htslib::bam;

pub struct ChromInfo {
    pub label: String,
    pub length: u64,
}

/// Ordered chromosome index shared by all components
///
/// The chromosome order is defined by the header of the first read alignment file, and fixes the
/// contig order of all VCF output.
///
#[derive(Default)]
pub struct ChromList {
    pub data: Vec<ChromInfo>,
    pub label_to_index: HashMap<String, usize>,
}

impl ChromList {
    pub fn add_chrom(&mut self, label: &str, length: u64) {
        assert!(
            !self.label_to_index.contains_key(label),
            "Duplicate chromosome label '{label}'"
        );
        self.label_to_index
            .insert(label.to_string(), self.data.len());
        self.data.push(ChromInfo {
            label: label.to_string(),
            length,
        });
    }

    pub fn from_bam_header(header: &bam::HeaderView) -> Self {
        let mut chrom_list = Self::default();
        for tid in 0..header.target_count() {
            let label = std::str::from_utf8(header.tid2name(tid)).unwrap();
            let length = header.target_len(tid).unwrap();
            chrom_list.add_chrom(label, length);
        }
        chrom_list
    }

    /// Assert that another alignment file header is consistent with this chromosome list
    ///
    pub fn check_header_compatibility(&self, header: &bam::HeaderView, filename: &str) {
        assert_eq!(
            header.target_count() as usize,
            self.data.len(),
            "Alignment file '{filename}' contig count does not match other input alignment files"
        );
        for tid in 0..header.target_count() {
            let label = std::str::from_utf8(header.tid2name(tid)).unwrap();
            assert_eq!(
                label, self.data[tid as usize].label,
                "Alignment file '{filename}' contig order does not match other input alignment files"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrom_list_indexing() {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 1000);
        chrom_list.add_chrom("chr2", 2000);

        assert_eq!(chrom_list.data.len(), 2);
        assert_eq!(chrom_list.label_to_index["chr2"], 1);
        assert_eq!(chrom_list.data[1].length, 2000);
    }
}
