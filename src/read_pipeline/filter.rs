use crate::read::AlignedRead;

type ReadPredicate = Box<dyn Fn(&AlignedRead) -> bool + Send + Sync>;

/// Maximum sensible phred value in decoded base quality arrays
const MAX_BASE_QUALITY: u8 = 93;

/// Maximum reference distance between a read and its mate for the pair to count as template-local
const MAX_TEMPLATE_LENGTH: i64 = 10_000;

/// A registrable sequence of read predicates; a read is kept iff all predicates accept
///
/// Filtering is pure and stateless. The standard predicate set is registered by
/// `ReadFilter::standard`, and each standard predicate can be toggled off through
/// `StandardFilterSettings`.
///
#[derive(Default)]
pub struct ReadFilter {
    predicates: Vec<(&'static str, ReadPredicate)>,
}

pub struct StandardFilterSettings {
    pub min_mapping_quality: u8,
    /// A read must carry at least `min_good_bases` bases at or above `good_base_quality`
    pub good_base_quality: u8,
    pub min_good_bases: usize,
    pub allow_duplicates: bool,
    pub allow_qc_fail: bool,
    pub allow_secondary: bool,
    pub allow_supplementary: bool,
    pub allow_unmapped_mates: bool,
    pub allow_distant_mates: bool,
    pub allow_adapter_contamination: bool,
}

impl Default for StandardFilterSettings {
    fn default() -> Self {
        Self {
            min_mapping_quality: 20,
            good_base_quality: 20,
            min_good_bases: 20,
            allow_duplicates: false,
            allow_qc_fail: false,
            allow_secondary: false,
            allow_supplementary: false,
            allow_unmapped_mates: false,
            allow_distant_mates: false,
            allow_adapter_contamination: false,
        }
    }
}

impl ReadFilter {
    pub fn register_filter(
        &mut self,
        name: &'static str,
        predicate: impl Fn(&AlignedRead) -> bool + Send + Sync + 'static,
    ) {
        self.predicates.push((name, Box::new(predicate)));
    }

    pub fn keep(&self, read: &AlignedRead) -> bool {
        self.predicates.iter().all(|(_, predicate)| predicate(read))
    }

    /// Name of the first predicate rejecting the read, for debug reporting
    ///
    pub fn first_rejection(&self, read: &AlignedRead) -> Option<&'static str> {
        self.predicates
            .iter()
            .find(|(_, predicate)| !predicate(read))
            .map(|(name, _)| *name)
    }

    /// Build the standard filter stack
    ///
    pub fn standard(settings: &StandardFilterSettings) -> Self {
        let mut filter = Self::default();

        filter.register_filter("valid_base_qualities", |read| {
            read.quals.len() == read.seq.len()
                && read.quals.iter().all(|&q| q <= MAX_BASE_QUALITY)
        });
        filter.register_filter("well_formed_cigar", |read| read.is_cigar_consistent());
        filter.register_filter("is_mapped", |read| read.pos >= 0);

        let min_mapq = settings.min_mapping_quality;
        filter.register_filter("mapping_quality", move |read| read.mapq >= min_mapq);

        let good_bq = settings.good_base_quality;
        let min_good = settings.min_good_bases;
        filter.register_filter("good_base_fraction", move |read| {
            read.quals.iter().filter(|&&q| q >= good_bq).count() >= min_good
        });

        if !settings.allow_duplicates {
            filter.register_filter("not_duplicate", |read| !read.is_duplicate);
        }
        if !settings.allow_qc_fail {
            filter.register_filter("not_qc_fail", |read| !read.is_qc_fail);
        }
        if !settings.allow_secondary {
            filter.register_filter("not_secondary", |read| !read.is_secondary);
        }
        if !settings.allow_supplementary {
            filter.register_filter("not_supplementary", |read| !read.is_supplementary);
        }
        if !settings.allow_unmapped_mates {
            filter.register_filter("mate_mapped", |read| {
                !read.is_paired || read.is_mate_mapped
            });
        }
        if !settings.allow_distant_mates {
            filter.register_filter("template_local", |read| {
                !read.is_paired
                    || !read.is_mate_mapped
                    || (read.is_mate_same_chrom
                        && read.insert_size.abs() <= MAX_TEMPLATE_LENGTH)
            });
        }
        if !settings.allow_adapter_contamination {
            // Reject only when more than half of the read runs through the adapter; smaller
            // adapter overlaps are recoverable by quality masking in the transform stage.
            filter.register_filter("adapter_contamination", |read| {
                !read.is_chimeric()
                    || (read.read_len() - read.insert_size.unsigned_abs() as usize)
                        <= read.read_len() / 2
            });
        }

        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;

    #[test]
    fn test_standard_filter_accepts_clean_read() {
        let filter = ReadFilter::standard(&StandardFilterSettings::default());
        let read = make_test_read(0, 100, &b"ACGT".repeat(10), 30);
        assert!(filter.keep(&read));
    }

    #[test]
    fn test_standard_filter_rejections() {
        let filter = ReadFilter::standard(&StandardFilterSettings::default());

        let mut read = make_test_read(0, 100, &b"ACGT".repeat(10), 30);
        read.mapq = 5;
        assert_eq!(filter.first_rejection(&read), Some("mapping_quality"));

        let mut read = make_test_read(0, 100, &b"ACGT".repeat(10), 30);
        read.is_duplicate = true;
        assert_eq!(filter.first_rejection(&read), Some("not_duplicate"));

        // Too few high quality bases
        let read = make_test_read(0, 100, &b"ACGT".repeat(10), 10);
        assert_eq!(filter.first_rejection(&read), Some("good_base_fraction"));
    }

    #[test]
    fn test_custom_registered_filter() {
        let mut filter = ReadFilter::default();
        filter.register_filter("min_length", |read| read.read_len() >= 50);
        let read = make_test_read(0, 100, &b"ACGT".repeat(10), 30);
        assert!(!filter.keep(&read));
    }
}
