use std::fmt;

use simple_error::{bail, SimpleResult};

use crate::chrom_list::ChromList;
pub use crate::int_range::{get_int_range_distance, IntRange};

/// A contiguous region of the genome on a single chromosome
///
/// Regions are ordered by chromosome index, then start, then end, which fixes the processing and
/// output order of the whole pipeline.
///
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GenomeRegion {
    /// chrom_index is defined by the indexing scheme used in the input alignment file headers
    pub chrom_index: usize,
    pub range: IntRange,
}

impl GenomeRegion {
    pub fn new(chrom_index: usize, start: i64, end: i64) -> Self {
        Self {
            chrom_index,
            range: IntRange::from_pair(start, end),
        }
    }

    /// Convert from a string in 'samtools' region format (e.g. chr20:100-200)
    ///
    pub fn from_region_str(chrom_list: &ChromList, str: &str) -> SimpleResult<Self> {
        let (chrom_index, start, end) = samtools_region_string_splitter(chrom_list, str)?;
        Ok(Self {
            chrom_index,
            range: IntRange::from_pair(start, end),
        })
    }

    pub fn intersect(&self, other: &Self) -> bool {
        self.chrom_index == other.chrom_index && self.range.intersect_range(&other.range)
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.chrom_index == other.chrom_index && self.range.contains_range(&other.range)
    }

    /// Return true if this region ends at or before the start of other
    ///
    /// Regions on lower-index chromosomes are before all regions on higher-index chromosomes.
    ///
    pub fn is_before(&self, other: &Self) -> bool {
        self.chrom_index < other.chrom_index
            || (self.chrom_index == other.chrom_index && self.range.is_before(&other.range))
    }

    pub fn size(&self) -> i64 {
        self.range.size()
    }

    /// Expand the region separately on left and right sides, restricted by chromosome bounds
    ///
    pub fn asymmetric_expand_by(&mut self, chrom_list: &ChromList, left: i64, right: i64) {
        let chrom_size = chrom_list.data[self.chrom_index].length as i64;
        self.range.start = std::cmp::max(self.range.start - left, 0);
        self.range.end = std::cmp::min(self.range.end + right, chrom_size);
    }

    pub fn expand_by(&mut self, chrom_list: &ChromList, size: i64) {
        self.asymmetric_expand_by(chrom_list, size, size);
    }
}

impl fmt::Debug for GenomeRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:?}", self.chrom_index, self.range)
    }
}

/// Merge a sorted region list so that no two output regions intersect
///
pub fn merge_regions(mut regions: Vec<GenomeRegion>) -> Vec<GenomeRegion> {
    regions.sort();
    let mut result: Vec<GenomeRegion> = Vec::new();
    for region in regions {
        match result.last_mut() {
            Some(last)
                if last.chrom_index == region.chrom_index
                    && region.range.start <= last.range.end =>
            {
                last.range.merge(&region.range);
            }
            _ => {
                result.push(region);
            }
        }
    }
    result
}

/// Convert from a string in 'samtools' region format (e.g. chr20:100-200) to a tuple of
/// (chrom_index, start, end)
/// ...where start and end are converted to the zero-indexed half-open convention used for bed
///
/// Commas will be stripped out of coordinates if present
///
pub fn samtools_region_string_splitter(
    chrom_list: &ChromList,
    str: &str,
) -> SimpleResult<(usize, i64, i64)> {
    let s1 = str.split(':').collect::<Vec<_>>();
    if s1.is_empty() || s1.len() > 2 {
        bail!("Unexpected format in genome region string {str}");
    }
    let chrom_index = match chrom_list.label_to_index.get(s1[0]) {
        Some(x) => *x,
        None => {
            bail!("Can't find chromosome '{}' in alignment file header", s1[0]);
        }
    };
    let chrom_size = chrom_list.data[chrom_index].length as i64;
    if s1.len() == 1 {
        return Ok((chrom_index, 0, chrom_size));
    }
    let s2 = s1[1]
        .split('-')
        .map(|s| s.replace(',', ""))
        .collect::<Vec<_>>();
    if s2.is_empty() || s2.len() > 2 {
        bail!("Unexpected format in genome region string {str}");
    }
    let start = match s2[0].parse::<i64>() {
        Ok(x) => x - 1,
        Err(_) => bail!("Unexpected format in genome region string {str}"),
    };
    let end = if s2.len() == 1 {
        chrom_size
    } else {
        match s2[1].parse::<i64>() {
            Ok(x) => x,
            Err(_) => bail!("Unexpected format in genome region string {str}"),
        }
    };
    Ok((chrom_index, start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_chrom_list() -> ChromList {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 10000);
        chrom_list.add_chrom("chr2", 10000);
        chrom_list
    }

    /// This test makes sure the auto-generated ordering for GenomeRegion is doing what we assume
    ///
    #[test]
    fn test_region_order() {
        // Ensure chrom_index has priority over pos
        let region1 = GenomeRegion::new(0, 10, 11);
        let region2 = GenomeRegion::new(1, 1, 2);
        assert!(region1 < region2);

        // Ensure begin pos has priority over end pos
        let region1 = GenomeRegion::new(0, 1, 20);
        let region2 = GenomeRegion::new(0, 10, 11);
        assert!(region1 < region2);
    }

    #[test]
    fn test_samtools_region_string_splitter() {
        let chrom_list = get_test_chrom_list();

        let (chrom_index, start, end) =
            samtools_region_string_splitter(&chrom_list, "chr2:1,000-2,000").unwrap();
        assert_eq!(chrom_index, 1);
        assert_eq!(start, 999);
        assert_eq!(end, 2000);

        let (chrom_index, start, end) =
            samtools_region_string_splitter(&chrom_list, "chr1").unwrap();
        assert_eq!(chrom_index, 0);
        assert_eq!(start, 0);
        assert_eq!(end, 10000);

        assert!(samtools_region_string_splitter(&chrom_list, "chr3:50-100").is_err());
    }

    #[test]
    fn test_merge_regions() {
        let regions = vec![
            GenomeRegion::new(0, 50, 70),
            GenomeRegion::new(0, 10, 20),
            GenomeRegion::new(0, 15, 30),
            GenomeRegion::new(1, 10, 20),
        ];
        let merged = merge_regions(regions);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].range, IntRange::from_pair(10, 30));
    }
}
