use std::collections::HashMap;
use std::fs::File;
use std::sync::Mutex;

use bio::io::fasta;
use log::{debug, info};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::genome_region::GenomeRegion;

/// Reference slices are cached in fixed-size chunks keyed on (chrom_index, chunk_index)
const CHUNK_SIZE: i64 = 1 << 20;

enum ReferenceSource {
    /// Random access into an indexed on-disk fasta file
    Indexed(Box<fasta::IndexedReader<File>>),

    /// Fully in-memory contig map, used for tests and small references
    InMemory(HashMap<String, Vec<u8>>),
}

struct CacheEntry {
    seq: Vec<u8>,
    last_use: u64,
}

struct CacheState {
    chunks: HashMap<(usize, i64), CacheEntry>,
    cached_bytes: usize,
    access_counter: u64,
}

/// Process-wide random-access reference sequence cache
///
/// Sequence is fetched in fixed-size chunks and retained under an LRU policy bounded by a total
/// memory footprint. All sequence is upper-cased on entry; 'N' is the wildcard base.
///
/// The cache is guarded by internal locks so one instance can be shared across worker threads.
///
pub struct ReferenceCache {
    source: Mutex<ReferenceSource>,
    state: Mutex<CacheState>,
    max_bytes: usize,
}

impl ReferenceCache {
    pub fn from_fasta(filename: &str, max_megabytes: usize) -> Self {
        info!("Opening indexed reference genome from file '{filename}'");
        let reader = unwrap!(
            fasta::IndexedReader::from_file(&filename),
            "Unable to open indexed reference fasta file: '{}'",
            filename
        );
        Self {
            source: Mutex::new(ReferenceSource::Indexed(Box::new(reader))),
            state: Mutex::new(CacheState {
                chunks: HashMap::new(),
                cached_bytes: 0,
                access_counter: 0,
            }),
            max_bytes: max_megabytes << 20,
        }
    }

    #[allow(dead_code)]
    pub fn from_seqs(seqs: HashMap<String, Vec<u8>>, max_megabytes: usize) -> Self {
        let seqs = seqs
            .into_iter()
            .map(|(label, seq)| (label, seq.to_ascii_uppercase()))
            .collect();
        Self {
            source: Mutex::new(ReferenceSource::InMemory(seqs)),
            state: Mutex::new(CacheState {
                chunks: HashMap::new(),
                cached_bytes: 0,
                access_counter: 0,
            }),
            max_bytes: max_megabytes << 20,
        }
    }

    /// Fetch the reference sequence for a region
    ///
    /// The region must be within chromosome bounds.
    ///
    pub fn fetch(&self, chrom_list: &ChromList, region: &GenomeRegion) -> Vec<u8> {
        assert!(region.range.start >= 0);
        assert!(region.range.end <= chrom_list.data[region.chrom_index].length as i64);

        let mut result = Vec::with_capacity(region.size() as usize);
        let mut chunk_index = region.range.start / CHUNK_SIZE;
        while chunk_index * CHUNK_SIZE < region.range.end {
            let chunk = self.fetch_chunk(chrom_list, region.chrom_index, chunk_index);
            let chunk_start = chunk_index * CHUNK_SIZE;
            let copy_start = std::cmp::max(region.range.start - chunk_start, 0) as usize;
            let copy_end =
                std::cmp::min(region.range.end - chunk_start, chunk.len() as i64) as usize;
            result.extend_from_slice(&chunk[copy_start..copy_end]);
            chunk_index += 1;
        }
        assert_eq!(result.len(), region.size() as usize);
        result
    }

    fn fetch_chunk(&self, chrom_list: &ChromList, chrom_index: usize, chunk_index: i64) -> Vec<u8> {
        {
            let mut state = self.state.lock().unwrap();
            state.access_counter += 1;
            let access = state.access_counter;
            if let Some(entry) = state.chunks.get_mut(&(chrom_index, chunk_index)) {
                entry.last_use = access;
                return entry.seq.clone();
            }
        }

        let chrom_info = &chrom_list.data[chrom_index];
        let start = chunk_index * CHUNK_SIZE;
        let end = std::cmp::min(start + CHUNK_SIZE, chrom_info.length as i64);
        let seq = self.read_from_source(&chrom_info.label, start, end);

        let mut state = self.state.lock().unwrap();
        state.cached_bytes += seq.len();
        let access = state.access_counter;
        state.chunks.insert(
            (chrom_index, chunk_index),
            CacheEntry {
                seq: seq.clone(),
                last_use: access,
            },
        );
        while state.cached_bytes > self.max_bytes && state.chunks.len() > 1 {
            let evict_key = *state
                .chunks
                .iter()
                .min_by_key(|(_, entry)| entry.last_use)
                .map(|(key, _)| key)
                .unwrap();
            let evicted = state.chunks.remove(&evict_key).unwrap();
            state.cached_bytes -= evicted.seq.len();
            debug!("Evicted reference cache chunk {evict_key:?}");
        }
        seq
    }

    fn read_from_source(&self, chrom_label: &str, start: i64, end: i64) -> Vec<u8> {
        let mut source = self.source.lock().unwrap();
        match &mut *source {
            ReferenceSource::Indexed(reader) => {
                unwrap!(
                    reader.fetch(chrom_label, start as u64, end as u64),
                    "Failed to fetch reference region {}:{}-{}",
                    chrom_label,
                    start,
                    end
                );
                let mut seq = Vec::new();
                unwrap!(
                    reader.read(&mut seq),
                    "Failed to read reference region {}:{}-{}",
                    chrom_label,
                    start,
                    end
                );
                seq.make_ascii_uppercase();
                seq
            }
            ReferenceSource::InMemory(seqs) => {
                let chrom_seq = unwrap!(
                    seqs.get(chrom_label).ok_or("missing contig"),
                    "Reference does not contain contig '{}'",
                    chrom_label
                );
                chrom_seq[start as usize..end as usize].to_vec()
            }
        }
    }
}

/// Base comparison treating 'N' on either side as a wildcard
///
pub fn bases_match(a: u8, b: u8) -> bool {
    a == b || a == b'N' || b == b'N'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_cache() -> (ChromList, ReferenceCache) {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 8);
        let mut seqs = HashMap::new();
        seqs.insert(String::from("chr1"), b"acgtACGT".to_vec());
        (chrom_list, ReferenceCache::from_seqs(seqs, 1))
    }

    #[test]
    fn test_fetch_uppercases() {
        let (chrom_list, cache) = get_test_cache();
        let seq = cache.fetch(&chrom_list, &GenomeRegion::new(0, 0, 8));
        assert_eq!(seq, b"ACGTACGT".to_vec());
    }

    #[test]
    fn test_fetch_subregion() {
        let (chrom_list, cache) = get_test_cache();
        let seq = cache.fetch(&chrom_list, &GenomeRegion::new(0, 2, 6));
        assert_eq!(seq, b"GTAC".to_vec());
    }

    #[test]
    fn test_bases_match_wildcard() {
        assert!(bases_match(b'A', b'A'));
        assert!(bases_match(b'A', b'N'));
        assert!(bases_match(b'N', b'G'));
        assert!(!bases_match(b'A', b'C'));
    }
}
