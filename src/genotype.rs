use crate::allele::Allele;
use crate::haplotype::{HaplotypeArena, HaplotypeId};

/// A multiset of haplotypes of fixed cardinality (the ploidy), stored as a sorted id vector
///
/// Ids index into the haplotype arena of the active sub-region, so genotype equality and
/// hashing reduce to integer vector comparison.
///
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Genotype {
    ids: Vec<HaplotypeId>,
}

impl Genotype {
    pub fn new(mut ids: Vec<HaplotypeId>) -> Self {
        assert!(!ids.is_empty());
        ids.sort_unstable();
        Self { ids }
    }

    pub fn ploidy(&self) -> usize {
        self.ids.len()
    }

    /// Number of distinct haplotypes in the multiset
    ///
    pub fn zygosity(&self) -> usize {
        let mut count = 1;
        for pair in self.ids.windows(2) {
            if pair[0] != pair[1] {
                count += 1;
            }
        }
        count
    }

    #[allow(dead_code)]
    pub fn is_homozygous(&self) -> bool {
        self.zygosity() == 1
    }

    pub fn contains(&self, id: HaplotypeId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    #[allow(dead_code)]
    pub fn count(&self, id: HaplotypeId) -> usize {
        self.ids.iter().filter(|&&x| x == id).count()
    }

    pub fn ids(&self) -> &[HaplotypeId] {
        &self.ids
    }

    /// True if any haplotype of the genotype carries the allele
    ///
    pub fn contains_allele(&self, arena: &HaplotypeArena, allele: &Allele) -> bool {
        self.ids.iter().any(|&id| arena.get(id).carries(allele))
    }

    /// Number of haplotypes of the genotype carrying the allele
    ///
    pub fn count_allele(&self, arena: &HaplotypeArena, allele: &Allele) -> usize {
        self.ids
            .iter()
            .filter(|&&id| arena.get(id).carries(allele))
            .count()
    }
}

impl std::fmt::Debug for Genotype {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Genotype{:?}", self.ids)
    }
}

/// The number of genotypes over num_elements elements at the given ploidy
///
/// This is the multiset coefficient C(num_elements + ploidy - 1, ploidy).
///
pub fn num_genotypes(num_elements: usize, ploidy: usize) -> usize {
    let n = num_elements + ploidy - 1;
    let mut result = 1usize;
    for i in 0..ploidy {
        result = result * (n - i) / (i + 1);
    }
    result
}

/// Enumerate all genotypes over haplotype ids [0, num_haplotypes) at the given ploidy
///
/// Genotypes are generated as non-decreasing id sequences, so the output order is deterministic
/// and duplicate-free.
///
pub fn generate_all_genotypes(num_haplotypes: usize, ploidy: usize) -> Vec<Genotype> {
    assert!(ploidy > 0);
    assert!(num_haplotypes > 0);
    let mut result = Vec::with_capacity(num_genotypes(num_haplotypes, ploidy));
    let mut current = vec![0; ploidy];
    loop {
        result.push(Genotype {
            ids: current.clone(),
        });

        // Advance to the next non-decreasing sequence
        let mut level = ploidy;
        loop {
            if level == 0 {
                return result;
            }
            level -= 1;
            if current[level] + 1 < num_haplotypes {
                current[level] += 1;
                for i in level + 1..ploidy {
                    current[i] = current[level];
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_genotypes() {
        // Diploid over n haplotypes: n(n+1)/2
        assert_eq!(num_genotypes(1, 2), 1);
        assert_eq!(num_genotypes(2, 2), 3);
        assert_eq!(num_genotypes(4, 2), 10);

        // Haploid is just the haplotype count
        assert_eq!(num_genotypes(5, 1), 5);

        // Triploid over 3
        assert_eq!(num_genotypes(3, 3), 10);
    }

    #[test]
    fn test_generate_all_genotypes() {
        let genotypes = generate_all_genotypes(3, 2);
        assert_eq!(genotypes.len(), num_genotypes(3, 2));

        // All distinct and all sorted
        for g in genotypes.iter() {
            assert!(g.ids.windows(2).all(|w| w[0] <= w[1]));
        }
        let mut dedup = genotypes.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), genotypes.len());
    }

    #[test]
    fn test_zygosity() {
        assert_eq!(Genotype::new(vec![1, 1]).zygosity(), 1);
        assert!(Genotype::new(vec![1, 1]).is_homozygous());
        assert_eq!(Genotype::new(vec![0, 1]).zygosity(), 2);
        assert_eq!(Genotype::new(vec![2, 0, 2, 1]).zygosity(), 3);
    }

    #[test]
    fn test_multiset_queries() {
        let g = Genotype::new(vec![2, 0, 2]);
        assert_eq!(g.ploidy(), 3);
        assert!(g.contains(0));
        assert!(!g.contains(1));
        assert_eq!(g.count(2), 2);
    }
}
