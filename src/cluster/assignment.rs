use super::dbscan::NOISE;
use std::collections::BTreeMap;

/// One cluster label per surviving image, in input order.
///
/// Labels are dense `0..n_clusters()`; density-based clustering may also produce
/// [`NOISE`] for images that belong to no cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
}

impl ClusterAssignment {
    /// Wrap raw labels.
    pub fn new(labels: Vec<usize>) -> Self {
        Self { labels }
    }

    /// Raw labels, [`NOISE`] included.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Label of the `i`-th image, or `None` if it is noise.
    pub fn get(&self, i: usize) -> Option<usize> {
        self.labels.get(i).copied().filter(|&l| l != NOISE)
    }

    /// Number of labelled images (noise included).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no labels at all.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether the `i`-th image is noise.
    pub fn is_noise(&self, i: usize) -> bool {
        self.labels.get(i) == Some(&NOISE)
    }

    /// Number of distinct clusters, noise excluded.
    pub fn n_clusters(&self) -> usize {
        self.groups().len()
    }

    /// Number of noise images.
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    /// Image indices per cluster, noise excluded, ordered by label.
    pub fn groups(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &l) in self.labels.iter().enumerate() {
            if l != NOISE {
                groups.entry(l).or_default().push(i);
            }
        }
        groups
    }

    /// Index groupings independent of label numbering.
    ///
    /// Two assignments describe the same partition exactly when their partitions are equal.
    pub fn partition(&self) -> Vec<Vec<usize>> {
        let mut parts: Vec<Vec<usize>> = self.groups().into_values().collect();
        parts.sort();
        parts
    }

    /// Iterate `(image index, label)` pairs, noise as `None`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, &l)| (i, (l != NOISE).then_some(l)))
    }
}

impl From<Vec<usize>> for ClusterAssignment {
    fn from(labels: Vec<usize>) -> Self {
        Self::new(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_groups() {
        let a = ClusterAssignment::new(vec![1, 0, NOISE, 1, 0, NOISE]);
        assert_eq!(a.len(), 6);
        assert_eq!(a.n_clusters(), 2);
        assert_eq!(a.noise_count(), 2);
        assert!(a.is_noise(2));
        assert!(!a.is_noise(0));
        assert_eq!(a.get(0), Some(1));
        assert_eq!(a.get(2), None);
        assert_eq!(a.groups()[&0], vec![1, 4]);
        assert_eq!(a.groups()[&1], vec![0, 3]);
    }

    #[test]
    fn partition_ignores_numbering() {
        let a = ClusterAssignment::new(vec![0, 0, 1, 1, 2]);
        let b = ClusterAssignment::new(vec![2, 2, 0, 0, 1]);
        assert_ne!(a, b);
        assert_eq!(a.partition(), b.partition());
    }

    #[test]
    fn iter_marks_noise() {
        let a = ClusterAssignment::from(vec![0, NOISE]);
        let pairs: Vec<_> = a.iter().collect();
        assert_eq!(pairs, vec![(0, Some(0)), (1, None)]);
    }
}
