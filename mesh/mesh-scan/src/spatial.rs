//! Nearest-neighbour queries over point positions.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point3;

/// Golden-ratio increments used to spread key perturbations.
const KEY_STEPS: [f64; 3] = [
    0.618_033_988_749_895,
    0.754_877_666_246_693,
    0.569_840_290_998_053,
];

/// A KD-tree over a fixed set of positions, returning indices into them.
///
/// Image-derived clouds are sampled on a regular grid and a flat image puts
/// every sample at the same depth. kiddo cannot split a bucket whose entries
/// all share a coordinate, so each key is offset by a tiny index-dependent
/// amount, a billionth of the cloud extent at most.
pub(crate) struct PointIndex {
    tree: KdTree<f64, 3>,
    jitter: f64,
}

/// A neighbour found by [`PointIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Neighbor {
    pub index: usize,
    pub distance_sq: f64,
}

impl PointIndex {
    pub(crate) fn build<'a, I>(positions: I, extent: f64) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
    {
        let jitter = 1e-9 * extent.max(1.0);
        let mut tree: KdTree<f64, 3> = KdTree::new();
        for (i, p) in positions.into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let key = key_for(p, i as f64, jitter);
            tree.add(&key, i as u64);
        }
        Self { tree, jitter }
    }

    /// Up to `k` nearest neighbours of `query`, closest first.
    pub(crate) fn nearest_n(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        self.tree
            .nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k)
            .into_iter()
            .map(|n| neighbor(n.item, n.distance))
            .collect()
    }

    /// Up to `k` nearest neighbours no further than `radius` from `query`.
    pub(crate) fn nearest_within(
        &self,
        query: &Point3<f64>,
        radius: f64,
        k: usize,
    ) -> Vec<Neighbor> {
        // Allow for the key perturbation on both ends.
        let reach = radius + 4.0 * self.jitter;
        let max_sq = reach * reach;
        let mut found = self.nearest_n(query, k);
        found.retain(|n| n.distance_sq <= max_sq);
        found
    }

    /// The single closest entry, or `None` for an empty index.
    pub(crate) fn nearest_one(&self, query: &Point3<f64>) -> Option<Neighbor> {
        if self.tree.size() == 0 {
            return None;
        }
        let n = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        Some(neighbor(n.item, n.distance))
    }
}

fn key_for(p: &Point3<f64>, i: f64, jitter: f64) -> [f64; 3] {
    let offset = |axis: usize| (i * KEY_STEPS[axis]).fract() * jitter;
    [p.x + offset(0), p.y + offset(1), p.z + offset(2)]
}

#[allow(clippy::cast_possible_truncation)]
const fn neighbor(item: u64, distance_sq: f64) -> Neighbor {
    Neighbor {
        index: item as usize,
        distance_sq,
    }
}
