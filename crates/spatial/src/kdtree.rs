use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use shapemodels_core::PointCloud;
use std::num::NonZero;

/// Nearest neighbour hit: index into the indexed cloud and Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// A KdTree for nearest-neighbour queries on 3D point clouds.
///
/// Built on kiddo v5's `ImmutableKdTree`, built once from the cloud and never
/// modified afterwards. Stored items are `u32` indices back into the cloud.
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: ImmutableKdTree<f64, u32, 3, 32>,
    num_points: usize,
}

impl KdTree {
    pub fn build(cloud: &PointCloud) -> Self {
        let n = cloud.len();
        if n == 0 {
            return Self {
                tree: ImmutableKdTree::new_from_slice(&[]),
                num_points: 0,
            };
        }

        let points = cloud.to_points();
        let tree = ImmutableKdTree::new_from_slice(&points);

        Self {
            tree,
            num_points: n,
        }
    }

    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Find the `k` nearest neighbours to `query`.
    ///
    /// Returns `(indices, distances)` where distances are **Euclidean**
    /// (not squared), sorted in ascending order by distance.
    ///
    /// Edge cases:
    /// - Returns empty if `k == 0`, the tree is empty, or query is non-finite.
    /// - If `k > len()`, returns all points.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> (Vec<usize>, Vec<f64>) {
        let Some(nz_k) = NonZero::new(k) else {
            return (Vec::new(), Vec::new());
        };
        if self.is_empty() || !query.iter().all(|v| v.is_finite()) {
            return (Vec::new(), Vec::new());
        }

        let results = self.tree.nearest_n::<SquaredEuclidean>(query, nz_k);

        let mut indices = Vec::with_capacity(results.len());
        let mut distances = Vec::with_capacity(results.len());
        for nn in results {
            indices.push(nn.item as usize);
            distances.push(nn.distance.sqrt());
        }

        (indices, distances)
    }

    /// The single closest point to `query`, or `None` when the tree is empty
    /// or the query is non-finite.
    pub fn nearest(&self, query: &[f64; 3]) -> Option<Neighbor> {
        let (indices, distances) = self.knn(query, 1);
        match (indices.first(), distances.first()) {
            (Some(&index), Some(&distance)) => Some(Neighbor { index, distance }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KdTree;
    use shapemodels_core::PointCloud;
    use proptest::prelude::*;

    #[test]
    fn knn_returns_expected_neighbors() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, 1.0, 2.0, 10.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
        );
        let tree = KdTree::build(&cloud);
        let (idx, dist) = tree.knn(&[0.2, 0.0, 0.0], 2);
        assert_eq!(idx, vec![0, 1]);
        assert!(dist[0] <= dist[1]);
    }

    #[test]
    fn nearest_reports_euclidean_distance() {
        let cloud = PointCloud::from_xyz(vec![0.0, 3.0], vec![0.0, 4.0], vec![0.0, 0.0]);
        let tree = KdTree::build(&cloud);
        let hit = tree.nearest(&[3.0, 4.0, 1.0]).unwrap();
        assert_eq!(hit.index, 1);
        assert!((hit.distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_on_empty_tree_is_none() {
        let tree = KdTree::build(&PointCloud::new());
        assert!(tree.is_empty());
        assert!(tree.nearest(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn knn_k_zero() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], 0);
        assert!(idx.is_empty());
        assert!(dist.is_empty());
    }

    #[test]
    fn knn_nan_query() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        let (idx, dist) = tree.knn(&[f64::NAN, 0.0, 0.0], 1);
        assert!(idx.is_empty());
        assert!(dist.is_empty());
        assert!(tree.nearest(&[f64::INFINITY, 0.0, 0.0]).is_none());
    }

    #[test]
    fn knn_k_larger_than_cloud() {
        let cloud = PointCloud::from_xyz(vec![0.0, 1.0, 2.0], vec![0.0; 3], vec![0.0; 3]);
        let tree = KdTree::build(&cloud);
        let (idx, _dist) = tree.knn(&[0.0, 0.0, 0.0], 100);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn knn_distances_are_sorted() {
        let cloud = PointCloud::from_xyz(vec![0.0, 3.0, 1.0, 7.0, 2.0], vec![0.0; 5], vec![0.0; 5]);
        let tree = KdTree::build(&cloud);
        let (_idx, dist) = tree.knn(&[0.5, 0.0, 0.0], 5);
        for w in dist.windows(2) {
            assert!(w[0] <= w[1], "distances not sorted: {:?}", dist);
        }
    }

    proptest! {
        #[test]
        fn nearest_matches_brute_force(
            pts in prop::collection::vec(
                (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0),
                1..200
            ),
            q in (-120.0f64..120.0, -120.0f64..120.0, -120.0f64..120.0),
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let tree = KdTree::build(&cloud);
            let query = [q.0, q.1, q.2];
            let hit = tree.nearest(&query).unwrap();

            let brute = cloud
                .iter_points()
                .map(|p| {
                    let d = [p[0] - query[0], p[1] - query[1], p[2] - query[2]];
                    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            prop_assert!((hit.distance - brute).abs() < 1e-9);
        }

        #[test]
        fn knn_returns_at_most_k_results(
            pts in prop::collection::vec(
                (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0),
                1..200
            ),
            k in 1usize..50,
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let tree = KdTree::build(&cloud);
            let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], k);
            prop_assert!(idx.len() <= k);
            prop_assert!(idx.len() <= pts.len());
            prop_assert_eq!(idx.len(), dist.len());
        }
    }
}
