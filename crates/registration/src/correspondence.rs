use shapemodels_core::PointCloud;
use shapemodels_spatial::KdTree;

/// A tracked reference point matched to its nearest target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub point_id: usize,
    pub target_index: usize,
    pub distance: f64,
}

/// Match each tracked point of `current` to its nearest neighbor in the
/// target cloud (represented by its KdTree).
///
/// `current` is indexed by reference point ID. IDs whose query has no
/// neighbor (empty tree) are skipped.
pub fn find_correspondences(
    current: &PointCloud,
    point_ids: &[usize],
    target_tree: &KdTree,
) -> Vec<Correspondence> {
    let mut correspondences = Vec::with_capacity(point_ids.len());

    for &id in point_ids {
        if let Some(nn) = target_tree.nearest(&current.point(id)) {
            correspondences.push(Correspondence {
                point_id: id,
                target_index: nn.index,
                distance: nn.distance,
            });
        }
    }

    correspondences
}

/// Reference points closest to some target point, deduplicated and in
/// ascending order.
///
/// These are the points an ICP fit tracks when no explicit IDs are given.
pub fn nearest_reference_ids(reference: &PointCloud, target: &PointCloud) -> Vec<usize> {
    let tree = KdTree::build(reference);
    let mut ids: Vec<usize> = target
        .iter_points()
        .filter_map(|p| tree.nearest(&p))
        .map(|nn| nn.index)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub fn total_squared_distance(correspondences: &[Correspondence]) -> f64 {
    correspondences.iter().map(|c| c.distance * c.distance).sum()
}

/// Root mean square correspondence distance.
pub(crate) fn compute_rmse(correspondences: &[Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    (total_squared_distance(correspondences) / correspondences.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(xs: &[f64]) -> PointCloud {
        PointCloud::from_xyz(xs.to_vec(), vec![0.0; xs.len()], vec![0.0; xs.len()])
    }

    #[test]
    fn identical_clouds_match_by_index() {
        let cloud = line(&[0.0, 1.0, 2.0]);
        let tree = KdTree::build(&cloud);

        let corrs = find_correspondences(&cloud, &[0, 1, 2], &tree);

        assert_eq!(corrs.len(), 3);
        for c in &corrs {
            assert_eq!(c.point_id, c.target_index);
            assert!(c.distance.abs() < 1e-12, "expected distance ~0, got {}", c.distance);
        }
    }

    #[test]
    fn only_tracked_ids_are_matched() {
        let current = line(&[0.0, 1.0, 10.0]);
        let target = line(&[0.0, 1.0, 2.0]);
        let tree = KdTree::build(&target);

        let corrs = find_correspondences(&current, &[2, 0], &tree);

        assert_eq!(corrs.len(), 2);
        assert_eq!(corrs[0].point_id, 2);
        assert_eq!(corrs[0].target_index, 2);
        assert_relative_eq!(corrs[0].distance, 8.0, epsilon = 1e-12);
        assert_eq!(corrs[1].point_id, 0);
        assert_relative_eq!(total_squared_distance(&corrs), 64.0, epsilon = 1e-9);
        assert_relative_eq!(compute_rmse(&corrs), 32.0f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn empty_target_gives_no_correspondences() {
        let current = line(&[1.0]);
        let tree = KdTree::build(&PointCloud::new());

        assert!(find_correspondences(&current, &[0], &tree).is_empty());
        assert_eq!(compute_rmse(&[]), 0.0);
    }

    #[test]
    fn nearest_reference_ids_are_unique_and_sorted() {
        let reference = line(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let target = line(&[3.9, 0.1, 4.2, -1.0, 2.1]);

        assert_eq!(nearest_reference_ids(&reference, &target), vec![0, 2, 4]);
    }
}
