use crate::PointCloud;

/// Points paired with the reference-point IDs they correspond to.
///
/// IDs need not be unique or sorted; a partial observation of a shape lists
/// only the points that were actually measured.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPoints {
    pub ids: Vec<usize>,
    pub cloud: PointCloud,
}

impl IndexedPoints {
    pub fn new(ids: Vec<usize>, cloud: PointCloud) -> Self {
        assert_eq!(
            ids.len(),
            cloud.len(),
            "every point needs exactly one reference id"
        );
        Self { ids, cloud }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, [f64; 3])> + '_ {
        self.ids.iter().copied().zip(self.cloud.iter_points())
    }
}
