use anyhow::{Context, Result};
use shapemodels_core::{Colors, PointCloud};
use shapemodels_io::write_ply;
use std::path::PathBuf;
use tracing::info;

/// A named cloud handed to a visualizer.
pub type Layer<'a> = (&'a str, &'a PointCloud);

/// Receives the clouds involved in one fit.
pub trait Visualizer: Send + Sync {
    fn show(&self, stem: &str, layers: &[Layer<'_>]) -> Result<()>;
}

/// Logs a one-line summary per layer.
#[derive(Debug, Default)]
pub struct LogVisualizer;

impl Visualizer for LogVisualizer {
    fn show(&self, stem: &str, layers: &[Layer<'_>]) -> Result<()> {
        for (label, cloud) in layers {
            let c = centroid(cloud);
            info!(
                stem,
                layer = *label,
                points = cloud.len(),
                centroid = ?c,
                "scene layer"
            );
        }
        Ok(())
    }
}

const PALETTE: [[u8; 3]; 6] = [
    [230, 25, 75],
    [60, 180, 75],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
];

/// Writes all layers into one coloured `<stem>_scene.ply`.
#[derive(Debug)]
pub struct PlySceneVisualizer {
    output_dir: PathBuf,
}

impl PlySceneVisualizer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn scene_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join(format!("{stem}_scene.ply"))
    }
}

impl Visualizer for PlySceneVisualizer {
    fn show(&self, stem: &str, layers: &[Layer<'_>]) -> Result<()> {
        let scene = compose_scene(layers);
        let path = self.scene_path(stem);
        write_ply(&path, &scene).with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), layers = layers.len(), "wrote scene");
        Ok(())
    }
}

/// Merge layers into one cloud, colouring each layer from the palette.
pub fn compose_scene(layers: &[Layer<'_>]) -> PointCloud {
    let mut scene = PointCloud::new();
    scene.colors = Some(Colors::uniform([0, 0, 0], 0));
    for (i, (_, cloud)) in layers.iter().enumerate() {
        let mut layer = PointCloud::from_xyz(cloud.x.clone(), cloud.y.clone(), cloud.z.clone());
        layer.colors = Some(Colors::uniform(PALETTE[i % PALETTE.len()], cloud.len()));
        scene.extend(&layer);
    }
    scene
}

fn centroid(cloud: &PointCloud) -> [f64; 3] {
    if cloud.is_empty() {
        return [0.0; 3];
    }
    let n = cloud.len() as f64;
    [
        cloud.x.iter().sum::<f64>() / n,
        cloud.y.iter().sum::<f64>() / n,
        cloud.z.iter().sum::<f64>() / n,
    ]
}
