use shapemodels_core::PointCloud;
use std::fs;
use std::io::{self, BufWriter, Write as _};
use std::path::Path;

/// Write a vertex-only PLY file in ASCII format.
///
/// Per-point colours are written as `red green blue` uchar properties when
/// the cloud carries them. Coordinates are narrowed to `float`, which is what
/// common viewers expect.
pub fn write_ply(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    write_ply_to(&mut w, cloud)?;
    w.flush()
}

/// Same as [`write_ply`] but into any writer.
pub fn write_ply_to(w: &mut impl io::Write, cloud: &PointCloud) -> io::Result<()> {
    w.write_all(b"ply\n")?;
    w.write_all(b"format ascii 1.0\n")?;
    writeln!(w, "element vertex {}", cloud.len())?;
    w.write_all(b"property float x\n")?;
    w.write_all(b"property float y\n")?;
    w.write_all(b"property float z\n")?;

    if cloud.colors.is_some() {
        w.write_all(b"property uchar red\n")?;
        w.write_all(b"property uchar green\n")?;
        w.write_all(b"property uchar blue\n")?;
    }

    w.write_all(b"end_header\n")?;

    for i in 0..cloud.len() {
        write!(
            w,
            "{} {} {}",
            cloud.x[i] as f32, cloud.y[i] as f32, cloud.z[i] as f32
        )?;

        if let Some(ref colors) = cloud.colors {
            write!(w, " {} {} {}", colors.r[i], colors.g[i], colors.b[i])?;
        }

        w.write_all(b"\n")?;
    }

    Ok(())
}
