use shapemodels_core::{IndexedPoints, PointCloud};
use std::fs;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use crate::error::{FieldSpec, PtsError};

const PLAIN_FIELDS: FieldSpec = FieldSpec::AtLeast(3);
const INDEXED_FIELDS: FieldSpec = FieldSpec::Exactly(4);

/// Reads a plain `.pts` file: one `x y z` point per line.
///
/// Blank lines are skipped. Extra fields after the third are ignored; fewer
/// than three rejects the whole file.
pub fn read_pts(path: impl AsRef<Path>) -> Result<PointCloud, PtsError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| PtsError::io(path, e))?;
    parse_pts(&text, path)
}

/// Reads an indexed `.pts` file: one `x y z index` point per line.
///
/// Every non-empty line must have exactly four fields, the last one a
/// non-negative integer reference-point ID.
pub fn read_indexed_pts(path: impl AsRef<Path>) -> Result<IndexedPoints, PtsError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| PtsError::io(path, e))?;
    parse_indexed_pts(&text, path)
}

/// Parses plain `.pts` content. `origin` is only used to label errors.
pub fn parse_pts(text: &str, origin: &Path) -> Result<PointCloud, PtsError> {
    let mut points = Vec::new();

    for (line_no, fields) in data_lines(text) {
        check_field_count(origin, line_no, PLAIN_FIELDS, fields.len())?;
        points.push(parse_xyz(origin, line_no, &fields)?);
    }

    if points.is_empty() {
        return Err(PtsError::Empty {
            path: origin.to_path_buf(),
        });
    }

    Ok(PointCloud::from_points(&points))
}

/// Parses indexed `.pts` content. `origin` is only used to label errors.
pub fn parse_indexed_pts(text: &str, origin: &Path) -> Result<IndexedPoints, PtsError> {
    let mut points = Vec::new();
    let mut ids = Vec::new();

    for (line_no, fields) in data_lines(text) {
        check_field_count(origin, line_no, INDEXED_FIELDS, fields.len())?;
        points.push(parse_xyz(origin, line_no, &fields)?);
        let id = fields[3]
            .parse::<usize>()
            .map_err(|_| PtsError::InvalidNumber {
                path: origin.to_path_buf(),
                line: line_no,
                token: fields[3].to_string(),
                kind: "point index",
            })?;
        ids.push(id);
    }

    if points.is_empty() {
        return Err(PtsError::Empty {
            path: origin.to_path_buf(),
        });
    }

    Ok(IndexedPoints::new(ids, PointCloud::from_points(&points)))
}

/// Writes a plain `.pts` file.
pub fn write_pts(path: impl AsRef<Path>, cloud: &PointCloud) -> Result<(), PtsError> {
    let path = path.as_ref();
    write_lines(path, cloud.iter_points().map(|p| (p, None)))
}

/// Writes an indexed `.pts` file.
pub fn write_indexed_pts(path: impl AsRef<Path>, points: &IndexedPoints) -> Result<(), PtsError> {
    let path = path.as_ref();
    write_lines(path, points.iter().map(|(id, p)| (p, Some(id))))
}

// --- Internal helpers ---

/// Non-empty lines with their 1-based line numbers, split on whitespace.
fn data_lines<'a>(text: &'a str) -> impl Iterator<Item = (usize, Vec<&'a str>)> + 'a {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, fields)| !fields.is_empty())
}

fn check_field_count(
    origin: &Path,
    line: usize,
    expected: FieldSpec,
    found: usize,
) -> Result<(), PtsError> {
    if expected.accepts(found) {
        Ok(())
    } else {
        Err(PtsError::FieldCount {
            path: origin.to_path_buf(),
            line,
            expected,
            found,
        })
    }
}

fn parse_xyz(origin: &Path, line: usize, fields: &[&str]) -> Result<[f64; 3], PtsError> {
    let mut p = [0.0; 3];
    for (axis, token) in fields.iter().take(3).enumerate() {
        p[axis] = token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PtsError::InvalidNumber {
                path: origin.to_path_buf(),
                line,
                token: token.to_string(),
                kind: "coordinate",
            })?;
    }
    Ok(p)
}

fn write_lines(
    path: &Path,
    rows: impl Iterator<Item = ([f64; 3], Option<usize>)>,
) -> Result<(), PtsError> {
    let file = fs::File::create(path).map_err(|e| PtsError::io(path, e))?;
    let mut w = BufWriter::new(file);

    for (p, id) in rows {
        let res = match id {
            Some(id) => writeln!(w, "{} {} {} {}", p[0], p[1], p[2], id),
            None => writeln!(w, "{} {} {}", p[0], p[1], p[2]),
        };
        res.map_err(|e| PtsError::io(path, e))?;
    }

    w.flush().map_err(|e| PtsError::io(path, e))
}
