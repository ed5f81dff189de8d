use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;

/// Outcome of running one job per input file.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<(PathBuf, anyhow::Error)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Turn collected failures into a single error.
    pub fn into_result(self) -> Result<usize> {
        if self.failures.is_empty() {
            Ok(self.succeeded)
        } else {
            bail!("{} of {} files failed", self.failures.len(), self.total())
        }
    }
}

/// Files to process for `input`: the file itself, or every `.pts` file in a
/// directory sorted by name.
pub fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input path {} does not exist", input.display());
    }

    let mut files = Vec::new();
    let entries =
        fs::read_dir(input).with_context(|| format!("cannot list {}", input.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("cannot list {}", input.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "pts") {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("no .pts files found in {}", input.display());
    }
    Ok(files)
}

/// Run `job` on every file in parallel.
///
/// A failing file is logged and recorded; it never stops the other files.
pub fn run_batch<F>(files: &[PathBuf], job: F) -> BatchReport
where
    F: Fn(&Path) -> Result<()> + Sync,
{
    let outcomes: Vec<(PathBuf, Result<()>)> = files
        .par_iter()
        .map(|path| (path.clone(), job(path)))
        .collect();

    let mut report = BatchReport::default();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(()) => report.succeeded += 1,
            Err(err) => {
                error!(file = %path.display(), "{err:#}");
                report.failures.push((path, err));
            }
        }
    }
    report
}

/// File stem used to name outputs derived from `path`.
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}
