//! Diff scoring: mismatch percentage of a rendered page against the reference.

use crate::pixelmatch::{self, MatchOptions};
use crate::raster::{self, Raster};
use crate::{Error, Result};
use log::info;
use std::path::Path;

/// File name of the visual diff written next to each submission.
pub const DIFF_FILE: &str = "diff.png";

/// How to treat a rendered raster whose size differs from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimensionPolicy {
    /// Fail with [`Error::DimensionMismatch`].
    #[default]
    Strict,
    /// Compare the overlapping top-left region; every reference pixel outside
    /// it counts as mismatched.
    Crop,
}

/// Options for [`score`] and [`diff`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreOptions {
    pub matching: MatchOptions,
    pub dimension_policy: DimensionPolicy,
}

/// Result of comparing two rasters.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Number of mismatched pixels
    pub mismatched: u64,
    /// Visual diff, sized like the reference
    pub diff: Raster,
}

impl DiffOutcome {
    pub fn percentage(&self) -> f64 {
        percentage(self.mismatched, self.diff.width, self.diff.height)
    }
}

/// `mismatched / (width * height) * 100`; an empty reference scores 0.
pub fn percentage(mismatched: u64, width: u32, height: u32) -> f64 {
    let total = width as u64 * height as u64;
    if total == 0 {
        return 0.0;
    }
    mismatched as f64 / total as f64 * 100.0
}

/// Compare `rendered` against `reference` without touching the filesystem.
pub fn diff(reference: &Raster, rendered: &Raster, options: &ScoreOptions) -> Result<DiffOutcome> {
    if reference.dimensions() == rendered.dimensions() {
        let mut diff = Raster::blank(reference.width, reference.height);
        let mismatched = pixelmatch::compare(
            &reference.pixels,
            &rendered.pixels,
            Some(diff.pixels.as_mut_slice()),
            reference.width,
            reference.height,
            &options.matching,
        )?;
        return Ok(DiffOutcome {
            mismatched: mismatched as u64,
            diff,
        });
    }

    match options.dimension_policy {
        DimensionPolicy::Strict => Err(Error::DimensionMismatch {
            reference: reference.dimensions(),
            rendered: rendered.dimensions(),
        }),
        DimensionPolicy::Crop => diff_overlap(reference, rendered, &options.matching),
    }
}

fn diff_overlap(reference: &Raster, rendered: &Raster, matching: &MatchOptions) -> Result<DiffOutcome> {
    let w = reference.width.min(rendered.width);
    let h = reference.height.min(rendered.height);
    let ref_part = reference.crop(w, h);
    let ren_part = rendered.crop(w, h);

    let mut overlap = Raster::blank(w, h);
    let mut mismatched = pixelmatch::compare(
        &ref_part.pixels,
        &ren_part.pixels,
        Some(overlap.pixels.as_mut_slice()),
        w,
        h,
        matching,
    )? as u64;

    let [r, g, b] = matching.diff_color;
    let mut diff = Raster::blank(reference.width, reference.height);
    for y in 0..reference.height {
        for x in 0..reference.width {
            let dst = (y as usize * reference.width as usize + x as usize) * 4;
            if x < w && y < h {
                let src = (y as usize * w as usize + x as usize) * 4;
                diff.pixels[dst..dst + 4].copy_from_slice(&overlap.pixels[src..src + 4]);
            } else {
                diff.pixels[dst..dst + 4].copy_from_slice(&[r, g, b, 255]);
                mismatched += 1;
            }
        }
    }

    Ok(DiffOutcome { mismatched, diff })
}

/// Score a rendered page: compare, write `diff.png` into `output_dir` and
/// return the mismatch percentage. The diff file is fully written when this
/// returns.
pub async fn score(
    reference: &Raster,
    rendered: &Raster,
    output_dir: &Path,
    options: &ScoreOptions,
) -> Result<f64> {
    let outcome = diff(reference, rendered, options)?;
    info!("{}", outcome.mismatched);
    raster::save(&outcome.diff, output_dir.join(DIFF_FILE)).await?;
    Ok(outcome.percentage())
}
