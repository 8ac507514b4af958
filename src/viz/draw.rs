//! OpenCV rendering of match results.
//!
//! Layout of the combined view, one row per feature family:
//!     [ input image | reference image ]   lines between matched keypoints,
//!                                         family name in the top-left corner

use opencv::core::{self, Mat, Point, Scalar, Size, Vector};
use opencv::prelude::*;
use opencv::{features2d, imgproc};
use serde::Deserialize;

use crate::error::{MatchError, Result};
use crate::frontend::features::DetectResult;
use crate::frontend::matcher::MatcherResult;

/// What to do when the stacked view is taller than the requested maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Downscale {
    /// Never resize.
    #[default]
    Keep,
    /// Halve both dimensions once.
    Halve,
    /// Scale proportionally so the height equals the maximum.
    FitHeight,
}

/// Target size for an image of `rows x cols`, or `None` when it stays as is.
pub fn scaled_size(rows: i32, cols: i32, max_height: i32, policy: Downscale) -> Option<Size> {
    if max_height <= 0 || rows <= max_height || rows <= 0 {
        return None;
    }
    match policy {
        Downscale::Keep => None,
        Downscale::Halve => Some(Size::new((cols / 2).max(1), (rows / 2).max(1))),
        Downscale::FitHeight => {
            let scale = max_height as f64 / rows as f64;
            let width = (cols as f64 * scale).round().max(1.0) as i32;
            Some(Size::new(width, max_height))
        }
    }
}

pub fn downscale(image: Mat, max_height: i32, policy: Downscale) -> Result<Mat> {
    let Some(size) = scaled_size(image.rows(), image.cols(), max_height, policy) else {
        return Ok(image);
    };
    let mut resized = Mat::default();
    imgproc::resize(&image, &mut resized, size, 0.0, 0.0, imgproc::INTER_AREA)?;
    Ok(resized)
}

/// Concatenate images top to bottom. Narrower images are padded on the right
/// with black so every row has the width of the widest one.
pub fn stack_vertically(images: &[Mat]) -> Result<Mat> {
    let width = images.iter().map(|image| image.cols()).max().unwrap_or(0);
    let mut rows = Vector::<Mat>::new();
    for image in images {
        if image.cols() == width {
            rows.push(image.try_clone()?);
        } else {
            let mut padded = Mat::default();
            core::copy_make_border(
                image,
                &mut padded,
                0,
                0,
                0,
                width - image.cols(),
                core::BORDER_CONSTANT,
                Scalar::all(0.0),
            )?;
            rows.push(padded);
        }
    }

    let mut stacked = Mat::default();
    match rows.len() {
        0 => {}
        1 => stacked = rows.get(0)?,
        _ => core::vconcat(&rows, &mut stacked)?,
    }
    Ok(stacked)
}

fn check_indices(
    reference: &DetectResult<'_>,
    input: &DetectResult<'_>,
    matches: &MatcherResult<'_>,
) -> Result<()> {
    let n_input = input.keypoints.len() as i32;
    let n_reference = reference.keypoints.len() as i32;
    let bad = matches.matches.iter().find(|m| {
        m.query_idx < 0 || m.query_idx >= n_input || m.train_idx < 0 || m.train_idx >= n_reference
    });
    match bad {
        Some(m) => Err(MatchError::Rendering {
            family: input.name.to_string(),
            reason: format!(
                "match {}->{} outside {} input / {} reference keypoints",
                m.query_idx, m.train_idx, n_input, n_reference
            ),
        }),
        None => Ok(()),
    }
}

/// Draw one family: input on the left, reference on the right, matched
/// keypoints joined by lines and the family name written on top.
pub fn draw_single_result(
    reference: &DetectResult<'_>,
    input: &DetectResult<'_>,
    matches: &MatcherResult<'_>,
) -> Result<Mat> {
    let rendering = |reason: String| MatchError::Rendering {
        family: input.name.to_string(),
        reason,
    };
    if reference.image.empty() || input.image.empty() {
        return Err(rendering("no image processed yet".to_string()));
    }
    check_indices(reference, input, matches)?;

    let mut canvas = Mat::default();
    features2d::draw_matches_def(
        input.image,
        input.keypoints,
        reference.image,
        reference.keypoints,
        matches.matches,
        &mut canvas,
    )
    .map_err(|err| rendering(err.to_string()))?;

    imgproc::put_text(
        &mut canvas,
        input.name,
        Point::new(10, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        Scalar::all(0.0),
        2,
        imgproc::LINE_8,
        false,
    )
    .map_err(|err| rendering(err.to_string()))?;

    Ok(canvas)
}
