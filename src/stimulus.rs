//! Stimulus preparation: spatial padding, sliding windows of frames and per-type preprocessing.
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{s, Array2, Array3, ArrayD, ArrayView2, ArrayView3, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::error::IntrError;

/// Spatial size of the stimuli presented to deep retina models.
pub const EDGE_SIZE: usize = 50;
/// Spatial size of the full-field flashes.
pub const FLASH_SIZE: usize = 38;
/// Number of neighbouring bar positions averaged together in the moving bar stimulus.
pub const MOVINGBAR_BLOCK: usize = 6;
/// Temporal upsampling factor of the moving bar stimulus.
pub const MOVINGBAR_UPSAMPLE: usize = 5;

/// The kinds of stimuli presented to the recorded interneurons.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimKind {
    Boxes,
    Flashes,
    MovingBar,
    Lines,
}

impl FromStr for StimKind {
    type Err = IntrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boxes" => Ok(StimKind::Boxes),
            "flashes" => Ok(StimKind::Flashes),
            "movingbar" => Ok(StimKind::MovingBar),
            "lines" => Ok(StimKind::Lines),
            other => Err(IntrError::InvalidParameter(format!(
                "invalid stim type {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StimKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StimKind::Boxes => "boxes",
            StimKind::Flashes => "flashes",
            StimKind::MovingBar => "movingbar",
            StimKind::Lines => "lines",
        };
        write!(f, "{}", name)
    }
}

/// Zero-pads the spatial dimensions of a (time, height, width) stimulus to (height, width), keeping it centered.
/// A stimulus at least as large as the target in both dimensions is returned as is.
pub fn spatial_pad(
    stim: ArrayView3<f64>,
    height: usize,
    width: usize,
) -> Result<Array3<f64>, IntrError> {
    let (time, stim_height, stim_width) = stim.dim();
    if stim_height >= height && stim_width >= width {
        return Ok(stim.to_owned());
    }
    if stim_height > height || stim_width > width {
        return Err(IntrError::ShapeMismatch(format!(
            "cannot pad a {}x{} stimulus to {}x{}",
            stim_height, stim_width, height, width
        )));
    }

    let y_start = (height - stim_height) / 2;
    let x_start = (width - stim_width) / 2;
    let mut padded = Array3::zeros((time, height, width));
    padded
        .slice_mut(s![
            ..,
            y_start..y_start + stim_height,
            x_start..x_start + stim_width
        ])
        .assign(&stim);
    Ok(padded)
}

/// Pads the spatial dimensions of a stimulus to 50x50, unless one of them already reaches 50.
pub fn pad_to_edge(stim: ArrayView3<f64>) -> Result<Array3<f64>, IntrError> {
    let (_, height, width) = stim.dim();
    if height >= EDGE_SIZE || width >= EDGE_SIZE {
        return Ok(stim.to_owned());
    }
    spatial_pad(stim, EDGE_SIZE, EDGE_SIZE)
}

/// The number of windows of `depth` consecutive frames in a stimulus of `time` frames.
pub fn num_windows(time: usize, depth: usize) -> Result<usize, IntrError> {
    if depth == 0 || depth > time {
        return Err(IntrError::InvalidParameter(format!(
            "cannot fit windows of depth {} in a stimulus of {} frames",
            depth, time
        )));
    }
    Ok(time - depth + 1)
}

/// Stacks every window of `depth` consecutive frames: window `i` holds frames `i..i + depth`.
/// The output has shape (time - depth + 1, depth, ...).
pub fn rolling_window(stim: ArrayViewD<f64>, depth: usize) -> Result<ArrayD<f64>, IntrError> {
    let total = num_windows(stim.len_of(Axis(0)), depth)?;
    rolling_window_range(stim, depth, 0..total)
}

/// Stacks the windows `range` of `depth` consecutive frames, see [`rolling_window`].
pub fn rolling_window_range(
    stim: ArrayViewD<f64>,
    depth: usize,
    range: Range<usize>,
) -> Result<ArrayD<f64>, IntrError> {
    let total = num_windows(stim.len_of(Axis(0)), depth)?;
    if range.start > range.end || range.end > total {
        return Err(IntrError::InvalidParameter(format!(
            "windows {:?} out of the {} available",
            range, total
        )));
    }

    let mut shape = vec![range.len(), depth];
    shape.extend_from_slice(&stim.shape()[1..]);
    let mut windows = ArrayD::zeros(IxDyn(&shape));
    for (mut window, start) in windows.outer_iter_mut().zip(range) {
        window.assign(&stim.slice_axis(Axis(0), Slice::from(start..start + depth)));
    }
    Ok(windows)
}

fn as_trace_matrix(raw: &ArrayViewD<f64>, kind: StimKind) -> Result<Array2<f64>, IntrError> {
    raw.view()
        .into_dimensionality()
        .map(|view: ArrayView2<f64>| view.to_owned())
        .map_err(|_| {
            IntrError::ShapeMismatch(format!(
                "{} stimulus must have shape (time, space), found {:?}",
                kind,
                raw.shape()
            ))
        })
}

/// Turns a raw recorded stimulus into a (time, height, width) movie.
///
/// - boxes: rescaled from {0, 1} to {-1, 1}
/// - flashes: a full-field intensity trace broadcast to 38x38 frames
/// - movingbar: bar positions averaged by blocks of 6, upsampled 5 times in time and repeated along the columns
/// - lines: smoothed with a 2-tap average, subsampled by 2 and repeated along the rows
pub fn prepare_stim(raw: ArrayViewD<f64>, kind: StimKind) -> Result<Array3<f64>, IntrError> {
    match kind {
        StimKind::Boxes => {
            let raw: ArrayView3<f64> = raw.into_dimensionality().map_err(|_| {
                IntrError::ShapeMismatch("boxes stimulus must have shape (time, height, width)".to_string())
            })?;
            Ok(raw.mapv(|v| 2.0 * v - 1.0))
        }
        StimKind::Flashes => {
            let time = raw.shape().first().copied().unwrap_or(0);
            if raw.ndim() == 0 || raw.len() != time {
                return Err(IntrError::ShapeMismatch(format!(
                    "flashes stimulus must hold one intensity per frame, found shape {:?}",
                    raw.shape()
                )));
            }
            let trace: Vec<f64> = raw.iter().copied().collect();
            Ok(Array3::from_shape_fn((time, FLASH_SIZE, FLASH_SIZE), |(t, _, _)| trace[t]))
        }
        StimKind::MovingBar => {
            let raw = as_trace_matrix(&raw, kind)?;
            let (time, positions) = raw.dim();
            let blocks = (positions + MOVINGBAR_BLOCK - 1) / MOVINGBAR_BLOCK;
            // incomplete trailing blocks are padded with zeros
            let reduced = Array2::from_shape_fn((time, blocks), |(t, b)| {
                let end = ((b + 1) * MOVINGBAR_BLOCK).min(positions);
                raw.slice(s![t, b * MOVINGBAR_BLOCK..end]).sum() / MOVINGBAR_BLOCK as f64
            });
            Ok(Array3::from_shape_fn(
                (time * MOVINGBAR_UPSAMPLE, blocks, blocks),
                |(t, row, _)| reduced[[t / MOVINGBAR_UPSAMPLE, row]],
            ))
        }
        StimKind::Lines => {
            let raw = as_trace_matrix(&raw, kind)?;
            let (time, positions) = raw.dim();
            let width = (positions + 1) / 2;
            let lines = Array2::from_shape_fn((time, width), |(t, c)| {
                let x = 2 * c;
                let prev = if x > 0 { raw[[t, x - 1]] } else { 0.0 };
                0.5 * (raw[[t, x]] + prev)
            });
            Ok(Array3::from_shape_fn((time, width, width), |(t, _, col)| {
                lines[[t, col]]
            }))
        }
    }
}
