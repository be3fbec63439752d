//! Exhaustive search for the model units best correlated with a membrane potential.
//!
//! A response tensor has time as its leading axis, followed by a channel axis and any number of
//! spatial axes. A unit is addressed by its index over every axis but time.
//!
//! Every unit is visited in row-major order (lowest channel first). A unit only replaces the running
//! best if its score is a number, strictly below 1, and strictly greater than the best so far: among
//! equal scores the first visited unit wins.
//!
//! # Examples
//!
//! ```rust
//! use ndarray::{array, Array3};
//! use retina_intr::search::best_overall;
//!
//! let mem_pot = array![0.0, 1.0, 0.5, 2.0, 1.5, 3.0];
//!
//! // 2 channels of 2 units each
//! let mut response = Array3::<f64>::zeros((6, 2, 2));
//! for t in 0..6 {
//!     response[[t, 0, 0]] = (t % 2) as f64;
//!     response[[t, 1, 1]] = mem_pot[t] + 0.1 * (t % 3) as f64;
//! }
//!
//! let best = best_overall(mem_pot.view(), &response.view().into_dyn(), false).unwrap();
//! assert_eq!(best.index, vec![1, 1]);
//! assert!(best.score > 0.9);
//! ```
use std::collections::BTreeMap;

use ndarray::{ArrayView1, ArrayViewD, Axis, Ix1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correlation::correlate;
use crate::error::IntrError;
use crate::response::{truncate_time, Responses};

/// Minimum number of channels to search them in parallel.
pub const MIN_PARALLEL_CHANNELS: usize = 8;

/// The index of a unit over the non-time axes of a response: (channel, spatial...).
pub type UnitIndex = Vec<usize>;

/// A unit and its correlation with the reference signal.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BestUnit {
    pub score: f64,
    pub index: UnitIndex,
}

impl BestUnit {
    /// The channel of the unit, if the index is not empty.
    pub fn chan(&self) -> Option<usize> {
        self.index.first().copied()
    }

    /// The spatial coordinates of the unit within its channel.
    pub fn spatial(&self) -> &[usize] {
        self.index.get(1..).unwrap_or(&[])
    }

    /// The (row, col) coordinates of the unit. Only defined for channels with two spatial axes.
    pub fn row_col(&self) -> Result<(usize, usize), IntrError> {
        match self.spatial() {
            [row, col] => Ok((*row, *col)),
            other => Err(IntrError::ShapeMismatch(format!(
                "expected a (row, col) unit position, found {} spatial coordinates",
                other.len()
            ))),
        }
    }
}

/// The best unit found in a named layer.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LayerBest {
    pub layer: String,
    pub unit: BestUnit,
}

/// The best unit of one channel, as (row, col, score).
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelStat {
    pub row: usize,
    pub col: usize,
    pub score: f64,
}

fn improves(score: f64, best: f64) -> bool {
    !score.is_nan() && score < 1.0 && score > best
}

/// Keep the first candidate with the highest valid score.
fn select_best(candidates: impl IntoIterator<Item = BestUnit>) -> Option<BestUnit> {
    let mut best: Option<BestUnit> = None;
    let mut max_r = f64::NEG_INFINITY;
    for candidate in candidates {
        if improves(candidate.score, max_r) {
            max_r = candidate.score;
            best = Some(candidate);
        }
    }
    best
}

/// The time signal of the unit at `index`, obtained by indexing every non-time axis in order.
pub fn unit_signal<'a>(
    response: &ArrayViewD<'a, f64>,
    index: &[usize],
) -> Result<ArrayView1<'a, f64>, IntrError> {
    if response.ndim() != index.len() + 1 {
        return Err(IntrError::ShapeMismatch(format!(
            "unit index {:?} does not address a response of shape {:?}",
            index,
            response.shape()
        )));
    }

    let mut signal = response.clone();
    for &i in index {
        let size = signal.len_of(Axis(1));
        if i >= size {
            return Err(IntrError::ShapeMismatch(format!(
                "unit index {:?} out of bounds for a response of shape {:?}",
                index,
                response.shape()
            )));
        }
        signal = signal.index_axis_move(Axis(1), i);
    }
    Ok(signal.into_dimensionality::<Ix1>()?)
}

/// Searches the units of `response` whose index starts with `prefix` and spans `trailing_shape`
/// on the remaining axes, and returns the one best correlated with the reference.
///
/// The prefix and the trailing shape must cover every non-time axis of the response, and the
/// trailing shape must match the sizes of the axes it spans. With an empty trailing shape, the
/// prefix addresses a single unit whose score is returned as is.
pub fn best_unit(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
    trailing_shape: &[usize],
    prefix: &[usize],
    abs_val: bool,
) -> Result<BestUnit, IntrError> {
    if response.ndim() != prefix.len() + trailing_shape.len() + 1 {
        return Err(IntrError::ShapeMismatch(format!(
            "prefix {:?} and trailing shape {:?} do not span the unit axes of a response of shape {:?}",
            prefix,
            trailing_shape,
            response.shape()
        )));
    }
    if &response.shape()[prefix.len() + 1..] != trailing_shape {
        return Err(IntrError::ShapeMismatch(format!(
            "trailing shape {:?} does not match the response shape {:?}",
            trailing_shape,
            response.shape()
        )));
    }
    if reference.len() != response.len_of(Axis(0)) {
        return Err(IntrError::LengthMismatch {
            reference: reference.len(),
            candidate: response.len_of(Axis(0)),
        });
    }

    let mut index = prefix.to_vec();
    search_units(reference, response, trailing_shape, &mut index, abs_val)
}

fn search_units(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
    trailing_shape: &[usize],
    index: &mut UnitIndex,
    abs_val: bool,
) -> Result<BestUnit, IntrError> {
    let (&size, rest) = match trailing_shape.split_first() {
        Some(split) => split,
        None => {
            let score = correlate(reference, unit_signal(response, index)?, abs_val)?;
            return Ok(BestUnit {
                score,
                index: index.clone(),
            });
        }
    };

    let mut best: Option<BestUnit> = None;
    let mut max_r = f64::NEG_INFINITY;
    for i in 0..size {
        index.push(i);
        let candidate = search_units(reference, response, rest, index, abs_val)?;
        index.pop();
        if improves(candidate.score, max_r) {
            max_r = candidate.score;
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| {
        IntrError::ShapeMismatch(format!(
            "no unit to search below index {:?} in a response of shape {:?}",
            index,
            response.shape()
        ))
    })
}

pub(crate) fn check_channel_axis(response: &ArrayViewD<f64>) -> Result<(), IntrError> {
    if response.ndim() < 2 {
        return Err(IntrError::ShapeMismatch(format!(
            "a response needs a time and a channel axis, found shape {:?}",
            response.shape()
        )));
    }
    Ok(())
}

/// Applies `search` to every channel and collects the results in channel order.
/// Channels are processed in parallel if there are at least [`MIN_PARALLEL_CHANNELS`] of them.
pub fn map_channels<T, F>(num_chans: usize, search: F) -> Result<Vec<T>, IntrError>
where
    T: Send,
    F: Fn(usize) -> Result<T, IntrError> + Sync + Send,
{
    if num_chans >= MIN_PARALLEL_CHANNELS {
        (0..num_chans).into_par_iter().map(&search).collect()
    } else {
        (0..num_chans).map(&search).collect()
    }
}

/// The best unit of every channel of `response`, in channel order.
pub fn best_per_unit_channel(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
    abs_val: bool,
) -> Result<Vec<BestUnit>, IntrError> {
    check_channel_axis(response)?;
    let trailing_shape = response.shape()[2..].to_vec();
    map_channels(response.len_of(Axis(1)), |chan| {
        best_unit(reference, response, &trailing_shape, &[chan], abs_val)
    })
}

/// The unit of `response` best correlated with the reference, over all channels.
pub fn best_overall(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
    abs_val: bool,
) -> Result<BestUnit, IntrError> {
    let candidates = best_per_unit_channel(reference, response, abs_val)?;
    select_best(candidates).ok_or_else(|| {
        IntrError::ShapeMismatch(format!(
            "no channel to search in a response of shape {:?}",
            response.shape()
        ))
    })
}

fn layer_view<'a>(responses: &'a Responses, layer: &str) -> Result<ArrayViewD<'a, f64>, IntrError> {
    responses
        .get(layer)
        .map(|response| response.view())
        .ok_or_else(|| IntrError::MissingLayer(layer.to_string()))
}

/// For each layer, the (row, col, score) of the best unit of every channel.
/// Every layer must have exactly two spatial axes.
pub fn best_per_channel<S: AsRef<str>>(
    reference: ArrayView1<f64>,
    responses: &Responses,
    layer_keys: &[S],
    abs_val: bool,
) -> Result<BTreeMap<String, Vec<ChannelStat>>, IntrError> {
    let mut cor_stats = BTreeMap::new();
    for layer in layer_keys.iter().map(AsRef::as_ref) {
        let response = layer_view(responses, layer)?;
        if response.ndim() != 4 {
            return Err(IntrError::ShapeMismatch(format!(
                "layer {} must have shape (time, channel, row, col), found {:?}",
                layer,
                response.shape()
            )));
        }
        let stats = best_per_unit_channel(reference, &response, abs_val)?
            .into_iter()
            .map(|unit| {
                let (row, col) = unit.row_col()?;
                Ok(ChannelStat {
                    row,
                    col,
                    score: unit.score,
                })
            })
            .collect::<Result<Vec<ChannelStat>, IntrError>>()?;
        cor_stats.insert(layer.to_string(), stats);
    }
    Ok(cor_stats)
}

/// The best unit over several layers, visited in the order of `layer_keys`.
pub fn best_overall_across_layers<S: AsRef<str>>(
    reference: ArrayView1<f64>,
    responses: &Responses,
    layer_keys: &[S],
    abs_val: bool,
) -> Result<LayerBest, IntrError> {
    let mut best: Option<LayerBest> = None;
    for layer in layer_keys.iter().map(AsRef::as_ref) {
        let unit = best_overall(reference, &layer_view(responses, layer)?, abs_val)?;
        let max_r = best.as_ref().map_or(f64::NEG_INFINITY, |b| b.unit.score);
        if improves(unit.score, max_r) {
            best = Some(LayerBest {
                layer: layer.to_string(),
                unit,
            });
        }
    }
    best.ok_or_else(|| IntrError::InvalidParameter("no layer to search".to_string()))
}

/// The highest score over all units of a layer.
pub fn max_correlation(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
    abs_val: bool,
) -> Result<f64, IntrError> {
    Ok(best_overall(reference, response, abs_val)?.score)
}

/// The highest score of each channel of a layer, sorted in increasing order.
pub fn sorted_correlation(
    reference: ArrayView1<f64>,
    response: &ArrayViewD<f64>,
) -> Result<Vec<f64>, IntrError> {
    let mut scores: Vec<f64> = best_per_unit_channel(reference, response, false)?
        .into_iter()
        .map(|unit| unit.score)
        .collect();
    scores.sort_by(|a, b| a.total_cmp(b));
    Ok(scores)
}

/// The highest score over all units of several layers.
pub fn max_correlation_all_layers<S: AsRef<str>>(
    reference: ArrayView1<f64>,
    responses: &Responses,
    layer_keys: &[S],
    abs_val: bool,
) -> Result<f64, IntrError> {
    Ok(best_overall_across_layers(reference, responses, layer_keys, abs_val)?
        .unit
        .score)
}

/// Finds the unit best correlated with the membrane potential, only considering the first `time` steps.
pub fn classify<S: AsRef<str>>(
    reference: ArrayView1<f64>,
    responses: &Responses,
    time: usize,
    layer_keys: &[S],
    abs_val: bool,
) -> Result<LayerBest, IntrError> {
    let reference = truncate_time(reference.into_dyn(), time)?.into_dimensionality::<Ix1>()?;
    let mut best: Option<LayerBest> = None;
    for layer in layer_keys.iter().map(AsRef::as_ref) {
        let response = truncate_time(layer_view(responses, layer)?, time)?;
        let unit = best_overall(reference, &response, abs_val)?;
        let max_r = best.as_ref().map_or(f64::NEG_INFINITY, |b| b.unit.score);
        if improves(unit.score, max_r) {
            best = Some(LayerBest {
                layer: layer.to_string(),
                unit,
            });
        }
    }
    best.ok_or_else(|| IntrError::InvalidParameter("no layer to search".to_string()))
}

/// The highest score of each channel of a layer over the first `time` steps, in channel order.
pub fn classify_subtypes(
    reference: ArrayView1<f64>,
    responses: &Responses,
    time: usize,
    layer_key: &str,
) -> Result<Vec<f64>, IntrError> {
    let reference = truncate_time(reference.into_dyn(), time)?.into_dimensionality::<Ix1>()?;
    let response = truncate_time(layer_view(responses, layer_key)?, time)?;
    Ok(best_per_unit_channel(reference, &response, false)?
        .into_iter()
        .map(|unit| unit.score)
        .collect())
}
