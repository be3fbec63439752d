//! Model layer activations and the metadata needed to index them.
use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::error::IntrError;

/// Layer activations keyed by layer name. Each tensor has time as its leading axis.
pub type Responses = BTreeMap<String, ArrayD<f64>>;

/// The (channel, spatial...) shape of a layer, as declared by the model.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LayerShape {
    /// The number of channels (cell types) in the layer.
    chans: usize,
    /// The sizes of the spatial axes of each channel.
    spatial: Vec<usize>,
}

impl LayerShape {
    pub fn new(chans: usize, spatial: Vec<usize>) -> Self {
        LayerShape { chans, spatial }
    }

    pub fn chans(&self) -> usize {
        self.chans
    }

    pub fn spatial(&self) -> &[usize] {
        &self.spatial
    }

    /// The number of scalar units per time step.
    pub fn num_units(&self) -> usize {
        self.chans * self.spatial.iter().product::<usize>()
    }

    /// The unit axes: channel first, then the spatial axes.
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = Vec::with_capacity(self.spatial.len() + 1);
        dims.push(self.chans);
        dims.extend_from_slice(&self.spatial);
        dims
    }
}

/// Restore the (time, channel, spatial...) layout of a layer activation.
///
/// Activations with at least 3 axes are returned untouched. Flattened activations are reshaped
/// according to `shape` after checking that the number of units per time step matches.
pub fn reshape_layer(
    layer: &str,
    response: ArrayD<f64>,
    shape: &LayerShape,
) -> Result<ArrayD<f64>, IntrError> {
    if response.ndim() >= 3 {
        return Ok(response);
    }
    if response.ndim() == 0 {
        return Err(IntrError::ShapeMismatch(format!(
            "layer {} activation has no time axis",
            layer
        )));
    }

    let time = response.shape()[0];
    let units: usize = response.shape()[1..].iter().product();
    if units != shape.num_units() {
        return Err(IntrError::ShapeMismatch(format!(
            "layer {} has {} units per time step, but its declared shape {:?} holds {}",
            layer,
            units,
            shape.dims(),
            shape.num_units()
        )));
    }

    let mut dims = vec![time];
    dims.extend(shape.dims());
    let response = if response.is_standard_layout() {
        response
    } else {
        response.as_standard_layout().into_owned()
    };
    Ok(response.into_shape(IxDyn(&dims))?)
}

/// The first `time` samples of a response.
pub fn truncate_time<'a>(
    response: ArrayViewD<'a, f64>,
    time: usize,
) -> Result<ArrayViewD<'a, f64>, IntrError> {
    if response.ndim() == 0 || response.len_of(Axis(0)) < time {
        return Err(IntrError::InvalidParameter(format!(
            "cannot keep {} time steps of a response with shape {:?}",
            time,
            response.shape()
        )));
    }
    let mut response = response;
    response.slice_axis_inplace(Axis(0), Slice::from(..time));
    Ok(response)
}
