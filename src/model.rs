//! The interface to the retina models whose units are compared with recorded interneurons.
//!
//! A model sees its stimulus through windows of consecutive frames and produces one activation
//! tensor per inspected layer, with one entry per window along the leading axis. Activations may
//! come out flattened; the model declares the (channel, spatial...) shape of each layer so they can
//! be restored.
use std::collections::BTreeMap;

use log;
use ndarray::{concatenate, Array3, ArrayD, ArrayView3, ArrayViewD, Axis};

use crate::error::IntrError;
use crate::response::{reshape_layer, LayerShape, Responses};
use crate::stimulus::{num_windows, rolling_window_range, spatial_pad};

pub trait RetinaModel {
    /// The input shape of the model: temporal depth first, then the spatial sizes (if any).
    fn img_shape(&self) -> &[usize];

    /// The (channel, spatial...) shape of a layer, if the model has such a layer.
    fn layer_shape(&self, layer: &str) -> Option<&LayerShape>;

    /// Runs the model on a batch of windows of shape (batch, depth, spatial...) and returns the
    /// activations of the requested layers, each with the batch as leading axis.
    fn forward(&self, windows: ArrayViewD<f64>, layers: &[String]) -> Result<Responses, IntrError>;

    /// The number of frames in each window.
    fn depth(&self) -> Result<usize, IntrError> {
        self.img_shape()
            .first()
            .copied()
            .ok_or_else(|| IntrError::ModelError("model has an empty input shape".to_string()))
    }

    /// Pads a (time, height, width) stimulus to the spatial input size of the model.
    /// Stimuli of any other rank, or models without spatial input, leave the stimulus untouched.
    fn pad_stimulus(&self, stim: ArrayViewD<f64>) -> Result<ArrayD<f64>, IntrError> {
        match self.img_shape() {
            [_, height, width] if stim.ndim() == 3 => {
                let stim: ArrayView3<f64> = stim.into_dimensionality()?;
                let padded: Array3<f64> = spatial_pad(stim, *height, *width)?;
                Ok(padded.into_dyn())
            }
            _ => Ok(stim.to_owned()),
        }
    }

    /// Collects the activations of `layers` over every window of the stimulus, `batch_size` windows at a time.
    fn inspect(
        &self,
        stim: ArrayViewD<f64>,
        layers: &[String],
        batch_size: usize,
    ) -> Result<Responses, IntrError> {
        if batch_size == 0 {
            return Err(IntrError::InvalidParameter(
                "The batch size must be positive.".to_string(),
            ));
        }
        let depth = self.depth()?;
        let total = num_windows(stim.len_of(Axis(0)), depth)?;

        let mut batches: BTreeMap<String, Vec<ArrayD<f64>>> = layers
            .iter()
            .map(|layer| (layer.clone(), Vec::with_capacity(total / batch_size + 1)))
            .collect();

        for start in (0..total).step_by(batch_size) {
            let end = (start + batch_size).min(total);
            log::trace!("Running windows {}..{} of {}", start, end, total);
            let windows = rolling_window_range(stim.view(), depth, start..end)?;
            let mut outputs = self.forward(windows.view(), layers)?;

            for (layer, batch) in batches.iter_mut() {
                let output = outputs
                    .remove(layer)
                    .ok_or_else(|| IntrError::MissingLayer(layer.clone()))?;
                if output.ndim() == 0 || output.len_of(Axis(0)) != end - start {
                    return Err(IntrError::ModelError(format!(
                        "layer {} returned shape {:?} for a batch of {} windows",
                        layer,
                        output.shape(),
                        end - start
                    )));
                }
                batch.push(output);
            }
        }

        batches
            .into_iter()
            .map(|(layer, batch)| {
                let views: Vec<ArrayViewD<f64>> = batch.iter().map(|output| output.view()).collect();
                let response = concatenate(Axis(0), &views)?;
                Ok((layer, response))
            })
            .collect()
    }

    /// Pads the stimulus, collects the activations of `layers` and restores the (time, channel,
    /// spatial...) shape of flattened ones.
    fn layer_responses(
        &self,
        stim: ArrayViewD<f64>,
        layers: &[String],
        batch_size: usize,
    ) -> Result<Responses, IntrError> {
        let stim = self.pad_stimulus(stim)?;
        self.inspect(stim.view(), layers, batch_size)?
            .into_iter()
            .map(|(layer, response)| {
                if response.ndim() >= 3 {
                    return Ok((layer, response));
                }
                let shape = self
                    .layer_shape(&layer)
                    .ok_or_else(|| IntrError::MissingLayer(layer.clone()))?;
                let response = reshape_layer(&layer, response, shape)?;
                Ok((layer, response))
            })
            .collect()
    }
}
