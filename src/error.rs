//! Error module for the interneuron correlation library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum IntrError {
    /// Error for a reference and a candidate signal of different lengths.
    LengthMismatch { reference: usize, candidate: usize },
    /// Error for a tensor whose rank or axis sizes violate the expected layout.
    ShapeMismatch(String),
    /// No stimulus for the (cell file, stimulus type) pair.
    MissingStimulus { cell_file: String, stim_type: String },
    /// No membrane potentials for the (cell file, stimulus type) pair.
    MissingMembranePotential { cell_file: String, stim_type: String },
    /// A cell index exceeds the number of recorded cells.
    MissingCell {
        cell_file: String,
        stim_type: String,
        cell_idx: usize,
    },
    /// A layer is absent from the model responses or the model metadata.
    MissingLayer(String),
    /// Error for invalid parameters.
    InvalidParameter(String),
    /// Failure reported by the model while producing layer activations.
    ModelError(String),
    /// Error for I/O operations.
    IOError(String),
    /// Failure while evaluating one batch item, tagged with where it happened.
    BatchItem {
        cell_file: String,
        stim_type: String,
        layer: Option<String>,
        chan: Option<usize>,
        source: Box<IntrError>,
    },
}

impl IntrError {
    /// Tag an error with the cell file and stimulus type being evaluated.
    pub fn in_stimulus(self, cell_file: &str, stim_type: &str) -> IntrError {
        IntrError::BatchItem {
            cell_file: cell_file.to_string(),
            stim_type: stim_type.to_string(),
            layer: None,
            chan: None,
            source: Box::new(self),
        }
    }

    /// Tag an error with the full location of the failing search.
    pub fn in_channel(self, cell_file: &str, stim_type: &str, layer: &str, chan: usize) -> IntrError {
        IntrError::BatchItem {
            cell_file: cell_file.to_string(),
            stim_type: stim_type.to_string(),
            layer: Some(layer.to_string()),
            chan: Some(chan),
            source: Box::new(self),
        }
    }
}

impl fmt::Display for IntrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IntrError::LengthMismatch { reference, candidate } => write!(
                f,
                "Signal length mismatch: reference has {} samples, candidate has {}",
                reference, candidate
            ),
            IntrError::ShapeMismatch(e) => write!(f, "Shape mismatch: {}", e),
            IntrError::MissingStimulus { cell_file, stim_type } => write!(
                f,
                "Missing stimulus {} for cell file {}",
                stim_type, cell_file
            ),
            IntrError::MissingMembranePotential { cell_file, stim_type } => write!(
                f,
                "Missing membrane potentials under stimulus {} for cell file {}",
                stim_type, cell_file
            ),
            IntrError::MissingCell {
                cell_file,
                stim_type,
                cell_idx,
            } => write!(
                f,
                "Cell {} not recorded under stimulus {} in cell file {}",
                cell_idx, stim_type, cell_file
            ),
            IntrError::MissingLayer(e) => write!(f, "Missing layer: {}", e),
            IntrError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            IntrError::ModelError(e) => write!(f, "Model error: {}", e),
            IntrError::IOError(e) => write!(f, "I/O error: {}", e),
            IntrError::BatchItem {
                cell_file,
                stim_type,
                layer,
                chan,
                source,
            } => {
                write!(f, "cell_file:{}, stim_type:{}", cell_file, stim_type)?;
                if let Some(layer) = layer {
                    write!(f, ", layer:{}", layer)?;
                }
                if let Some(chan) = chan {
                    write!(f, ", chan:{}", chan)?;
                }
                write!(f, ": {}", source)
            }
        }
    }
}

impl Error for IntrError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IntrError::BatchItem { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IntrError {
    fn from(err: std::io::Error) -> Self {
        IntrError::IOError(err.to_string())
    }
}

impl From<serde_json::Error> for IntrError {
    fn from(err: serde_json::Error) -> Self {
        IntrError::IOError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for IntrError {
    fn from(err: ndarray::ShapeError) -> Self {
        IntrError::ShapeMismatch(err.to_string())
    }
}
