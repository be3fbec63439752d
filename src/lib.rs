//! This crate matches the units of retina models with intracellularly recorded interneurons.
//!
//! A unit is a single activation of a model layer, addressed by its channel and spatial position.
//! Its response to a stimulus is compared with the membrane potential of a recorded cell under the
//! same stimulus using Pearson's correlation, and the best correlated unit of every channel and
//! layer is reported in a long-format table.
//!
//! # Searching Responses
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use ndarray::Array4;
//! use retina_intr::search::{best_overall_across_layers, best_per_channel};
//!
//! let mem_pot: Vec<f64> = (0..20).map(|t| ((t * 7) % 11) as f64).collect();
//! let mem_pot = ndarray::Array1::from(mem_pot);
//!
//! // (time, channel, row, col)
//! let conv1 = Array4::from_shape_fn((20, 3, 4, 4), |(t, c, i, j)| ((t * (c + i + 2) + j) % 5) as f64);
//! let mut conv2 = Array4::<f64>::zeros((20, 2, 3, 3));
//! for t in 0..20 {
//!     conv2[[t, 1, 2, 0]] = mem_pot[t] + (t % 2) as f64;
//! }
//!
//! let mut responses = BTreeMap::new();
//! responses.insert("conv1".to_string(), conv1.into_dyn());
//! responses.insert("conv2".to_string(), conv2.into_dyn());
//!
//! let best = best_overall_across_layers(mem_pot.view(), &responses, &["conv1", "conv2"], false).unwrap();
//! assert_eq!(best.layer, "conv2");
//! assert_eq!(best.unit.index, vec![1, 2, 0]);
//!
//! let stats = best_per_channel(mem_pot.view(), &responses, &["conv2"], false).unwrap();
//! assert_eq!(stats["conv2"].len(), 2);
//! assert_eq!((stats["conv2"][1].row, stats["conv2"][1].col), (2, 0));
//! ```
//!
//! # Building Correlation Tables
//!
//! A [`model::RetinaModel`] provides the layer activations. Given stimuli and membrane potentials
//! keyed by cell file and stimulus type, [`intracellular::build_correlation_table`] searches every
//! channel of every configured layer for every cell, and
//! [`intracellular::build_generalization_table`] additionally measures how each selected unit
//! correlates with the same cell under the other stimuli.
//!
//! ```rust
//! use retina_intr::config::TableConfig;
//!
//! let config = TableConfig::default().with_batch_size(128);
//! assert_eq!(config.sorted_layers(), vec!["sequential.2", "sequential.8"]);
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod intracellular;
pub mod model;
pub mod response;
pub mod search;
pub mod stimulus;
pub mod table;

/// The number of stimulus windows fed to a model at once.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// The layers inspected by default: the outputs of the two convolutional stages of the models.
pub const DEFAULT_LAYERS: [&str; 2] = ["sequential.2", "sequential.8"];
