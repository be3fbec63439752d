//! Correlation tables between the units of a retina model and recorded interneurons.
//!
//! The recordings come as two nested maps keyed by cell file, then stimulus type: the stimuli, of
//! shape (time, height, width), and the membrane potentials of every cell of the file, of shape
//! (cell, time). The membrane potentials must already be aligned with the model output, i.e. start
//! after the first full window of frames.
use std::collections::BTreeMap;

use log;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, Axis};

use crate::config::TableConfig;
use crate::correlation::correlate;
use crate::error::IntrError;
use crate::model::RetinaModel;
use crate::response::Responses;
use crate::search::{best_unit, check_channel_axis, map_channels, unit_signal, BestUnit};
use crate::table::{CorrelationRow, CorrelationTable};

/// Stimuli keyed by cell file, then by stimulus type.
pub type StimDict = BTreeMap<String, BTreeMap<String, ArrayD<f64>>>;
/// Membrane potentials of shape (cell, time) keyed by cell file, then by stimulus type.
pub type MemPotDict = BTreeMap<String, BTreeMap<String, Array2<f64>>>;

/// The cell type encoded in the name of a data file, e.g. `bipolar` for `data/bipolars_late_2012.h5`.
pub fn cell_type_from_file(cell_file: &str) -> String {
    let name = cell_file.rsplit('/').next().unwrap_or(cell_file);
    let prefix = name.split('_').next().unwrap_or(name);
    let mut chars = prefix.chars();
    chars.next_back();
    chars.as_str().to_string()
}

fn file_stem(cell_file: &str) -> &str {
    let name = cell_file.rsplit('/').next().unwrap_or(cell_file);
    name.split('.').next().unwrap_or(name)
}

fn membrane_potentials<'a>(
    mem_pots: &'a MemPotDict,
    cell_file: &str,
    stim_type: &str,
) -> Result<ArrayView2<'a, f64>, IntrError> {
    mem_pots
        .get(cell_file)
        .and_then(|pots| pots.get(stim_type))
        .map(|pots| pots.view())
        .ok_or_else(|| IntrError::MissingMembranePotential {
            cell_file: cell_file.to_string(),
            stim_type: stim_type.to_string(),
        })
}

/// Every recorded (cell file, stimulus type) pair must come with its stimulus.
fn check_stimuli(stim_dict: &StimDict, mem_pot_dict: &MemPotDict) -> Result<(), IntrError> {
    for (cell_file, pots) in mem_pot_dict.iter() {
        for stim_type in pots.keys() {
            let present = stim_dict
                .get(cell_file)
                .map_or(false, |stims| stims.contains_key(stim_type));
            if !present {
                return Err(IntrError::MissingStimulus {
                    cell_file: cell_file.clone(),
                    stim_type: stim_type.clone(),
                });
            }
        }
    }
    Ok(())
}

fn collect_responses<M: RetinaModel>(
    model: &M,
    stim: &ArrayD<f64>,
    layers: &[String],
    config: &TableConfig,
    cell_file: &str,
    stim_type: &str,
) -> Result<Responses, IntrError> {
    log::info!(
        "Collecting model response for cell_file:{}, stim_type:{}...",
        file_stem(cell_file),
        stim_type
    );
    model
        .layer_responses(stim.view(), layers, config.batch_size)
        .map_err(|e| e.in_stimulus(cell_file, stim_type))
}

/// A unit selected for one channel of one layer.
struct ChannelUnit {
    chan: usize,
    row: usize,
    col: usize,
    unit: BestUnit,
}

/// The best unit of each channel of `layer`, located by (row, col).
fn search_layer(
    pot: ArrayView1<f64>,
    responses: &Responses,
    layer: &str,
    abs_val: bool,
    cell_file: &str,
    stim_type: &str,
) -> Result<Vec<ChannelUnit>, IntrError> {
    let response = responses
        .get(layer)
        .map(|response| response.view())
        .ok_or_else(|| IntrError::MissingLayer(layer.to_string()).in_stimulus(cell_file, stim_type))?;
    check_channel_axis(&response).map_err(|e| e.in_stimulus(cell_file, stim_type))?;

    let trailing_shape = response.shape()[2..].to_vec();
    map_channels(response.len_of(Axis(1)), |chan| {
        let unit = best_unit(pot, &response, &trailing_shape, &[chan], abs_val)
            .map_err(|e| e.in_channel(cell_file, stim_type, layer, chan))?;
        let (row, col) = unit
            .row_col()
            .map_err(|e| e.in_channel(cell_file, stim_type, layer, chan))?;
        Ok(ChannelUnit {
            chan,
            row,
            col,
            unit,
        })
    })
}

/// Correlates every channel of every configured layer with every recorded cell.
///
/// For each cell file, stimulus type, cell and layer (sorted), one row per channel holds the
/// position and correlation of the channel unit best correlated with the cell's membrane potential.
pub fn build_correlation_table<M: RetinaModel>(
    model: &M,
    stim_dict: &StimDict,
    mem_pot_dict: &MemPotDict,
    config: &TableConfig,
) -> Result<CorrelationTable, IntrError> {
    config.validate()?;
    check_stimuli(stim_dict, mem_pot_dict)?;
    let layers = config.sorted_layers();
    let mut table = CorrelationTable::new();

    for (cell_file, stims) in stim_dict.iter() {
        let cell_type = cell_type_from_file(cell_file);
        for (stim_type, stim) in stims.iter() {
            let responses = collect_responses(model, stim, &layers, config, cell_file, stim_type)?;
            let pots = membrane_potentials(mem_pot_dict, cell_file, stim_type)?;

            log::info!("Correlating with data...");
            let mut best_cors = Vec::with_capacity(pots.nrows());
            for (cell_idx, pot) in pots.outer_iter().enumerate() {
                let mut best_cor = f64::NEG_INFINITY;
                for layer in layers.iter() {
                    log::debug!(
                        "Evaluating file:{}, stim:{}, idx:{}, layer:{}",
                        file_stem(cell_file),
                        stim_type,
                        cell_idx,
                        layer
                    );
                    for found in search_layer(pot, &responses, layer, config.abs_val, cell_file, stim_type)? {
                        best_cor = best_cor.max(found.unit.score);
                        table.append_row(CorrelationRow {
                            cell_file: cell_file.clone(),
                            cell_idx,
                            stim_type: stim_type.clone(),
                            cell_type: cell_type.clone(),
                            fit_stim_type: stim_type.clone(),
                            layer: layer.clone(),
                            chan: found.chan,
                            row: found.row,
                            col: found.col,
                            cor: found.unit.score,
                        });
                    }
                }
                best_cors.push(best_cor);
            }

            if !best_cors.is_empty() {
                log::info!(
                    "Avg: {}",
                    best_cors.iter().sum::<f64>() / best_cors.len() as f64
                );
            }
        }
    }

    Ok(table)
}

/// Like [`build_correlation_table`], but also measures how each selected unit generalizes to the
/// other stimuli of the same cell file.
///
/// After the row of a (cell, stimulus, layer, channel) unit, one row per other stimulus type holds
/// the correlation of the very same unit with the same cell under that stimulus. No new search is
/// performed for these rows, and their `fit_stim_type` names the stimulus the unit was selected on.
pub fn build_generalization_table<M: RetinaModel>(
    model: &M,
    stim_dict: &StimDict,
    mem_pot_dict: &MemPotDict,
    config: &TableConfig,
) -> Result<CorrelationTable, IntrError> {
    config.validate()?;
    check_stimuli(stim_dict, mem_pot_dict)?;
    let layers = config.sorted_layers();
    let mut table = CorrelationTable::new();

    for (cell_file, stims) in stim_dict.iter() {
        let cell_type = cell_type_from_file(cell_file);
        if stims.len() < 2 {
            log::warn!(
                "Cell file {} has a single stimulus type, no generalization can be measured",
                file_stem(cell_file)
            );
        }

        let mut responses: BTreeMap<&str, Responses> = BTreeMap::new();
        for (stim_type, stim) in stims.iter() {
            let response = collect_responses(model, stim, &layers, config, cell_file, stim_type)?;
            responses.insert(stim_type.as_str(), response);
        }

        for (stim_type, fit_responses) in responses.iter() {
            let pots = membrane_potentials(mem_pot_dict, cell_file, stim_type)?;
            for (cell_idx, pot) in pots.outer_iter().enumerate() {
                for layer in layers.iter() {
                    log::debug!(
                        "Evaluating file:{}, stim:{}, idx:{}, layer:{}",
                        file_stem(cell_file),
                        stim_type,
                        cell_idx,
                        layer
                    );
                    for found in search_layer(pot, fit_responses, layer, config.abs_val, cell_file, stim_type)? {
                        let fit_row = CorrelationRow {
                            cell_file: cell_file.clone(),
                            cell_idx,
                            stim_type: stim_type.to_string(),
                            cell_type: cell_type.clone(),
                            fit_stim_type: stim_type.to_string(),
                            layer: layer.clone(),
                            chan: found.chan,
                            row: found.row,
                            col: found.col,
                            cor: found.unit.score,
                        };

                        table.append_row(fit_row.clone());

                        for (other_stim, other_responses) in responses.iter() {
                            if other_stim == stim_type {
                                continue;
                            }
                            let cor = cross_correlate(
                                mem_pot_dict,
                                other_responses,
                                &fit_row,
                                other_stim,
                                config.abs_val,
                            )
                            .map_err(|e| e.in_channel(cell_file, other_stim, layer, found.chan))?;
                            table.append_row(CorrelationRow {
                                stim_type: other_stim.to_string(),
                                cor,
                                ..fit_row.clone()
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(table)
}

/// Correlation of the unit of `fit_row` with the same cell, both taken under `other_stim`.
fn cross_correlate(
    mem_pot_dict: &MemPotDict,
    other_responses: &Responses,
    fit_row: &CorrelationRow,
    other_stim: &str,
    abs_val: bool,
) -> Result<f64, IntrError> {
    let pots = mem_pot_dict
        .get(&fit_row.cell_file)
        .and_then(|pots| pots.get(other_stim))
        .ok_or_else(|| IntrError::MissingMembranePotential {
            cell_file: fit_row.cell_file.clone(),
            stim_type: other_stim.to_string(),
        })?;
    if fit_row.cell_idx >= pots.nrows() {
        return Err(IntrError::MissingCell {
            cell_file: fit_row.cell_file.clone(),
            stim_type: other_stim.to_string(),
            cell_idx: fit_row.cell_idx,
        });
    }
    let response = other_responses
        .get(&fit_row.layer)
        .map(|response| response.view())
        .ok_or_else(|| IntrError::MissingLayer(fit_row.layer.clone()))?;
    let signal = unit_signal(&response, &[fit_row.chan, fit_row.row, fit_row.col])?;
    correlate(pots.row(fit_row.cell_idx), signal, abs_val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::LayerShape;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3, ArrayViewD};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::Normal;

    const SIZE: usize = 4;
    const DEPTH: usize = 2;

    /// Channel 0 of "conv" reports the last frame of each window, channel 1 its square, flattened.
    struct PixelModel {
        img_shape: Vec<usize>,
        shape: LayerShape,
    }

    impl PixelModel {
        fn new() -> Self {
            PixelModel {
                img_shape: vec![DEPTH, SIZE, SIZE],
                shape: LayerShape::new(2, vec![SIZE, SIZE]),
            }
        }
    }

    impl RetinaModel for PixelModel {
        fn img_shape(&self) -> &[usize] {
            &self.img_shape
        }

        fn layer_shape(&self, layer: &str) -> Option<&LayerShape> {
            match layer {
                "conv" => Some(&self.shape),
                _ => None,
            }
        }

        fn forward(&self, windows: ArrayViewD<f64>, layers: &[String]) -> Result<Responses, IntrError> {
            let batch = windows.len_of(Axis(0));
            let units = SIZE * SIZE;
            let mut outputs = Responses::new();
            for layer in layers {
                if layer != "conv" {
                    return Err(IntrError::MissingLayer(layer.clone()));
                }
                let output = Array2::from_shape_fn((batch, 2 * units), |(n, u)| {
                    let v = windows[[n, DEPTH - 1, (u % units) / SIZE, u % SIZE]];
                    if u < units {
                        v
                    } else {
                        v * v
                    }
                });
                outputs.insert(layer.clone(), output.into_dyn());
            }
            Ok(outputs)
        }
    }

    fn random_stim(time: usize, rng: &mut StdRng) -> ArrayD<f64> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array3::from_shape_fn((time, SIZE, SIZE), |_| rng.sample(normal)).into_dyn()
    }

    /// A noisy copy of one stimulus pixel, aligned with the model output.
    fn pixel_trace(stim: &ArrayD<f64>, row: usize, col: usize, rng: &mut StdRng) -> Array1<f64> {
        let normal = Normal::new(0.0, 0.1).unwrap();
        (DEPTH - 1..stim.len_of(Axis(0)))
            .map(|t| stim[[t, row, col]] + rng.sample(normal))
            .collect()
    }

    fn dataset(
        stim_types: &[&str],
        time: usize,
        rng: &mut StdRng,
    ) -> (StimDict, MemPotDict) {
        let cell_file = "data/bipolars_late_2012.h5".to_string();
        let mut stims = BTreeMap::new();
        let mut pots = BTreeMap::new();
        for stim_type in stim_types {
            let stim = random_stim(time, rng);
            let first = pixel_trace(&stim, 1, 1, rng);
            let second = pixel_trace(&stim, 2, 3, rng);
            let mut mem_pot = Array2::zeros((2, first.len()));
            mem_pot.row_mut(0).assign(&first);
            mem_pot.row_mut(1).assign(&second);
            stims.insert(stim_type.to_string(), stim);
            pots.insert(stim_type.to_string(), mem_pot);
        }
        let mut stim_dict = StimDict::new();
        stim_dict.insert(cell_file.clone(), stims);
        let mut mem_pot_dict = MemPotDict::new();
        mem_pot_dict.insert(cell_file, pots);
        (stim_dict, mem_pot_dict)
    }

    #[test]
    fn test_cell_type_from_file() {
        assert_eq!(cell_type_from_file("data/bipolars_late_2012.h5"), "bipolar");
        assert_eq!(cell_type_from_file("amacrines_early_2012.h5"), "amacrine");
        assert_eq!(cell_type_from_file("/abs/path/horizontals_2011.h5"), "horizontal");
        assert_eq!(file_stem("data/bipolars_late_2012.h5"), "bipolars_late_2012");
    }

    #[test]
    fn test_correlation_table_finds_pixels() {
        let mut rng = StdRng::seed_from_u64(42);
        let (stim_dict, mem_pot_dict) = dataset(&["boxes"], 60, &mut rng);
        let config = TableConfig::new(&["conv"]).with_batch_size(16);

        let model = PixelModel::new();
        let table = build_correlation_table(&model, &stim_dict, &mem_pot_dict, &config).unwrap();

        // 2 cells, 1 layer, 2 channels
        assert_eq!(table.len(), 4);
        let rows: Vec<CorrelationRow> = table.rows().collect();
        assert!(rows.iter().all(|row| row.cell_type == "bipolar" && row.is_fit()));
        assert!(rows.iter().all(|row| row.cor < 1.0));

        let first = &rows[0];
        assert_eq!((first.cell_idx, first.chan, first.row, first.col), (0, 0, 1, 1));
        assert!(first.cor > 0.9);
        let second = &rows[2];
        assert_eq!((second.cell_idx, second.chan, second.row, second.col), (1, 0, 2, 3));
        assert!(second.cor > 0.9);
        assert_eq!(rows[3].chan, 1);
    }

    #[test]
    fn test_correlation_table_batch_size_invariant() {
        let mut rng = StdRng::seed_from_u64(7);
        let (stim_dict, mem_pot_dict) = dataset(&["boxes"], 40, &mut rng);
        let model = PixelModel::new();

        let whole = build_correlation_table(
            &model,
            &stim_dict,
            &mem_pot_dict,
            &TableConfig::new(&["conv"]).with_batch_size(1000),
        )
        .unwrap();
        let batched = build_correlation_table(
            &model,
            &stim_dict,
            &mem_pot_dict,
            &TableConfig::new(&["conv"]).with_batch_size(3),
        )
        .unwrap();
        assert_eq!(whole, batched);
    }

    #[test]
    fn test_generalization_table() {
        let mut rng = StdRng::seed_from_u64(3);
        let (stim_dict, mem_pot_dict) = dataset(&["boxes", "lines"], 50, &mut rng);
        let config = TableConfig::new(&["conv"]);
        let model = PixelModel::new();

        let primary = build_correlation_table(&model, &stim_dict, &mem_pot_dict, &config).unwrap();
        let table = build_generalization_table(&model, &stim_dict, &mem_pot_dict, &config).unwrap();
        assert_eq!(primary.len(), 8);
        assert_eq!(table.len(), 2 * primary.len());

        let rows: Vec<CorrelationRow> = table.rows().collect();
        let fit: Vec<CorrelationRow> = rows.iter().filter(|row| row.is_fit()).cloned().collect();
        assert_eq!(fit, primary.rows().collect::<Vec<_>>());

        for pair in rows.chunks(2) {
            let (fit_row, other) = (&pair[0], &pair[1]);
            assert!(fit_row.is_fit());
            assert!(!other.is_fit());
            assert_eq!(other.fit_stim_type, fit_row.stim_type);
            assert_ne!(other.stim_type, fit_row.stim_type);
            assert_eq!(
                (other.cell_idx, &other.layer, other.chan, other.row, other.col),
                (fit_row.cell_idx, &fit_row.layer, fit_row.chan, fit_row.row, fit_row.col)
            );
        }

        // the pixel a cell tracks is the same under every stimulus
        let first_other = &rows[1];
        assert_eq!((first_other.chan, first_other.row, first_other.col), (0, 1, 1));
        assert!(first_other.cor > 0.9);

        let response = model
            .layer_responses(stim_dict["data/bipolars_late_2012.h5"]["lines"].view(), &["conv".to_string()], 500)
            .unwrap();
        let signal = unit_signal(&response["conv"].view(), &[0, 1, 1]).unwrap();
        let pot = mem_pot_dict["data/bipolars_late_2012.h5"]["lines"].row(0).to_owned();
        assert_relative_eq!(
            first_other.cor,
            correlate(pot.view(), signal, false).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_single_stimulus_generalization() {
        let mut rng = StdRng::seed_from_u64(5);
        let (stim_dict, mem_pot_dict) = dataset(&["boxes"], 30, &mut rng);
        let config = TableConfig::new(&["conv"]);
        let model = PixelModel::new();

        let primary = build_correlation_table(&model, &stim_dict, &mem_pot_dict, &config).unwrap();
        let table = build_generalization_table(&model, &stim_dict, &mem_pot_dict, &config).unwrap();
        assert_eq!(table, primary);
    }

    #[test]
    fn test_missing_membrane_potential() {
        let mut rng = StdRng::seed_from_u64(11);
        let (stim_dict, mut mem_pot_dict) = dataset(&["boxes"], 30, &mut rng);
        mem_pot_dict.clear();
        let model = PixelModel::new();

        assert_eq!(
            build_correlation_table(&model, &stim_dict, &mem_pot_dict, &TableConfig::new(&["conv"])),
            Err(IntrError::MissingMembranePotential {
                cell_file: "data/bipolars_late_2012.h5".to_string(),
                stim_type: "boxes".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_stimulus() {
        let mut rng = StdRng::seed_from_u64(19);
        let (mut stim_dict, mem_pot_dict) = dataset(&["boxes", "lines"], 30, &mut rng);
        for stims in stim_dict.values_mut() {
            stims.remove("lines");
        }
        let model = PixelModel::new();
        let expected = Err(IntrError::MissingStimulus {
            cell_file: "data/bipolars_late_2012.h5".to_string(),
            stim_type: "lines".to_string(),
        });

        let config = TableConfig::new(&["conv"]);
        assert_eq!(build_correlation_table(&model, &stim_dict, &mem_pot_dict, &config), expected);
        assert_eq!(build_generalization_table(&model, &stim_dict, &mem_pot_dict, &config), expected);
    }

    #[test]
    fn test_errors_carry_their_location() {
        let mut rng = StdRng::seed_from_u64(13);
        let (stim_dict, mut mem_pot_dict) = dataset(&["boxes"], 30, &mut rng);
        // membrane potentials not aligned with the model output
        for pots in mem_pot_dict.values_mut() {
            for pot in pots.values_mut() {
                *pot = Array2::zeros((2, 30));
            }
        }
        let model = PixelModel::new();

        match build_correlation_table(&model, &stim_dict, &mem_pot_dict, &TableConfig::new(&["conv"])) {
            Err(IntrError::BatchItem {
                cell_file,
                stim_type,
                layer,
                chan,
                source,
            }) => {
                assert_eq!(cell_file, "data/bipolars_late_2012.h5");
                assert_eq!(stim_type, "boxes");
                assert_eq!(layer, Some("conv".to_string()));
                assert_eq!(chan, Some(0));
                assert_eq!(
                    *source,
                    IntrError::LengthMismatch {
                        reference: 30,
                        candidate: 29
                    }
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let err = build_correlation_table(&model, &stim_dict, &mem_pot_dict, &TableConfig::new(&["conv", "fc"]))
            .unwrap_err();
        assert!(matches!(err, IntrError::BatchItem { layer: None, .. }));
        assert!(err.to_string().contains("fc"));
    }

    #[test]
    fn test_invalid_config() {
        let mut rng = StdRng::seed_from_u64(17);
        let (stim_dict, mem_pot_dict) = dataset(&["boxes"], 30, &mut rng);
        let model = PixelModel::new();
        let config = TableConfig::new(&["conv"]).with_batch_size(0);
        assert!(build_correlation_table(&model, &stim_dict, &mem_pot_dict, &config).is_err());
        assert!(build_generalization_table(&model, &stim_dict, &mem_pot_dict, &config).is_err());
    }
}
