//! Long-format table of correlations between model units and recorded cells.
//!
//! Each row records, for one recorded cell under one stimulus, the best unit of one channel of one
//! layer. Rows are only ever appended.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use itertools::{izip, Itertools};
use serde::{Deserialize, Serialize};
use serde_json;

use crate::error::IntrError;

/// The column names, in storage order.
pub const COLUMNS: [&str; 10] = [
    "cell_file",
    "cell_idx",
    "stim_type",
    "cell_type",
    "fit_stim_type",
    "layer",
    "chan",
    "row",
    "col",
    "cor",
];

/// One row of a [`CorrelationTable`].
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CorrelationRow {
    /// The data file the cell was recorded in.
    pub cell_file: String,
    /// The index of the cell within its file.
    pub cell_idx: usize,
    /// The stimulus under which the correlation is measured.
    pub stim_type: String,
    /// The biological type of the cell (bipolar, amacrine, horizontal).
    pub cell_type: String,
    /// The stimulus under which the unit was selected.
    pub fit_stim_type: String,
    pub layer: String,
    pub chan: usize,
    pub row: usize,
    pub col: usize,
    pub cor: f64,
}

impl CorrelationRow {
    /// Whether the unit was selected under the stimulus the correlation is measured with.
    pub fn is_fit(&self) -> bool {
        self.stim_type == self.fit_stim_type
    }
}

/// A column-oriented table of [`CorrelationRow`]s.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationTable {
    cell_file: Vec<String>,
    cell_idx: Vec<usize>,
    stim_type: Vec<String>,
    cell_type: Vec<String>,
    fit_stim_type: Vec<String>,
    layer: Vec<String>,
    chan: Vec<usize>,
    row: Vec<usize>,
    col: Vec<usize>,
    cor: Vec<f64>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        CorrelationTable::default()
    }

    pub fn append_row(&mut self, row: CorrelationRow) {
        self.cell_file.push(row.cell_file);
        self.cell_idx.push(row.cell_idx);
        self.stim_type.push(row.stim_type);
        self.cell_type.push(row.cell_type);
        self.fit_stim_type.push(row.fit_stim_type);
        self.layer.push(row.layer);
        self.chan.push(row.chan);
        self.row.push(row.row);
        self.col.push(row.col);
        self.cor.push(row.cor);
    }

    /// Appends all rows of `other` after the rows of `self`.
    pub fn extend(&mut self, other: CorrelationTable) {
        self.cell_file.extend(other.cell_file);
        self.cell_idx.extend(other.cell_idx);
        self.stim_type.extend(other.stim_type);
        self.cell_type.extend(other.cell_type);
        self.fit_stim_type.extend(other.fit_stim_type);
        self.layer.extend(other.layer);
        self.chan.extend(other.chan);
        self.row.extend(other.row);
        self.col.extend(other.col);
        self.cor.extend(other.cor);
    }

    pub fn len(&self) -> usize {
        self.cor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cor.is_empty()
    }

    pub fn row(&self, i: usize) -> Option<CorrelationRow> {
        if i >= self.len() {
            return None;
        }
        Some(CorrelationRow {
            cell_file: self.cell_file[i].clone(),
            cell_idx: self.cell_idx[i],
            stim_type: self.stim_type[i].clone(),
            cell_type: self.cell_type[i].clone(),
            fit_stim_type: self.fit_stim_type[i].clone(),
            layer: self.layer[i].clone(),
            chan: self.chan[i],
            row: self.row[i],
            col: self.col[i],
            cor: self.cor[i],
        })
    }

    /// An iterator over the rows, in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = CorrelationRow> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    pub fn cell_files(&self) -> &[String] {
        &self.cell_file
    }

    pub fn stim_types(&self) -> &[String] {
        &self.stim_type
    }

    pub fn layers(&self) -> &[String] {
        &self.layer
    }

    pub fn cors(&self) -> &[f64] {
        &self.cor
    }

    /// For every (cell_file, cell_idx, stim_type), the row of the best unit selected under that
    /// stimulus, in order of first appearance. Ties keep the earliest row.
    pub fn best_per_cell(&self) -> Vec<CorrelationRow> {
        let mut best: Vec<CorrelationRow> = Vec::new();
        let mut positions: HashMap<(String, usize, String), usize> = HashMap::new();
        for row in self.rows().filter(|row| row.is_fit()) {
            let key = (row.cell_file.clone(), row.cell_idx, row.stim_type.clone());
            match positions.get(&key) {
                Some(&pos) => {
                    if row.cor > best[pos].cor {
                        best[pos] = row;
                    }
                }
                None => {
                    positions.insert(key, best.len());
                    best.push(row);
                }
            }
        }
        best
    }

    /// The mean correlation of the best unit of every cell, see [`CorrelationTable::best_per_cell`].
    pub fn mean_best_cor(&self) -> Option<f64> {
        let best = self.best_per_cell();
        if best.is_empty() {
            return None;
        }
        Some(best.iter().map(|row| row.cor).sum::<f64>() / best.len() as f64)
    }

    fn check_columns(&self) -> Result<(), IntrError> {
        let lengths = [
            self.cell_file.len(),
            self.cell_idx.len(),
            self.stim_type.len(),
            self.cell_type.len(),
            self.fit_stim_type.len(),
            self.layer.len(),
            self.chan.len(),
            self.row.len(),
            self.col.len(),
            self.cor.len(),
        ];
        if !lengths.iter().all_equal() {
            return Err(IntrError::ShapeMismatch(format!(
                "table columns {:?} have lengths {:?}",
                COLUMNS, lengths
            )));
        }
        Ok(())
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), IntrError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a table saved with [`CorrelationTable::save_to`].
    /// Returns an error if its columns do not all have the same length.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<CorrelationTable, IntrError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let table: CorrelationTable = serde_json::from_reader(reader)?;
        table.check_columns()?;
        Ok(table)
    }

    /// Writes the table as CSV, with a header line.
    pub fn write_csv<W: Write>(&self, writer: &mut W) -> Result<(), IntrError> {
        writeln!(writer, "{}", COLUMNS.join(","))?;
        for (cell_file, cell_idx, stim_type, cell_type, fit_stim_type, layer, chan, row, col, cor) in izip!(
            &self.cell_file,
            &self.cell_idx,
            &self.stim_type,
            &self.cell_type,
            &self.fit_stim_type,
            &self.layer,
            &self.chan,
            &self.row,
            &self.col,
            &self.cor
        ) {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{},{}",
                csv_field(cell_file),
                cell_idx,
                csv_field(stim_type),
                csv_field(cell_type),
                csv_field(fit_stim_type),
                csv_field(layer),
                chan,
                row,
                col,
                cor
            )?;
        }
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
