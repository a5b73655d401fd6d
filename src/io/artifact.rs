//! Persisted DDM matrices.
//!
//! A run writes `<stem>_matrix.json` (self-describing, reloadable) and
//! `<stem>_matrix.csv` (spreadsheet friendly, header `tau,q0,q1,...`). When a
//! JSON artifact already exists for the same source, the new rows are merged
//! into it instead of replacing it.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::DdmMatrix;
use crate::error::{DdmError, Result};

/// A DDM matrix labeled with its axes and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdmArtifact {
    /// Lag times in frames, ascending.
    pub taus: Vec<usize>,
    /// Axis value of each q bin (rad/µm when the pixel size is known, else bin index).
    pub q: Vec<f64>,
    /// Row per lag time. Empty radial bins are stored as `null`.
    #[serde(with = "nan_as_null")]
    pub values: Vec<Vec<f64>>,
    pub frame_shape: (usize, usize),
    pub source: String,
    pub created: DateTime<Utc>,
}

/// Files written by `export_artifact`.
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

impl DdmArtifact {
    pub fn from_matrix(matrix: &DdmMatrix, um_per_px: Option<f64>, source: impl Into<String>) -> Self {
        let q = match um_per_px {
            Some(dx) => matrix.wavevectors(dx),
            None => (0..matrix.n_q()).map(|r| r as f64).collect(),
        };
        Self {
            taus: matrix.taus().to_vec(),
            q,
            values: matrix.values().rows().into_iter().map(|r| r.to_vec()).collect(),
            frame_shape: matrix.frame_shape(),
            source: source.into(),
            created: Utc::now(),
        }
    }

    pub fn to_matrix(&self) -> Result<DdmMatrix> {
        let n_q = self.q.len();
        let flat: Vec<f64> = self.values.iter().flatten().copied().collect();
        if self.values.iter().any(|row| row.len() != n_q) {
            return Err(DdmError::Format(format!(
                "Artifact rows must all have {n_q} values."
            )));
        }
        let values = Array2::from_shape_vec((self.taus.len(), n_q), flat)
            .map_err(|e| DdmError::Format(format!("Artifact matrix has the wrong shape: {e}")))?;
        DdmMatrix::new(self.taus.clone(), values, self.frame_shape)
    }

    /// File stem used for exports: the source file name without extension.
    pub fn stem(&self) -> String {
        Path::new(&self.source)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("ddm")
            .to_string()
    }

    /// Union of both artifacts by lag time; rows of `newer` win on conflict.
    pub fn merge(stored: &DdmArtifact, newer: &DdmArtifact) -> Result<DdmArtifact> {
        if stored.source != newer.source {
            return Err(DdmError::SourceMismatch {
                stored: stored.source.clone(),
                incoming: newer.source.clone(),
            });
        }
        if stored.q.len() != newer.q.len() {
            return Err(DdmError::InvalidInput(format!(
                "Stored matrix has {} q bins but new data has {}.",
                stored.q.len(),
                newer.q.len()
            )));
        }

        let mut rows: Vec<(usize, Vec<f64>)> = newer
            .taus
            .iter()
            .copied()
            .zip(newer.values.iter().cloned())
            .collect();
        for (tau, row) in stored.taus.iter().zip(&stored.values) {
            if !newer.taus.contains(tau) {
                rows.push((*tau, row.clone()));
            }
        }
        rows.sort_by_key(|(tau, _)| *tau);

        let (taus, values) = rows.into_iter().unzip();
        Ok(DdmArtifact {
            taus,
            q: newer.q.clone(),
            values,
            frame_shape: newer.frame_shape,
            source: newer.source.clone(),
            created: newer.created,
        })
    }
}

/// Write the artifact as JSON and CSV under `dir`, merging with an existing JSON first.
pub fn export_artifact(dir: &Path, artifact: &DdmArtifact) -> Result<ExportPaths> {
    fs::create_dir_all(dir).map_err(|e| DdmError::io("Failed to create output directory", dir, e))?;

    let stem = artifact.stem();
    let json = dir.join(format!("{stem}_matrix.json"));
    let csv = dir.join(format!("{stem}_matrix.csv"));

    let merged = if json.exists() {
        let stored = read_artifact(&json)?;
        let merged = DdmArtifact::merge(&stored, artifact)?;
        info!(
            path = %json.display(),
            stored = stored.taus.len(),
            merged = merged.taus.len(),
            "merged with existing matrix"
        );
        merged
    } else {
        artifact.clone()
    };

    write_json(&json, &merged)?;
    write_csv(&csv, &merged)?;
    info!(json = %json.display(), csv = %csv.display(), lags = merged.taus.len(), "matrix exported");

    Ok(ExportPaths { json, csv })
}

pub fn read_artifact(path: &Path) -> Result<DdmArtifact> {
    let file = File::open(path).map_err(|e| DdmError::io("Failed to open matrix artifact", path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| DdmError::Format(format!("Invalid matrix artifact '{}': {e}", path.display())))
}

fn write_json(path: &Path, artifact: &DdmArtifact) -> Result<()> {
    let file = File::create(path).map_err(|e| DdmError::io("Failed to create matrix JSON", path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), artifact)
        .map_err(|e| DdmError::Format(format!("Failed to write matrix JSON '{}': {e}", path.display())))
}

fn write_csv(path: &Path, artifact: &DdmArtifact) -> Result<()> {
    let csv_err = |e: csv::Error| DdmError::Format(format!("Failed to write matrix CSV '{}': {e}", path.display()));
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;

    let mut header = vec!["tau".to_string()];
    header.extend((0..artifact.q.len()).map(|i| format!("q{i}")));
    wtr.write_record(&header).map_err(csv_err)?;

    for (tau, row) in artifact.taus.iter().zip(&artifact.values) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(tau.to_string());
        record.extend(row.iter().map(|v| if v.is_nan() { String::new() } else { format!("{v:.10e}") }));
        wtr.write_record(&record).map_err(csv_err)?;
    }
    wtr.flush().map_err(|e| DdmError::io("Failed to flush matrix CSV", path, e))
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<Option<f64>>> = values
            .iter()
            .map(|row| row.iter().map(|&v| (!v.is_nan()).then_some(v)).collect())
            .collect();
        rows.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let rows = Vec::<Vec<Option<f64>>>::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect())
    }
}
