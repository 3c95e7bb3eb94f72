//! The 2DFS field model.
//!
//! A *field* is a grid of *allotments*: independently addressable file
//! fragments identified by (row, col). The field travels as an extra OCI
//! layer whose blob is the canonical JSON serialization produced by
//! [`Field::marshal`]. Serialization is byte-stable for a given logical
//! state, so the field blob digest is reproducible.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field errors
#[derive(Debug, Error)]
pub enum FieldError {
    /// The serialized field violates the wire format
    #[error("malformed field: {0}")]
    MalformedField(String),

    /// The user-supplied 2DFS manifest could not be parsed
    #[error("malformed 2dfs manifest: {0}")]
    MalformedManifest(String),
}

pub type Result<T, E = FieldError> = std::result::Result<T, E>;

/// One cell of the field: a single file placed at `filename` inside its
/// layer, addressed by the digest of the compressed layer archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allotment {
    pub row: usize,
    pub col: usize,
    pub digest: String,
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Digest of the uncompressed layer tar (the diff-ID), recorded so the
    /// compression cache and the GC can track it.
    #[serde(rename = "cachekey", default)]
    pub cache_key: String,
}

impl Allotment {
    /// Placeholders fill grid slots created by growth; they carry no file.
    pub fn is_empty(&self) -> bool {
        self.digest.is_empty()
    }
}

/// One row of the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub allotments: Vec<Allotment>,
    pub allotments_size: usize,
}

/// The 2D grid carried as a layer blob.
///
/// Invariants: `rows_size == rows.len()` and, per row,
/// `allotments_size == allotments.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub rows: Vec<Row>,
    pub rows_size: usize,
    #[serde(default)]
    pub owner: String,
}

impl Field {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an allotment at its (row, col) coordinates, growing the grid
    /// as needed. Intermediate slots are filled with empty placeholders; an
    /// occupied slot is replaced.
    pub fn add_allotment(&mut self, allotment: Allotment) {
        while self.rows.len() <= allotment.row {
            self.rows.push(Row::default());
        }
        self.rows_size = self.rows.len();

        let col = allotment.col;
        let row = &mut self.rows[allotment.row];
        while row.allotments.len() <= col {
            row.allotments.push(Allotment::default());
        }
        row.allotments_size = row.allotments.len();

        row.allotments[col] = allotment;
    }

    /// Row-major iteration over occupied slots.
    pub fn iter_allotments(&self) -> impl Iterator<Item = &Allotment> {
        self.rows
            .iter()
            .flat_map(|row| row.allotments.iter())
            .filter(|allotment| !allotment.is_empty())
    }

    /// Canonical serialization: JSON with declaration-ordered attributes,
    /// byte-identical for the same logical state.
    pub fn marshal(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("field serialization is infallible")
    }

    /// Strict inverse of [`Field::marshal`]: missing attributes, counter
    /// mismatches and negative indexes are rejected.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        let field: Field = serde_json::from_slice(bytes)
            .map_err(|e| FieldError::MalformedField(e.to_string()))?;
        field.validate()?;
        Ok(field)
    }

    fn validate(&self) -> Result<()> {
        if self.rows_size != self.rows.len() {
            return Err(FieldError::MalformedField(format!(
                "rows_size is {} but {} rows are present",
                self.rows_size,
                self.rows.len()
            )));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.allotments_size != row.allotments.len() {
                return Err(FieldError::MalformedField(format!(
                    "row {} declares {} allotments but holds {}",
                    i,
                    row.allotments_size,
                    row.allotments.len()
                )));
            }
        }
        Ok(())
    }
}

/// User input for `build`: which files go into which cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoDfsManifest {
    pub allotments: Vec<AllotmentRequest>,
}

/// A single entry of the user manifest. `dst` is the path of the file
/// inside the allotment layer; a leading `/` is stripped on build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllotmentRequest {
    pub src: String,
    pub dst: String,
    pub row: usize,
    pub col: usize,
}

impl TwoDfsManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FieldError::MalformedManifest(e.to_string()))
    }
}
