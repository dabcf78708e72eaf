//! The retrieval input file: design images plus their embeddings
//!
//! Stored as MessagePack with named fields. Floats are written as raw `f32`,
//! so vectors round-trip bit-exactly, and `images` keeps insertion order,
//! which the ranker relies on for tie-breaking.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::models::DesignImage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Embedding model that produced every vector in `images`.
    pub model: String,
    pub dimensions: usize,
    pub built_at: DateTime<Utc>,
    pub images: Vec<DesignImage>,
}

impl Dataset {
    pub fn new(model: impl Into<String>, dimensions: usize, images: Vec<DesignImage>) -> Self {
        Self {
            model: model.into(),
            dimensions,
            built_at: Utc::now(),
            images,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Embedding slices in dataset order.
    pub fn embeddings(&self) -> impl Iterator<Item = &[f32]> {
        self.images.iter().map(|image| image.embedding.as_slice())
    }

    /// Read, decode and validate a dataset file.
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let bytes = std::fs::read(path).map_err(|source| RetrievalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset: Dataset = rmp_serde::from_slice(&bytes)?;
        dataset.validate()?;
        tracing::info!(
            path = %path.display(),
            images = dataset.len(),
            model = %dataset.model,
            dimensions = dataset.dimensions,
            "Dataset loaded"
        );
        Ok(dataset)
    }

    /// Validate, encode and write via a temporary sibling file so readers
    /// never observe a half-written dataset.
    pub fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        self.validate()?;
        let bytes = rmp_serde::to_vec_named(self)?;

        let io_err = |source| RetrievalError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.images.is_empty() {
            return Err(RetrievalError::EmptyDataset);
        }
        if self.dimensions == 0 {
            return Err(RetrievalError::MalformedDataset(
                "header dimensions is 0".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.images.len());
        for (index, image) in self.images.iter().enumerate() {
            if image.id.trim().is_empty() {
                return Err(RetrievalError::MalformedDataset(format!(
                    "image {index} has an empty id"
                )));
            }
            if !seen.insert(image.id.as_str()) {
                return Err(RetrievalError::MalformedDataset(format!(
                    "duplicate image id {:?}",
                    image.id
                )));
            }
            if image.embedding.len() != self.dimensions {
                return Err(RetrievalError::DimensionMismatch {
                    index,
                    expected: self.dimensions,
                    actual: image.embedding.len(),
                });
            }
            if image.embedding.iter().any(|x| !x.is_finite()) {
                return Err(RetrievalError::MalformedDataset(format!(
                    "image {:?} has non-finite embedding values",
                    image.id
                )));
            }
        }
        Ok(())
    }

    /// Refuse to serve queries from an embedder other than the one that built
    /// the dataset.
    pub fn ensure_compatible(&self, model: &str, dimensions: usize) -> Result<(), RetrievalError> {
        if self.model != model || self.dimensions != dimensions {
            return Err(RetrievalError::ModelMismatch {
                dataset_model: self.model.clone(),
                dataset_dimensions: self.dimensions,
                embedder_model: model.to_string(),
                embedder_dimensions: dimensions,
            });
        }
        Ok(())
    }
}
