//! Embeds cleaned catalog entries into a [`Dataset`].

use bath_core::{Dataset, DesignImage, EmbeddingBackend};

use crate::catalog::CatalogEntry;
use crate::error::IndexError;

/// Embed each entry's description with the document task type, in catalog
/// order. Stops at the first failure.
pub async fn build_dataset(
    entries: Vec<CatalogEntry>,
    backend: &dyn EmbeddingBackend,
) -> Result<Dataset, IndexError> {
    if entries.is_empty() {
        return Err(IndexError::NothingToIndex);
    }

    let total = entries.len();
    let mut images = Vec::with_capacity(total);

    for (i, entry) in entries.into_iter().enumerate() {
        let embedding = backend
            .embed(&entry.description)
            .await
            .map_err(|source| IndexError::Embedding {
                id: entry.id.clone(),
                source,
            })?;

        images.push(DesignImage {
            id: entry.id,
            path: entry.path,
            url: Some(entry.url),
            title: entry.title,
            style: Some(entry.style),
            caption: Some(entry.description),
            embedding,
        });

        if (i + 1) % 25 == 0 || i + 1 == total {
            tracing::info!(done = i + 1, total, "Embedding catalog");
        }
    }

    let dataset = Dataset::new(backend.model(), backend.dimensions(), images);
    dataset.validate()?;
    Ok(dataset)
}
