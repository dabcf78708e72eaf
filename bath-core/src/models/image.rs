use serde::{Deserialize, Serialize};

/// A curated design image and its precomputed caption embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignImage {
    pub id: String,
    /// File path (or URI) of the image on the serving host.
    pub path: String,
    /// Browser-relative URL, e.g. `/static/boho/images/bathroom_boho_3.jpg`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    /// Text the embedding was produced from.
    #[serde(default)]
    pub caption: Option<String>,
    pub embedding: Vec<f32>,
}

/// One entry of a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedImage {
    /// 1-based position in the result list.
    pub rank: usize,
    pub id: String,
    pub path: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub style: Option<String>,
    pub score: f32,
}

impl RetrievedImage {
    pub fn from_image(image: &DesignImage, rank: usize, score: f32) -> Self {
        Self {
            rank,
            id: image.id.clone(),
            path: image.path.clone(),
            url: image.url.clone(),
            title: image.title.clone(),
            style: image.style.clone(),
            score,
        }
    }
}
