mod image;

pub use image::{DesignImage, RetrievedImage};
