// src/config/mod.rs
pub mod detection;
pub mod points;

pub use detection::DetectionConfig;
pub use points::{dimension, point_description, DimensionSpec, PointSpec};
