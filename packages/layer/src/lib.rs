#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature layer plumbing around the aggregation core.
//!
//! Reads and writes layers as `GeoJSON`, moves geometries between the
//! supported coordinate references, resolves the raw source file for an
//! AOI, and defines the [`extract::LayerExtractor`] boundary through which
//! raw map data enters the pipeline.

pub mod extract;
pub mod geojson_io;
pub mod reproject;
pub mod resolve;

pub use hex_features_layer_models::*;

/// Errors from decoding or encoding feature layers.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// `GeoJSON` parsing or geometry conversion failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document is valid `GeoJSON` but not a `FeatureCollection`.
    #[error("Expected a GeoJSON FeatureCollection")]
    NotACollection,

    /// The document names a coordinate reference we cannot handle.
    #[error(transparent)]
    Crs(#[from] UnsupportedCrs),
}
