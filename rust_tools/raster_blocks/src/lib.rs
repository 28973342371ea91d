// Library exports for testing and reuse

pub mod array;
pub mod associations;
pub mod buffer;
pub mod builtins;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod creation;
pub mod crs;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gdalapp;
pub mod metadata;
pub mod pixelgrid;
pub mod reader;
pub mod stats;
pub mod subprocess;
pub mod tempfiles;
pub mod transform;
pub mod wire;
pub mod workinggrid;
pub mod writer;

// Re-export commonly used types
pub use array::{BlockArray, Pixel, PixelType};
pub use associations::{BlockAssociations, FilenameAssociations, SlotKey};
pub use config::{
    ComputeKind, ConcurrencyStyle, Controls, Footprint, InputSetting, OutputSetting, ReferenceGrid,
    ResampleMethod, SinglePass,
};
pub use engine::{apply, RunSummary};
pub use error::{BlockError, Result};
pub use pixelgrid::PixelGridDefn;
pub use transform::{BlockInfo, BlockTransform};
