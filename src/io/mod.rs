//! GDAL backed providers

pub mod dem;
pub mod gdal_crs;

pub use dem::{ElevationModelDescriptor, ElevationModelRegistry, GridElevationModel};
pub use gdal_crs::GdalCrsProvider;
