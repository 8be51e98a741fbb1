//! # kopare
//!
//! Masks the external air surrounding a scanned subject in a volume
//! reconstructed from a DICOM series.
//!
//! A series is read from a directory with [`VolumeLoader`] and stacked into an
//! [`ImageVolume`], a (z, y, x) voxel grid holding named channels. Masking then
//!  - median filters the pixel data,
//!  - thresholds at half of the Otsu threshold of the filtered intensities,
//!  - keeps the dark voxels only where their 6-connected component touches an
//!    x or y face of the volume.
//!
//! Dark components that reach nothing but the z faces are internal structures
//! (an airway leaving the scan axially, for instance) and are not masked.
//!
//! DICOM files are assumed to have the following attributes:
//!   - A single series (Series Instance UID) per directory
//!   - One image grid (rows, columns, pixel spacing, orientation) per series
//!
//! # Examples
//!
//! ## Masking a DICOM directory
//!
//! ```no_run
//! # use kopare::{VolumeLoader, SortBy, mask_external_air, write_volume_file};
//! let series = VolumeLoader::load_series_from_directory("dicom")
//!     .expect("should have loaded a single series");
//! let mut volume = VolumeLoader::build_volume(&series, SortBy::default(), "PixelData")
//!     .expect("should have reconstructed one volume");
//! let result = mask_external_air(&volume, 3, "PixelData")
//!     .expect("should have found an external air threshold");
//! volume
//!     .write_label_channel("Labels", &result.mask)
//!     .expect("mask has the volume shape");
//! write_volume_file(&volume, "masked.mha").expect("should have written the masked volume");
//! ```

pub mod components;
pub mod config;
pub mod enums;
pub mod filter;
pub mod masking;
pub mod meta_image;
pub mod runner;
pub mod threshold;
pub mod volume;
pub mod volume_loader;

pub use components::keep_boundary_touching;
pub use enums::{Face, SortBy};
pub use masking::{ExternalAirMask, mask_external_air};
pub use meta_image::write_volume_file;
pub use volume::ImageVolume;
pub use volume_loader::VolumeLoader;
