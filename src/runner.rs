use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;
use web_time::Instant;

use crate::{
    config::{ConfigError, Parameters},
    enums::SortBy,
    masking::{MaskingError, mask_external_air},
    meta_image::{MetaImageError, write_volume_file},
    volume::VolumeError,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

/// Scalar channel holding the reconstructed pixel data
pub const PIXEL_DATA_CHANNEL: &str = "PixelData";
/// Label channel holding the external air mask
pub const LABELS_CHANNEL: &str = "Labels";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Input path does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("Input path is not a directory: {0}")]
    InputNotADirectory(PathBuf),

    #[error("No output directory provided and none can be derived from {0}")]
    NoOutputDirectory(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Loader(#[from] VolumeLoaderError),

    #[error(transparent)]
    Masking(#[from] MaskingError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("Failed to write volume: {0}")]
    Write(#[from] MetaImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate that the input directory exists and is a directory
pub fn validate_input_dir(input_dir: &Path) -> Result<(), RunError> {
    if !input_dir.exists() {
        return Err(RunError::InputNotFound(input_dir.to_path_buf()));
    }
    if !input_dir.is_dir() {
        return Err(RunError::InputNotADirectory(input_dir.to_path_buf()));
    }
    Ok(())
}

/// Output directory from the command line, or the parent of the input directory
pub fn resolve_output_dir(
    output_dir: Option<&Path>,
    input_dir: &Path,
) -> Result<PathBuf, RunError> {
    if let Some(output_dir) = output_dir {
        return Ok(output_dir.to_path_buf());
    }
    input_dir
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or_else(|| RunError::NoOutputDirectory(input_dir.to_path_buf()))
}

/// Artifacts of a completed run
#[derive(Debug)]
pub struct RunSummary {
    pub original: PathBuf,
    pub filtered: PathBuf,
    pub masked: PathBuf,
    pub threshold: f64,
    pub masked_voxels: usize,
}

/// One masking run over a directory of DICOM files
pub struct Kopare {
    input_directory: PathBuf,
    output_dir: PathBuf,
    parameters: Parameters,
    sort_by: SortBy,
}

impl Kopare {
    pub fn new(input_directory: PathBuf, output_dir: PathBuf, parameters: Parameters) -> Self {
        Self {
            input_directory,
            output_dir,
            parameters,
            sort_by: SortBy::default(),
        }
    }

    pub fn with_sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn run(&self) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        info!("Starting processing");
        info!("Input directory: {}", self.input_directory.display());
        info!("Output directory: {}", self.output_dir.display());
        info!("Loaded {} parameter entries", self.parameters.entry_count());

        let series = VolumeLoader::load_series_from_directory(&self.input_directory)?;
        info!(
            "Processing directory {}. Found {} DICOMs",
            self.input_directory.display(),
            series.len()
        );

        let mut image = VolumeLoader::build_volume(&series, self.sort_by, PIXEL_DATA_CHANNEL)?;
        info!("Reconstructed volume of {:?} voxels (z, y, x)", image.dim());

        let original = write_volume_file(&image, self.output_dir.join("imageData_original.mha"))?;
        info!("Wrote original image to {}", original.display());

        let median_filter_size = self.parameters.median_filter_size;
        let result = mask_external_air(&image, median_filter_size, PIXEL_DATA_CHANNEL)?;
        info!("External air threshold: {}", result.threshold);
        let masked_voxels = result.masked_voxels();
        let (mask, image_med, threshold) = result.into_parts();

        image.write_label_channel(LABELS_CHANNEL, &mask)?;

        let filtered = write_volume_file(
            &image_med,
            self.output_dir.join(format!("imageData_med-filter_{median_filter_size}.mha")),
        )?;
        info!("Wrote med-filtered image to {}", filtered.display());

        let masked = write_volume_file(&image, self.output_dir.join("imageData_masked.mha"))?;
        info!("Wrote masked image to {}", masked.display());
        info!("Finished in {:.2?}", start.elapsed());

        Ok(RunSummary {
            original,
            filtered,
            masked,
            threshold,
            masked_voxels,
        })
    }
}
