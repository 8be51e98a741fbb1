//! External air masking
//!
//! Voxels darker than half the Otsu threshold of the denoised volume are air
//! candidates. Only candidates connected to a lateral face of the volume are
//! reported, so internal cavities such as airways survive even when they
//! leave the scan through a z face.

use log::debug;
use ndarray::{Array3, Zip};
use thiserror::Error;

use crate::{
    components::keep_boundary_touching,
    filter::{Denoiser, MedianFilter},
    threshold::{DEFAULT_NUM_BINS, ThresholdError, otsu_threshold},
    volume::{ImageVolume, VolumeError},
};

/// Factor applied to the Otsu threshold. External air is much darker than the
/// boundary between the subject and its background.
pub const EXTERNAL_AIR_THRESHOLD_SCALE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("Threshold undefined: {0}")]
    ThresholdUndefined(#[from] ThresholdError),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Result of [`mask_external_air`]
#[derive(Debug)]
pub struct ExternalAirMask {
    /// `true` where the voxel is external air
    pub mask: Array3<bool>,
    /// The denoised volume the threshold was computed on
    pub filtered: ImageVolume,
    pub threshold: f64,
}

impl ExternalAirMask {
    pub fn into_parts(self) -> (Array3<bool>, ImageVolume, f64) {
        (self.mask, self.filtered, self.threshold)
    }

    pub fn masked_voxels(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
}

/// Mask the external air of `volume` after median filtering `channel_name`
/// with a kernel of `median_filter_size`.
pub fn mask_external_air(
    volume: &ImageVolume,
    median_filter_size: usize,
    channel_name: &str,
) -> Result<ExternalAirMask, MaskingError> {
    mask_external_air_with(&MedianFilter::new(median_filter_size), volume, channel_name)
}

/// Same as [`mask_external_air`] with any denoising step.
pub fn mask_external_air_with<F: Denoiser>(
    denoiser: &F,
    volume: &ImageVolume,
    channel_name: &str,
) -> Result<ExternalAirMask, MaskingError> {
    let filtered = denoiser.denoise(volume, channel_name)?;
    let intensities = filtered.read_channel(channel_name)?;

    let otsu = otsu_threshold(&intensities, DEFAULT_NUM_BINS)?;
    let threshold = otsu * EXTERNAL_AIR_THRESHOLD_SCALE;
    debug!("Otsu threshold {otsu}, external air threshold {threshold}");

    let mut candidates = Array3::from_elem(intensities.dim(), false);
    Zip::from(&mut candidates)
        .and(&intensities)
        .for_each(|candidate, &value| *candidate = f64::from(value) < threshold);

    let mask = keep_boundary_touching(&candidates);
    debug!(
        "{} voxels below threshold, {} connected to a lateral face",
        candidates.iter().filter(|&&v| v).count(),
        mask.iter().filter(|&&v| v).count()
    );

    Ok(ExternalAirMask {
        mask,
        filtered,
        threshold,
    })
}
