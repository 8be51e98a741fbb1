//! Denoising filters applied before thresholding.

use ndarray::{Array3, Axis, s};
use rayon::prelude::*;

use crate::volume::{ChannelData, ImageVolume, VolumeError};

/// Smooths one channel of a volume, producing a new volume.
pub trait Denoiser {
    /// Returns a copy of `volume` whose `channel` holds the smoothed values and
    /// is the active channel. The input volume is left untouched.
    fn denoise(&self, volume: &ImageVolume, channel: &str) -> Result<ImageVolume, VolumeError>;
}

/// Cubic median filter.
///
/// The kernel spans `kernel_size` voxels along each axis, centred on the
/// output voxel (even sizes reach one voxel further towards the low side).
/// At the borders only voxels inside the volume take part, and the upper
/// median is used when the neighbourhood has an even number of voxels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MedianFilter {
    kernel_size: usize,
}

impl MedianFilter {
    pub fn new(kernel_size: usize) -> Self {
        Self { kernel_size }
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn apply(&self, data: &Array3<f32>) -> Array3<f32> {
        if self.kernel_size <= 1 || data.is_empty() {
            return data.clone();
        }

        let (depth, height, width) = data.dim();
        let before = self.kernel_size / 2;
        let after = (self.kernel_size - 1) / 2;
        let range = |i: usize, len: usize| i.saturating_sub(before)..(i + after + 1).min(len);

        let mut output = Array3::<f32>::zeros(data.dim());
        output
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(z, mut plane)| {
                // One scratch buffer per plane, reused for every voxel
                let mut neighbours = Vec::with_capacity(self.kernel_size.pow(3));
                for ((y, x), value) in plane.indexed_iter_mut() {
                    let window = data.slice(s![range(z, depth), range(y, height), range(x, width)]);
                    neighbours.clear();
                    neighbours.extend(window.iter().copied());
                    let mid = neighbours.len() / 2;
                    let (_, median, _) = neighbours.select_nth_unstable_by(mid, f32::total_cmp);
                    *value = *median;
                }
            });

        output
    }
}

impl Denoiser for MedianFilter {
    fn denoise(&self, volume: &ImageVolume, channel: &str) -> Result<ImageVolume, VolumeError> {
        let filtered = self.apply(&volume.read_channel(channel)?);
        let mut output = volume.clone();
        output.write_channel(channel, ChannelData::Scalar(filtered), true)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_isolated_spike() {
        let mut data = Array3::<f32>::zeros((5, 5, 5));
        data[(2, 2, 2)] = 1000.0;
        let filtered = MedianFilter::new(3).apply(&data);
        assert_eq!(filtered[(2, 2, 2)], 0.0);
        assert!(filtered.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn kernel_of_one_is_identity() {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 20 + y * 5 + x) as f32);
        assert_eq!(MedianFilter::new(1).apply(&data), data);
        assert_eq!(MedianFilter::new(0).apply(&data), data);
    }

    #[test]
    fn preserves_large_regions_and_shape() {
        let data = Array3::from_shape_fn((6, 6, 6), |(_, _, x)| if x < 3 { -1000.0 } else { 50.0 });
        let filtered = MedianFilter::new(3).apply(&data);
        assert_eq!(filtered.dim(), data.dim());
        assert_eq!(filtered[(3, 3, 0)], -1000.0);
        assert_eq!(filtered[(3, 3, 5)], 50.0);
    }

    #[test]
    fn matches_brute_force_median_in_every_plane() {
        let data =
            Array3::from_shape_fn((4, 5, 6), |(z, y, x)| ((z * 37 + y * 11 + x * 7) % 23) as f32);
        let filtered = MedianFilter::new(3).apply(&data);

        for ((z, y, x), &value) in filtered.indexed_iter() {
            let mut window = Vec::new();
            for dz in z.saturating_sub(1)..(z + 2).min(4) {
                for dy in y.saturating_sub(1)..(y + 2).min(5) {
                    for dx in x.saturating_sub(1)..(x + 2).min(6) {
                        window.push(data[(dz, dy, dx)]);
                    }
                }
            }
            window.sort_by(f32::total_cmp);
            assert_eq!(value, window[window.len() / 2], "voxel {:?}", (z, y, x));
        }
    }

    #[test]
    fn border_uses_in_bounds_neighbours_only() {
        // Corner neighbourhood of a 3-kernel is 2x2x2 = 8 voxels, the upper median is taken
        let data = Array3::from_shape_fn((2, 2, 2), |(z, y, x)| (z * 4 + y * 2 + x) as f32);
        let filtered = MedianFilter::new(3).apply(&data);
        assert!(filtered.iter().all(|&v| v == 4.0));
    }

    #[test]
    fn denoise_keeps_input_volume_untouched() {
        let mut data = Array3::<f32>::zeros((3, 3, 3));
        data[(1, 1, 1)] = 7.0;
        let volume = ImageVolume::from_scalar("PixelData", data.clone(), (1.0, 1.0, 2.0));

        let filtered = MedianFilter::new(3).denoise(&volume, "PixelData").unwrap();
        assert_eq!(volume.read_channel("PixelData").unwrap(), data);
        assert_eq!(filtered.read_channel("PixelData").unwrap()[(1, 1, 1)], 0.0);
        assert_eq!(filtered.spacing, volume.spacing);
    }

    #[test]
    fn denoise_missing_channel_fails() {
        let volume =
            ImageVolume::from_scalar("PixelData", Array3::zeros((2, 2, 2)), (1.0, 1.0, 1.0));
        let err = MedianFilter::new(3).denoise(&volume, "Density").unwrap_err();
        assert!(matches!(err, VolumeError::ChannelMissing(_)));
    }
}
