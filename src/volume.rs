use std::collections::BTreeMap;

use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Channel '{0}' not found in volume")]
    ChannelMissing(String),

    #[error("Channel '{name}' has shape {found:?}, volume has shape {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

/// Voxel samples of a single named channel
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    /// Continuous intensities (e.g. Hounsfield units)
    Scalar(Array3<f32>),
    /// Small integer labels, 0 = background
    Label(Array3<u8>),
}

impl ChannelData {
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            ChannelData::Scalar(data) => data.dim(),
            ChannelData::Label(data) => data.dim(),
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, ChannelData::Label(_))
    }

    /// Copy of the channel as floating point values
    pub fn to_f32(&self) -> Array3<f32> {
        match self {
            ChannelData::Scalar(data) => data.clone(),
            ChannelData::Label(data) => data.mapv(f32::from),
        }
    }
}

/// A regular voxel grid carrying any number of named channels.
///
/// All channels share the grid shape, stored in (z, y, x) order where z is the
/// slice axis. Spacing is stored in (x, y, z) order in millimetres, matching
/// the order in which it is written to disk.
#[derive(Clone, Debug)]
pub struct ImageVolume {
    shape: (usize, usize, usize),
    pub spacing: (f32, f32, f32),
    pub origin: [f64; 3],
    /// Row-major 3x3 matrix whose rows are the x, y and z axis directions
    pub direction: [f64; 9],
    channels: BTreeMap<String, ChannelData>,
    active: Option<String>,
}

impl ImageVolume {
    pub const IDENTITY_DIRECTION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    /// Create an empty grid without channels
    pub fn new(shape: (usize, usize, usize), spacing: (f32, f32, f32)) -> Self {
        Self {
            shape,
            spacing,
            origin: [0.0; 3],
            direction: Self::IDENTITY_DIRECTION,
            channels: BTreeMap::new(),
            active: None,
        }
    }

    /// Create a grid from a scalar array, stored as the active channel `name`
    pub fn from_scalar(name: &str, data: Array3<f32>, spacing: (f32, f32, f32)) -> Self {
        let mut volume = Self::new(data.dim(), spacing);
        volume.channels.insert(name.to_owned(), ChannelData::Scalar(data));
        volume.active = Some(name.to_owned());
        volume
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelData, VolumeError> {
        self.channels
            .get(name)
            .ok_or_else(|| VolumeError::ChannelMissing(name.to_owned()))
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// The channel written when the volume is persisted
    pub fn active_channel(&self) -> Option<(&str, &ChannelData)> {
        let name = self.active.as_deref()?;
        self.channels.get(name).map(|data| (name, data))
    }

    /// Read a channel as a plain 3D array of floats
    pub fn read_channel(&self, name: &str) -> Result<Array3<f32>, VolumeError> {
        self.channel(name).map(ChannelData::to_f32)
    }

    /// Insert or replace a channel. With `set_active` the channel becomes the
    /// one written to disk.
    pub fn write_channel(
        &mut self,
        name: &str,
        data: ChannelData,
        set_active: bool,
    ) -> Result<(), VolumeError> {
        let found = data.dim();
        if found != self.shape {
            return Err(VolumeError::ShapeMismatch {
                name: name.to_owned(),
                expected: self.shape,
                found,
            });
        }
        self.channels.insert(name.to_owned(), data);
        if set_active {
            self.active = Some(name.to_owned());
        }
        Ok(())
    }

    /// Store a boolean mask as a label channel (1 = true) and make it active
    pub fn write_label_channel(
        &mut self,
        name: &str,
        mask: &Array3<bool>,
    ) -> Result<(), VolumeError> {
        self.write_channel(name, ChannelData::Label(mask.mapv(u8::from)), true)
    }
}
