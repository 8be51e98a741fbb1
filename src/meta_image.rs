//! MetaImage (`.mha`) output
//!
//! Volumes are written as a single file: a plain-text header followed by the
//! raw voxels of the active channel, x varying fastest.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::volume::{ChannelData, ImageVolume};

#[derive(Debug, Error)]
pub enum MetaImageError {
    #[error("Unsupported volume file extension: {0}")]
    UnsupportedExtension(PathBuf),

    #[error("Volume has no active channel to write")]
    NoActiveChannel,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write the active channel of `volume` to `path` and return the written path
pub fn write_volume_file(
    volume: &ImageVolume,
    path: impl AsRef<Path>,
) -> Result<PathBuf, MetaImageError> {
    let path = path.as_ref();
    let is_mha = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mha"));
    if !is_mha {
        return Err(MetaImageError::UnsupportedExtension(path.to_path_buf()));
    }

    let (_, data) = volume.active_channel().ok_or(MetaImageError::NoActiveChannel)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(header(volume, data).as_bytes())?;

    match data {
        ChannelData::Scalar(values) => {
            let values: Vec<f32> = values.iter().copied().collect();
            writer.write_all(bytemuck::cast_slice::<f32, u8>(values.as_slice()))?;
        }
        ChannelData::Label(values) => {
            let values: Vec<u8> = values.iter().copied().collect();
            writer.write_all(&values)?;
        }
    }
    writer.flush()?;

    Ok(path.to_path_buf())
}

fn header(volume: &ImageVolume, data: &ChannelData) -> String {
    let (depth, height, width) = volume.dim();
    let (sx, sy, sz) = volume.spacing;
    let [ox, oy, oz] = volume.origin;
    let element_type = match data {
        ChannelData::Scalar(_) => "MET_FLOAT",
        ChannelData::Label(_) => "MET_UCHAR",
    };
    let msb = if cfg!(target_endian = "big") { "True" } else { "False" };
    let transform = volume
        .direction
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "ObjectType = Image\n\
         NDims = 3\n\
         BinaryData = True\n\
         BinaryDataByteOrderMSB = {msb}\n\
         CompressedData = False\n\
         TransformMatrix = {transform}\n\
         Offset = {ox} {oy} {oz}\n\
         CenterOfRotation = 0 0 0\n\
         ElementSpacing = {sx} {sy} {sz}\n\
         DimSize = {width} {height} {depth}\n\
         ElementNumberOfChannels = 1\n\
         ElementType = {element_type}\n\
         ElementDataFile = LOCAL\n"
    )
}
