use crate::{enums::SortBy, volume::ImageVolume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::debug;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("More than one DICOM series found ({count} series)")]
    AmbiguousSeries { count: usize },

    #[error("More than one volume grid found in series ({count} grids)")]
    MultipleVolumes { count: usize },

    #[error("Slice {sop_instance_uid:?} has no value to sort by {sort_by:?}")]
    MissingSortKey {
        sort_by: SortBy,
        sop_instance_uid: String,
    },

    #[error("Failed to decode pixel data of slice {sop_instance_uid:?}: {message}")]
    Decode {
        sop_instance_uid: String,
        message: String,
    },

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type DicomFile = FileDicomObject<InMemDicomObject>;

/// All DICOM objects of a single series
pub struct DicomSeries {
    pub series_instance_uid: String,
    objects: Vec<DicomFile>,
}

impl DicomSeries {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[DicomFile] {
        &self.objects
    }
}

/// Grid geometry shared by every slice of one volume
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct GridKey {
    rows: Option<u32>,
    columns: Option<u32>,
    pixel_spacing: Vec<i64>,
    orientation: Vec<i64>,
}

struct Slices {
    order: f64,
    position: Option<[f64; 3]>,
    frames: Vec<Array2<f32>>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Read every DICOM file of a directory as one series
    ///
    /// Files that can not be parsed as DICOM are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if no DICOM file was found or the files belong to more
    /// than one series
    pub fn load_series_from_directory(
        path: impl AsRef<Path>,
    ) -> Result<DicomSeries, VolumeLoaderError> {
        let paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path) {
                Ok(object) => Some(object),
                Err(err) => {
                    debug!("Skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();

        Self::series_from_objects(objects)
    }

    /// Group DICOM objects by Series Instance UID, requiring exactly one series
    ///
    /// Objects without a Series Instance UID (e.g. a DICOMDIR) are ignored.
    pub fn series_from_objects(
        objects: Vec<DicomFile>,
    ) -> Result<DicomSeries, VolumeLoaderError> {
        let objects: Vec<_> = objects
            .into_iter()
            .filter_map(|object| match Self::series_uid(&object) {
                Some(uid) => Some((uid, object)),
                None => {
                    debug!(
                        "Skipping object {:?} without Series Instance UID",
                        Self::sop_instance_uid(&object)
                    );
                    None
                }
            })
            .collect();

        let mut groups = partition_by(objects, |(uid, _)| uid.clone());
        if groups.len() > 1 {
            return Err(VolumeLoaderError::AmbiguousSeries {
                count: groups.len(),
            });
        }

        let (series_instance_uid, objects) = groups
            .pop_first()
            .ok_or(VolumeLoaderError::NoValidImages)?;
        Ok(DicomSeries {
            series_instance_uid,
            objects: objects.into_iter().map(|(_, object)| object).collect(),
        })
    }

    /// Reconstruct the voxel grid of a series
    ///
    /// # Arguments
    ///
    /// * `series` - Objects of a single series
    /// * `sort_by` - Method to sort the slices
    /// * `channel_name` - Name of the scalar channel receiving the pixel data
    ///
    /// # Errors
    ///
    /// Returns error if the slices describe more than one grid, a slice lacks
    /// its sort key or can not be decoded, or dimensions are inconsistent
    pub fn build_volume(
        series: &DicomSeries,
        sort_by: SortBy,
        channel_name: &str,
    ) -> Result<ImageVolume, VolumeLoaderError> {
        let grids = partition_by(series.objects.iter().collect::<Vec<_>>(), |object| {
            Self::grid_key(object)
        });
        if grids.len() > 1 {
            return Err(VolumeLoaderError::MultipleVolumes {
                count: grids.len(),
            });
        }

        let mut slices = series
            .objects
            .par_iter()
            .map(|object| Self::extract_slices(object, sort_by))
            .collect::<Result<Vec<_>, _>>()?;

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);

        let frames: Vec<_> = slices.iter().flat_map(|slice| slice.frames.iter()).collect();
        Self::validate_dimensions(&frames)?;
        let volume_array = Self::build_volume_array(&frames);

        let (x_spacing, y_spacing) =
            Self::get_pixel_spacing(&series.objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let positions: Vec<[f64; 3]> = slices.iter().filter_map(|slice| slice.position).collect();
        let z_spacing = Self::get_slice_spacing(&series.objects, &positions, frames.len());

        let spacing = (x_spacing, y_spacing, z_spacing);
        let mut volume = ImageVolume::from_scalar(channel_name, volume_array, spacing);
        if let Some(origin) = positions.first() {
            volume.origin = *origin;
        }
        let orientation = series
            .objects
            .iter()
            .find_map(|object| Self::orientation(object));
        if let Some(orientation) = orientation {
            volume.direction = Self::direction(&orientation, &positions);
        }
        Ok(volume)
    }

    fn text(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
        object
            .element(tag)
            .ok()
            .and_then(|element| element.to_str().ok())
            .map(|value| value.trim_end_matches('\0').trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn series_uid(object: &InMemDicomObject) -> Option<String> {
        Self::text(object, tags::SERIES_INSTANCE_UID)
    }

    fn sop_instance_uid(object: &InMemDicomObject) -> String {
        Self::text(object, tags::SOP_INSTANCE_UID).unwrap_or_default()
    }

    fn grid_key(object: &InMemDicomObject) -> GridKey {
        let int = |tag| object.element(tag).ok()?.to_int::<u32>().ok();
        let quantized = |tag| {
            object
                .element(tag)
                .ok()
                .and_then(|element| element.to_multi_float64().ok())
                .map(|values| {
                    values
                        .iter()
                        .map(|v| (v * 1e4).round() as i64)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        GridKey {
            rows: int(tags::ROWS),
            columns: int(tags::COLUMNS),
            pixel_spacing: quantized(tags::PIXEL_SPACING),
            orientation: quantized(tags::IMAGE_ORIENTATION_PATIENT),
        }
    }

    fn position(object: &InMemDicomObject) -> Option<[f64; 3]> {
        let pos = object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        (pos.len() >= 3).then(|| [pos[0], pos[1], pos[2]])
    }

    fn orientation(object: &InMemDicomObject) -> Option<[f64; 6]> {
        let c = object
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        (c.len() >= 6).then(|| [c[0], c[1], c[2], c[3], c[4], c[5]])
    }

    fn slice_normal(orientation: &[f64; 6]) -> [f64; 3] {
        let (r, c) = (&orientation[..3], &orientation[3..]);
        [
            r[1] * c[2] - r[2] * c[1],
            r[2] * c[0] - r[0] * c[2],
            r[0] * c[1] - r[1] * c[0],
        ]
    }

    /// Value the slice is ordered by, `None` when the object lacks it
    fn get_sort_order(object: &InMemDicomObject, sort_by: SortBy) -> Option<f64> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = Self::position(object)?;
                let order = match Self::orientation(object) {
                    Some(orientation) => {
                        let n = Self::slice_normal(&orientation);
                        pos[0] * n[0] + pos[1] * n[1] + pos[2] * n[2]
                    }
                    None => pos[2],
                };
                Some(order)
            }
            SortBy::TablePosition => object
                .element(tags::TABLE_POSITION)
                .ok()?
                .to_float64()
                .ok(),
            SortBy::InstanceNumber => object
                .element(tags::INSTANCE_NUMBER)
                .ok()?
                .to_int::<i32>()
                .ok()
                .map(f64::from),
            SortBy::None => Some(0.0),
        }
    }

    fn extract_slices(object: &DicomFile, sort_by: SortBy) -> Result<Slices, VolumeLoaderError> {
        let order = Self::get_sort_order(object, sort_by).ok_or_else(|| {
            VolumeLoaderError::MissingSortKey {
                sort_by,
                sop_instance_uid: Self::sop_instance_uid(object),
            }
        })?;
        let frames = Self::decode_frames(object)?;
        Ok(Slices {
            order,
            position: Self::position(object),
            frames,
        })
    }

    /// Decode every frame of an object with the modality LUT applied
    fn decode_frames(object: &DicomFile) -> Result<Vec<Array2<f32>>, VolumeLoaderError> {
        let decode_error = |message: String| VolumeLoaderError::Decode {
            sop_instance_uid: Self::sop_instance_uid(object),
            message,
        };

        let pixel_data = object
            .decode_pixel_data()
            .map_err(|err| decode_error(err.to_string()))?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let array = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map_err(|err| decode_error(err.to_string()))?;

        let frames = (0..array.dim().0)
            .map(|frame| array.slice(s![frame, .., .., 0]).to_owned())
            .collect();
        Ok(frames)
    }

    fn sort_slices(slices: &mut [Slices], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| a.order.total_cmp(&b.order));
        }
    }

    fn validate_dimensions(frames: &[&Array2<f32>]) -> Result<(), VolumeLoaderError> {
        let first_dim = frames[0].dim();
        if frames.iter().any(|frame| frame.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(frames: &[&Array2<f32>]) -> Array3<f32> {
        let (height, width) = frames[0].dim();
        let depth = frames.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, frame) in frames.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(*frame);
        }

        volume
    }

    /// In-plane spacing as (x, y). PixelSpacing holds (row spacing, column spacing).
    fn get_pixel_spacing(objects: &[DicomFile]) -> Option<(f32, f32)> {
        objects.iter().find_map(|object| {
            let pixel_spacing = object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;
            (pixel_spacing.len() >= 2).then(|| (pixel_spacing[1], pixel_spacing[0]))
        })
    }

    fn get_slice_spacing(objects: &[DicomFile], positions: &[[f64; 3]], depth: usize) -> f32 {
        if let (Some(first), Some(last)) = (positions.first(), positions.last()) {
            let distance = distance(first, last);
            if positions.len() > 1 && depth > 1 && distance > 0.0 {
                return (distance / (depth - 1) as f64) as f32;
            }
        }

        [tags::SPACING_BETWEEN_SLICES, tags::SLICE_THICKNESS]
            .into_iter()
            .find_map(|tag| {
                objects.iter().find_map(|object| {
                    object
                        .element(tag)
                        .ok()?
                        .to_float32()
                        .ok()
                        .filter(|spacing| *spacing > 0.0)
                })
            })
            .unwrap_or(1.0)
    }

    fn direction(orientation: &[f64; 6], positions: &[[f64; 3]]) -> [f64; 9] {
        let normal = match (positions.first(), positions.last()) {
            (Some(first), Some(last)) if distance(first, last) > 0.0 => {
                let d = distance(first, last);
                [
                    (last[0] - first[0]) / d,
                    (last[1] - first[1]) / d,
                    (last[2] - first[2]) / d,
                ]
            }
            _ => Self::slice_normal(orientation),
        };
        let [rx, ry, rz, cx, cy, cz] = *orientation;
        let [nx, ny, nz] = normal;
        [rx, ry, rz, cx, cy, cz, nx, ny, nz]
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(a, b)| (b - a).powi(2)).sum::<f64>().sqrt()
}

fn partition_by<T, K: Ord>(items: Vec<T>, key: impl Fn(&T) -> K) -> BTreeMap<K, Vec<T>> {
    let mut groups: BTreeMap<K, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::FileMetaTableBuilder;
    use dicom_dictionary_std::uids;

    const COLUMNS: u16 = 4;

    fn ds(values: &[f64]) -> PrimitiveValue {
        PrimitiveValue::Strs(values.iter().map(f64::to_string).collect())
    }

    /// An 8-bit MONOCHROME2 CT slice, `rows` x 4 pixels
    fn ct_slice(
        series: Option<&str>,
        instance: u32,
        rows: u16,
        position: Option<[f64; 3]>,
    ) -> DicomFile {
        let sop_instance_uid = format!("1.2.826.0.1.3680043.2.1125.{instance}");
        let pixels: Vec<u8> = (0..rows as usize * COLUMNS as usize)
            .map(|i| (i as u32 * 10 + instance) as u8)
            .collect();

        let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        let text = |tag, vr, value: &str| DataElement::new(tag, vr, PrimitiveValue::from(value));
        let mut object = InMemDicomObject::from_element_iter([
            text(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
            text(tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid),
            text(tags::INSTANCE_NUMBER, VR::IS, &instance.to_string()),
            us(tags::SAMPLES_PER_PIXEL, 1),
            text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
            us(tags::ROWS, rows),
            us(tags::COLUMNS, COLUMNS),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, ds(&[0.5, 0.75])),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                ds(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ),
            us(tags::BITS_ALLOCATED, 8),
            us(tags::BITS_STORED, 8),
            us(tags::HIGH_BIT, 7),
            us(tags::PIXEL_REPRESENTATION, 0),
            DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(pixels.into())),
        ]);
        if let Some(series) = series {
            object.put(text(tags::SERIES_INSTANCE_UID, VR::UI, series));
        }
        if let Some(position) = position {
            object.put(DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position)));
        }

        object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop_instance_uid),
            )
            .unwrap()
    }

    fn series(objects: Vec<DicomFile>) -> DicomSeries {
        VolumeLoader::series_from_objects(objects).unwrap()
    }

    #[test]
    fn series_uid_is_trimmed() {
        let object = ct_slice(Some("1.2.3\0"), 1, 2, None);
        assert_eq!(VolumeLoader::series_uid(&object).as_deref(), Some("1.2.3"));
    }

    #[test]
    fn two_series_are_ambiguous() {
        let objects = vec![
            ct_slice(Some("1.2.3"), 1, 2, Some([0.0, 0.0, 0.0])),
            ct_slice(Some("1.2.4"), 2, 2, Some([0.0, 0.0, 1.0])),
            ct_slice(Some("1.2.3"), 3, 2, Some([0.0, 0.0, 2.0])),
        ];
        let err = VolumeLoader::series_from_objects(objects).err().unwrap();
        assert!(matches!(err, VolumeLoaderError::AmbiguousSeries { count: 2 }));
    }

    #[test]
    fn objects_without_series_uid_are_ignored() {
        let objects = vec![
            ct_slice(Some("1.2.3"), 1, 2, Some([0.0, 0.0, 0.0])),
            ct_slice(None, 2, 2, None),
            ct_slice(Some("1.2.3"), 3, 2, Some([0.0, 0.0, 2.0])),
        ];
        let series = series(objects);
        assert_eq!(series.series_instance_uid, "1.2.3");
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn only_objects_without_series_uid_have_no_images() {
        let err = VolumeLoader::series_from_objects(vec![ct_slice(None, 1, 2, None)])
            .err()
            .unwrap();
        assert!(matches!(err, VolumeLoaderError::NoValidImages));
    }

    #[test]
    fn two_grids_are_multiple_volumes() {
        let series = series(vec![
            ct_slice(Some("1.2.3"), 1, 2, Some([0.0, 0.0, 0.0])),
            ct_slice(Some("1.2.3"), 2, 3, Some([0.0, 0.0, 1.0])),
        ]);
        let err = VolumeLoader::build_volume(&series, SortBy::default(), "PixelData")
            .err()
            .unwrap();
        assert!(matches!(err, VolumeLoaderError::MultipleVolumes { count: 2 }));
    }

    #[test]
    fn slice_without_position_fails_the_build() {
        let series = series(vec![
            ct_slice(Some("1.2.3"), 1, 2, Some([0.0, 0.0, 0.0])),
            ct_slice(Some("1.2.3"), 2, 2, None),
            ct_slice(Some("1.2.3"), 3, 2, Some([0.0, 0.0, 4.0])),
            ct_slice(Some("1.2.3"), 4, 2, None),
        ]);
        let err = VolumeLoader::build_volume(&series, SortBy::ImagePositionPatient, "PixelData")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            VolumeLoaderError::MissingSortKey { sort_by: SortBy::ImagePositionPatient, .. }
        ));
    }

    #[test]
    fn slices_are_stacked_along_the_normal() {
        let series = series(vec![
            ct_slice(Some("1.2.3"), 1, 2, Some([0.0, 0.0, 4.0])),
            ct_slice(Some("1.2.3"), 2, 2, Some([0.0, 0.0, 0.0])),
            ct_slice(Some("1.2.3"), 3, 2, Some([0.0, 0.0, 2.0])),
        ]);
        let volume = VolumeLoader::build_volume(&series, SortBy::default(), "PixelData").unwrap();

        assert_eq!(volume.dim(), (3, 2, 4));
        assert_eq!(volume.spacing, (0.75, 0.5, 2.0));
        assert_eq!(volume.origin, [0.0, 0.0, 0.0]);
        assert_eq!(&volume.direction[6..], &[0.0, 0.0, 1.0]);

        let data = volume.read_channel("PixelData").unwrap();
        // first pixel of each slice encodes its instance number
        assert_eq!(data[(0, 0, 0)], 2.0);
        assert_eq!(data[(1, 0, 0)], 3.0);
        assert_eq!(data[(2, 0, 0)], 1.0);
        assert_eq!(data[(2, 1, 3)], 71.0);
    }

    #[test]
    fn instance_number_order_ignores_positions() {
        let series = series(vec![
            ct_slice(Some("1.2.3"), 2, 2, None),
            ct_slice(Some("1.2.3"), 1, 2, None),
        ]);
        let volume =
            VolumeLoader::build_volume(&series, SortBy::InstanceNumber, "PixelData").unwrap();
        let data = volume.read_channel("PixelData").unwrap();
        assert_eq!(data[(0, 0, 0)], 1.0);
        assert_eq!(data[(1, 0, 0)], 2.0);
    }

    #[test]
    fn grid_key_ignores_position_but_not_size() {
        let a = VolumeLoader::grid_key(&ct_slice(Some("1"), 1, 2, Some([0.0, 0.0, 0.0])));
        let b = VolumeLoader::grid_key(&ct_slice(Some("1"), 2, 2, Some([0.0, 0.0, 5.0])));
        let c = VolumeLoader::grid_key(&ct_slice(Some("1"), 3, 3, Some([0.0, 0.0, 0.0])));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn position_order_follows_slice_normal() {
        let low = ct_slice(Some("1"), 1, 2, Some([3.0, 4.0, -10.0]));
        let high = ct_slice(Some("1"), 2, 2, Some([0.0, 0.0, 2.5]));
        let sort_by = SortBy::ImagePositionPatient;
        assert_eq!(VolumeLoader::get_sort_order(&low, sort_by), Some(-10.0));
        assert_eq!(VolumeLoader::get_sort_order(&high, sort_by), Some(2.5));
    }

    #[test]
    fn direction_points_from_first_to_last_slice() {
        let orientation = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let positions = [[0.0, 0.0, 10.0], [0.0, 0.0, 0.0]];
        let direction = VolumeLoader::direction(&orientation, &positions);
        assert_eq!(&direction[6..], &[0.0, 0.0, -1.0]);
    }

    #[test]
    fn empty_object_list_has_no_images() {
        let err = VolumeLoader::series_from_objects(Vec::new()).err().unwrap();
        assert!(matches!(err, VolumeLoaderError::NoValidImages));
    }
}
