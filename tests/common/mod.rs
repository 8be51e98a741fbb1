//! Synthetic volumes shared by the integration tests
#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use dicom::{
    core::{DataElement, PrimitiveValue, VR},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::{tags, uids};
use kopare::ImageVolume;
use ndarray::{Array2, Array3};

pub const AIR: f32 = -1000.0;
pub const TISSUE: f32 = 40.0;

/// A cylindrical body along z, surrounded by air, with an airway through its
/// centre that leaves the volume through both z faces.
pub fn body_with_airway(shape: (usize, usize, usize)) -> ImageVolume {
    let (_, height, width) = shape;
    let (cy, cx) = ((height as f32 - 1.0) / 2.0, (width as f32 - 1.0) / 2.0);
    let body_radius = cy.min(cx) * 0.8;

    let data = Array3::from_shape_fn(shape, |(_, y, x)| {
        let r = ((y as f32 - cy).powi(2) + (x as f32 - cx).powi(2)).sqrt();
        if r < 1.5 || r >= body_radius { AIR } else { TISSUE }
    });
    ImageVolume::from_scalar("PixelData", data, (0.8, 0.8, 2.5))
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kopare-it-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(f64::to_string).collect())
}

/// Write one 8-bit MONOCHROME2 CT file per slice, stacked 2.5 mm apart
pub fn write_series(dir: &Path, series_instance_uid: &str, slices: &[Array2<u8>]) {
    for (index, pixels) in slices.iter().enumerate() {
        let (rows, columns) = pixels.dim();
        let sop_instance_uid = format!("{series_instance_uid}.{}", index + 1);
        let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        let text = |tag, vr, value: &str| DataElement::new(tag, vr, PrimitiveValue::from(value));
        let bytes: Vec<u8> = pixels.iter().copied().collect();

        let object = InMemDicomObject::from_element_iter([
            text(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
            text(tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid),
            text(tags::SERIES_INSTANCE_UID, VR::UI, series_instance_uid),
            text(tags::INSTANCE_NUMBER, VR::IS, &(index + 1).to_string()),
            text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
            us(tags::SAMPLES_PER_PIXEL, 1),
            us(tags::ROWS, rows as u16),
            us(tags::COLUMNS, columns as u16),
            us(tags::BITS_ALLOCATED, 8),
            us(tags::BITS_STORED, 8),
            us(tags::HIGH_BIT, 7),
            us(tags::PIXEL_REPRESENTATION, 0),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, ds(&[0.8, 0.8])),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                ds(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ),
            DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                ds(&[0.0, 0.0, 2.5 * index as f64]),
            ),
            DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(bytes.into())),
        ]);

        object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
            )
            .unwrap()
            .write_to_file(dir.join(format!("{sop_instance_uid}.dcm")))
            .unwrap();
    }
}

/// A 6x6 slice: an outer ring of 0, an inner ring of 10 and a 2x2 core of 200
pub fn ringed_slice() -> Array2<u8> {
    Array2::from_shape_fn((6, 6), |(y, x)| {
        let ring = y.min(x).min(5 - y).min(5 - x);
        match ring {
            0 => 0,
            1 => 10,
            _ => 200,
        }
    })
}
