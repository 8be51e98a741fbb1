//! Connected components of boolean volumes
//!
//! Components are formed with face adjacency (6-connectivity): two voxels are
//! neighbours when they differ by one along exactly one axis.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3, Axis};

use crate::enums::Face;

const NEIGHBOURS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Label the 6-connected components of the true voxels.
///
/// Background voxels receive label 0, components are numbered from 1 in scan
/// order. Returns the label map and the number of components.
pub fn label_components(mask: ArrayView3<'_, bool>) -> (Array3<u32>, u32) {
    let dim = mask.dim();
    let mut labels = Array3::<u32>::zeros(dim);
    let mut queue = VecDeque::new();
    let mut count = 0;

    for (seed, &value) in mask.indexed_iter() {
        if !value || labels[seed] != 0 {
            continue;
        }
        count += 1;
        labels[seed] = count;
        queue.push_back(seed);

        while let Some((z, y, x)) = queue.pop_front() {
            for (dz, dy, dx) in NEIGHBOURS {
                let Some(next) = offset((z, y, x), (dz, dy, dx), dim) else {
                    continue;
                };
                if mask[next] && labels[next] == 0 {
                    labels[next] = count;
                    queue.push_back(next);
                }
            }
        }
    }

    (labels, count)
}

fn offset(
    (z, y, x): (usize, usize, usize),
    (dz, dy, dx): (isize, isize, isize),
    (depth, height, width): (usize, usize, usize),
) -> Option<(usize, usize, usize)> {
    let z = z.checked_add_signed(dz).filter(|&z| z < depth)?;
    let y = y.checked_add_signed(dy).filter(|&y| y < height)?;
    let x = x.checked_add_signed(dx).filter(|&x| x < width)?;
    Some((z, y, x))
}

/// Keep only the components that touch a lateral face of the volume.
///
/// Axis order is (z, y, x). Components reaching the x or y boundary planes are
/// retained, components that touch nothing but the z planes (or no boundary at
/// all) are cleared. The input is never modified.
pub fn keep_boundary_touching(mask: &Array3<bool>) -> Array3<bool> {
    if mask.is_empty() {
        return mask.clone();
    }

    let (labels, count) = label_components(mask.view());
    if count == 0 {
        return mask.clone();
    }

    let mut retained = vec![false; count as usize + 1];
    for face in Face::LATERAL {
        let axis = face.axis();
        let plane = labels.index_axis(Axis(axis), face.index(labels.len_of(Axis(axis))));
        for &label in plane.iter() {
            retained[label as usize] = true;
        }
    }
    retained[0] = false;

    if !retained.contains(&true) {
        return Array3::from_elem(mask.dim(), false);
    }

    labels.mapv(|label| retained[label as usize])
}
