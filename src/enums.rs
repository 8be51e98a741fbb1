/// Ordering applied to the slices of a series before they are stacked along z.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Distance of ImagePositionPatient along the slice normal
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Boundary faces of a (z, y, x) volume that are open to the surrounding
/// environment. The z faces are never part of this set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    XMin,
    XMax,
    YMin,
    YMax,
}

impl Face {
    pub const LATERAL: [Face; 4] = [Face::XMin, Face::XMax, Face::YMin, Face::YMax];

    /// Axis index in (z, y, x) order
    pub fn axis(self) -> usize {
        match self {
            Face::XMin | Face::XMax => 2,
            Face::YMin | Face::YMax => 1,
        }
    }

    /// Index of the face plane along its axis for an axis of length `len`.
    /// `len` must be non-zero.
    pub fn index(self, len: usize) -> usize {
        match self {
            Face::XMin | Face::YMin => 0,
            Face::XMax | Face::YMax => len - 1,
        }
    }
}
