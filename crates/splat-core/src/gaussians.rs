//! Gaussian primitive records exchanged between the predictor, the
//! unprojector and the PLY serializer.

/// Number of `f32` channels the predictor emits per primitive:
/// position (3), log-scale (3), rotation (4), opacity (1), color (3).
pub const NDC_CHANNELS: usize = 14;

/// One primitive in the predictor's normalized device coordinates.
///
/// `rotation` is a `w, x, y, z` quaternion, `opacity` a probability in
/// `[0, 1]` and `color` linear RGB in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianNdc {
    pub position: [f32; 3],
    pub log_scale: [f32; 3],
    pub rotation: [f32; 4],
    pub opacity: f32,
    pub color: [f32; 3],
}

impl GaussianNdc {
    /// Build a record from one row of predictor output laid out as
    /// `x y z | ls0 ls1 ls2 | qw qx qy qz | opacity | r g b`.
    pub fn from_channels(row: &[f32]) -> Option<Self> {
        if row.len() < NDC_CHANNELS {
            return None;
        }
        Some(Self {
            position: [row[0], row[1], row[2]],
            log_scale: [row[3], row[4], row[5]],
            rotation: [row[6], row[7], row[8], row[9]],
            opacity: row[10],
            color: [row[11], row[12], row[13]],
        })
    }
}

/// One primitive in metric camera/world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian3D {
    pub position: [f32; 3],
    pub log_scale: [f32; 3],
    pub rotation: [f32; 4],
    pub opacity: f32,
    pub color: [f32; 3],
}

/// Ordered collection of metric Gaussians. Order is the predictor's output
/// order and is what ends up in the vertex element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gaussians3D {
    pub gaussians: Vec<Gaussian3D>,
}

impl Gaussians3D {
    pub fn new(gaussians: Vec<Gaussian3D>) -> Self {
        Self { gaussians }
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Gaussian3D> {
        self.gaussians.iter()
    }
}

impl FromIterator<Gaussian3D> for Gaussians3D {
    fn from_iter<I: IntoIterator<Item = Gaussian3D>>(iter: I) -> Self {
        Self {
            gaussians: iter.into_iter().collect(),
        }
    }
}
