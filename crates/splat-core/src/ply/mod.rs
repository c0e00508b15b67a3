//! Gaussian splat PLY files in the layout splat viewers read: 14 float
//! properties per vertex, SH degree-0 color, logit opacity and log scales.

mod format;

use std::{
    fs,
    io::Write,
    path::Path,
};

use tracing::{debug, info};

use crate::camera::{Intrinsics, Resolution};
use crate::error::{Result, SplatError};
use crate::gaussians::{Gaussian3D, Gaussians3D};

use format::{Element, Encoding, HeaderNote, PlyFile, Property, ScalarType};

/// Zeroth-order real spherical harmonic, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f64 = 0.282_094_791_773_878_14;

const OPACITY_EPS: f64 = 1e-6;

/// Vertex property names in file order.
pub const VERTEX_PROPERTIES: [&str; 14] = [
    "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2",
    "rot_0", "rot_1", "rot_2", "rot_3",
];

/// Version triple stored in the `version` metadata element.
pub const FORMAT_VERSION: [u8; 3] = [1, 5, 0];

/// Write `gaussians` as binary little-endian PLY to `destination`.
///
/// Besides the `vertex` element the file carries camera metadata:
/// `extrinsic` (identity), `intrinsic` (3x3 K for `image_size` and `f_px`),
/// `image_size`, `color_space` and `version`.
pub fn write(gaussians: &Gaussians3D, f_px: f32, image_size: Resolution, destination: &Path) -> Result<()> {
    let intrinsics = Intrinsics::from_focal(f_px, image_size)?;

    let mut vertex = Element::new(
        "vertex",
        VERTEX_PROPERTIES
            .iter()
            .map(|name| Property::scalar(name, ScalarType::Float))
            .collect(),
    );
    vertex.values.reserve(gaussians.len() * VERTEX_PROPERTIES.len());
    for g in gaussians.iter() {
        vertex.push_row(&encode_vertex(g));
    }

    let mut extrinsic = Element::new("extrinsic", vec![Property::scalar("extrinsic", ScalarType::Float)]);
    for (row, col) in (0..4).flat_map(|r| (0..4).map(move |c| (r, c))) {
        extrinsic.push_row(&[if row == col { 1.0 } else { 0.0 }]);
    }

    let mut intrinsic = Element::new("intrinsic", vec![Property::scalar("intrinsic", ScalarType::Float)]);
    let k = intrinsics.k();
    for row in 0..3 {
        for col in 0..3 {
            intrinsic.push_row(&[k[(row, col)] as f64]);
        }
    }

    let mut size = Element::new("image_size", vec![Property::scalar("image_size", ScalarType::UInt)]);
    size.push_row(&[image_size.width as f64]);
    size.push_row(&[image_size.height as f64]);

    let mut color_space = Element::new("color_space", vec![Property::scalar("color_space", ScalarType::UChar)]);
    color_space.push_row(&[0.0]);

    let mut version = Element::new("version", vec![Property::scalar("version", ScalarType::UChar)]);
    for part in FORMAT_VERSION {
        version.push_row(&[part as f64]);
    }

    let ply = PlyFile {
        encoding: Encoding::BinaryLittleEndian,
        notes: Vec::new(),
        elements: vec![vertex, extrinsic, intrinsic, size, color_space, version],
    };

    let bytes = ply.to_binary_le();
    let mut file = fs::File::create(destination).map_err(|err| {
        SplatError::processing_with(format!("cannot create {}", destination.display()), err)
    })?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|err| {
            SplatError::processing_with(format!("cannot write {}", destination.display()), err)
        })?;
    debug!(
        "Wrote {} gaussians ({} bytes) to {}",
        gaussians.len(),
        bytes.len(),
        destination.display()
    );
    Ok(())
}

/// Read the `vertex` element of any PLY encoding back into metric Gaussians.
pub fn read(path: &Path) -> Result<Gaussians3D> {
    let ply = load(path)?;
    let vertex = ply
        .element("vertex")
        .ok_or_else(|| SplatError::malformed(path, "no vertex element"))?;

    let mut columns = [0usize; 14];
    for (slot, name) in columns.iter_mut().zip(VERTEX_PROPERTIES) {
        *slot = vertex
            .property_index(name)
            .ok_or_else(|| SplatError::malformed(path, format!("vertex has no {name} property")))?;
    }

    let mut gaussians = Vec::with_capacity(vertex.count);
    let mut rows = vertex.scalar_rows();
    while let Some(row) = rows.next_row() {
        let mut values = [0.0f64; 14];
        for (value, &column) in values.iter_mut().zip(&columns) {
            *value = row[column];
        }
        gaussians.push(decode_vertex(&values));
    }
    Ok(Gaussians3D::new(gaussians))
}

/// Strip everything but the `vertex` element and rewrite `path` as binary
/// little-endian. Comments and `obj_info` lines survive; the vertex property
/// layout and values are unchanged. Running it twice yields the same bytes.
///
/// On failure the original file is left as it was.
pub fn clean(path: &Path) -> Result<()> {
    let ply = load(path)?;
    debug!("Cleaning {} ({:?})", path.display(), ply.encoding);
    let dropped: Vec<&str> = ply
        .elements
        .iter()
        .filter(|e| e.name != "vertex")
        .map(|e| e.name.as_str())
        .collect();
    let vertex = ply
        .element("vertex")
        .ok_or_else(|| SplatError::malformed(path, "no vertex element"))?
        .clone();

    let cleaned = PlyFile {
        encoding: Encoding::BinaryLittleEndian,
        notes: ply.notes.clone(),
        elements: vec![vertex],
    };
    let bytes = cleaned.to_binary_le();

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|err| {
        SplatError::processing_with(format!("cannot stage cleaned copy in {}", dir.display()), err)
    })?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| SplatError::processing_with("cannot write cleaned copy", err))?;
    tmp.persist(path).map_err(|err| {
        SplatError::processing_with(format!("cannot replace {}", path.display()), err.error)
    })?;

    if dropped.is_empty() {
        debug!("{} already clean", path.display());
    } else {
        info!("Removed elements {:?} from {}", dropped, path.display());
    }
    Ok(())
}

/// Number of vertices declared in the header of `path`.
pub fn vertex_count(path: &Path) -> Result<usize> {
    let bytes = read_bytes(path)?;
    let header = format::parse_header(&bytes).map_err(|err| SplatError::malformed(path, err.to_string()))?;
    header
        .elements
        .iter()
        .find(|e| e.name == "vertex")
        .map(|e| e.count)
        .ok_or_else(|| SplatError::malformed(path, "no vertex element"))
}

/// Header comments and `obj_info` lines of `path`, in order.
pub fn header_notes(path: &Path) -> Result<Vec<String>> {
    let bytes = read_bytes(path)?;
    let header = format::parse_header(&bytes).map_err(|err| SplatError::malformed(path, err.to_string()))?;
    Ok(header
        .notes
        .into_iter()
        .map(|note| match note {
            HeaderNote::Comment(text) => format!("comment {text}"),
            HeaderNote::ObjInfo(text) => format!("obj_info {text}"),
        })
        .collect())
}

/// Names of the elements declared in the header of `path`, in order.
pub fn element_names(path: &Path) -> Result<Vec<String>> {
    let bytes = read_bytes(path)?;
    let header = format::parse_header(&bytes).map_err(|err| SplatError::malformed(path, err.to_string()))?;
    Ok(header.elements.into_iter().map(|e| e.name).collect())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| SplatError::malformed(path, format!("unreadable: {err}")))
}

fn load(path: &Path) -> Result<PlyFile> {
    let bytes = read_bytes(path)?;
    format::parse(&bytes).map_err(|err| SplatError::malformed(path, err.to_string()))
}

fn encode_vertex(g: &Gaussian3D) -> [f64; 14] {
    let f_dc = g.color.map(|c| (c as f64 - 0.5) / SH_C0);
    let p = (g.opacity as f64).clamp(OPACITY_EPS, 1.0 - OPACITY_EPS);
    let opacity_logit = (p / (1.0 - p)).ln();
    [
        g.position[0] as f64,
        g.position[1] as f64,
        g.position[2] as f64,
        f_dc[0],
        f_dc[1],
        f_dc[2],
        opacity_logit,
        g.log_scale[0] as f64,
        g.log_scale[1] as f64,
        g.log_scale[2] as f64,
        g.rotation[0] as f64,
        g.rotation[1] as f64,
        g.rotation[2] as f64,
        g.rotation[3] as f64,
    ]
}

fn decode_vertex(v: &[f64; 14]) -> Gaussian3D {
    let color = |f_dc: f64| (f_dc * SH_C0 + 0.5) as f32;
    Gaussian3D {
        position: [v[0] as f32, v[1] as f32, v[2] as f32],
        color: [color(v[3]), color(v[4]), color(v[5])],
        opacity: (1.0 / (1.0 + (-v[6]).exp())) as f32,
        log_scale: [v[7] as f32, v[8] as f32, v[9] as f32],
        rotation: [v[10] as f32, v[11] as f32, v[12] as f32, v[13] as f32],
    }
}
