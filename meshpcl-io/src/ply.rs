//! PLY format support
//!
//! Meshes are written as `binary_little_endian` PLY with `double` vertex
//! coordinates, optional `uchar` vertex colors and `list uchar int` faces.
//! Reading accepts any encoding ply-rs understands.

use crate::{LoadedCloud, MeshWriter, PointCloudReader};
use meshpcl_core::{ColoredPoint3d, Error, Face, Point3d, PointCloud, PolygonMesh, Result, Rgb};
use ply_rs::{
    parser::Parser,
    ply::{Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType, ScalarType},
    writer::Writer,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

const COLOR_CHANNELS: [&str; 3] = ["red", "green", "blue"];

pub struct PlyReader;
pub struct PlyMeshWriter;

impl PointCloudReader for PlyReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
        let ply = parse(path.as_ref())?;
        let vertices = ply.payload.get("vertex").map(Vec::as_slice).unwrap_or_default();

        let positions = vertices.iter().map(vertex_position).collect::<Result<Vec<_>>>()?;
        match vertex_colors(vertices)? {
            Some(colors) => Ok(LoadedCloud::Colored(
                positions
                    .into_iter()
                    .zip(colors)
                    .map(|(p, c)| ColoredPoint3d::new(p, c))
                    .collect(),
            )),
            None => Ok(LoadedCloud::Plain(PointCloud::from_points(positions))),
        }
    }
}

impl MeshWriter for PlyMeshWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &PolygonMesh, path: P) -> Result<()> {
        mesh.validate()?;
        let mut ply = build_ply(mesh)?;

        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        let written = Writer::new().write_ply(&mut writer, &mut ply)?;
        writer.flush()?;

        debug!(
            path = %path.as_ref().display(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            bytes = written,
            "wrote PLY mesh"
        );
        Ok(())
    }
}

/// Read a PLY mesh; vertex colors are kept when all three channels are present
pub fn read_ply_mesh<P: AsRef<Path>>(path: P) -> Result<PolygonMesh> {
    let ply = parse(path.as_ref())?;
    let vertices = ply.payload.get("vertex").map(Vec::as_slice).unwrap_or_default();
    let faces = ply.payload.get("face").map(Vec::as_slice).unwrap_or_default();

    let mut mesh = PolygonMesh::from_vertices_and_faces(
        vertices.iter().map(vertex_position).collect::<Result<Vec<_>>>()?,
        faces.iter().map(face_indices).collect::<Result<Vec<_>>>()?,
    );
    if let Some(colors) = vertex_colors(vertices)? {
        mesh.set_colors(colors);
    }
    mesh.validate()?;
    Ok(mesh)
}

fn parse(path: &Path) -> Result<Ply<DefaultElement>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    Parser::<DefaultElement>::new()
        .read_ply(&mut reader)
        .map_err(|e| Error::InvalidData(format!("malformed PLY file {}: {}", path.display(), e)))
}

/// Header and payload of `mesh` in the export layout
fn build_ply(mesh: &PolygonMesh) -> Result<Ply<DefaultElement>> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;

    let mut vertex_element = ElementDef::new("vertex".to_string());
    vertex_element.count = mesh.vertex_count();
    for axis in ["x", "y", "z"] {
        vertex_element.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Double),
        ));
    }
    if mesh.colors.is_some() {
        for channel in COLOR_CHANNELS {
            vertex_element.properties.add(PropertyDef::new(
                channel.to_string(),
                PropertyType::Scalar(ScalarType::UChar),
            ));
        }
    }
    ply.header.elements.add(vertex_element);

    let mut face_element = ElementDef::new("face".to_string());
    face_element.count = mesh.face_count();
    face_element.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    ply.header.elements.add(face_element);

    let mut vertices = Vec::with_capacity(mesh.vertex_count());
    for (i, vertex) in mesh.vertices.iter().enumerate() {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Double(vertex.x));
        element.insert("y".to_string(), Property::Double(vertex.y));
        element.insert("z".to_string(), Property::Double(vertex.z));
        if let Some(color) = mesh.colors.as_ref().and_then(|c| c.get(i)) {
            for (channel, value) in COLOR_CHANNELS.iter().zip(color) {
                element.insert(channel.to_string(), Property::UChar(*value));
            }
        }
        vertices.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices);

    let mut faces = Vec::with_capacity(mesh.face_count());
    for (i, face) in mesh.faces.iter().enumerate() {
        if face.len() > u8::MAX as usize {
            return Err(Error::InvalidData(format!(
                "face {} has {} vertices, more than a PLY list can hold",
                i,
                face.len()
            )));
        }
        let indices = face
            .iter()
            .map(|&v| {
                i32::try_from(v)
                    .map_err(|_| Error::InvalidData(format!("vertex index {} does not fit a PLY int", v)))
            })
            .collect::<Result<Vec<i32>>>()?;
        let mut element = DefaultElement::new();
        element.insert("vertex_indices".to_string(), Property::ListInt(indices));
        faces.push(element);
    }
    ply.payload.insert("face".to_string(), faces);

    Ok(ply)
}

fn vertex_position(element: &DefaultElement) -> Result<Point3d> {
    Ok(Point3d::new(
        scalar(element, "x")?,
        scalar(element, "y")?,
        scalar(element, "z")?,
    ))
}

/// Per-vertex colors, or `None` unless the first vertex has all three channels
fn vertex_colors(vertices: &[DefaultElement]) -> Result<Option<Vec<Rgb>>> {
    let colored = vertices
        .first()
        .is_some_and(|v| COLOR_CHANNELS.iter().all(|c| v.contains_key(*c)));
    if !colored {
        return Ok(None);
    }
    vertices
        .iter()
        .map(|v| {
            let mut rgb = [0u8; 3];
            for (slot, channel) in rgb.iter_mut().zip(COLOR_CHANNELS) {
                *slot = color_channel(v, channel)?;
            }
            Ok(rgb)
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Extract a numeric property as f64
fn scalar(element: &DefaultElement, name: &str) -> Result<f64> {
    match element.get(name) {
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        _ => Err(Error::InvalidData(format!(
            "property '{}' not found or not a scalar",
            name
        ))),
    }
}

/// Integer channels are taken as 0..=255, float channels as 0.0..=1.0
fn color_channel(element: &DefaultElement, name: &str) -> Result<u8> {
    let value = match element.get(name) {
        Some(Property::Float(v)) => *v as f64 * 255.0,
        Some(Property::Double(v)) => *v * 255.0,
        _ => scalar(element, name)?,
    };
    if !(0.0..=255.0).contains(&value) {
        return Err(Error::InvalidData(format!(
            "color channel '{}' out of range: {}",
            name, value
        )));
    }
    Ok(value.round() as u8)
}

/// Extract face indices from a PLY face element
fn face_indices(element: &DefaultElement) -> Result<Face> {
    fn convert<T: Copy + TryInto<usize>>(values: &[T]) -> Result<Face> {
        values
            .iter()
            .map(|&v| {
                v.try_into()
                    .map_err(|_| Error::InvalidData("negative face index".to_string()))
            })
            .collect()
    }

    match element.get("vertex_indices").or_else(|| element.get("vertex_index")) {
        Some(Property::ListInt(indices)) => convert(indices),
        Some(Property::ListUInt(indices)) => convert(indices),
        Some(Property::ListShort(indices)) => convert(indices),
        Some(Property::ListUShort(indices)) => convert(indices),
        Some(Property::ListChar(indices)) => convert(indices),
        Some(Property::ListUChar(indices)) => convert(indices),
        _ => Err(Error::InvalidData("face indices not found".to_string())),
    }
}
