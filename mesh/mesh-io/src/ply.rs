//! PLY (Polygon File Format) support.
//!
//! PLY is the interchange format the scan service hands to viewers: it
//! carries positions, per-vertex normals and colours, and a triangle list
//! in one file.
//!
//! # Supported Properties
//!
//! - Vertex positions (`x`, `y`, `z`) - required
//! - Vertex normals (`nx`, `ny`, `nz`) - written when every vertex has one
//! - Vertex colours (`red`, `green`, `blue` as `uchar`) - written when every
//!   vertex has one
//! - Face vertex indices (`vertex_indices` or `vertex_index`)
//!
//! # Example
//!
//! ```no_run
//! use mesh_io::{load_ply, save_ply, PlyEncoding};
//!
//! let mesh = load_ply("scan_mesh.ply").unwrap();
//! save_ply(&mesh, "copy.ply", PlyEncoding::BinaryLittleEndian).unwrap();
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use mesh_types::{IndexedMesh, Vector3, Vertex, VertexColor};
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;

use crate::error::{IoError, IoResult};

const HEADER_COMMENT: &str = "Generated by holoscan mesh-io";

/// Byte layout of a written PLY file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum PlyEncoding {
    /// Human-readable text.
    Ascii,
    /// Compact little-endian binary.
    #[default]
    BinaryLittleEndian,
}

/// Which optional vertex properties a file carries.
#[derive(Debug, Clone, Copy)]
struct VertexLayout {
    normals: bool,
    colors: bool,
}

impl VertexLayout {
    fn of(mesh: &IndexedMesh) -> Self {
        Self {
            normals: mesh.has_normals(),
            colors: mesh.has_colors(),
        }
    }
}

/// Load a mesh from a PLY file.
///
/// Supports ASCII, binary little-endian, and binary big-endian formats.
/// Polygons with more than three corners are fan-triangulated.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid PLY, or a
/// face references a vertex that does not exist.
pub fn load_ply<P: AsRef<Path>>(path: P) -> IoResult<IndexedMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            IoError::Io(e)
        }
    })?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let header = parser
        .read_header(&mut reader)
        .map_err(|e| IoError::invalid_content(format!("failed to parse PLY header: {e}")))?;
    let payload = parser
        .read_payload(&mut reader, &header)
        .map_err(|e| IoError::invalid_content(format!("failed to read PLY payload: {e}")))?;

    let mut mesh = IndexedMesh::new();

    if let Some(vertex_elements) = payload.get("vertex") {
        mesh.vertices.reserve(vertex_elements.len());
        for element in vertex_elements {
            mesh.vertices.push(read_vertex(element));
        }
    }

    if let Some(face_elements) = payload.get("face") {
        mesh.faces.reserve(face_elements.len());
        for element in face_elements {
            let indices = get_index_list(element);
            if indices.len() >= 3 {
                for i in 1..indices.len() - 1 {
                    mesh.faces.push([indices[0], indices[i], indices[i + 1]]);
                }
            }
        }
    }

    check_indices(&mesh)?;
    Ok(mesh)
}

fn read_vertex(element: &DefaultElement) -> Vertex {
    let x = get_float_property(element, "x").unwrap_or(0.0);
    let y = get_float_property(element, "y").unwrap_or(0.0);
    let z = get_float_property(element, "z").unwrap_or(0.0);
    let mut vertex = Vertex::from_coords(x, y, z);

    if let (Some(nx), Some(ny), Some(nz)) = (
        get_float_property(element, "nx"),
        get_float_property(element, "ny"),
        get_float_property(element, "nz"),
    ) {
        vertex.normal = Some(Vector3::new(nx, ny, nz));
    }

    if let (Some(r), Some(g), Some(b)) = (
        get_byte_property(element, "red"),
        get_byte_property(element, "green"),
        get_byte_property(element, "blue"),
    ) {
        vertex.color = Some(VertexColor::new(r, g, b));
    }

    vertex
}

fn get_float_property(element: &DefaultElement, key: &str) -> Option<f64> {
    match element.get(key)? {
        Property::Float(v) => Some(f64::from(*v)),
        Property::Double(v) => Some(*v),
        _ => None,
    }
}

fn get_byte_property(element: &DefaultElement, key: &str) -> Option<u8> {
    match element.get(key)? {
        Property::UChar(v) => Some(*v),
        _ => None,
    }
}

/// Extract the vertex index list from a face element.
#[allow(clippy::cast_sign_loss)]
fn get_index_list(element: &DefaultElement) -> Vec<u32> {
    for key in ["vertex_indices", "vertex_index"] {
        if let Some(prop) = element.get(key) {
            return match prop {
                Property::ListInt(v) => v.iter().map(|&i| i as u32).collect(),
                Property::ListUInt(v) => v.clone(),
                Property::ListUChar(v) => v.iter().map(|&i| u32::from(i)).collect(),
                Property::ListUShort(v) => v.iter().map(|&i| u32::from(i)).collect(),
                Property::ListShort(v) => v.iter().map(|&i| i as u32).collect(),
                _ => continue,
            };
        }
    }
    Vec::new()
}

fn check_indices(mesh: &IndexedMesh) -> IoResult<()> {
    match mesh.first_invalid_index() {
        Some(index) => Err(IoError::DanglingIndex {
            index,
            vertex_count: mesh.vertex_count(),
        }),
        None => Ok(()),
    }
}

/// Save a mesh to a PLY file.
///
/// The file is first written next to its destination under a temporary
/// name and then renamed into place, so a reader never sees a half-written
/// mesh at `path`.
///
/// # Errors
///
/// Returns an error if a face references a missing vertex or the file
/// cannot be written.
pub fn save_ply<P: AsRef<Path>>(
    mesh: &IndexedMesh,
    path: P,
    encoding: PlyEncoding,
) -> IoResult<()> {
    let path = path.as_ref();
    check_indices(mesh)?;

    let partial = partial_path(path);
    let written = write_ply_file(mesh, &partial, encoding);
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }

    fs::rename(&partial, path).map_err(|e| {
        let _ = fs::remove_file(&partial);
        IoError::Io(e)
    })
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

fn write_ply_file(mesh: &IndexedMesh, path: &Path, encoding: PlyEncoding) -> IoResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    match encoding {
        PlyEncoding::BinaryLittleEndian => save_ply_binary(mesh, &mut writer)?,
        PlyEncoding::Ascii => save_ply_ascii(mesh, &mut writer)?,
    }
    writer.flush()?;
    Ok(())
}

/// Save mesh as binary PLY (little-endian).
///
/// Written by hand: ply-rs writes the element count instead of the list
/// length for binary list properties.
fn save_ply_binary<W: Write>(mesh: &IndexedMesh, writer: &mut W) -> IoResult<()> {
    let layout = VertexLayout::of(mesh);

    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    writeln!(writer, "comment {HEADER_COMMENT}")?;
    writeln!(writer, "element vertex {}", mesh.vertices.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if layout.normals {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    if layout.colors {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    writeln!(writer, "element face {}", mesh.faces.len())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;

    for v in &mesh.vertices {
        #[allow(clippy::cast_possible_truncation)]
        {
            writer.write_all(&(v.position.x as f32).to_le_bytes())?;
            writer.write_all(&(v.position.y as f32).to_le_bytes())?;
            writer.write_all(&(v.position.z as f32).to_le_bytes())?;
            if layout.normals {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                writer.write_all(&(n.x as f32).to_le_bytes())?;
                writer.write_all(&(n.y as f32).to_le_bytes())?;
                writer.write_all(&(n.z as f32).to_le_bytes())?;
            }
        }
        if layout.colors {
            let c = v.color.unwrap_or_default();
            writer.write_all(&[c.r, c.g, c.b])?;
        }
    }

    for &[i0, i1, i2] in &mesh.faces {
        writer.write_all(&[3u8])?;
        #[allow(clippy::cast_possible_wrap)]
        {
            writer.write_all(&(i0 as i32).to_le_bytes())?;
            writer.write_all(&(i1 as i32).to_le_bytes())?;
            writer.write_all(&(i2 as i32).to_le_bytes())?;
        }
    }

    Ok(())
}

fn scalar_def(name: &str, scalar: ScalarType) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar))
}

/// Save mesh as ASCII PLY using ply-rs.
fn save_ply_ascii<W: Write>(mesh: &IndexedMesh, writer: &mut W) -> IoResult<()> {
    let layout = VertexLayout::of(mesh);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push(HEADER_COMMENT.to_string());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(scalar_def(name, ScalarType::Float));
    }
    if layout.normals {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(scalar_def(name, ScalarType::Float));
        }
    }
    if layout.colors {
        for name in ["red", "green", "blue"] {
            vertex_def.properties.add(scalar_def(name, ScalarType::UChar));
        }
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let mut vertex_elements = Vec::with_capacity(mesh.vertices.len());
    for v in &mesh.vertices {
        let mut element = DefaultElement::new();
        #[allow(clippy::cast_possible_truncation)]
        {
            element.insert("x".to_string(), Property::Float(v.position.x as f32));
            element.insert("y".to_string(), Property::Float(v.position.y as f32));
            element.insert("z".to_string(), Property::Float(v.position.z as f32));
            if layout.normals {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                element.insert("nx".to_string(), Property::Float(n.x as f32));
                element.insert("ny".to_string(), Property::Float(n.y as f32));
                element.insert("nz".to_string(), Property::Float(n.z as f32));
            }
        }
        if layout.colors {
            let c = v.color.unwrap_or_default();
            element.insert("red".to_string(), Property::UChar(c.r));
            element.insert("green".to_string(), Property::UChar(c.g));
            element.insert("blue".to_string(), Property::UChar(c.b));
        }
        vertex_elements.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertex_elements);

    let mut face_elements = Vec::with_capacity(mesh.faces.len());
    for &[i0, i1, i2] in &mesh.faces {
        let mut element = DefaultElement::new();
        #[allow(clippy::cast_possible_wrap)]
        let indices = vec![i0 as i32, i1 as i32, i2 as i32];
        element.insert("vertex_indices".to_string(), Property::ListInt(indices));
        face_elements.push(element);
    }
    ply.payload.insert("face".to_string(), face_elements);

    Writer::new()
        .write_ply(writer, &mut ply)
        .map_err(|e| IoError::invalid_content(format!("failed to write PLY: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colored_triangle() -> IndexedMesh {
        let vertices = vec![
            Vertex::from_coords(0.0, 0.0, 0.1)
                .with_normal(Vector3::new(0.0, 0.0, -1.0))
                .with_color(VertexColor::new(10, 20, 30)),
            Vertex::from_coords(0.04, 0.0, 0.1)
                .with_normal(Vector3::new(0.0, 0.0, -1.0))
                .with_color(VertexColor::new(40, 50, 60)),
            Vertex::from_coords(0.0, -0.04, 0.1)
                .with_normal(Vector3::new(0.0, 0.0, -1.0))
                .with_color(VertexColor::new(70, 80, 90)),
        ];
        IndexedMesh::from_parts(vertices, vec![[0, 1, 2]])
    }

    fn assert_same(a: &IndexedMesh, b: &IndexedMesh) {
        assert_eq!(a.faces, b.faces);
        assert_eq!(a.vertex_count(), b.vertex_count());
        for (va, vb) in a.vertices.iter().zip(&b.vertices) {
            assert!((va.position - vb.position).norm() < 1e-6);
            assert_eq!(va.color, vb.color);
            assert_eq!(va.normal.is_some(), vb.normal.is_some());
        }
    }

    #[test]
    fn binary_keeps_colors_and_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.ply");
        let mesh = colored_triangle();

        save_ply(&mesh, &path, PlyEncoding::BinaryLittleEndian).unwrap();
        let loaded = load_ply(&path).unwrap();

        assert_same(&mesh, &loaded);
        assert!(loaded.has_normals());
        assert!(loaded.has_colors());
    }

    #[test]
    fn ascii_keeps_colors_and_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri_ascii.ply");
        let mesh = colored_triangle();

        save_ply(&mesh, &path, PlyEncoding::Ascii).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("property uchar red"));
        assert!(text.contains("format ascii"));

        assert_same(&mesh, &load_ply(&path).unwrap());
    }

    #[test]
    fn plain_positions_omit_optional_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.ply");
        let mut mesh = colored_triangle();
        mesh.vertices[0].color = None;
        mesh.vertices[1].normal = None;

        save_ply(&mesh, &path, PlyEncoding::BinaryLittleEndian).unwrap();
        let loaded = load_ply(&path).unwrap();
        assert!(!loaded.has_colors());
        assert!(!loaded.has_normals());
        assert_eq!(loaded.face_count(), 1);
    }

    #[test]
    fn dangling_face_is_rejected_and_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ply");
        let mut mesh = colored_triangle();
        mesh.faces.push([0, 1, 5]);

        let result = save_ply(&mesh, &path, PlyEncoding::BinaryLittleEndian);
        assert!(matches!(result, Err(IoError::DanglingIndex { index: 5, .. })));
        assert!(!path.exists());
    }

    #[test]
    fn no_partial_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.ply");
        save_ply(&colored_triangle(), &path, PlyEncoding::Ascii).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["done.ply".to_string()]);
    }

    #[test]
    fn unwritable_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mesh.ply");
        let result = save_ply(&colored_triangle(), &path, PlyEncoding::Ascii);
        assert!(matches!(result, Err(IoError::Io(_))));
    }

    #[test]
    fn load_nonexistent_file() {
        let result = load_ply("nonexistent_scan_mesh_12345.ply");
        assert!(matches!(result, Err(IoError::FileNotFound { .. })));
    }
}
