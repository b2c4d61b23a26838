//! Camera and orientation hints read back from a splat PLY file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use tracing::debug;

use crate::error::MetadataError;

/// Header bytes scanned for `end_header` before giving up.
const MAX_HEADER_BYTES: u64 = 256 * 1024;

/// Vertices read per chunk while sampling.
const SAMPLE_CHUNK: usize = 4096;

/// Default number of vertices averaged for the forward-axis hint.
pub const DEFAULT_SAMPLE_COUNT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(PlyFormat::Ascii),
            "binary_little_endian" => Some(PlyFormat::BinaryLittleEndian),
            "binary_big_endian" => Some(PlyFormat::BinaryBigEndian),
            _ => None,
        }
    }
}

/// Scalar property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ScalarType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "char" | "int8" => Some(ScalarType::Int8),
            "uchar" | "uint8" => Some(ScalarType::Uint8),
            "short" | "int16" => Some(ScalarType::Int16),
            "ushort" | "uint16" => Some(ScalarType::Uint16),
            "int" | "int32" => Some(ScalarType::Int32),
            "uint" | "uint32" => Some(ScalarType::Uint32),
            "float" | "float32" => Some(ScalarType::Float32),
            "double" | "float64" => Some(ScalarType::Float64),
            _ => None,
        }
    }

    fn byte_width(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::Uint8 => 1,
            ScalarType::Int16 | ScalarType::Uint16 => 2,
            ScalarType::Int32 | ScalarType::Uint32 | ScalarType::Float32 => 4,
            ScalarType::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
struct Property {
    name: String,
    /// `None` for list properties.
    ty: Option<ScalarType>,
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

impl Element {
    fn is_single(&self, ty: ScalarType, count: usize) -> bool {
        self.count == count && self.properties.len() == 1 && self.properties[0].ty == Some(ty)
    }

    fn stride(&self) -> Result<usize, MetadataError> {
        self.properties
            .iter()
            .map(|p| {
                p.ty.map(ScalarType::byte_width).ok_or_else(|| {
                    MetadataError::UnsupportedHeader(format!(
                        "element '{}' has list property '{}'",
                        self.name, p.name
                    ))
                })
            })
            .try_fold(0usize, |acc, width| {
                acc.checked_add(width?).ok_or_else(|| {
                    MetadataError::UnsupportedHeader(format!("element '{}' is too wide", self.name))
                })
            })
    }

    /// Size of the whole element in bytes.
    fn byte_len(&self) -> Result<u64, MetadataError> {
        let stride = self.stride()?;
        self.count
            .checked_mul(stride)
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| {
                MetadataError::UnsupportedHeader(format!(
                    "element '{}' with {} entries is too large",
                    self.name, self.count
                ))
            })
    }

    fn offset_of(&self, property: &str) -> Option<usize> {
        let index = self.properties.iter().position(|p| p.name == property)?;
        self.properties[..index]
            .iter()
            .try_fold(0usize, |acc, p| acc.checked_add(p.ty?.byte_width()))
    }
}

#[derive(Debug, Clone)]
struct Header {
    format: PlyFormat,
    elements: Vec<Element>,
    body_offset: u64,
}

/// Which way the sampled points face along Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardAxis {
    PositiveZ,
    NegativeZ,
    Unknown,
}

/// Camera blocks stored alongside the vertices.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraInfo {
    /// 4x4 extrinsic matrix, column-major.
    pub extrinsic: Option<[f32; 16]>,
    /// 3x3 intrinsic matrix, row-major.
    pub intrinsic: Option<[f32; 9]>,
    /// Source image width and height.
    pub image_size: Option<[u32; 2]>,
}

/// Summary of a splat PLY file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplatMetadata {
    pub format: PlyFormat,
    pub vertex_count: usize,
    pub vertex_properties: Vec<String>,
    pub camera: CameraInfo,
    pub sampled_mean_z: Option<f32>,
    pub forward_axis: ForwardAxis,
}

impl SplatMetadata {
    /// Read metadata, averaging `z` over at most `sample_count` vertices.
    ///
    /// Only binary little-endian files are supported.
    pub fn read(path: &Path, sample_count: usize) -> Result<Self, MetadataError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = read_header(&mut reader)?;

        if header.format != PlyFormat::BinaryLittleEndian {
            return Err(MetadataError::UnsupportedHeader(format!(
                "only binary_little_endian is supported, found {:?}",
                header.format
            )));
        }

        let vertex_index = header.elements.iter().position(|e| e.name == "vertex");
        let (camera, sampled_mean_z) = match vertex_index {
            Some(index) => (
                read_camera(&mut reader, &header, index)?,
                sample_mean_z(&mut reader, &header, index, sample_count)?,
            ),
            None => (CameraInfo::default(), None),
        };

        let forward_axis = match sampled_mean_z {
            Some(z) if z >= 0.0 => ForwardAxis::PositiveZ,
            Some(_) => ForwardAxis::NegativeZ,
            None => ForwardAxis::Unknown,
        };

        let vertex = vertex_index.map(|i| &header.elements[i]);
        debug!("Read PLY metadata from {}: mean z {:?}", path.display(), sampled_mean_z);

        Ok(Self {
            format: header.format,
            vertex_count: vertex.map_or(0, |v| v.count),
            vertex_properties: vertex
                .map(|v| v.properties.iter().map(|p| p.name.clone()).collect())
                .unwrap_or_default(),
            camera,
            sampled_mean_z,
            forward_axis,
        })
    }
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<Header, MetadataError> {
    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    let mut consumed: u64 = 0;
    let mut line = String::new();
    let mut first = true;

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 || consumed + n as u64 > MAX_HEADER_BYTES {
            return Err(MetadataError::HeaderNotFound);
        }
        consumed += n as u64;

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if first {
            if trimmed != "ply" {
                return Err(MetadataError::UnsupportedHeader("missing 'ply' magic".into()));
            }
            first = false;
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        match parts.next() {
            Some("end_header") => break,
            Some("format") => {
                let name = parts.next().unwrap_or_default();
                format = Some(PlyFormat::parse(name).ok_or_else(|| {
                    MetadataError::UnsupportedHeader(format!("unknown format '{name}'"))
                })?);
            }
            Some("element") => {
                let name = parts.next().unwrap_or_default().to_string();
                let count = parts
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| MetadataError::UnsupportedHeader(format!("bad element line '{trimmed}'")))?;
                elements.push(Element {
                    name,
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements.last_mut().ok_or_else(|| {
                    MetadataError::UnsupportedHeader("property before any element".into())
                })?;
                let ty = parts.next().unwrap_or_default();
                let property = if ty == "list" {
                    Property {
                        name: parts.nth(2).unwrap_or_default().to_string(),
                        ty: None,
                    }
                } else {
                    let scalar = ScalarType::parse(ty).ok_or_else(|| {
                        MetadataError::UnsupportedHeader(format!("unknown property type '{ty}'"))
                    })?;
                    Property {
                        name: parts.next().unwrap_or_default().to_string(),
                        ty: Some(scalar),
                    }
                };
                element.properties.push(property);
            }
            // comment, obj_info and blank lines
            _ => {}
        }
    }

    let format = format.ok_or_else(|| MetadataError::UnsupportedHeader("missing format line".into()))?;
    Ok(Header {
        format,
        elements,
        body_offset: consumed,
    })
}

/// Byte offset of element `index` from the start of the file.
fn element_offset(header: &Header, index: usize) -> Result<u64, MetadataError> {
    let mut offset = header.body_offset;
    for element in &header.elements[..index] {
        offset = offset.checked_add(element.byte_len()?).ok_or_else(|| {
            MetadataError::UnsupportedHeader("element offsets overflow".into())
        })?;
    }
    Ok(offset)
}

fn read_camera<R: Read + Seek>(
    reader: &mut R,
    header: &Header,
    vertex_index: usize,
) -> Result<CameraInfo, MetadataError> {
    let mut camera = CameraInfo::default();

    for index in vertex_index + 1..header.elements.len() {
        let element = &header.elements[index];
        // Anything after a list element cannot be located.
        if element.stride().is_err() {
            break;
        }

        match element.name.as_str() {
            "extrinsic" if element.is_single(ScalarType::Float32, 16) => {
                reader.seek(SeekFrom::Start(element_offset(header, index)?))?;
                let mut m = [0.0f32; 16];
                reader.read_f32_into::<LittleEndian>(&mut m)?;
                camera.extrinsic = Some(m);
            }
            "intrinsic" if element.is_single(ScalarType::Float32, 9) => {
                reader.seek(SeekFrom::Start(element_offset(header, index)?))?;
                let mut m = [0.0f32; 9];
                reader.read_f32_into::<LittleEndian>(&mut m)?;
                camera.intrinsic = Some(m);
            }
            "image_size" if element.is_single(ScalarType::Uint32, 2) => {
                reader.seek(SeekFrom::Start(element_offset(header, index)?))?;
                let mut size = [0u32; 2];
                reader.read_u32_into::<LittleEndian>(&mut size)?;
                camera.image_size = Some(size);
            }
            _ => {}
        }
    }

    Ok(camera)
}

fn sample_mean_z<R: Read + Seek>(
    reader: &mut R,
    header: &Header,
    vertex_index: usize,
    sample_count: usize,
) -> Result<Option<f32>, MetadataError> {
    let vertex = &header.elements[vertex_index];
    let to_sample = vertex.count.min(sample_count);
    if to_sample == 0 {
        return Ok(None);
    }

    let Some(z_offset) = vertex.offset_of("z") else {
        return Ok(None);
    };
    let z_is_float = vertex
        .properties
        .iter()
        .any(|p| p.name == "z" && p.ty == Some(ScalarType::Float32));
    if !z_is_float {
        return Ok(None);
    }

    let stride = vertex.stride()?;
    reader.seek(SeekFrom::Start(element_offset(header, vertex_index)?))?;

    let mut sum = 0.0f64;
    let mut sampled = 0;
    let mut buf = Vec::new();
    while sampled < to_sample {
        let batch = SAMPLE_CHUNK.min(to_sample - sampled);
        buf.resize(batch * stride, 0);
        reader.read_exact(&mut buf)?;

        for i in 0..batch {
            let mut field = &buf[i * stride + z_offset..];
            sum += f64::from(field.read_f32::<LittleEndian>()?);
        }
        sampled += batch;
    }

    Ok(Some((sum / to_sample as f64) as f32))
}
