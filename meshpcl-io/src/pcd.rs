//! PCD (Point Cloud Data) format support
//!
//! ASCII and uncompressed binary payloads are read. Positions come from the
//! `x y z` fields; a packed `rgb` or `rgba` field, when present, yields a
//! colored cloud. Every other field is skipped. The `WIDTH`/`HEIGHT` layout
//! is kept for organized clouds as long as every point is finite.

use crate::{LoadedCloud, PointCloudReader};
use byteorder::{ByteOrder, LittleEndian};
use meshpcl_core::{ColoredPoint3d, Error, Point3d, PointCloud, Result, Rgb};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// PCD data format variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdDataFormat {
    Ascii,
    Binary,
    BinaryCompressed,
}

/// PCD field data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdFieldType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PcdFieldType {
    fn from_declaration(kind: &str, size: usize) -> Result<Self> {
        match (kind, size) {
            ("I", 1) => Ok(PcdFieldType::I8),
            ("I", 2) => Ok(PcdFieldType::I16),
            ("I", 4) => Ok(PcdFieldType::I32),
            ("U", 1) => Ok(PcdFieldType::U8),
            ("U", 2) => Ok(PcdFieldType::U16),
            ("U", 4) => Ok(PcdFieldType::U32),
            ("F", 4) => Ok(PcdFieldType::F32),
            ("F", 8) => Ok(PcdFieldType::F64),
            _ => Err(Error::InvalidData(format!(
                "unknown PCD field type/size combination: {}/{}",
                kind, size
            ))),
        }
    }

    /// Size in bytes of one element
    pub fn size(&self) -> usize {
        match self {
            PcdFieldType::I8 | PcdFieldType::U8 => 1,
            PcdFieldType::I16 | PcdFieldType::U16 => 2,
            PcdFieldType::I32 | PcdFieldType::U32 | PcdFieldType::F32 => 4,
            PcdFieldType::F64 => 8,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            PcdFieldType::I8 => bytes[0] as i8 as f64,
            PcdFieldType::U8 => bytes[0] as f64,
            PcdFieldType::I16 => LittleEndian::read_i16(bytes) as f64,
            PcdFieldType::U16 => LittleEndian::read_u16(bytes) as f64,
            PcdFieldType::I32 => LittleEndian::read_i32(bytes) as f64,
            PcdFieldType::U32 => LittleEndian::read_u32(bytes) as f64,
            PcdFieldType::F32 => LittleEndian::read_f32(bytes) as f64,
            PcdFieldType::F64 => LittleEndian::read_f64(bytes),
        }
    }
}

/// PCD field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcdField {
    pub name: String,
    pub field_type: PcdFieldType,
    pub count: usize,
}

/// PCD header information
#[derive(Debug, Clone)]
pub struct PcdHeader {
    pub version: Option<String>,
    pub fields: Vec<PcdField>,
    pub width: usize,
    pub height: usize,
    pub points: usize,
    pub data_format: PcdDataFormat,
}

impl PcdHeader {
    /// Byte offset of `name` within a binary record, and its field
    fn locate(&self, name: &str) -> Option<(usize, &PcdField)> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some((offset, field));
            }
            offset += field.field_type.size() * field.count;
        }
        None
    }

    /// Index of the first ASCII token of `name`, and its field
    fn token(&self, name: &str) -> Option<(usize, &PcdField)> {
        let mut index = 0;
        for field in &self.fields {
            if field.name == name {
                return Some((index, field));
            }
            index += field.count;
        }
        None
    }

    fn record_size(&self) -> usize {
        self.fields.iter().map(|f| f.field_type.size() * f.count).sum()
    }

    fn tokens_per_point(&self) -> usize {
        self.fields.iter().map(|f| f.count).sum()
    }

    fn color_field(&self) -> Option<&'static str> {
        ["rgb", "rgba"]
            .into_iter()
            .find(|name| self.fields.iter().any(|f| f.name == *name && f.count > 0))
    }

    fn is_organized(&self) -> bool {
        self.height > 1
    }
}

pub struct PcdReader;

impl PointCloudReader for PcdReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
        let file = File::open(path.as_ref())?;
        read_pcd(&mut BufReader::new(file))
    }
}

/// Read a PCD stream: header, then the payload in the declared format
pub fn read_pcd<R: BufRead>(reader: &mut R) -> Result<LoadedCloud> {
    let header = read_header(reader)?;
    let records = match header.data_format {
        PcdDataFormat::Ascii => read_ascii_records(reader, &header)?,
        PcdDataFormat::Binary => read_binary_records(reader, &header)?,
        PcdDataFormat::BinaryCompressed => {
            return Err(Error::UnsupportedFormat(
                "binary_compressed PCD payloads are not supported".to_string(),
            ))
        }
    };
    debug!(
        points = records.len(),
        width = header.width,
        height = header.height,
        format = ?header.data_format,
        "read PCD payload"
    );
    assemble(&header, records)
}

/// Upper bound on the capacity reserved from a header's POINTS value
const PREALLOCATED_POINTS: usize = 1 << 16;

/// One decoded point: position and, if the file has a color field, its packed value
type Record = (Point3d, Option<u32>);

/// Read PCD header
pub fn read_header<R: BufRead>(reader: &mut R) -> Result<PcdHeader> {
    let mut version = None;
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut kinds: Vec<String> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut width = None;
    let mut height = None;
    let mut points = None;

    let mut line = String::new();
    let data_format = loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::InvalidData("unexpected end of file in PCD header".to_string()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let values = &parts[1..];
        match parts[0] {
            "VERSION" => version = values.first().map(|v| v.to_string()),
            "FIELDS" => names = values.iter().map(|v| v.to_string()).collect(),
            "SIZE" => sizes = parse_all(values, "SIZE")?,
            "TYPE" => kinds = values.iter().map(|v| v.to_string()).collect(),
            "COUNT" => counts = parse_all(values, "COUNT")?,
            "WIDTH" => width = Some(parse_one(values, "WIDTH")?),
            "HEIGHT" => height = Some(parse_one(values, "HEIGHT")?),
            "POINTS" => points = Some(parse_one(values, "POINTS")?),
            "DATA" => {
                break match values.first().copied() {
                    Some("ascii") => PcdDataFormat::Ascii,
                    Some("binary") => PcdDataFormat::Binary,
                    Some("binary_compressed") => PcdDataFormat::BinaryCompressed,
                    other => {
                        return Err(Error::InvalidData(format!(
                            "unknown PCD DATA format: {}",
                            other.unwrap_or("")
                        )))
                    }
                };
            }
            // VIEWPOINT and unknown keys carry nothing the reader needs
            _ => {}
        }
    };

    if counts.is_empty() {
        counts = vec![1; names.len()];
    }
    if names.is_empty() || names.len() != sizes.len() || names.len() != kinds.len() || names.len() != counts.len() {
        return Err(Error::InvalidData(
            "mismatch between FIELDS, SIZE, TYPE and COUNT declarations".to_string(),
        ));
    }
    let fields = names
        .into_iter()
        .zip(kinds.iter().zip(sizes.iter()).zip(counts.iter()))
        .map(|(name, ((kind, &size), &count))| {
            Ok(PcdField {
                name,
                field_type: PcdFieldType::from_declaration(kind, size)?,
                count,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let width = width.ok_or_else(|| Error::InvalidData("missing WIDTH in PCD header".to_string()))?;
    let height = height.unwrap_or(1);
    let area = width.checked_mul(height).ok_or_else(|| {
        Error::InvalidData(format!("WIDTH * HEIGHT overflows: {} x {}", width, height))
    })?;
    let points = points.unwrap_or(area);
    if points != area {
        return Err(Error::InvalidData(format!(
            "POINTS ({}) doesn't match WIDTH * HEIGHT ({})",
            points, area
        )));
    }

    let record_size = fields
        .iter()
        .try_fold(0usize, |acc, f| {
            f.field_type.size().checked_mul(f.count).and_then(|bytes| acc.checked_add(bytes))
        })
        .filter(|&size| size > 0)
        .ok_or_else(|| Error::InvalidData("PCD record size is zero or overflows".to_string()))?;
    if record_size.checked_mul(points).is_none() {
        return Err(Error::InvalidData(format!(
            "PCD payload size overflows: {} points of {} bytes",
            points, record_size
        )));
    }

    let header = PcdHeader {
        version,
        fields,
        width,
        height,
        points,
        data_format,
    };
    for axis in ["x", "y", "z"] {
        if !header.locate(axis).is_some_and(|(_, field)| field.count > 0) {
            return Err(Error::InvalidData(format!("PCD file has no '{}' field", axis)));
        }
    }
    Ok(header)
}

fn read_ascii_records<R: BufRead>(reader: &mut R, header: &PcdHeader) -> Result<Vec<Record>> {
    let expected = header.tokens_per_point();
    let color = header.color_field().and_then(|name| header.token(name));
    let axes = ["x", "y", "z"].map(|axis| header.token(axis));

    let mut records = Vec::with_capacity(header.points.min(PREALLOCATED_POINTS));
    let mut line = String::new();
    while records.len() < header.points {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::InvalidData(format!(
                "PCD payload ends after {} of {} points",
                records.len(),
                header.points
            )));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() < expected {
            return Err(Error::InvalidData(format!(
                "PCD point {} has {} values, expected {}",
                records.len(),
                tokens.len(),
                expected
            )));
        }

        let mut position = [0.0; 3];
        for (slot, axis) in position.iter_mut().zip(axes) {
            if let Some((index, _)) = axis {
                *slot = parse_token::<f64>(tokens[index])?;
            }
        }
        let packed = match color {
            Some((index, field)) => Some(ascii_packed_color(tokens[index], field.field_type)?),
            None => None,
        };
        records.push((Point3d::from(position), packed));
    }
    Ok(records)
}

fn read_binary_records<R: Read>(reader: &mut R, header: &PcdHeader) -> Result<Vec<Record>> {
    let record_size = header.record_size();
    let color = header.color_field().and_then(|name| header.locate(name));
    let axes: Vec<(usize, PcdFieldType)> = ["x", "y", "z"]
        .iter()
        .filter_map(|axis| header.locate(axis).map(|(offset, f)| (offset, f.field_type)))
        .collect();

    // The declared count is untrusted, so the payload is read record by record
    let mut records = Vec::with_capacity(header.points.min(PREALLOCATED_POINTS));
    let mut record = vec![0u8; record_size];
    while records.len() < header.points {
        reader.read_exact(&mut record).map_err(|e| {
            Error::InvalidData(format!(
                "PCD binary payload ends after {} of {} points: {}",
                records.len(),
                header.points,
                e
            ))
        })?;
        let mut position = [0.0; 3];
        for (slot, &(offset, kind)) in position.iter_mut().zip(&axes) {
            *slot = kind.decode(&record[offset..offset + kind.size()]);
        }
        let packed = color.map(|(offset, field)| match field.field_type {
            PcdFieldType::F32 | PcdFieldType::U32 | PcdFieldType::I32 => {
                LittleEndian::read_u32(&record[offset..offset + 4])
            }
            other => other.decode(&record[offset..offset + other.size()]) as u32,
        });
        records.push((Point3d::from(position), packed));
    }
    Ok(records)
}

/// Build the cloud, dropping non-finite points
fn assemble(header: &PcdHeader, records: Vec<Record>) -> Result<LoadedCloud> {
    let total = records.len();
    let finite: Vec<Record> = records
        .into_iter()
        .filter(|(p, _)| p.iter().all(|c| c.is_finite()))
        .collect();
    let keep_layout = header.is_organized() && finite.len() == total;
    if finite.len() < total {
        warn!(
            dropped = total - finite.len(),
            organized = header.is_organized(),
            "dropped non-finite PCD points"
        );
    }

    if header.color_field().is_some() {
        let points: Vec<ColoredPoint3d> = finite
            .into_iter()
            .map(|(p, packed)| ColoredPoint3d::new(p, unpack_rgb(packed.unwrap_or(0))))
            .collect();
        Ok(LoadedCloud::Colored(with_layout(points, header, keep_layout)?))
    } else {
        let points: Vec<Point3d> = finite.into_iter().map(|(p, _)| p).collect();
        Ok(LoadedCloud::Plain(with_layout(points, header, keep_layout)?))
    }
}

fn with_layout<T>(points: Vec<T>, header: &PcdHeader, organized: bool) -> Result<PointCloud<T>> {
    if organized {
        PointCloud::organized(points, header.width, header.height)
    } else {
        Ok(PointCloud::from_points(points))
    }
}

/// Split a packed `0x00RRGGBB` value into channels
pub fn unpack_rgb(packed: u32) -> Rgb {
    [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]
}

/// ASCII color fields hold the packed bits as an integer, or as the float
/// reinterpretation of those bits
fn ascii_packed_color(token: &str, field_type: PcdFieldType) -> Result<u32> {
    match field_type {
        PcdFieldType::F32 => Ok(parse_token::<f32>(token)?.to_bits()),
        _ => parse_token::<u32>(token),
    }
}

fn parse_token<T: std::str::FromStr>(token: &str) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| Error::InvalidData(format!("invalid PCD value: {}", token)))
}

fn parse_one(values: &[&str], key: &str) -> Result<usize> {
    values
        .first()
        .ok_or_else(|| Error::InvalidData(format!("missing {} value", key)))
        .and_then(|v| {
            v.parse::<usize>()
                .map_err(|_| Error::InvalidData(format!("invalid {} value: {}", key, v)))
        })
}

fn parse_all(values: &[&str], key: &str) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| Error::InvalidData(format!("invalid {} value: {}", key, v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    fn packed(rgb: Rgb) -> u32 {
        (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32
    }

    #[test]
    fn test_ascii_plain_cloud() {
        let content = "# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z
SIZE 4 4 4
TYPE F F F
COUNT 1 1 1
WIDTH 3
HEIGHT 1
VIEWPOINT 0 0 0 1 0 0 0
POINTS 3
DATA ascii
0 0 0
1.5 0 0

0 2 -3
";
        let cloud = read_pcd(&mut Cursor::new(content)).unwrap();
        assert!(!cloud.is_colored());
        assert!(!cloud.is_organized());
        let cloud = cloud.into_plain();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud[2], Point3d::new(0.0, 2.0, -3.0));
    }

    #[test]
    fn test_ascii_packed_float_rgb() {
        let bits = f32::from_bits(packed([255, 128, 1]));
        let content = format!(
            "VERSION 0.7\nFIELDS x y z rgb\nSIZE 4 4 4 4\nTYPE F F F F\nWIDTH 1\nHEIGHT 1\nDATA ascii\n1 2 3 {:e}\n",
            bits
        );
        match read_pcd(&mut Cursor::new(content)).unwrap() {
            LoadedCloud::Colored(cloud) => assert_eq!(cloud[0].color, [255, 128, 1]),
            LoadedCloud::Plain(_) => panic!("color field ignored"),
        }
    }

    #[test]
    fn test_binary_organized_with_rgba() {
        let header = "VERSION 0.7\nFIELDS x y z intensity rgba\nSIZE 4 4 4 2 4\nTYPE F F F U U\nCOUNT 1 1 1 1 1\nWIDTH 2\nHEIGHT 2\nPOINTS 4\nDATA binary\n";
        let mut bytes = header.as_bytes().to_vec();
        for i in 0..4u8 {
            bytes.write_f32::<LittleEndian>(i as f32).unwrap();
            bytes.write_f32::<LittleEndian>(2.0 * i as f32).unwrap();
            bytes.write_f32::<LittleEndian>(-1.0).unwrap();
            bytes.write_u16::<LittleEndian>(1000).unwrap();
            bytes.write_u32::<LittleEndian>(0xFF00_0000 | packed([i, 10, 20])).unwrap();
        }

        let cloud = read_pcd(&mut Cursor::new(bytes)).unwrap();
        assert!(cloud.is_organized());
        match cloud {
            LoadedCloud::Colored(cloud) => {
                assert_eq!((cloud.width(), cloud.height()), (2, 2));
                assert_eq!(cloud[3].position, Point3d::new(3.0, 6.0, -1.0));
                assert_eq!(cloud[3].color, [3, 10, 20]);
            }
            LoadedCloud::Plain(_) => panic!("color field ignored"),
        }
    }

    #[test]
    fn test_binary_nan_points_are_dropped() {
        let header = "FIELDS x y z\nSIZE 8 8 8\nTYPE F F F\nWIDTH 3\nHEIGHT 1\nDATA binary\n";
        let mut bytes = header.as_bytes().to_vec();
        for v in [0.0, 0.0, 0.0, f64::NAN, f64::NAN, f64::NAN, 1.0, 1.0, 1.0] {
            bytes.write_f64::<LittleEndian>(v).unwrap();
        }
        let cloud = read_pcd(&mut Cursor::new(bytes)).unwrap().into_plain();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[1], Point3d::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_truncated_payload_is_invalid() {
        let mut bytes = b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 2\nHEIGHT 1\nDATA binary\n".to_vec();
        bytes.write_all(&[0u8; 12]).unwrap();
        assert!(matches!(
            read_pcd(&mut Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_header_errors() {
        let cases = [
            "FIELDS x y\nSIZE 4 4\nTYPE F F\nWIDTH 1\nDATA ascii\n1 2\n",
            "FIELDS x y z\nSIZE 4 4\nTYPE F F F\nWIDTH 1\nDATA ascii\n1 2 3\n",
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 2\nHEIGHT 1\nPOINTS 3\nDATA ascii\n",
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1\n",
            "FIELDS x y z\nSIZE 3 4 4\nTYPE F F F\nWIDTH 1\nDATA ascii\n1 2 3\n",
        ];
        for content in cases {
            assert!(
                matches!(read_pcd(&mut Cursor::new(content)), Err(Error::InvalidData(_))),
                "accepted: {:?}",
                content
            );
        }
    }

    #[test]
    fn test_oversized_headers_are_invalid() {
        let huge = usize::MAX / 2 + 1;
        let overflowing = format!(
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH {}\nHEIGHT 2\nDATA binary\n",
            huge
        );
        let oversized_payload = format!(
            "FIELDS x y z\nSIZE 8 8 8\nTYPE F F F\nWIDTH {}\nHEIGHT 1\nDATA binary\n",
            huge
        );
        let empty_axis = "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 0\nWIDTH 1\nDATA binary\n";
        for content in [overflowing.as_str(), oversized_payload.as_str(), empty_axis] {
            assert!(
                matches!(read_pcd(&mut Cursor::new(content)), Err(Error::InvalidData(_))),
                "accepted: {:?}",
                content
            );
        }
    }

    #[test]
    fn test_declared_count_beyond_payload_is_invalid() {
        // A billion declared points backed by two records of payload
        let mut bytes =
            b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1000000000\nHEIGHT 1\nDATA binary\n".to_vec();
        bytes.write_all(&[0u8; 24]).unwrap();
        assert!(matches!(
            read_pcd(&mut Cursor::new(bytes)),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_compressed_payload_is_unsupported() {
        let content = "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1\nDATA binary_compressed\n";
        assert!(matches!(
            read_pcd(&mut Cursor::new(content)),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
