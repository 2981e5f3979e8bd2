//! Plain-text point cloud formats
//!
//! `.xyz` files hold `x y z` per line and `.txt` files hold `x y z r g b`.
//! Values may be separated by spaces, tabs, commas or semicolons. Blank lines
//! and lines starting with `#` are skipped; extra columns are ignored.

use crate::{LoadedCloud, PointCloudReader};
use meshpcl_core::{ColoredPoint3d, Error, Point3d, PointCloud, Result, Rgb};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Reader for `x y z` files
pub struct XyzReader;

/// Reader for `x y z r g b` files
pub struct TxtReader;

impl PointCloudReader for XyzReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
        let file = File::open(path)?;
        Ok(LoadedCloud::Plain(read_xyz(BufReader::new(file))?))
    }
}

impl PointCloudReader for TxtReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
        let file = File::open(path)?;
        Ok(LoadedCloud::Colored(read_xyzrgb(BufReader::new(file))?))
    }
}

/// Parse `x y z` lines
pub fn read_xyz<R: BufRead>(reader: R) -> Result<PointCloud<Point3d>> {
    let mut points = Vec::new();
    for_each_record(reader, 3, |values| {
        points.push(position(values)?);
        Ok(())
    })?;
    Ok(PointCloud::from_points(points))
}

/// Parse `x y z r g b` lines; channels are integers in `0..=255`
pub fn read_xyzrgb<R: BufRead>(reader: R) -> Result<PointCloud<ColoredPoint3d>> {
    let mut points = Vec::new();
    for_each_record(reader, 6, |values| {
        let mut color: Rgb = [0; 3];
        for (slot, token) in color.iter_mut().zip(&values[3..6]) {
            *slot = token
                .parse::<u8>()
                .map_err(|_| Error::InvalidData(format!("invalid color channel: {}", token)))?;
        }
        points.push(ColoredPoint3d::new(position(values)?, color));
        Ok(())
    })?;
    Ok(PointCloud::from_points(points))
}

/// Call `handle` with the tokens of every data line, which must have at least
/// `columns` tokens
fn for_each_record<R, F>(reader: R, columns: usize, mut handle: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(&[&str]) -> Result<()>,
{
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values: Vec<&str> = trimmed
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|t| !t.is_empty())
            .collect();
        if values.len() < columns {
            return Err(Error::InvalidData(format!(
                "line {}: expected {} values, found {}",
                number + 1,
                columns,
                values.len()
            )));
        }
        handle(&values).map_err(|e| match e {
            Error::InvalidData(msg) => Error::InvalidData(format!("line {}: {}", number + 1, msg)),
            other => other,
        })?;
    }
    Ok(())
}

fn position(values: &[&str]) -> Result<Point3d> {
    let mut coords = [0.0; 3];
    for (slot, token) in coords.iter_mut().zip(values) {
        *slot = token
            .parse::<f64>()
            .map_err(|_| Error::InvalidData(format!("invalid coordinate: {}", token)))?;
    }
    Ok(Point3d::from(coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_xyz_with_comments_and_mixed_delimiters() {
        let content = "# scan\n0 0 0\n\n1.5,2.5,3.5\n-1\t0\t2 99\n";
        let cloud = read_xyz(Cursor::new(content)).unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud[1], Point3d::new(1.5, 2.5, 3.5));
        assert_eq!(cloud[2], Point3d::new(-1.0, 0.0, 2.0));
    }

    #[test]
    fn test_txt_colors() {
        let content = "0 0 0 255 0 0\n1 1 1 0 128 255\n";
        let cloud = read_xyzrgb(Cursor::new(content)).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[1].color, [0, 128, 255]);
        assert_eq!(cloud[1].position, Point3d::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_malformed_lines_are_invalid_data() {
        assert!(matches!(read_xyz(Cursor::new("1 2\n")), Err(Error::InvalidData(_))));
        assert!(matches!(read_xyz(Cursor::new("1 two 3\n")), Err(Error::InvalidData(_))));
        assert!(matches!(
            read_xyzrgb(Cursor::new("0 0 0 256 0 0\n")),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            read_xyzrgb(Cursor::new("0 0 0\n")),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_empty_input_gives_empty_cloud() {
        assert!(read_xyz(Cursor::new("# nothing\n\n")).unwrap().is_empty());
    }
}
