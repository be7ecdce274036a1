//! Data loaders for point cloud files.
//!
//! This module provides parsers for:
//! - PLY point cloud files (ASCII and binary, with optional RGB colors)
//! - Cartesian point cloud CSV files (x, y, z columns)
//! - Whitespace separated XYZ text files (`.xyz`, `.txt`, `.pts`)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Invalid PLY file: {0}")]
    InvalidPly(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported point cloud format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Container for 3D point cloud data.
///
/// Index position is the identity of a point: sampling and filtering report
/// the indices they keep, and `colors` (when present) runs parallel to the
/// coordinate vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f32>,
    /// Y coordinates of all points.
    pub y: Vec<f32>,
    /// Z coordinates of all points.
    pub z: Vec<f32>,
    /// Optional RGB colors for each point.
    pub colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Creates a new empty point cloud.
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            colors: None,
        }
    }

    /// Creates a new point cloud from coordinate vectors.
    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Self {
        Self {
            x,
            y,
            z,
            colors: None,
        }
    }

    /// Creates a new point cloud from `[x, y, z]` triples.
    pub fn from_coords(coords: &[[f32; 3]]) -> Self {
        let mut cloud = Self::with_capacity(coords.len());
        for &[x, y, z] in coords {
            cloud.push(x, y, z);
        }
        cloud
    }

    /// Creates a new point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            colors: None,
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Returns the coordinates of point `i`.
    #[inline]
    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        (0..self.len()).map(|i| self.point(i)).collect()
    }

    /// Adds a point to the cloud.
    #[inline]
    pub fn push(&mut self, x: f32, y: f32, z: f32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
    }

    /// Adds a point with color to the cloud.
    pub fn push_with_color(&mut self, x: f32, y: f32, z: f32, color: [u8; 3]) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);

        if self.colors.is_none() {
            self.colors = Some(Vec::with_capacity(self.x.capacity()));
        }
        if let Some(ref mut colors) = self.colors {
            colors.push(color);
        }
    }

    /// Builds a new cloud holding the points at `indices`, in that order.
    ///
    /// Colors follow their points.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        let mut x = Vec::with_capacity(indices.len());
        let mut y = Vec::with_capacity(indices.len());
        let mut z = Vec::with_capacity(indices.len());

        for &idx in indices {
            x.push(self.x[idx]);
            y.push(self.y[idx]);
            z.push(self.z[idx]);
        }

        let colors = self
            .colors
            .as_ref()
            .map(|c| indices.iter().map(|&idx| c[idx]).collect());

        PointCloud { x, y, z, colors }
    }

    /// Index of the first point with a NaN or infinite coordinate.
    pub fn first_non_finite(&self) -> Option<usize> {
        (0..self.len()).find(|&i| {
            !(self.x[i].is_finite() && self.y[i].is_finite() && self.z[i].is_finite())
        })
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// Load a point cloud, picking the parser from the file extension.
///
/// Recognised extensions (case-insensitive): `ply`, `csv`, `xyz`, `txt`, `pts`.
///
/// # Errors
///
/// Returns [`LoaderError::UnsupportedFormat`] for any other extension, or the
/// parser's error when the file cannot be read.
pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ply" => load_ply(path),
        "csv" => load_cartesian_csv(path),
        "xyz" | "txt" | "pts" => load_xyz(path),
        _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load a Cartesian point cloud from a CSV file with x, y, z columns.
///
/// The CSV should have a header row with column names. The function will
/// look for columns named 'x', 'y', 'z' (case-insensitive), or fall back
/// to using the first three columns.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a coordinate cannot be
/// parsed, or the file holds no points.
pub fn load_cartesian_csv<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_lowercase(), i))
        .collect();

    let x_idx = col_map.get("x").copied().unwrap_or(0);
    let y_idx = col_map.get("y").copied().unwrap_or(1);
    let z_idx = col_map.get("z").copied().unwrap_or(2);

    let mut cloud = PointCloud::with_capacity(10000);

    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let field = |idx: usize, axis: &str| -> Result<f32> {
            record
                .get(idx)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    LoaderError::ParseError(format!("Invalid {} value in row {}", axis, row + 1))
                })
        };

        cloud.push(field(x_idx, "x")?, field(y_idx, "y")?, field(z_idx, "z")?);
    }

    if cloud.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(cloud)
}

/// Load a point cloud from a whitespace separated XYZ text file.
///
/// Each non-empty line holds at least three numbers; extra columns are
/// ignored. Lines starting with `#` are comments.
pub fn load_xyz<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut cloud = PointCloud::with_capacity(10000);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let values: Vec<f32> = stripped
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .take(3)
            .map(|s| s.parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| LoaderError::ParseError(format!("line {}: {}", line_no + 1, e)))?;

        if values.len() < 3 {
            return Err(LoaderError::MissingColumns(format!(
                "line {} has {} of 3 coordinates",
                line_no + 1,
                values.len()
            )));
        }

        cloud.push(values[0], values[1], values[2]);
    }

    if cloud.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(cloud)
}

/// PLY body encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

/// Scalar property types allowed in the vertex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyScalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PlyScalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    fn decode(self, bytes: &[u8], format: PlyFormat) -> f64 {
        macro_rules! read {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                if format == PlyFormat::BinaryBigEndian {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }

        match self {
            Self::I8 => bytes[0] as i8 as f64,
            Self::U8 => bytes[0] as f64,
            Self::I16 => read!(i16, 2),
            Self::U16 => read!(u16, 2),
            Self::I32 => read!(i32, 4),
            Self::U32 => read!(u32, 4),
            Self::F32 => read!(f32, 4),
            Self::F64 => read!(f64, 8),
        }
    }
}

/// Parsed PLY header, restricted to the vertex element.
struct PlyHeader {
    format: PlyFormat,
    num_vertices: usize,
    props: Vec<(String, PlyScalar)>,
}

fn read_ply_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<PlyHeader> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(LoaderError::InvalidPly("Empty file".to_string()));
    }
    if !line.trim().starts_with("ply") {
        return Err(LoaderError::InvalidPly(format!(
            "{} is not a PLY file",
            path.display()
        )));
    }

    let mut format = None;
    let mut num_vertices: Option<usize> = None;
    let mut props = Vec::new();
    let mut current_element = String::new();
    let mut seen_vertex = false;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(LoaderError::InvalidPly("Missing end_header".to_string()));
        }
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts.as_slice() {
            ["end_header"] => break,
            ["format", kind, ..] => {
                format = Some(match *kind {
                    "ascii" => PlyFormat::Ascii,
                    "binary_little_endian" => PlyFormat::BinaryLittleEndian,
                    "binary_big_endian" => PlyFormat::BinaryBigEndian,
                    other => {
                        return Err(LoaderError::InvalidPly(format!("Unknown format '{}'", other)))
                    }
                });
            }
            ["element", name, count] => {
                if *name == "vertex" {
                    num_vertices = count.parse().ok();
                    seen_vertex = true;
                } else if !seen_vertex {
                    // The body is read sequentially, so vertices must come first.
                    return Err(LoaderError::InvalidPly(format!(
                        "element '{}' precedes the vertex element",
                        name
                    )));
                }
                current_element = name.to_string();
            }
            ["property", "list", ..] if current_element == "vertex" => {
                return Err(LoaderError::InvalidPly(
                    "list properties on vertices are not supported".to_string(),
                ));
            }
            ["property", ty, name] if current_element == "vertex" => {
                let scalar = PlyScalar::parse(ty).ok_or_else(|| {
                    LoaderError::InvalidPly(format!("Unknown property type '{}'", ty))
                })?;
                props.push((name.to_string(), scalar));
            }
            _ => {}
        }
    }

    let format = format.ok_or_else(|| LoaderError::InvalidPly("No format line".to_string()))?;
    let num_vertices = num_vertices
        .ok_or_else(|| LoaderError::InvalidPly("No vertex count in header".to_string()))?;

    Ok(PlyHeader {
        format,
        num_vertices,
        props,
    })
}

/// Converts a color channel to a byte, rescaling float channels from [0, 1].
fn color_channel(value: f64, ty: PlyScalar) -> u8 {
    let scaled = if ty.is_float() { value * 255.0 } else { value };
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Upper bound on vertices reserved up front from a PLY header.
const MAX_PREALLOCATED_VERTICES: usize = 1 << 20;

/// Load a point cloud from a PLY file.
///
/// Supports ASCII and binary (little or big endian) PLY files whose vertex
/// element contains:
/// - Required: x, y, z properties
/// - Optional: red, green, blue color properties
///
/// Clouds without color properties are returned with `colors: None`.
///
/// # Errors
///
/// Returns an error if the file is not a valid PLY or lacks required properties.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_ply_header(&mut reader, path)?;

    let prop_idx: HashMap<&str, usize> = header
        .props
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();

    let required = |name: &str| {
        prop_idx
            .get(name)
            .copied()
            .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
    };
    let x_idx = required("x")?;
    let y_idx = required("y")?;
    let z_idx = required("z")?;

    let color_idx = match (
        prop_idx.get("red"),
        prop_idx.get("green"),
        prop_idx.get("blue"),
    ) {
        (Some(&r), Some(&g), Some(&b)) => Some([r, g, b]),
        _ => None,
    };

    let n = header.num_vertices;
    // The header count is untrusted; grow past this as vertices arrive.
    let reserve = n.min(MAX_PREALLOCATED_VERTICES);
    let mut cloud = PointCloud::with_capacity(reserve);
    let mut colors = color_idx.map(|_| Vec::with_capacity(reserve));
    let mut values = vec![0f64; header.props.len()];

    let mut push_vertex = |values: &[f64], cloud: &mut PointCloud| {
        cloud.push(values[x_idx] as f32, values[y_idx] as f32, values[z_idx] as f32);
        if let (Some(idx), Some(colors)) = (color_idx, colors.as_mut()) {
            colors.push(idx.map(|i| color_channel(values[i], header.props[i].1)));
        }
    };

    match header.format {
        PlyFormat::Ascii => {
            let mut lines = reader.lines();
            while cloud.len() < n {
                let line = match lines.next() {
                    Some(line) => line?,
                    None => break,
                };
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.is_empty() {
                    continue;
                }
                if tokens.len() < values.len() {
                    return Err(LoaderError::ParseError(format!(
                        "vertex {} has {} of {} properties",
                        cloud.len(),
                        tokens.len(),
                        values.len()
                    )));
                }
                for (slot, token) in values.iter_mut().zip(&tokens) {
                    *slot = token.parse().map_err(|_| {
                        LoaderError::ParseError(format!("Invalid value: {}", token))
                    })?;
                }
                push_vertex(&values, &mut cloud);
            }
        }
        format => {
            let record_size: usize = header.props.iter().map(|(_, ty)| ty.size()).sum();
            let mut record = vec![0u8; record_size];
            for _ in 0..n {
                if let Err(e) = reader.read_exact(&mut record) {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        break;
                    }
                    return Err(e.into());
                }
                let mut offset = 0;
                for (slot, (_, ty)) in values.iter_mut().zip(&header.props) {
                    *slot = ty.decode(&record[offset..], format);
                    offset += ty.size();
                }
                push_vertex(&values, &mut cloud);
            }
        }
    }

    if cloud.len() < n {
        return Err(LoaderError::InvalidPly(format!(
            "Expected {} vertices, found {}",
            n,
            cloud.len()
        )));
    }

    cloud.colors = colors;
    Ok(cloud)
}
