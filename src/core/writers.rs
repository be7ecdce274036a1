//! Data writers for PLY, CSV and XYZ formats.
//!
//! This module provides functions for writing point cloud data to:
//! - PLY (Polygon File Format) with ASCII encoding and optional RGB colors
//! - CSV with Cartesian coordinates
//! - Whitespace separated XYZ text

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::loaders::PointCloud;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// No writer for the file extension.
    #[error("unsupported output format for '{path}'")]
    UnsupportedFormat { path: String },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write a point cloud, picking the encoder from the file extension.
///
/// Recognised extensions (case-insensitive): `ply`, `csv`, `xyz`, `txt`, `pts`.
pub fn write_point_cloud(path: &Path, cloud: &PointCloud) -> Result<()> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ply" => write_ply(path, cloud),
        "csv" => write_cartesian_csv(path, cloud),
        "xyz" | "txt" | "pts" => write_xyz(path, cloud),
        _ => Err(WriteError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

/// Write point cloud to ASCII PLY file.
///
/// Creates an ASCII PLY file with a header declaring the vertex count and
/// the x, y, z properties, followed by one line per vertex. The red, green
/// and blue properties are declared and written only when the cloud carries
/// colors.
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
///
/// # Example
///
/// ```no_run
/// use completion_pipeline::core::loaders::PointCloud;
/// use completion_pipeline::core::writers::write_ply;
/// use std::path::Path;
///
/// let cloud = PointCloud::default();
/// write_ply(Path::new("output.ply"), &cloud).unwrap();
/// ```
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    let path_str = path.display().to_string();
    let write_err = |e: std::io::Error| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    };

    let colors = cloud.colors.as_deref();

    writeln!(writer, "ply").map_err(write_err)?;
    writeln!(writer, "format ascii 1.0").map_err(write_err)?;
    writeln!(writer, "element vertex {}", cloud.len()).map_err(write_err)?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property float {}", axis).map_err(write_err)?;
    }
    if colors.is_some() {
        for channel in ["red", "green", "blue"] {
            writeln!(writer, "property uchar {}", channel).map_err(write_err)?;
        }
    }
    writeln!(writer, "end_header").map_err(write_err)?;

    for i in 0..cloud.len() {
        let [x, y, z] = cloud.point(i);
        let written = match colors {
            Some(c) => {
                let [r, g, b] = c[i];
                writeln!(writer, "{:.6} {:.6} {:.6} {} {} {}", x, y, z, r, g, b)
            }
            None => writeln!(writer, "{:.6} {:.6} {:.6}", x, y, z),
        };
        written.map_err(write_err)?;
    }

    writer.flush().map_err(write_err)?;

    Ok(())
}

/// Write point cloud to CSV with x, y, z columns.
///
/// Creates a CSV file with headers "x,y,z" and one row per point.
pub fn write_cartesian_csv(path: &Path, cloud: &PointCloud) -> Result<()> {
    ensure_parent_dirs(path)?;

    let mut csv_writer = csv::Writer::from_writer(create_buffered_writer(path)?);
    let path_str = path.display().to_string();
    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    csv_writer.write_record(["x", "y", "z"]).map_err(csv_err)?;

    for i in 0..cloud.len() {
        csv_writer
            .write_record(&[
                format!("{:.6}", cloud.x[i]),
                format!("{:.6}", cloud.y[i]),
                format!("{:.6}", cloud.z[i]),
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    Ok(())
}

/// Write point cloud as whitespace separated `x y z` lines.
pub fn write_xyz(path: &Path, cloud: &PointCloud) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    let path_str = path.display().to_string();
    let write_err = |e: std::io::Error| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    };

    for i in 0..cloud.len() {
        let [x, y, z] = cloud.point(i);
        writeln!(writer, "{:.6} {:.6} {:.6}", x, y, z).map_err(write_err)?;
    }

    writer.flush().map_err(write_err)
}
