//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

/// A version 1.0 `.npy` file with the given header fields and raw body.
pub fn npy_bytes(descr: &str, fortran: bool, shape: &[usize], body: &[u8]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_txt = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    let order = if fortran { "True" } else { "False" };
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {shape_txt}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = b"\x93NUMPY".to_vec();
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn f4_matrix(rows: usize, cols: usize, values: &[f32]) -> Vec<u8> {
    assert_eq!(rows * cols, values.len());
    let body: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    npy_bytes("<f4", false, &[rows, cols], &body)
}

/// Fixed-width byte strings (`|S<n>`), NUL padded.
pub fn id_array(ids: &[&str]) -> Vec<u8> {
    let width = ids.iter().map(|s| s.len()).max().unwrap_or(1).max(1);
    let mut body = Vec::with_capacity(width * ids.len());
    for id in ids {
        body.extend_from_slice(id.as_bytes());
        body.resize(body.len() + width - id.len(), 0);
    }
    npy_bytes(&format!("|S{width}"), false, &[ids.len()], &body)
}

/// Write `members` as `<name>.npy` entries of an `.npz` archive.
pub fn write_npz(dir: &Path, file: &str, members: &[(&str, Vec<u8>)]) -> PathBuf {
    let path = dir.join(file);
    let mut zw = zip::ZipWriter::new(File::create(&path).unwrap());
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in members {
        zw.start_file(format!("{name}.npy"), opts).unwrap();
        zw.write_all(bytes).unwrap();
    }
    zw.finish().unwrap();
    path
}

/// 3 users x 2 factors, row-major.
pub const USERS: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
/// 4 items x 2 factors, row-major.
pub const ITEMS: [f32; 8] = [4.0, 0.0, 3.0, 1.0, 0.0, 2.0, 1.0, 1.0];

pub const USER_IDS: [&str; 3] = ["u0", "u1", "u2"];
pub const ITEM_IDS: [&str; 4] = ["i0", "i1", "i2", "i3"];

pub fn transposed(rows: usize, cols: usize, values: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; values.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = values[r * cols + c];
        }
    }
    out
}
