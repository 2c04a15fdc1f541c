/*
 * Trivial to understand utility functions that need not clutter other namespaces.
 */
use crate::Result;
use ndarray::{ArrayD, ArrayViewD};
use ndarray_npy::{read_npy, write_npy, ReadNpyError};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

/// Reads a file into a string.
pub fn read_file<P: AsRef<Path>>(filename: P) -> Result<String> {
    let mut file = File::open(filename)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Reads an `.npy` array of f32s or f64s into an f32 array of dynamic dimension.
pub fn read_npy_as_f32s<P: AsRef<Path>>(filename: P) -> Result<ArrayD<f32>> {
    let filename = filename.as_ref();
    match read_npy::<_, ArrayD<f32>>(filename) {
        Ok(arr) => Ok(arr),
        // Arrays saved by numpy default to float64
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let arr = read_npy::<_, ArrayD<f64>>(filename)?;
            Ok(arr.mapv(|v| v as f32))
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes an f32 array into an `.npy` file.
pub fn write_npy_f32s<P: AsRef<Path>>(filename: P, arr: ArrayViewD<f32>) -> Result<()> {
    write_npy(filename, &arr)?;
    Ok(())
}

/// Checks that two float slices are element-wise within `margin` of each other.
pub fn is_within_margin(a: &[f32], b: &[f32], margin: f32) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= margin)
}
