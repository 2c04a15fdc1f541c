//! Binary checkpoint codec.
//!
//! Layout, little-endian: magic `GQCK`, `u32` version, `u32` entry count, then per entry a
//! `u32` name length, the UTF-8 name, a `u32` rank, `rank` x `u64` dimensions and the `f32`
//! data in row-major order.
use crate::{Error, Result, Tensor};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::IxDyn;
use std::io::{ErrorKind, Read, Write};

const MAGIC: &[u8; 4] = b"GQCK";
const VERSION: u32 = 1;

pub fn write_checkpoint<W: Write>(writer: &mut W, entries: &[(String, &Tensor)]) -> Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    writer.write_u32::<LittleEndian>(entries.len() as u32)?;
    for (name, tensor) in entries {
        writer.write_u32::<LittleEndian>(name.len() as u32)?;
        writer.write_all(name.as_bytes())?;
        writer.write_u32::<LittleEndian>(tensor.ndim() as u32)?;
        for &dim in tensor.shape() {
            writer.write_u64::<LittleEndian>(dim as u64)?;
        }
        // Iteration is in logical order regardless of memory layout
        for &v in tensor.iter() {
            writer.write_f32::<LittleEndian>(v)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads every entry of a checkpoint. Sizes come from the file, so buffers only grow as
/// bytes actually arrive and a short file is reported as truncated.
pub fn read_checkpoint<R: Read>(reader: &mut R) -> Result<Vec<(String, Tensor)>> {
    read_entries(reader).map_err(|err| match err {
        Error::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof => {
            Error::Checkpoint("checkpoint is truncated".to_owned())
        }
        err => err,
    })
}

fn read_entries<R: Read>(reader: &mut R) -> Result<Vec<(String, Tensor)>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Checkpoint(format!(
            "bad magic {:?}, not a checkpoint file",
            magic
        )));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::Checkpoint(format!(
            "unsupported checkpoint version {}",
            version
        )));
    }
    let count = reader.read_u32::<LittleEndian>()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let name_len = reader.read_u32::<LittleEndian>()?;
        let name = read_bytes(reader, u64::from(name_len), "entry name")?;
        let name = String::from_utf8(name)
            .map_err(|e| Error::Checkpoint(format!("entry name is not UTF-8: {}", e)))?;

        let rank = reader.read_u32::<LittleEndian>()?;
        let mut dims = Vec::new();
        for _ in 0..rank {
            dims.push(reader.read_u64::<LittleEndian>()? as usize);
        }
        let num_bytes = dims
            .iter()
            .try_fold(4usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                Error::Checkpoint(format!("shape {:?} of {} overflows", dims, name))
            })?;

        let bytes = read_bytes(reader, num_bytes as u64, &name)?;
        let mut data = vec![0f32; num_bytes / 4];
        LittleEndian::read_f32_into(&bytes, &mut data);
        let tensor = Tensor::from_shape_vec(IxDyn(&dims), data)?;
        entries.push((name, tensor));
    }
    Ok(entries)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
fn read_bytes<R: Read>(reader: &mut R, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < len {
        return Err(Error::Checkpoint(format!(
            "{} is truncated: expected {} bytes, got {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}
