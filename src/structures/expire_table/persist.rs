//! Table image dump and load
//!
//! A dumped image is one stream: a 12-byte magic, a fixed header, the raw
//! bucket array, the raw value arena, and optionally an embedding-defined
//! value payload. Bytes are native-endian; images are not portable across
//! architectures. The loader validates the magic and the header's internal
//! geometry before allocating, and destroys everything built so far on any
//! short read.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use super::arena::pad_cell_size;
use super::descriptor::SlotDesc;
use super::table::{round_capacity, ExpireTable};
use crate::constants::{BUCKET_WAYS, MIN_CAPACITY};
use crate::types::error::{Error, PersistError, Result};

/// Magic identifying a persisted cache table image.
pub const TABLE_MAGIC: [u8; 12] = *b"STRINGHASH5 ";

/// Magic of the sibling existence-only filter's images. Never loadable as
/// a cache table; encountering it is a hard error, not a legacy fallback.
pub const FILTER_MAGIC: [u8; 12] = *b"STRINGHASH9A";

/// Options controlling how persisted images are read.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Accept images that carry no recognized magic, treating the stream
    /// as a header-less legacy dump. Off by default; such images are
    /// otherwise rejected with [`PersistError::BadMagic`].
    pub allow_legacy: bool,
}

/// Callback that rehydrates externally owned values referenced from cells.
/// It receives the whole arena and the stream positioned immediately after
/// the arena bytes, and returns how many payload bytes it consumed.
pub type ValueReadFn<'a> = Box<dyn FnOnce(&mut [u8], &mut dyn Read) -> io::Result<u64> + 'a>;

impl ExpireTable {
    /// Write the table to `writer` under the whole-table lock.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<()> {
        let _all = self.locks.lock_all();
        self.write_image(writer)
    }

    /// Like [`Self::dump`], then hand the arena and the stream to
    /// `value_writer` so cells embedding pointers to external records can
    /// serialize those records behind the image.
    pub fn dump_with<W, F>(&self, writer: &mut W, value_writer: F) -> Result<()>
    where
        W: Write,
        F: FnOnce(&[u8], &mut W) -> io::Result<u64>,
    {
        let _all = self.locks.lock_all();
        self.write_image(writer)?;
        // Safety: every stripe is held.
        let bytes = value_writer(unsafe { self.arena.as_slice() }, writer)?;
        tracing::debug!(bytes, "wrote value payload after arena");
        Ok(())
    }

    fn write_image<W: Write>(&self, w: &mut W) -> Result<()> {
        use std::sync::atomic::Ordering;

        w.write_all(&TABLE_MAGIC)?;
        w.write_all(&self.next_value.load(Ordering::Relaxed).to_ne_bytes())?;
        w.write_all(&(self.arena.cell_size() as u64).to_ne_bytes())?;
        w.write_all(&self.capacity.to_ne_bytes())?;
        w.write_all(&self.half_count.to_ne_bytes())?;
        w.write_all(&self.seed.to_ne_bytes())?;
        w.write_all(&self.mask_index.to_ne_bytes())?;
        w.write_all(&[self.epoch.load(Ordering::Relaxed)])?;

        let mut buf = [0u8; BUCKET_WAYS * 4];
        for cell in self.buckets.iter() {
            // Safety: every stripe is held by the dump entry points.
            let bucket = unsafe { &*cell.get() };
            for pos in 0..BUCKET_WAYS {
                buf[pos * 4..pos * 4 + 4].copy_from_slice(&bucket.slot(pos).raw().to_ne_bytes());
            }
            w.write_all(&buf)?;
        }
        // Safety: as above.
        w.write_all(unsafe { self.arena.as_slice() })?;
        Ok(())
    }

    /// Read a table image from `reader`.
    pub fn load<R: Read>(reader: R, options: &LoadOptions) -> Result<Self> {
        Self::load_inner(reader, options, None)
    }

    /// Like [`Self::load`], with a callback that reads back the value
    /// payload a [`Self::dump_with`] dump appended after the arena.
    pub fn load_with<R, F>(reader: R, options: &LoadOptions, value_reader: F) -> Result<Self>
    where
        R: Read,
        F: FnOnce(&mut [u8], &mut dyn Read) -> io::Result<u64>,
    {
        Self::load_inner(reader, options, Some(Box::new(value_reader)))
    }

    /// Read a table image from a file.
    pub fn load_file(path: &Path, options: &LoadOptions) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::load(io::BufReader::new(file), options)?;
        tracing::info!(path = %path.display(), "loaded table image");
        Ok(table)
    }

    /// Read a table image plus value payload from a file.
    pub fn load_file_with<F>(path: &Path, options: &LoadOptions, value_reader: F) -> Result<Self>
    where
        F: FnOnce(&mut [u8], &mut dyn Read) -> io::Result<u64>,
    {
        let file = File::open(path)?;
        let table = Self::load_with(io::BufReader::new(file), options, value_reader)?;
        tracing::info!(path = %path.display(), "loaded table image");
        Ok(table)
    }

    /// Check that this table's stored geometry matches a caller's
    /// requested `capacity`/`value_size` after rounding and padding. Used
    /// when joining a shared table or reloading one with expectations.
    pub fn check_geometry(&self, capacity: u64, value_size: u32) -> Result<()> {
        let want_capacity = round_capacity(capacity);
        let want_cell = pad_cell_size(value_size);
        if want_capacity != self.capacity || want_cell != self.arena.cell_size() {
            return Err(PersistError::ParamMismatch {
                stored_capacity: self.capacity,
                stored_value_size: self.value_size(),
                capacity: want_capacity,
                value_size: want_cell as u32,
            }
            .into());
        }
        Ok(())
    }

    fn load_inner<R: Read>(
        mut reader: R,
        options: &LoadOptions,
        value_reader: Option<ValueReadFn<'_>>,
    ) -> Result<Self> {
        use std::sync::atomic::Ordering;

        let mut magic = [0u8; 12];
        reader.read_exact(&mut magic).map_err(read_err)?;
        if magic == FILTER_MAGIC {
            return Err(PersistError::SiblingMagic.into());
        }
        let legacy = magic != TABLE_MAGIC;
        if legacy && !options.allow_legacy {
            return Err(PersistError::BadMagic.into());
        }
        // A legacy image has no header; the 12 bytes just read are table
        // payload and get replayed in front of the stream.
        let prefix = if legacy {
            tracing::warn!("image carries no recognized magic, reading as legacy");
            magic.to_vec()
        } else {
            Vec::new()
        };
        let mut r = io::Cursor::new(prefix).chain(reader);

        let next_value = read_u64(&mut r)?;
        let cell_size64 = read_u64(&mut r)?;
        let capacity = read_u64(&mut r)?;
        let half_count = read_u32(&mut r)?;
        let seed = read_u32(&mut r)?;
        let mask_index = read_u64(&mut r)?;
        let epoch = read_u8(&mut r)?;

        let cell_size = usize::try_from(cell_size64)
            .ok()
            .filter(|&s| s <= u32::MAX as usize && pad_cell_size(s as u32) == s)
            .ok_or_else(|| corrupt("stored value size is not a padded size"))?;
        if !capacity.is_power_of_two() || capacity < MIN_CAPACITY {
            return Err(corrupt("stored capacity is not a supported power of two"));
        }
        if (half_count as u64) * 2 * BUCKET_WAYS as u64 != capacity {
            return Err(corrupt("stored bucket count disagrees with capacity"));
        }
        if mask_index != half_count as u64 - 1 {
            return Err(corrupt("stored index mask disagrees with bucket count"));
        }

        let table = Self::from_parts(capacity, cell_size, seed)?;
        table.next_value.store(next_value, Ordering::Relaxed);
        table.epoch.store(epoch, Ordering::Relaxed);

        let mut buf = [0u8; BUCKET_WAYS * 4];
        for cell in table.buckets.iter() {
            r.read_exact(&mut buf).map_err(read_err)?;
            // Safety: the table has not been published to any other thread.
            let bucket = unsafe { &mut *cell.get() };
            for pos in 0..BUCKET_WAYS {
                let raw = u32::from_ne_bytes(buf[pos * 4..pos * 4 + 4].try_into().unwrap());
                bucket.set_slot(pos, SlotDesc::from_raw(raw));
            }
        }

        // Safety: as above, the table is still exclusively ours.
        let arena = unsafe { table.arena.as_mut_slice() };
        r.read_exact(arena).map_err(read_err)?;

        if let Some(read_values) = value_reader {
            let bytes = read_values(arena, &mut r).map_err(read_err)?;
            tracing::debug!(bytes, "read value payload after arena");
        }

        Ok(table)
    }
}

fn corrupt(what: &str) -> Error {
    PersistError::Corrupt(what.into()).into()
}

fn read_err(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PersistError::Truncated.into()
    } else {
        Error::Io(e)
    }
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(read_err)?;
    Ok(u64::from_ne_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(read_err)?;
    Ok(u32::from_ne_bytes(b))
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(read_err)?;
    Ok(b[0])
}
