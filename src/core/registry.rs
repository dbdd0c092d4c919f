//! Process-wide named-instance sharing
//!
//! Multiple embedding operators can work against the same underlying table
//! by attaching to it under an agreed name. The first attacher creates (or
//! loads) the table; later attachers get the same instance after a
//! geometry check, each receiving a sharer ordinal. The table is released
//! when the last [`SharedTable`] handle drops.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::structures::expire_table::{EvictHook, ExpireTable, LoadOptions};
use crate::types::error::{Error, Result, ShareError};

static SHARED: Lazy<DashMap<String, ShareEntry>> = Lazy::new(DashMap::new);

struct ShareEntry {
    table: Arc<ExpireTable>,
    sharers: usize,
}

/// Callback applied to every loaded record before a loaded shared table is
/// served, used to re-attach externally owned resources referenced inside
/// value cells.
pub type ScourFn = Box<dyn FnMut(&mut [u8]) + Send>;

/// Callback that rehydrates the value payload appended after the arena in
/// images written with a value serializer.
pub type AttachValueReader = Box<dyn FnOnce(&mut [u8], &mut dyn Read) -> io::Result<u64> + Send>;

/// Options for attaching to (or creating) a named shared table.
///
/// All fields only matter to the attacher that ends up creating the
/// instance, except `readonly` and `eviction`: `readonly` also skips the
/// geometry check when joining, and the first supplied eviction hook wins
/// table-wide.
pub struct ShareOptions {
    /// Skip the geometry check when joining, and fail hard instead of
    /// falling back to an empty table when `load_path` cannot be read.
    pub readonly: bool,
    /// Image to preload when this attach creates the instance.
    pub load_path: Option<PathBuf>,
    /// Accept header-less legacy images when loading.
    pub allow_legacy: bool,
    /// Eviction hook to install. The first attacher to supply one wins.
    pub eviction: Option<EvictHook>,
    /// Invoked on every loaded record before the table is served.
    pub scour_after_load: Option<ScourFn>,
    /// Reads back the value payload behind the arena, when the image was
    /// written with a value serializer.
    pub value_reader: Option<AttachValueReader>,
}

impl Default for ShareOptions {
    fn default() -> Self {
        ShareOptions {
            readonly: false,
            load_path: None,
            allow_legacy: false,
            eviction: None,
            scour_after_load: None,
            value_reader: None,
        }
    }
}

/// A handle onto a shared table. Dereferences to [`ExpireTable`]; dropping
/// it detaches, and the last detacher releases the table.
pub struct SharedTable {
    name: String,
    table: Arc<ExpireTable>,
}

impl SharedTable {
    /// The share name this handle is attached under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detach, and if this handle is the last sharer, visit every live
    /// record first so the embedding can release handles stored in cells.
    pub fn scour_and_detach<F: FnMut(&mut [u8])>(self, visit: F) {
        let last = SHARED
            .get(&self.name)
            .map(|entry| entry.sharers == 1)
            .unwrap_or(true);
        if last {
            self.table.scour(visit);
        }
    }
}

impl std::ops::Deref for SharedTable {
    type Target = ExpireTable;

    fn deref(&self) -> &ExpireTable {
        &self.table
    }
}

impl Drop for SharedTable {
    fn drop(&mut self) {
        use dashmap::mapref::entry::Entry;
        if let Entry::Occupied(mut occupied) = SHARED.entry(self.name.clone()) {
            let entry = occupied.get_mut();
            entry.sharers -= 1;
            if entry.sharers == 0 {
                occupied.remove();
                tracing::info!(name = %self.name, "last sharer detached, releasing shared table");
            }
        }
    }
}

/// Attach to the shared table registered under `name`, creating it (or
/// loading it from `options.load_path`) if this is the first attach.
/// Returns the handle and this attacher's sharer ordinal (0 for the
/// creator).
///
/// Joining with `readonly` false requires `capacity` and `value_size` to
/// round/pad to the registered table's geometry.
pub fn attach(
    name: &str,
    capacity: u64,
    value_size: u32,
    options: ShareOptions,
) -> Result<(SharedTable, usize)> {
    use dashmap::mapref::entry::Entry;

    let ShareOptions {
        readonly,
        load_path,
        allow_legacy,
        eviction,
        scour_after_load,
        value_reader,
    } = options;

    match SHARED.entry(name.to_string()) {
        Entry::Occupied(mut occupied) => {
            if !readonly {
                occupied
                    .get()
                    .table
                    .check_geometry(capacity, value_size)
                    .map_err(|_| Error::Share(ShareError::ParamMismatch(name.to_string())))?;
            }
            let entry = occupied.get_mut();
            entry.sharers += 1;
            let sharer_id = entry.sharers - 1;
            if let Some(hook) = eviction {
                entry.table.install_eviction_hook(hook);
            }
            tracing::info!(name, sharer_id, "joined shared expire table");
            Ok((
                SharedTable {
                    name: name.to_string(),
                    table: entry.table.clone(),
                },
                sharer_id,
            ))
        }
        Entry::Vacant(vacant) => {
            let table = first_attach(
                name,
                capacity,
                value_size,
                readonly,
                load_path,
                allow_legacy,
                scour_after_load,
                value_reader,
            )?;
            let table = Arc::new(table);
            if let Some(hook) = eviction {
                table.install_eviction_hook(hook);
            }
            tracing::info!(name, mem_used = table.mem_used(), "created shared expire table");
            vacant.insert(ShareEntry {
                table: table.clone(),
                sharers: 1,
            });
            Ok((
                SharedTable {
                    name: name.to_string(),
                    table,
                },
                0,
            ))
        }
    }
}

/// Build the instance for the first attacher: load the image if one was
/// named (falling back to an empty table unless readonly), otherwise
/// create fresh.
#[allow(clippy::too_many_arguments)]
fn first_attach(
    name: &str,
    capacity: u64,
    value_size: u32,
    readonly: bool,
    load_path: Option<PathBuf>,
    allow_legacy: bool,
    scour_after_load: Option<ScourFn>,
    value_reader: Option<AttachValueReader>,
) -> Result<ExpireTable> {
    let path = match load_path {
        Some(path) => path,
        None => return ExpireTable::create(capacity, value_size),
    };

    let load_options = LoadOptions { allow_legacy };
    let loaded = match value_reader {
        Some(reader) => ExpireTable::load_file_with(&path, &load_options, reader),
        None => ExpireTable::load_file(&path, &load_options),
    };

    match loaded {
        Ok(table) => {
            if !readonly {
                table.check_geometry(capacity, value_size)?;
            }
            if let Some(mut scour) = scour_after_load {
                table.scour(&mut *scour);
            }
            Ok(table)
        }
        Err(error) => {
            if readonly {
                tracing::error!(name, %error, "readonly attach could not load its image");
                return Err(ShareError::LoadFailed(name.to_string()).into());
            }
            tracing::warn!(name, %error, "ignoring load failure, starting empty table");
            ExpireTable::create(capacity, value_size)
        }
    }
}
