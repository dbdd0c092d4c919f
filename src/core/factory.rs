//! Table factory
//!
//! This module provides factory functions for opening a table from a
//! [`CacheConfig`]: private or shared, fresh or preloaded, with the
//! eviction hook wired in.

use crate::core::config::CacheConfig;
use crate::core::registry::{self, ShareOptions, SharedTable};
use crate::structures::expire_table::{EvictHook, ExpireTable, LoadOptions};
use crate::types::error::Result;

/// A table opened from configuration, private or shared.
pub enum CacheHandle {
    /// A table owned exclusively by this handle.
    Private(ExpireTable),
    /// A handle onto a named shared instance.
    Shared {
        /// The shared handle; derefs to the table.
        table: SharedTable,
        /// This attacher's ordinal (0 for the creator).
        sharer_id: usize,
    },
}

impl CacheHandle {
    /// The underlying table, whichever way it is owned.
    pub fn table(&self) -> &ExpireTable {
        match self {
            CacheHandle::Private(table) => table,
            CacheHandle::Shared { table, .. } => table,
        }
    }

    /// The sharer ordinal, when this handle joined a shared instance.
    pub fn sharer_id(&self) -> Option<usize> {
        match self {
            CacheHandle::Private(_) => None,
            CacheHandle::Shared { sharer_id, .. } => Some(*sharer_id),
        }
    }
}

/// Open a table as described by `config`, installing `eviction` as the
/// eviction hook if supplied. When `config.scour_after_load` is set and an
/// image is loaded, the hook is also run over every loaded record before
/// the table is returned.
pub fn open_table(config: &CacheConfig, eviction: Option<EvictHook>) -> Result<CacheHandle> {
    match &config.share_name {
        Some(name) => {
            let scour_after_load = if config.scour_after_load {
                eviction.clone().map(|hook| {
                    Box::new(move |cell: &mut [u8]| hook.as_ref()(cell)) as registry::ScourFn
                })
            } else {
                None
            };
            let options = ShareOptions {
                readonly: config.readonly,
                load_path: config.load_path.clone(),
                allow_legacy: config.allow_legacy_images,
                eviction,
                scour_after_load,
                value_reader: None,
            };
            let (table, sharer_id) =
                registry::attach(name, config.capacity, config.value_size, options)?;
            Ok(CacheHandle::Shared { table, sharer_id })
        }
        None => {
            let table = open_private(config, eviction.as_ref())?;
            if let Some(hook) = eviction {
                table.set_eviction_hook(hook);
            }
            Ok(CacheHandle::Private(table))
        }
    }
}

fn open_private(config: &CacheConfig, eviction: Option<&EvictHook>) -> Result<ExpireTable> {
    let path = match &config.load_path {
        Some(path) => path,
        None => return ExpireTable::create(config.capacity, config.value_size),
    };
    let load_options = LoadOptions {
        allow_legacy: config.allow_legacy_images,
    };
    match ExpireTable::load_file(path, &load_options) {
        Ok(table) => {
            table.check_geometry(config.capacity, config.value_size)?;
            if config.scour_after_load {
                if let Some(hook) = eviction {
                    table.scour(|cell| hook.as_ref()(cell));
                }
            }
            Ok(table)
        }
        Err(error) if config.readonly => Err(error),
        Err(error) => {
            tracing::warn!(%error, "ignoring load failure, starting empty table");
            ExpireTable::create(config.capacity, config.value_size)
        }
    }
}
