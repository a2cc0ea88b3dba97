//! Filesystem Module Registry
//!
//! Maps filesystem type names to modules and counts the mounts using each
//! one. Modules missing from the table are requested from an optional loader.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, RwLock};

use super::error::{FsError, FsResult};
use super::module::FilesystemModule;

/// Supplies modules on demand by name
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> Option<Arc<dyn FilesystemModule>>;
}

struct Registered {
    module: Arc<dyn FilesystemModule>,
    users: usize,
}

/// Filesystem type registry
pub struct ModuleRegistry {
    modules: Mutex<BTreeMap<String, Registered>>,
    loader: RwLock<Option<Arc<dyn ModuleLoader>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(BTreeMap::new()),
            loader: RwLock::new(None),
        }
    }

    pub fn set_loader(&self, loader: Arc<dyn ModuleLoader>) {
        *self.loader.write() = Some(loader);
    }

    /// Register a filesystem module
    pub fn register(&self, module: Arc<dyn FilesystemModule>) -> FsResult<()> {
        let name = module.name().to_string();
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }

        let mut modules = self.modules.lock();
        if modules.contains_key(&name) {
            crate::log_warn!("vfs", "filesystem type '{}' already registered", name);
            return Err(FsError::AlreadyExists);
        }

        crate::log_info!(
            "vfs",
            "registered filesystem type '{}' v{}",
            name,
            module.version()
        );
        modules.insert(name, Registered { module, users: 0 });
        Ok(())
    }

    /// Remove a module that no mount uses
    pub fn unregister(&self, name: &str) -> FsResult<()> {
        let mut modules = self.modules.lock();
        match modules.get(name) {
            None => Err(FsError::NotFound),
            Some(entry) if entry.users > 0 => Err(FsError::Busy),
            Some(_) => {
                modules.remove(name);
                crate::log_info!("vfs", "unregistered filesystem type '{}'", name);
                Ok(())
            }
        }
    }

    /// Get a module and count one more user, loading it if necessary
    pub fn get(&self, name: &str) -> FsResult<Arc<dyn FilesystemModule>> {
        if let Some(module) = self.get_resident(name) {
            return Ok(module);
        }

        // The loader runs without the table lock held
        let loader = self.loader.read().clone();
        let loaded = loader.and_then(|l| l.load(name)).ok_or(FsError::NotFound)?;
        if loaded.name() != name {
            crate::log_warn!(
                "vfs",
                "loader returned module '{}' for '{}'",
                loaded.name(),
                name
            );
            return Err(FsError::NotFound);
        }

        let mut modules = self.modules.lock();
        let entry = modules
            .entry(name.to_string())
            .or_insert_with(|| Registered {
                module: loaded,
                users: 0,
            });
        entry.users += 1;
        crate::log_info!("vfs", "loaded filesystem type '{}'", name);
        Ok(entry.module.clone())
    }

    fn get_resident(&self, name: &str) -> Option<Arc<dyn FilesystemModule>> {
        let mut modules = self.modules.lock();
        let entry = modules.get_mut(name)?;
        entry.users += 1;
        Some(entry.module.clone())
    }

    /// Drop one user of a module
    pub fn put(&self, name: &str) {
        let mut modules = self.modules.lock();
        match modules.get_mut(name) {
            Some(entry) if entry.users > 0 => entry.users -= 1,
            _ => crate::log_warn!("vfs", "unbalanced put of filesystem type '{}'", name),
        }
    }

    pub fn users(&self, name: &str) -> Option<usize> {
        self.modules.lock().get(name).map(|entry| entry.users)
    }

    /// List all registered filesystem type names
    pub fn names(&self) -> Vec<String> {
        self.modules.lock().keys().cloned().collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::vfs::module::{Mounted, VolumeContext};

    struct NullFs(&'static str);

    impl FilesystemModule for NullFs {
        fn name(&self) -> &str {
            self.0
        }

        fn mount(&self, _: VolumeContext, _: Option<&str>, _: Option<&str>) -> FsResult<Mounted> {
            Err(FsError::Unsupported)
        }
    }

    struct OnDemand;

    impl ModuleLoader for OnDemand {
        fn load(&self, name: &str) -> Option<Arc<dyn FilesystemModule>> {
            match name {
                "bootfs" => Some(Arc::new(NullFs("bootfs"))),
                "liar" => Some(Arc::new(NullFs("other"))),
                _ => None,
            }
        }
    }

    #[test]
    fn test_register_duplicate() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(NullFs("devfs"))).unwrap();
        assert_eq!(
            registry.register(Arc::new(NullFs("devfs"))),
            Err(FsError::AlreadyExists)
        );
        assert_eq!(registry.names(), vec![String::from("devfs")]);
    }

    #[test]
    fn test_users_block_unregister() {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(NullFs("devfs"))).unwrap();

        let module = registry.get("devfs").unwrap();
        assert_eq!(module.name(), "devfs");
        assert_eq!(registry.users("devfs"), Some(1));
        assert_eq!(registry.unregister("devfs"), Err(FsError::Busy));

        registry.put("devfs");
        assert_eq!(registry.users("devfs"), Some(0));
        assert_eq!(registry.unregister("devfs"), Ok(()));
        assert_eq!(registry.unregister("devfs"), Err(FsError::NotFound));
    }

    #[test]
    fn test_loader_fallback() {
        let registry = ModuleRegistry::new();
        assert!(matches!(registry.get("bootfs"), Err(FsError::NotFound)));

        registry.set_loader(Arc::new(OnDemand));
        assert_eq!(registry.get("bootfs").unwrap().name(), "bootfs");
        assert_eq!(registry.users("bootfs"), Some(1));
        assert!(matches!(registry.get("pipefs"), Err(FsError::NotFound)));
        assert!(matches!(registry.get("liar"), Err(FsError::NotFound)));
    }
}
