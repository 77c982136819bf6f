//! Unit loaders: the host loader and per-compilation isolated loaders.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::stage::UnitHandle;
use crate::classpath::{BINARY_EXTENSION, VirtualClasspath};
use crate::compile::CompilerConfig;
use crate::error::{Error, Result};
use crate::lang::UnitImage;

/// Resolves units by dotted name.
pub trait UnitLoader: Send + Sync {
    /// Find `name`, or `Ok(None)` when no loader in the chain has it.
    fn find_unit(&self, name: &str) -> Result<Option<Arc<UnitImage>>>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// The host runtime's loader, reading units from the configured classpaths.
///
/// Decoded units are cached, including misses.
pub struct HostLoader {
    classpath: VirtualClasspath,
    platform_classpath: VirtualClasspath,
    cache: Mutex<FxHashMap<String, Option<Arc<UnitImage>>>>,
}

impl HostLoader {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            classpath: VirtualClasspath::new(&config.classpath),
            platform_classpath: VirtualClasspath::new(&config.platform_classpath),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// A loader with empty classpaths.
    pub fn empty() -> Self {
        Self::new(&CompilerConfig::default())
    }

    fn load(&self, name: &str) -> Result<Option<Arc<UnitImage>>> {
        let path = format!("{}.{BINARY_EXTENSION}", name.replace('.', "/"));
        for classpath in [&self.platform_classpath, &self.classpath] {
            if let Some(entry) = classpath.find(&path)? {
                let image = UnitImage::decode(name, &entry.read_bytes()?)?;
                if image.name != name {
                    return Err(Error::InvalidUnit {
                        name: name.to_string(),
                        reason: format!("file {} holds unit {}", entry.uri(), image.name),
                    });
                }
                tracing::debug!("Host loader loaded {} from {}", name, entry.uri());
                return Ok(Some(Arc::new(image)));
            }
        }
        Ok(None)
    }
}

impl UnitLoader for HostLoader {
    fn find_unit(&self, name: &str) -> Result<Option<Arc<UnitImage>>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(name) {
            return Ok(cached.clone());
        }
        let found = self.load(name)?;
        cache.insert(name.to_string(), found.clone());
        Ok(found)
    }

    fn describe(&self) -> String {
        "host".to_string()
    }
}

impl fmt::Debug for HostLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLoader")
            .field("classpath", &self.classpath.segments())
            .field("platform_classpath", &self.platform_classpath.segments())
            .finish()
    }
}

/// A loading context owning the units of one compilation.
///
/// Lookup checks the loader's own units before delegating to its parent, so
/// two isolated loaders may each define a unit of the same name.
pub struct IsolatedLoader {
    id: Uuid,
    parent: Arc<dyn UnitLoader>,
    units: Mutex<FxHashMap<String, Arc<UnitImage>>>,
}

impl IsolatedLoader {
    pub fn new(parent: Arc<dyn UnitLoader>) -> Arc<Self> {
        let loader = Arc::new(Self {
            id: Uuid::new_v4(),
            parent,
            units: Mutex::new(FxHashMap::default()),
        });
        tracing::debug!("Created isolated loader {}", loader.id);
        loader
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Define unit `name` from binary unit bytes.
    pub fn define(self: &Arc<Self>, name: &str, bytes: &[u8]) -> Result<UnitHandle> {
        let image = UnitImage::decode(name, bytes)?;
        if image.name != name {
            return Err(Error::InvalidUnit {
                name: name.to_string(),
                reason: format!("bytes hold unit {}", image.name),
            });
        }
        {
            let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
            if units.contains_key(name) {
                return Err(Error::DuplicateUnit(name.to_string()));
            }
            units.insert(name.to_string(), Arc::new(image));
        }
        tracing::debug!("Loader {} defined {}", self.id, name);
        Ok(self.handle(name))
    }

    /// Handle on `name` as seen from this loader, whether or not it exists yet.
    pub fn handle(self: &Arc<Self>, name: &str) -> UnitHandle {
        UnitHandle::new(name, Arc::clone(self) as Arc<dyn UnitLoader>)
    }

    /// Names of the units defined by this loader, sorted.
    pub fn defined_units(&self) -> Vec<String> {
        let units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = units.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl UnitLoader for IsolatedLoader {
    fn find_unit(&self, name: &str) -> Result<Option<Arc<UnitImage>>> {
        let own = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        match own {
            Some(image) => Ok(Some(image)),
            None => self.parent.find_unit(name),
        }
    }

    fn describe(&self) -> String {
        format!("isolated {} (parent: {})", self.id, self.parent.describe())
    }
}

impl fmt::Debug for IsolatedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedLoader")
            .field("id", &self.id)
            .field("units", &self.defined_units())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{Block, FnDef, FnSig, Ty};

    fn unit_bytes(name: &str) -> Vec<u8> {
        UnitImage {
            name: name.to_string(),
            source_name: format!("{}.rs", name.replace('.', "/")),
            functions: vec![FnDef {
                name: "noop".to_string(),
                sig: FnSig {
                    params: Vec::new(),
                    ret: Ty::Unit,
                },
                locals: 0,
                body: Block::default(),
            }],
            factory: None,
            references: Vec::new(),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_define_and_find() {
        let loader = IsolatedLoader::new(Arc::new(HostLoader::empty()));
        loader.define("a.Foo", &unit_bytes("a.Foo")).unwrap();
        assert!(loader.find_unit("a.Foo").unwrap().is_some());
        assert!(loader.find_unit("a.Bar").unwrap().is_none());
        assert_eq!(loader.defined_units(), vec!["a.Foo".to_string()]);
    }

    #[test]
    fn test_duplicate_definition() {
        let loader = IsolatedLoader::new(Arc::new(HostLoader::empty()));
        loader.define("Foo", &unit_bytes("Foo")).unwrap();
        let err = loader.define("Foo", &unit_bytes("Foo")).unwrap_err();
        assert!(matches!(err, Error::DuplicateUnit(name) if name == "Foo"));
    }

    #[test]
    fn test_name_mismatch_and_garbage() {
        let loader = IsolatedLoader::new(Arc::new(HostLoader::empty()));
        assert!(matches!(
            loader.define("Foo", &unit_bytes("Bar")),
            Err(Error::InvalidUnit { .. })
        ));
        assert!(matches!(
            loader.define("Foo", b"not a unit"),
            Err(Error::InvalidUnit { .. })
        ));
        assert!(!loader.is_defined("Foo"));
    }

    #[test]
    fn test_loaders_are_isolated() {
        let host: Arc<dyn UnitLoader> = Arc::new(HostLoader::empty());
        let first = IsolatedLoader::new(Arc::clone(&host));
        let second = IsolatedLoader::new(host);
        first.define("Same", &unit_bytes("Same")).unwrap();
        second.define("Same", &unit_bytes("Same")).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.find_unit("Other").unwrap().is_none());
    }

    #[test]
    fn test_host_loader_reads_classpath() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/Util.unit"), unit_bytes("lib.Util")).unwrap();

        let config = CompilerConfig::default().with_classpath(dir.path());
        let host = HostLoader::new(&config);
        assert!(host.find_unit("lib.Util").unwrap().is_some());
        assert!(host.find_unit("lib.Missing").unwrap().is_none());

        let child = IsolatedLoader::new(Arc::new(host));
        assert!(child.find_unit("lib.Util").unwrap().is_some());
    }
}
