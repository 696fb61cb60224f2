use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use crate::params::Parameters;
use crate::stroke::{BehaviorLibrary, StoredBehavior};

const BEHAVIORS_KEY: &str = "behaviors";
const PARAMETERS_KEY: &str = "parameters";

/// Where named strokes and scripts come from.
pub trait BehaviorStorage {
    /// Built-in strokes with the stored custom entries merged over them.
    fn load(&self) -> Result<BehaviorLibrary>;
}

/// Load the library, falling back to the built-ins when storage fails.
pub fn load_or_builtin(storage: &dyn BehaviorStorage) -> BehaviorLibrary {
    match storage.load() {
        Ok(library) => {
            log::info!("Loaded {} behaviors", library.len());
            library
        }
        Err(e) => {
            log::error!("Failed to load behaviors, using built-ins: {:#}", e);
            BehaviorLibrary::builtin()
        }
    }
}

/// Custom entries kept in memory only.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    custom: BehaviorLibrary,
}

impl MemoryStorage {
    pub fn new(custom: BehaviorLibrary) -> Self {
        Self { custom }
    }
}

impl BehaviorStorage for MemoryStorage {
    fn load(&self) -> Result<BehaviorLibrary> {
        let mut library = BehaviorLibrary::builtin();
        library.merge(self.custom.clone());
        Ok(library)
    }
}

/// One JSON file per key inside a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn has(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", self.dir.display(), e))?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.path(key), json).map_err(|e| anyhow::anyhow!("Failed to write {}: {}", key, e))?;
        Ok(())
    }

    fn get_string(&self, key: &str) -> Result<String> {
        fs::read_to_string(self.path(key)).map_err(|e| anyhow::anyhow!("Value not found by key {}: {}", key, e))
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let string = self.get_string(key)?;
        serde_json::from_str(&string).map_err(|e| anyhow::anyhow!("Failed to get JSON by key {}: {}", key, e))
    }

    /// Stored custom entries, without the built-ins.
    pub fn custom_behaviors(&self) -> Result<BehaviorLibrary> {
        if !self.has(BEHAVIORS_KEY) {
            return Ok(BehaviorLibrary::new());
        }
        let string = self.get_string(BEHAVIORS_KEY)?;
        BehaviorLibrary::from_json(&string)
            .map_err(|e| anyhow::anyhow!("Stored behaviors are invalid: {:#}", e))
    }

    pub fn save_behavior(&self, name: &str, behavior: StoredBehavior) -> Result<()> {
        let mut custom = self.custom_behaviors()?;
        custom.insert(name, behavior)?;
        self.set_json(BEHAVIORS_KEY, &custom)
    }

    pub fn remove_behavior(&self, name: &str) -> Result<()> {
        let mut custom = self.custom_behaviors()?;
        if custom.remove(name).is_none() {
            anyhow::bail!("No custom behavior named {}", name);
        }
        self.set_json(BEHAVIORS_KEY, &custom)
    }

    pub fn set_parameters(&self, params: &Parameters) -> Result<()> {
        self.set_json(PARAMETERS_KEY, &params.sanitized())
    }

    pub fn get_parameters(&self) -> Result<Parameters> {
        self.get_json(PARAMETERS_KEY)
    }
}

impl BehaviorStorage for FileStorage {
    fn load(&self) -> Result<BehaviorLibrary> {
        let mut library = BehaviorLibrary::builtin();
        library.merge(self.custom_behaviors()?);
        Ok(library)
    }
}
