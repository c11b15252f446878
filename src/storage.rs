use std::path::{Path, PathBuf};

use crate::error::{LedgerError, Result};

/// Where statement files live. Keys are opaque to the import pipeline.
pub trait Storage {
    fn exists(&self, key: &str) -> bool;
    fn size(&self, key: &str) -> Result<u64>;
    fn read(&self, key: &str) -> Result<Vec<u8>>;
}

/// Files on local disk. Relative keys resolve against `root`.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let path = Path::new(key);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Storage for LocalStorage {
    fn exists(&self, key: &str) -> bool {
        self.resolve(key).is_file()
    }

    fn size(&self, key: &str) -> Result<u64> {
        let meta = std::fs::metadata(self.resolve(key))
            .map_err(|_| LedgerError::FileNotFound(key.to_string()))?;
        Ok(meta.len())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.resolve(key))?)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;

    use super::Storage;
    use crate::error::{LedgerError, Result};

    #[derive(Default)]
    pub struct MemoryStorage {
        files: HashMap<String, Vec<u8>>,
    }

    impl MemoryStorage {
        pub fn with_file(mut self, key: &str, data: impl Into<Vec<u8>>) -> Self {
            self.files.insert(key.to_string(), data.into());
            self
        }
    }

    impl Storage for MemoryStorage {
        fn exists(&self, key: &str) -> bool {
            self.files.contains_key(key)
        }

        fn size(&self, key: &str) -> Result<u64> {
            self.files
                .get(key)
                .map(|d| d.len() as u64)
                .ok_or_else(|| LedgerError::FileNotFound(key.to_string()))
        }

        fn read(&self, key: &str) -> Result<Vec<u8>> {
            self.files
                .get(key)
                .cloned()
                .ok_or_else(|| LedgerError::FileNotFound(key.to_string()))
        }
    }
}
