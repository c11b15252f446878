use crate::error::{LedgerError, Result};
use crate::storage::Storage;

/// Check a stored file before any of it is read. Returns the file size.
pub fn validate_file(storage: &dyn Storage, key: &str, max_size: u64) -> Result<u64> {
    if !storage.exists(key) {
        return Err(LedgerError::FileNotFound(key.to_string()));
    }
    let size = storage.size(key)?;
    if size == 0 {
        return Err(LedgerError::EmptyFile(key.to_string()));
    }
    if size > max_size {
        return Err(LedgerError::FileTooLarge {
            name: key.to_string(),
            size,
            limit: max_size,
        });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_accepts_file_within_limit() {
        let storage = MemoryStorage::default().with_file("a.csv", "date,amount\n");
        assert_eq!(validate_file(&storage, "a.csv", 1024).unwrap(), 12);
    }

    #[test]
    fn test_rejects_missing_file() {
        let storage = MemoryStorage::default();
        assert!(matches!(
            validate_file(&storage, "a.csv", 1024),
            Err(LedgerError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_empty_file() {
        let storage = MemoryStorage::default().with_file("a.csv", "");
        assert!(matches!(validate_file(&storage, "a.csv", 1024), Err(LedgerError::EmptyFile(_))));
    }

    #[test]
    fn test_rejects_oversize_file() {
        let storage = MemoryStorage::default().with_file("a.csv", vec![b'x'; 11]);
        let err = validate_file(&storage, "a.csv", 10).unwrap_err();
        assert!(matches!(err, LedgerError::FileTooLarge { size: 11, limit: 10, .. }));
        assert!(err.is_structural());
    }
}
