//! In-memory backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;

/// An in-memory log backend.
///
/// The buffer is shared, so an in-memory [`crate::Environment`] can keep a
/// closed dictionary's bytes around and replay them on the next open, the
/// way a file would persist on disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over an existing shared buffer.
    #[must_use]
    pub fn shared(data: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { data }
    }

    /// Returns the shared buffer.
    #[must_use]
    pub fn buffer(&self) -> Arc<RwLock<Vec<u8>>> {
        Arc::clone(&self.data)
    }
}

impl StorageBackend for MemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to {} bytes, log holds {}",
                    new_size,
                    data.len()
                ),
            )
            .into());
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
