use crate::custody::CustodyState;
use crate::error::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const STATE_KEY: &str = "custody:state";

/// sled-backed snapshot store
pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> CustodyResult<Self> {
        let db = sled::open(path).map_err(|e| CustodyError::Storage(e.to_string()))?;
        Ok(Storage { db })
    }

    // Generic Helper: Put
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> CustodyResult<()> {
        let serialized = bincode::serialize(value).map_err(|e| CustodyError::Serialization(e.to_string()))?;
        self.db
            .insert(key.as_bytes(), serialized)
            .map_err(|e| CustodyError::Storage(e.to_string()))?;
        Ok(())
    }

    // Generic Helper: Get
    pub fn get<T: for<'a> Deserialize<'a>>(&self, key: &str) -> CustodyResult<Option<T>> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(data)) => {
                let deserialized =
                    bincode::deserialize(&data).map_err(|e| CustodyError::Serialization(e.to_string()))?;
                Ok(Some(deserialized))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CustodyError::Storage(e.to_string())),
        }
    }

    pub fn save_state(&self, state: &CustodyState) -> CustodyResult<()> {
        self.put(STATE_KEY, state)?;
        self.flush()
    }

    pub fn load_state(&self) -> CustodyResult<Option<CustodyState>> {
        self.get(STATE_KEY)
    }

    pub fn flush(&self) -> CustodyResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| CustodyError::Storage(e.to_string()))
    }
}
