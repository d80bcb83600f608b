//! An in-memory [`StoreBackend`] double for tests that don't need sqlite.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Error;
use async_trait::async_trait;

use super::StoreBackend;

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<HashMap<String, String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for FakeStore {
    async fn stored_hash(&self, bare_jid: &str) -> Result<Option<String>, Error> {
        Ok(self.rows.lock().unwrap().get(bare_jid).cloned())
    }

    async fn upsert(&self, bare_jid: &str, password_hash: &str) -> Result<(), Error> {
        self.rows.lock().unwrap().insert(bare_jid.to_string(), password_hash.to_string());
        Ok(())
    }

    async fn remove(&self, bare_jid: &str) -> Result<bool, Error> {
        Ok(self.rows.lock().unwrap().remove(bare_jid).is_some())
    }
}
