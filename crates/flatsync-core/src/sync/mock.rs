//! Scripted transport for engine and scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::protocol::{SyncRequest, SyncResponse};
use super::transport::{SyncTransport, TransportError};
use crate::models::{EntityType, OutboxEntry};

type Scripted<T> = Mutex<VecDeque<Result<T, TransportError>>>;

#[derive(Default)]
pub(crate) struct MockTransport {
    sync_script: Scripted<SyncResponse>,
    /// Answer once the script runs dry; offline when unset
    sync_default: Mutex<Option<Result<SyncResponse, TransportError>>>,
    push_script: Scripted<Option<Value>>,
    collections: Mutex<HashMap<(EntityType, Option<String>), Vec<Value>>>,
    entities: Mutex<HashMap<(EntityType, String), Value>>,
    delay: Mutex<Option<Duration>>,
    pub requests: Mutex<Vec<SyncRequest>>,
    pub pushes: Mutex<Vec<OutboxEntry>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: Result<SyncResponse, TransportError>) -> &Self {
        self.sync_script.lock().unwrap().push_back(response);
        self
    }

    pub fn respond_always(&self, response: Result<SyncResponse, TransportError>) -> &Self {
        *self.sync_default.lock().unwrap() = Some(response);
        self
    }

    pub fn respond_push(&self, response: Result<Option<Value>, TransportError>) -> &Self {
        self.push_script.lock().unwrap().push_back(response);
        self
    }

    pub fn set_collection(&self, entity_type: EntityType, parent_id: Option<&str>, values: Vec<Value>) {
        self.collections
            .lock()
            .unwrap()
            .insert((entity_type, parent_id.map(str::to_string)), values);
    }

    pub fn set_entity(&self, entity_type: EntityType, id: &str, value: Value) {
        self.entities
            .lock()
            .unwrap()
            .insert((entity_type, id.to_string()), value);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sync_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SyncRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl SyncTransport for MockTransport {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.pause().await;
        let scripted = self.sync_script.lock().unwrap().pop_front();
        scripted
            .or_else(|| self.sync_default.lock().unwrap().clone())
            .unwrap_or_else(|| Err(TransportError::Connection("offline".to_string())))
    }

    async fn push_entity(&self, entry: &OutboxEntry) -> Result<Option<Value>, TransportError> {
        self.pushes.lock().unwrap().push(entry.clone());
        self.pause().await;
        let scripted = self.push_script.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(None))
    }

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        _household_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<Value>, TransportError> {
        let key = (entity_type, parent_id.map(str::to_string));
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Value>, TransportError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&(entity_type, id.to_string()))
            .cloned())
    }
}
