//! Scripted in-memory transport for adapter tests

use super::client::{RestResponse, RestTransport};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub payload: Option<Value>,
    pub is_async: bool,
}

/// Responses are queued per (method, url); the last queued response keeps
/// answering once the queue drains. Unscripted calls answer 400.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<RestResponse>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: &'static str, url: &str, resp: RestResponse) -> &Self {
        self.routes
            .lock()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(resp);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: &str, url: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .count()
    }

    /// Payload of the most recent call to (method, url)
    pub fn last_payload(&self, method: &str, url: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.method == method && c.url == url)
            .and_then(|c| c.payload.clone())
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        payload: Option<Value>,
        is_async: bool,
    ) -> RestResponse {
        self.calls.lock().push(Call {
            method,
            url: url.to_string(),
            payload,
            is_async,
        });
        let mut routes = self.routes.lock();
        match routes.get_mut(&(method, url.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(unscripted),
            Some(queue) => queue.front().cloned().unwrap_or_else(unscripted),
            None => unscripted(),
        }
    }
}

fn unscripted() -> RestResponse {
    RestResponse::new(400, json!("unscripted call"))
}

#[async_trait]
impl RestTransport for FakeTransport {
    async fn get(&self, url: &str) -> Result<RestResponse> {
        Ok(self.respond("GET", url, None, false))
    }

    async fn post(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse> {
        Ok(self.respond("POST", url, Some(payload), is_async))
    }

    async fn put(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse> {
        Ok(self.respond("PUT", url, Some(payload), is_async))
    }

    async fn delete(
        &self,
        url: &str,
        payload: Option<Value>,
        is_async: bool,
    ) -> Result<RestResponse> {
        Ok(self.respond("DELETE", url, payload, is_async))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub const SSN: u64 = 64702;
pub const REMOTE_SSN: u64 = 12345;

pub fn volume(id: &str, name: &str) -> Value {
    volume_on(id, name, SSN)
}

pub fn volume_on(id: &str, name: &str, ssn: u64) -> Value {
    json!({
        "instanceId": id,
        "name": name,
        "scSerialNumber": ssn,
        "active": true,
        "configuredSize": "1.073741824E9 Bytes"
    })
}

pub fn server(id: &str, name: &str, server_type: &str) -> Value {
    json!({"instanceId": id, "name": name, "type": server_type, "status": "Up"})
}

pub fn mapping(id: &str, server_id: &str, volume_id: &str, lun: u32) -> Value {
    json!({
        "instanceId": id,
        "server": {"instanceId": server_id},
        "volume": {"instanceId": volume_id},
        "lunUsed": [lun]
    })
}

pub fn replay(id: &str, description: &str, active: bool) -> Value {
    json!({"instanceId": id, "description": description, "active": active})
}

pub fn cmm(id: &str, state: &str) -> Value {
    json!({"instanceId": id, "state": state})
}

pub fn replication(id: &str, src: &str, dst: &str, dest_ssn: u64, active: bool) -> Value {
    json!({
        "instanceId": id,
        "sourceVolume": {"instanceId": src},
        "destinationVolume": {"instanceId": dst},
        "destinationScSerialNumber": dest_ssn,
        "replicateActiveReplay": active,
        "type": "Asynchronous"
    })
}
