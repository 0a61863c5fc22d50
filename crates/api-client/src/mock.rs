//! Scripted API double
//!
//! Responses are keyed by `"METHOD path"`. Several responses for the same
//! key are served in order and the last one stays in place, so a test can
//! model a collection that changes after a write.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{ApiParams, ProxmoxApi};
use crate::error::ApiError;

/// One request seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub params: ApiParams,
}

#[derive(Debug, Clone)]
enum Scripted {
    Data(Value),
    Failure { status: u16, message: String },
}

/// Mock Proxmox API for module tests
#[derive(Default)]
pub struct MockProxmoxApi {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn make_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

impl MockProxmoxApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response (the `data` member).
    pub fn add_response(&self, method: &str, path: &str, data: Value) {
        lock(&self.responses)
            .entry(make_key(method, path))
            .or_default()
            .push_back(Scripted::Data(data));
    }

    /// Queue an HTTP failure; it is classified like a real response.
    pub fn add_failure(&self, method: &str, path: &str, status: u16, message: &str) {
        lock(&self.responses)
            .entry(make_key(method, path))
            .or_default()
            .push_back(Scripted::Failure {
                status,
                message: message.to_string(),
            });
    }

    pub fn with_response(self, method: &str, path: &str, data: Value) -> Self {
        self.add_response(method, path, data);
        self
    }

    pub fn with_failure(self, method: &str, path: &str, status: u16, message: &str) -> Self {
        self.add_failure(method, path, status, message);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls with the given method, in order.
    pub fn calls_with_method(&self, method: &str) -> Vec<RecordedCall> {
        let method = method.to_uppercase();
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        let method = method.to_uppercase();
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    /// Number of POST, PUT and DELETE calls.
    pub fn write_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method != "GET")
            .count()
    }

    fn respond(&self, method: &str, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        lock(&self.calls).push(RecordedCall {
            method: method.to_string(),
            path: path.to_string(),
            params: params.clone(),
        });

        let key = make_key(method, path);
        let scripted = {
            let mut responses = lock(&self.responses);
            match responses.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Scripted::Data(data)) => Ok(data),
            Some(Scripted::Failure { status, message }) => {
                Err(ApiError::from_status(status, path, message))
            }
            None if method == "GET" => Err(ApiError::NotFound {
                path: path.to_string(),
                message: format!("Mock response not found for: {}", key),
            }),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl ProxmoxApi for MockProxmoxApi {
    async fn get(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.respond("GET", path, params)
    }

    async fn post(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.respond("POST", path, params)
    }

    async fn put(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.respond("PUT", path, params)
    }

    async fn delete(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.respond("DELETE", path, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::get_list;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_sequence() {
        let api = MockProxmoxApi::new()
            .with_response("GET", "/cluster/ha/groups", json!([]))
            .with_response("GET", "/cluster/ha/groups", json!([{"group": "ha0"}]));

        assert!(get_list(&api, "/cluster/ha/groups").await.unwrap().is_empty());
        assert_eq!(get_list(&api, "/cluster/ha/groups").await.unwrap().len(), 1);
        // last response is sticky
        assert_eq!(get_list(&api, "/cluster/ha/groups").await.unwrap().len(), 1);
        assert_eq!(api.count("get", "/cluster/ha/groups"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_calls() {
        let api = MockProxmoxApi::new();

        let err = api.get("/nodes/pve9", &ApiParams::new()).await.unwrap_err();
        assert!(err.is_not_found());

        let data = api.post("/cluster/ha/groups", &ApiParams::new()).await.unwrap();
        assert_eq!(data, Value::Null);
        assert_eq!(api.write_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let api = MockProxmoxApi::new().with_failure("PUT", "/cluster/sdn", 500, "apply failed");

        let err = api.put("/cluster/sdn", &ApiParams::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(api.calls_with_method("PUT").len(), 1);
    }
}
