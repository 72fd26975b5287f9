//! Key-exchange protocol
//!
//! Wire model and client for the U2 key-issuing endpoint. The wire shape
//! is a contract with the remote service: a JSON array of JSON-RPC 2.0
//! `query` calls, one per torrent hash, answered by an array of
//! `{id, result, error}` objects.

pub mod client;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::Torrent;
use crate::error::KeyResetError;

pub use client::{KeyExchangeClient, KeySource};

/// Default key-service endpoint
pub const DEFAULT_ENDPOINT: &str = "https://u2.dmhy.org/jsonrpc_torrentkey.php";

/// Announce URL prefix the new secret key is appended to
pub const NEW_TRACKER_PREFIX: &str = "https://daydream.dmhy.best/announce?secure=";

/// One key query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<String>,
    pub id: i64,
}

impl KeyRequest {
    /// Build the query for one torrent hash under the given correlation id
    pub fn query(hash: &str, id: i64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: "query".to_string(),
            params: vec![hash.to_string()],
            id,
        }
    }
}

/// Error object inside a key response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyError {
    pub code: i64,
    pub message: String,
}

/// One key response
///
/// All fields are defaulted; the service omits keys it has nothing to say
/// about. A response with `id <= 0` or an empty `result` is an error
/// regardless of the `error` field's contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyResponse {
    pub id: i64,
    pub result: String,
    pub error: KeyError,
}

impl KeyResponse {
    /// Whether this response carries a usable secret key
    pub fn is_success(&self) -> bool {
        self.id > 0 && !self.result.is_empty()
    }
}

/// An ordered group of torrents exchanged in one network call
///
/// Correlation ids are dense, starting at 1, and the request body is
/// serialized once at construction so retries resend identical bytes.
#[derive(Debug)]
pub struct Batch {
    torrents: Vec<Torrent>,
    by_id: HashMap<i64, usize>,
    body: Vec<u8>,
}

impl Batch {
    /// Build a batch over the given torrents, assigning ids `1..=len`
    pub fn build(torrents: Vec<Torrent>) -> Result<Self, KeyResetError> {
        let requests: Vec<KeyRequest> = torrents
            .iter()
            .enumerate()
            .map(|(i, t)| KeyRequest::query(&t.hash, i as i64 + 1))
            .collect();
        let by_id = (0..torrents.len()).map(|i| (i as i64 + 1, i)).collect();
        let body = serde_json::to_vec(&requests)?;

        Ok(Self {
            torrents,
            by_id,
            body,
        })
    }

    /// Number of torrents in the batch
    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    /// The serialized request body sent (and resent) on the wire
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Map a response correlation id back to its torrent
    pub fn torrent_for(&self, id: i64) -> Option<&Torrent> {
        self.by_id.get(&id).map(|&i| &self.torrents[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendHandle;
    use serde_json::json;

    fn torrent(hash: &str) -> Torrent {
        Torrent {
            hash: hash.to_string(),
            handle: BackendHandle::Transmission {
                id: 1,
                tracker_id: 0,
                name: hash.to_string(),
            },
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let request = KeyRequest::query("abc123", 1);
        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value,
            json!({ "jsonrpc": "2.0", "method": "query", "params": ["abc123"], "id": 1 })
        );
    }

    #[test]
    fn test_response_parsing_with_omitted_fields() {
        let data = r#"[{"id":1,"result":"SECRETKEY"},{"error":{"code":-1,"message":"no such torrent"}}]"#;
        let responses: Vec<KeyResponse> = serde_json::from_str(data).expect("parse responses");
        assert_eq!(responses.len(), 2);
        assert!(responses[0].is_success());
        assert_eq!(responses[0].result, "SECRETKEY");
        assert!(!responses[1].is_success());
        assert_eq!(responses[1].error.code, -1);
    }

    #[test]
    fn test_response_success_requires_positive_id_and_result() {
        let response = KeyResponse {
            id: 0,
            result: "SECRETKEY".to_string(),
            error: KeyError::default(),
        };
        assert!(!response.is_success());

        let response = KeyResponse {
            id: 1,
            result: String::new(),
            error: KeyError::default(),
        };
        assert!(!response.is_success());
    }

    #[test]
    fn test_batch_ids_dense_and_map_back() {
        let batch = Batch::build(vec![torrent("aaa"), torrent("bbb"), torrent("ccc")])
            .expect("build batch");
        assert_eq!(batch.len(), 3);

        let requests: Vec<KeyRequest> =
            serde_json::from_slice(batch.body()).expect("parse batch body");
        let ids: Vec<i64> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        for request in &requests {
            let torrent = batch.torrent_for(request.id).expect("id maps to torrent");
            assert_eq!(torrent.hash, request.params[0]);
        }
        assert!(batch.torrent_for(4).is_none());
        assert!(batch.torrent_for(0).is_none());
    }

    #[test]
    fn test_batch_body_is_stable() {
        let batch = Batch::build(vec![torrent("aaa")]).expect("build batch");
        let first = batch.body().to_vec();
        assert_eq!(batch.body(), first.as_slice());
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&first).expect("valid json"),
            json!([{ "jsonrpc": "2.0", "method": "query", "params": ["aaa"], "id": 1 }])
        );
    }
}
