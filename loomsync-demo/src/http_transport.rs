//! A [`SyncTransport`] that speaks the §6 wire contract over real HTTP
//! against a running `loomsync-server` instance.

use async_trait::async_trait;
use loomsync_client::SyncTransport;
use loomsync_types::error::Error;
use loomsync_types::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct HttpTransport {
	base_url: String,
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self { base_url: base_url.into(), client: reqwest::Client::new() }
	}

	fn network_err(err: reqwest::Error) -> Error {
		Error::Network(err.to_string())
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequestBody {
	checkpoint: Checkpoint,
	limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationRequestBody {
	document_id: String,
	crdt_bytes: Vec<u8>,
	materialized_doc: serde_json::Value,
	version: u64,
	schema_version: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
	#[allow(dead_code)]
	success: bool,
	metadata: MutationMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolVersionResponse {
	protocol_version: u32,
}

#[async_trait]
impl SyncTransport for HttpTransport {
	async fn stream(&self, collection: &str, checkpoint: Checkpoint, limit: usize) -> LsResult<StreamResponse> {
		self.client
			.post(format!("{}/collections/{collection}/stream", self.base_url))
			.json(&StreamRequestBody { checkpoint, limit })
			.send()
			.await
			.map_err(Self::network_err)?
			.json::<StreamResponse>()
			.await
			.map_err(Self::network_err)
	}

	async fn get_initial_state(&self, collection: &str) -> LsResult<Option<InitialState>> {
		self.client
			.get(format!("{}/collections/{collection}/initial-state", self.base_url))
			.send()
			.await
			.map_err(Self::network_err)?
			.json::<Option<InitialState>>()
			.await
			.map_err(Self::network_err)
	}

	async fn mutate(
		&self,
		collection: &str,
		kind: MutationKind,
		document_id: &str,
		crdt_bytes: Vec<u8>,
		materialized_doc: serde_json::Value,
		version: u64,
		schema_version: Option<u32>,
	) -> LsResult<MutationMetadata> {
		let verb = match kind {
			MutationKind::Insert => "insert",
			MutationKind::Update => "update",
			MutationKind::Delete => "remove",
		};
		let response = self
			.client
			.post(format!("{}/collections/{collection}/{verb}", self.base_url))
			.json(&MutationRequestBody {
				document_id: document_id.to_string(),
				crdt_bytes,
				materialized_doc,
				version,
				schema_version,
			})
			.send()
			.await
			.map_err(Self::network_err)?
			.json::<MutationResponse>()
			.await
			.map_err(Self::network_err)?;
		Ok(response.metadata)
	}

	async fn protocol_version(&self) -> LsResult<u32> {
		let response = self
			.client
			.get(format!("{}/protocol-version", self.base_url))
			.send()
			.await
			.map_err(Self::network_err)?
			.json::<ProtocolVersionResponse>()
			.await
			.map_err(Self::network_err)?;
		Ok(response.protocol_version)
	}
}

// vim: ts=4
