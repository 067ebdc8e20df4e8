//! End-to-end wiring of one `loomsync-server` instance with two independent
//! `loomsync-client` collections talking to it over real HTTP, showing the
//! round trip spec.md §8 describes: a mutation made by one client becomes
//! visible in a second client's materialized view after a stream catch-up.

mod http_transport;

use http_transport::HttpTransport;
use loomsync_client::{Collection, CollectionClientConfig, SingleProcessElector, ViewDecoder};
use loomsync_kv_adapter_redb::ClientStoreRedb;
use loomsync_server::{AppBuilder, CollectionConfig};
use loomsync_storage_adapter_redb::ServerStoreRedb;
use loomsync_types::prelude::*;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct Note {
	title: String,
}

fn decode() -> ViewDecoder<Note> {
	Arc::new(|value: &serde_json::Value| serde_json::from_value(value.clone()).ok())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt::init();

	let data_dir = tempfile::tempdir()?;

	let server_store = ServerStoreRedb::open(data_dir.path().join("server.redb"))?;
	let app = AppBuilder::new(Arc::new(server_store))
		.protocol_version(1)
		.collection(CollectionConfig::builder("notes").build())
		.build();

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	let server_app = app.clone();
	let server_handle = tokio::spawn(async move {
		let router = loomsync_server::router(server_app);
		axum::serve(listener, router).await
	});

	let base_url = format!("http://{addr}");
	let client_a = build_collection(&base_url, "client-a", data_dir.path().join("a.redb")).await?;
	let client_b = build_collection(&base_url, "client-b", data_dir.path().join("b.redb")).await?;

	client_a.start().await?;
	client_a.insert("doc-1", serde_json::json!({"title": "hello from a"})).await?;
	let outcomes = client_a.sync_outbox().await?;
	tracing::info!(?outcomes, "client-a drained its outbox");

	client_b.start().await?;
	tracing::info!(notes = ?client_b.view().values(), "client-b's view after bootstrapping from the server");

	client_a.stop().await;
	client_b.stop().await;
	app.shutdown().await;
	server_handle.abort();

	Ok(())
}

async fn build_collection(
	base_url: &str,
	holder_id: &str,
	store_path: std::path::PathBuf,
) -> Result<Collection<Note>, Box<dyn std::error::Error>> {
	let store = Arc::new(ClientStoreRedb::open(store_path)?);
	let client_id = store.client_id("notes").await?;
	let transport = Arc::new(HttpTransport::new(base_url));

	Ok(Collection::new(
		"notes",
		holder_id,
		client_id,
		transport,
		store.clone(),
		store.clone(),
		store,
		Arc::new(SingleProcessElector::default()),
		decode(),
		CollectionClientConfig::builder("notes").build(),
	))
}

// vim: ts=4
