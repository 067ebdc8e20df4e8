//! The per-collection Yjs-V2 document handle (C1).
//!
//! Every document in a collection lives as one entry of a root `documents`
//! map inside a single shared [`yrs::Doc`], and each entry is itself a
//! nested Yjs map keyed by field name rather than one opaque blob. That
//! way a concurrent edit to two different fields of the same document
//! merges field-by-field instead of one edit clobbering the other.
//! Mutations are bracketed by a state-vector capture before and an
//! `encode_state_as_update_v2` diff after, so the bytes handed back to the
//! caller are exactly the Yjs update produced by that one mutation — the
//! same shape the compactor later merges and the client applies.

use loomsync_types::prelude::*;
use std::time::Duration;
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, Transact, Update};

/// Hard cap on a single encoded update, matching the gap-recovery snapshot
/// cap in the concurrency model.
pub const MAX_ENCODED_BYTES: usize = 10 * 1024 * 1024;

const APPLY_TIMEOUT: Duration = Duration::from_secs(2);
const APPLY_ATTEMPTS: u32 = 3;

/// Why an update is being applied. Used for logging and for the caller's
/// own bookkeeping; loomsync doesn't rely on Yjs transaction origins for
/// echo suppression, since the ingestor and writer already track which
/// updates are locally authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrigin {
	/// Applied while replaying a compactor snapshot.
	Snapshot,
	/// Applied while draining the subscription/stream ingestor.
	Subscription,
	/// Applied as a direct local user mutation.
	User,
}

impl ApplyOrigin {
	fn as_str(self) -> &'static str {
		match self {
			ApplyOrigin::Snapshot => "snapshot",
			ApplyOrigin::Subscription => "subscription",
			ApplyOrigin::User => "user",
		}
	}
}

/// A handle owning one collection's Yjs document.
#[derive(Debug)]
pub struct CrdtDocument {
	doc: Doc,
	documents: MapRef,
	client_id: u32,
}

impl CrdtDocument {
	/// Create a fresh, empty document for `client_id` (the persistent
	/// random 31-bit identifier loaded from the client's meta store).
	pub fn new(client_id: u32) -> Self {
		let doc = Doc::with_client_id(u64::from(client_id));
		let documents = doc.get_or_insert_map("documents");
		Self { doc, documents, client_id }
	}

	pub fn client_id(&self) -> u32 {
		self.client_id
	}

	/// The current state vector, used by the gap-recovery path and by
	/// snapshot validation.
	pub fn state_vector(&self) -> yrs::StateVector {
		self.doc.transact().state_vector()
	}

	/// Perform one mutation against `document_id` and return the Yjs
	/// update bytes it produced. `fields` is `None` for a delete.
	///
	/// Insert and update both write into the document's nested field map:
	/// insert (or update of a document with no surviving map) creates a
	/// fresh nested map holding every field in `fields`; update against an
	/// existing map writes only the given keys, leaving the rest alone so
	/// each field merges independently of concurrent edits to other
	/// fields.
	pub fn encode_mutation(
		&self,
		kind: MutationKind,
		document_id: &str,
		fields: Option<&serde_json::Value>,
	) -> LsResult<Vec<u8>> {
		let sv_before = self.doc.transact().state_vector();
		{
			let mut txn = self.doc.transact_mut();
			match kind {
				MutationKind::Insert | MutationKind::Update => {
					let fields = fields
						.ok_or_else(|| Error::CrdtEncoding("insert/update requires fields".to_string()))?
						.as_object()
						.ok_or_else(|| Error::CrdtEncoding("document fields must be a JSON object".to_string()))?;

					match (kind, self.documents.get(&txn, document_id)) {
						(MutationKind::Update, Some(Out::YMap(existing))) => {
							for (key, value) in fields {
								existing.insert(&mut txn, key.as_str(), json_to_any(value));
							}
						}
						_ => {
							let entries: Vec<(String, Any)> =
								fields.iter().map(|(key, value)| (key.clone(), json_to_any(value))).collect();
							self.documents.insert(&mut txn, document_id, MapPrelim::from(entries));
						}
					}
				}
				MutationKind::Delete => {
					self.documents.remove(&mut txn, document_id);
				}
			}
		}
		let bytes = self.doc.transact().encode_state_as_update_v2(&sv_before);
		validate_encoded(&bytes)?;
		Ok(bytes)
	}

	/// Apply a remote update, retrying decode+apply up to three times with
	/// a 2 s timeout per attempt (§4.1).
	pub async fn apply_update(&self, bytes: &[u8], origin: ApplyOrigin) -> LsResult<()> {
		validate_encoded(bytes)?;

		let mut last_err = Error::CrdtApplication("apply_update never attempted".to_string());
		for attempt in 1..=APPLY_ATTEMPTS {
			match tokio::time::timeout(APPLY_TIMEOUT, self.try_apply(bytes)).await {
				Ok(Ok(())) => return Ok(()),
				Ok(Err(err)) => {
					tracing::warn!(
						origin = origin.as_str(),
						attempt,
						error = %err,
						"CRDT apply_update attempt failed"
					);
					last_err = err;
				}
				Err(_) => {
					tracing::warn!(origin = origin.as_str(), attempt, "CRDT apply_update attempt timed out");
					last_err = Error::CrdtApplication("apply_update timed out".to_string());
				}
			}
		}
		Err(last_err)
	}

	async fn try_apply(&self, bytes: &[u8]) -> LsResult<()> {
		self.apply_decoded(bytes)
	}

	/// Single-shot decode+apply with no retry/timeout wrapping, for trusted
	/// local call sites (the compactor's merge and the server's
	/// `getInitialState` fallback) that already validated the input.
	pub fn apply_decoded(&self, bytes: &[u8]) -> LsResult<()> {
		let update = Update::decode_v2(bytes).map_err(|e| Error::CrdtApplication(e.to_string()))?;
		let mut txn = self.doc.transact_mut();
		txn.apply_update(update).map_err(|e| Error::CrdtApplication(e.to_string()))?;
		Ok(())
	}

	/// The full document state encoded as one Yjs-V2 update (an empty state
	/// vector diffed against the current state), used by the compactor to
	/// produce `snapshotBytes` and by `getInitialState`'s delta-merge path.
	pub fn encode_full_state(&self) -> Vec<u8> {
		self.doc.transact().encode_state_as_update_v2(&yrs::StateVector::default())
	}

	/// Replay `updates` in order into a fresh document seeded with
	/// `client_id`, then return the merged full state (§4.4 steps 2-3).
	/// Each input is re-applied to confirm it decodes cleanly; a failure
	/// here means a corrupt delta made it into the log.
	pub fn merge_updates(client_id: u32, updates: &[Vec<u8>]) -> LsResult<Vec<u8>> {
		let doc = CrdtDocument::new(client_id);
		for bytes in updates {
			validate_encoded(bytes)?;
			doc.apply_decoded(bytes)?;
		}
		Ok(doc.encode_full_state())
	}

	/// Confirm `merged` contains every byte range of `inputs` by checking
	/// that replaying `inputs` into a document already at `merged`'s state
	/// produces no further change (§4.4 step 3: "containment of each merged
	/// input").
	pub fn validate_contains(client_id: u32, merged: &[u8], inputs: &[Vec<u8>]) -> LsResult<()> {
		validate_encoded(merged)?;
		let doc = CrdtDocument::new(client_id);
		doc.apply_decoded(merged)?;
		for bytes in inputs {
			let sv_before = doc.state_vector();
			doc.apply_decoded(bytes)?;
			let diff = doc.doc.transact().encode_state_as_update_v2(&sv_before);
			if !diff.is_empty() {
				return Err(Error::SnapshotValidation(
					"merged snapshot does not contain one of its source deltas".to_string(),
				));
			}
		}
		Ok(())
	}

	/// The JSON fields currently stored for a document, or `None` if absent.
	pub fn get_document(&self, document_id: &str) -> Option<serde_json::Value> {
		let txn = self.doc.transact();
		match self.documents.get(&txn, document_id)? {
			Out::YMap(fields) => {
				let mut object = serde_json::Map::new();
				for (key, value) in fields.iter(&txn) {
					object.insert(key.to_string(), out_to_json(&txn, value));
				}
				Some(serde_json::Value::Object(object))
			}
			_ => None,
		}
	}

	/// All document ids currently present.
	pub fn document_ids(&self) -> Vec<String> {
		let txn = self.doc.transact();
		self.documents.keys(&txn).map(String::from).collect()
	}
}

/// Convert one JSON value into the Yjs `Any` scalar it's stored as within
/// a document's field map. Nested objects/arrays become `Any::Map`/`Any::Array`
/// blobs rather than further nested shared types — only the top-level
/// fields of a document get independent CRDT merge.
fn json_to_any(value: &serde_json::Value) -> Any {
	match value {
		serde_json::Value::Null => Any::Null,
		serde_json::Value::Bool(b) => Any::Bool(*b),
		serde_json::Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
		serde_json::Value::String(s) => Any::from(s.as_str()),
		serde_json::Value::Array(items) => Any::from(items.iter().map(json_to_any).collect::<Vec<_>>()),
		serde_json::Value::Object(fields) => Any::from(
			fields.iter().map(|(key, value)| (key.clone(), json_to_any(value))).collect::<std::collections::HashMap<_, _>>(),
		),
	}
}

fn any_to_json(value: &Any) -> serde_json::Value {
	match value {
		Any::Null | Any::Undefined => serde_json::Value::Null,
		Any::Bool(b) => serde_json::Value::Bool(*b),
		Any::Number(n) => serde_json::json!(n),
		Any::BigInt(n) => serde_json::json!(n),
		Any::String(s) => serde_json::Value::String(s.to_string()),
		Any::Buffer(bytes) => serde_json::Value::Array(bytes.iter().map(|b| serde_json::json!(b)).collect()),
		Any::Array(items) => serde_json::Value::Array(items.iter().map(any_to_json).collect()),
		Any::Map(fields) => {
			serde_json::Value::Object(fields.iter().map(|(key, value)| (key.clone(), any_to_json(value))).collect())
		}
	}
}

/// Convert one entry read back out of a document's field map. Most fields
/// are plain `Any` scalars; a field that happens to hold a shared type
/// (e.g. a prior version wrote a `YText`) is flattened to its plain value.
fn out_to_json<T: ReadTxn>(txn: &T, value: Out) -> serde_json::Value {
	match value {
		Out::Any(any) => any_to_json(&any),
		Out::YText(text) => serde_json::Value::String(text.get_string(txn)),
		Out::YMap(map) => {
			serde_json::Value::Object(map.iter(txn).map(|(key, value)| (key.to_string(), out_to_json(txn, value))).collect())
		}
		Out::YArray(array) => serde_json::Value::Array(array.iter(txn).map(|value| out_to_json(txn, value)).collect()),
		_ => serde_json::Value::Null,
	}
}

fn validate_encoded(bytes: &[u8]) -> LsResult<()> {
	if bytes.is_empty() {
		return Err(Error::CrdtEncoding("produced zero bytes".to_string()));
	}
	if bytes.len() > MAX_ENCODED_BYTES {
		return Err(Error::CrdtEncoding(format!("{} bytes exceeds the 10 MiB cap", bytes.len())));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn insert_then_read_round_trips() {
		let doc = CrdtDocument::new(1);
		let fields = json!({"title": "hello"});
		let bytes = doc.encode_mutation(MutationKind::Insert, "doc-1", Some(&fields)).unwrap();
		assert!(!bytes.is_empty());
		assert_eq!(doc.get_document("doc-1"), Some(fields));
	}

	#[test]
	fn delete_requires_no_fields() {
		let doc = CrdtDocument::new(1);
		let fields = json!({"title": "hello"});
		doc.encode_mutation(MutationKind::Insert, "doc-1", Some(&fields)).unwrap();
		doc.encode_mutation(MutationKind::Delete, "doc-1", None).unwrap();
		assert_eq!(doc.get_document("doc-1"), None);
	}

	#[test]
	fn insert_without_fields_fails() {
		let doc = CrdtDocument::new(1);
		let err = doc.encode_mutation(MutationKind::Insert, "doc-1", None).unwrap_err();
		assert!(matches!(err, Error::CrdtEncoding(_)));
	}

	#[tokio::test]
	async fn concurrent_edits_converge() {
		let doc_a = CrdtDocument::new(1);
		let doc_b = CrdtDocument::new(2);

		let fields_a = json!({"title": "from a"});
		let update_a = doc_a.encode_mutation(MutationKind::Insert, "doc-1", Some(&fields_a)).unwrap();
		doc_b.apply_update(&update_a, ApplyOrigin::Subscription).await.unwrap();

		let fields_b = json!({"title": "from b"});
		let update_b = doc_b.encode_mutation(MutationKind::Update, "doc-1", Some(&fields_b)).unwrap();
		doc_a.apply_update(&update_b, ApplyOrigin::Subscription).await.unwrap();

		assert_eq!(doc_a.get_document("doc-1"), doc_b.get_document("doc-1"));
	}

	#[tokio::test]
	async fn concurrent_field_edits_merge_independently() {
		let doc_a = CrdtDocument::new(1);
		let doc_b = CrdtDocument::new(2);

		let base = json!({"title": "A", "done": false, "priority": "low"});
		let update_base = doc_a.encode_mutation(MutationKind::Insert, "x", Some(&base)).unwrap();
		doc_b.apply_update(&update_base, ApplyOrigin::Subscription).await.unwrap();

		let update_a = doc_a.encode_mutation(MutationKind::Update, "x", Some(&json!({"title": "B"}))).unwrap();
		let update_b = doc_b.encode_mutation(MutationKind::Update, "x", Some(&json!({"done": true}))).unwrap();

		doc_b.apply_update(&update_a, ApplyOrigin::Subscription).await.unwrap();
		doc_a.apply_update(&update_b, ApplyOrigin::Subscription).await.unwrap();

		let expected = json!({"title": "B", "done": true, "priority": "low"});
		assert_eq!(doc_a.get_document("x"), Some(expected.clone()));
		assert_eq!(doc_b.get_document("x"), Some(expected));
	}

	#[tokio::test]
	async fn garbage_bytes_fail_after_retries() {
		let doc = CrdtDocument::new(1);
		let err = doc.apply_update(&[1, 2, 3, 4], ApplyOrigin::User).await.unwrap_err();
		assert!(matches!(err, Error::CrdtApplication(_)));
	}

	#[test]
	fn empty_encoded_update_is_rejected() {
		let err = validate_encoded(&[]).unwrap_err();
		assert!(matches!(err, Error::CrdtEncoding(_)));
	}

	#[test]
	fn merge_updates_reproduces_sequential_state() {
		let source = CrdtDocument::new(1);
		let mut updates = Vec::new();
		for i in 0..5 {
			let fields = json!({"seq": i});
			updates.push(source.encode_mutation(MutationKind::Update, "doc-1", Some(&fields)).unwrap());
		}

		let merged = CrdtDocument::merge_updates(7, &updates).unwrap();
		CrdtDocument::validate_contains(7, &merged, &updates).unwrap();

		let replayed = CrdtDocument::new(9);
		replayed.apply_decoded(&merged).unwrap();
		assert_eq!(replayed.get_document("doc-1"), source.get_document("doc-1"));
	}

	#[test]
	fn validate_contains_rejects_snapshot_missing_an_input() {
		let source = CrdtDocument::new(1);
		let fields = json!({"title": "hi"});
		let update = source.encode_mutation(MutationKind::Insert, "doc-1", Some(&fields)).unwrap();

		let unrelated = CrdtDocument::new(2);
		let stray = unrelated.encode_mutation(MutationKind::Insert, "doc-2", Some(&json!({"x": 1}))).unwrap();

		let err = CrdtDocument::validate_contains(1, &update, &[stray]).unwrap_err();
		assert!(matches!(err, Error::SnapshotValidation(_)));
	}
}
