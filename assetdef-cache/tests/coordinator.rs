//! Coordinator behaviour end to end against scripted collaborators.

use assetdef_cache::{AssetDefinitionStore, ClipboardSource, ParseSource};
use assetdef_core::{NetworkId, SignatureVerification, TokenType};
use assetdef_events::{Topic, TopicFilter};
use assetdef_fetch::ScriptUriSource;
use assetdef_test_utils::*;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const SCRIPT_URI: &str = "https://scripts.example/token.tsml";

struct Harness {
    store: Arc<InMemoryBackingStore>,
    transport: Arc<ScriptedTransport>,
    scheduler: Arc<ManualScheduler>,
    parser: RecordingParser,
    assets: AssetDefinitionStore<RecordingParser>,
}

struct Setup {
    store: InMemoryBackingStore,
    transport: ScriptedTransport,
    script_uri: Option<Arc<dyn ScriptUriSource>>,
    scheduler: ManualScheduler,
    parser: RecordingParser,
    config: AssetDefConfig,
}

impl Setup {
    fn new(store: InMemoryBackingStore, transport: ScriptedTransport) -> Self {
        Self {
            store,
            transport,
            script_uri: None,
            scheduler: ManualScheduler::immediate(),
            parser: RecordingParser::new(),
            config: AssetDefConfig::default(),
        }
    }

    fn build(self) -> Harness {
        let store = Arc::new(self.store);
        let transport = Arc::new(self.transport);
        let scheduler = Arc::new(self.scheduler);
        let mut builder = AssetDefinitionStore::builder(store.clone(), self.parser.clone())
            .config(self.config)
            .transport(transport.clone())
            .scheduler(scheduler.clone());
        if let Some(script_uri) = self.script_uri {
            builder = builder.script_uri(script_uri);
        }
        Harness {
            store,
            transport,
            scheduler,
            parser: self.parser,
            assets: builder.build().unwrap(),
        }
    }
}

fn harness(store: InMemoryBackingStore, transport: ScriptedTransport) -> Harness {
    Setup::new(store, transport).build()
}

fn pointer_key(n: u8) -> ContractKey {
    ContractKey::on_network(address(n), NetworkId::MAINNET)
}

/// Yield to spawned tasks until `done` holds.
async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never reached");
}

// ============================================================================
// FETCH OUTCOMES
// ============================================================================

#[tokio::test]
async fn test_fresh_fetch_updates_and_notifies_once_per_topic() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new(),
        ScriptedTransport::always(ok(token_xml(&a, "v1"))),
    );
    let mut body = h.assets.subscribe(TopicFilter::Body, Some(a));
    let mut signature = h.assets.subscribe(TopicFilter::Signature, Some(a));

    let outcomes = h.assets.fetch(key(1), false).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Updated]);
    assert_eq!(body.try_recv(), Some(key(1)));
    assert_eq!(body.try_recv(), None);
    assert_eq!(signature.try_recv(), Some(key(1)));
    assert_eq!(signature.try_recv(), None);

    let stored = h.assets.read(&a).unwrap();
    assert_eq!(stored.xml, token_xml(&a, "v1"));
    assert_eq!(stored.provenance, Provenance::Official);
}

#[tokio::test]
async fn test_cached_then_unmodified_changes_nothing() {
    let a = address(1);
    let seeded = token_xml(&a, "v1");
    let since = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &seeded, Some(since)),
        ScriptedTransport::always(status(304)),
    );
    let mut either = h.assets.subscribe(TopicFilter::Either, None);

    let outcomes = h.assets.fetch(key(1), true).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Cached, FetchOutcome::Unmodified]);
    assert_eq!(either.try_recv(), None);
    assert_eq!(h.transport.requests()[0].if_modified_since, Some(since));
    let stored = h.store.read_official(&a).unwrap();
    assert_eq!(stored.xml, seeded);
    assert_eq!(stored.last_modified, Some(since));
}

#[tokio::test]
async fn test_handle_streams_outcomes() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::always(ok(token_xml(&a, "v2"))),
    );

    let outcomes: Vec<FetchOutcome> = h.assets.fetch(key(1), true).into_stream().collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Cached, FetchOutcome::Updated]);
}

#[tokio::test]
async fn test_cache_flag_without_document_only_reports_network() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(404)));
    let outcomes = h.assets.fetch(key(1), true).collect().await;
    assert_eq!(outcomes, vec![FetchOutcome::Error]);
}

#[tokio::test]
async fn test_refetching_identical_content_is_unmodified() {
    let a = address(1);
    let lm = "Mon, 01 Jun 2020 08:05:09 GMT";
    let h = harness(
        InMemoryBackingStore::new(),
        ScriptedTransport::always(ok(token_xml(&a, "v1")).with_last_modified(lm)),
    );
    let mut either = h.assets.subscribe(TopicFilter::Either, Some(a));

    assert_eq!(h.assets.fetch(key(1), false).collect().await, vec![FetchOutcome::Updated]);
    assert_eq!(h.assets.fetch(key(1), false).collect().await, vec![FetchOutcome::Unmodified]);

    let expected = Utc.with_ymd_and_hms(2020, 6, 1, 8, 5, 9).unwrap();
    assert_eq!(h.store.last_modified(&a), Some(expected));
    let requests = h.transport.requests();
    assert_eq!(requests[0].if_modified_since, None);
    assert_eq!(requests[1].if_modified_since, Some(expected));

    // One update, two topics.
    assert!(either.try_recv().is_some());
    assert!(either.try_recv().is_some());
    assert_eq!(either.try_recv(), None);
}

#[tokio::test]
async fn test_missing_last_modified_stamps_now() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new(),
        ScriptedTransport::always(ok(token_xml(&a, "v1"))),
    );
    let before = Utc::now();
    h.assets.fetch(key(1), false).collect().await;
    let stamped = h.store.last_modified(&a).unwrap();
    assert!(stamped >= before - chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_truncated_body_never_replaces_cached_copy() {
    let a = address(1);
    let seeded = token_xml(&a, "v1");
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &seeded, None),
        ScriptedTransport::always(ok(truncated_xml(&a))),
    );
    let mut either = h.assets.subscribe(TopicFilter::Either, None);

    let outcomes = h.assets.fetch(key(1), false).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Error]);
    assert_eq!(h.transport.request_count(), 2);
    assert_eq!(h.assets.read(&a).unwrap().xml, seeded);
    assert_eq!(either.try_recv(), None);
}

#[tokio::test]
async fn test_repository_error_is_not_retried() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(404)));

    let outcomes = h.assets.fetch(key(1), false).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Error]);
    assert_eq!(h.transport.request_count(), 1);
    assert!(h.scheduler.delays().is_empty());
    assert!(h.transport.requests()[0]
        .url
        .as_str()
        .ends_with(&address(1).to_checksum()));
}

// ============================================================================
// RETRIES
// ============================================================================

#[tokio::test]
async fn test_script_uri_retries_twice_then_errors_after_delay() {
    let mut setup = Setup::new(InMemoryBackingStore::new(), ScriptedTransport::always(status(404)));
    setup.script_uri = Some(Arc::new(StaticScriptUri::new(SCRIPT_URI)));
    setup.scheduler = ManualScheduler::gated();
    let h = setup.build();

    let mut handle = h.assets.fetch(pointer_key(1), false);

    h.scheduler.wait_for_sleeps(1).await;
    assert_eq!(h.transport.request_count(), 2);
    assert_eq!(h.scheduler.delays(), vec![Duration::from_secs(3)]);
    assert_eq!(handle.try_next(), None);

    h.scheduler.release();
    let mut outcomes = Vec::new();
    while let Some(outcome) = handle.next().await {
        outcomes.push(outcome);
    }

    assert_eq!(outcomes, vec![FetchOutcome::Error]);
    assert_eq!(h.transport.request_count(), 3);
    assert!(h
        .transport
        .requests()
        .iter()
        .all(|request| request.url.as_str() == SCRIPT_URI));
}

#[tokio::test]
async fn test_script_uri_retry_can_succeed() {
    let transport = ScriptedTransport::new();
    transport
        .push(status(404))
        .push(ok(token_xml(&address(1), "second try")));
    let mut setup = Setup::new(InMemoryBackingStore::new(), transport);
    setup.script_uri = Some(Arc::new(StaticScriptUri::new(SCRIPT_URI)));
    let h = setup.build();

    let outcomes = h.assets.fetch(pointer_key(1), false).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Updated]);
    assert_eq!(h.transport.request_count(), 2);
    assert!(h.scheduler.delays().is_empty());
}

#[tokio::test]
async fn test_failed_lookup_falls_back_to_repository() {
    let a = address(1);
    let mut setup = Setup::new(
        InMemoryBackingStore::new(),
        ScriptedTransport::always(ok(token_xml(&a, "repo"))),
    );
    setup.script_uri = Some(Arc::new(FailingScriptUri));
    let h = setup.build();

    let outcomes = h.assets.fetch(pointer_key(1), false).collect().await;

    assert_eq!(outcomes, vec![FetchOutcome::Updated]);
    assert!(h.transport.requests()[0]
        .url
        .as_str()
        .starts_with("https://repo.tokenscript.org/"));
}

#[tokio::test]
async fn test_networkless_key_skips_script_uri_lookup() {
    let pointer = Arc::new(StaticScriptUri::new(SCRIPT_URI));
    let mut setup = Setup::new(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    setup.script_uri = Some(pointer.clone());
    let h = setup.build();

    h.assets.fetch(key(1), false).collect().await;

    assert_eq!(pointer.calls(), 0);
    assert_ne!(h.transport.requests()[0].url.as_str(), SCRIPT_URI);
}

// ============================================================================
// CANCELLATION AND IN-FLIGHT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels_fetch() {
    let a = address(1);
    let transport = ScriptedTransport::always(ok(token_xml(&a, "late")));
    transport.set_delay(Duration::from_secs(10));
    let h = harness(InMemoryBackingStore::new(), transport);
    let mut either = h.assets.subscribe(TopicFilter::Either, None);

    let handle = h.assets.fetch(key(1), false);
    let transport = h.transport.clone();
    settle(|| transport.request_count() == 1).await;
    drop(handle);

    let assets = h.assets.clone();
    settle(|| assets.in_flight(&a) == 0).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(h.assets.read(&a).is_none());
    assert_eq!(either.try_recv(), None);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_are_counted_not_coalesced() {
    let a = address(1);
    let transport = ScriptedTransport::always(status(304));
    transport.set_delay(Duration::from_secs(1));
    let h = harness(InMemoryBackingStore::new(), transport);

    assert!(h.assets.fetch_detached(key(1)));
    assert!(h.assets.fetch_detached(key(1)));
    assert_eq!(h.assets.in_flight(&a), 2);
    assert_eq!(h.assets.in_flight(&address(2)), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.assets.in_flight(&a), 0);
    assert_eq!(h.transport.request_count(), 2);
}

#[tokio::test]
async fn test_fetch_all_starts_every_key() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    h.assets.fetch_all([key(1), key(2), key(3)]);

    let transport = h.transport.clone();
    settle(|| transport.request_count() == 3).await;
}

#[test]
fn test_outside_runtime_only_cached_is_reported() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::always(status(304)),
    );

    let mut handle = h.assets.fetch(key(1), true);
    assert_eq!(handle.try_next(), Some(FetchOutcome::Cached));
    assert_eq!(handle.try_next(), None);
    assert!(!h.assets.fetch_detached(key(1)));
    assert!(h.assets.listen_for_store_changes().is_none());
    assert_eq!(h.transport.request_count(), 0);
}

// ============================================================================
// HANDLERS AND INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_handler_dropped_before_subscribers_hear() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::always(ok(token_xml(&a, "v2"))),
    );
    assert!(h.assets.handler(&a).is_some());
    assert!(h.assets.has_cached_handler(&a));

    let mut body = h.assets.subscribe(TopicFilter::Body, Some(a));
    let assets = h.assets.clone();
    let observer = tokio::spawn(async move {
        body.recv().await;
        assets.has_cached_handler(&a)
    });

    assert_eq!(h.assets.fetch(key(1), false).collect().await, vec![FetchOutcome::Updated]);
    assert!(!observer.await.unwrap());

    let handler = h.assets.handler(&a).unwrap();
    assert_eq!(handler.xml, token_xml(&a, "v2"));
}

#[test]
fn test_handler_is_parsed_once_per_content() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::new(),
    );

    let first = h.assets.handler(&a).unwrap();
    let second = h.assets.handler(&a).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.parser.parses(), 1);
    assert_eq!(first.source, ParseSource::Contract(a));

    // Bytes changed behind the coordinator's back.
    h.store.write(&a, &token_xml(&a, "v2"), None).unwrap();
    let third = h.assets.handler(&a).unwrap();
    assert_eq!(third.xml, token_xml(&a, "v2"));
    assert_eq!(h.parser.parses(), 2);
}

#[test]
fn test_parse_failure_yields_no_handler() {
    let a = address(1);
    let mut setup = Setup::new(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "broken"), None),
        ScriptedTransport::new(),
    );
    setup.parser = RecordingParser::rejecting("broken");
    let h = setup.build();

    assert!(h.assets.handler(&a).is_none());
    assert!(!h.assets.has_cached_handler(&a));
    assert!(h.assets.handler(&address(2)).is_none());
}

#[test]
fn test_invalidate_keeps_bytes() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::new(),
    );
    h.assets.handler(&a);

    assert!(h.assets.invalidate(&a));
    assert!(!h.assets.invalidate(&a));
    assert!(h.assets.read(&a).is_some());
}

#[tokio::test]
async fn test_write_stores_invalidates_and_notifies() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::new(),
    );
    h.assets.handler(&a);
    let mut either = h.assets.subscribe(TopicFilter::Either, Some(a));

    assert!(h.assets.write(key(1), &token_xml(&a, "v2")));

    assert!(!h.assets.has_cached_handler(&a));
    assert_eq!(h.assets.read(&a).unwrap().xml, token_xml(&a, "v2"));
    assert!(h.store.last_modified(&a).is_some());
    assert!(either.try_recv().is_some());
    assert!(either.try_recv().is_some());
    assert_eq!(either.try_recv(), None);
}

#[test]
fn test_contract_deleted_forgets_official_copy() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::new(),
    );
    h.assets.handler(&a);
    let mut either = h.assets.subscribe(TopicFilter::Either, None);

    h.assets.contract_deleted(&a);

    assert!(h.assets.read(&a).is_none());
    assert!(!h.assets.has_cached_handler(&a));
    assert!(h.assets.contracts_from_official_repo().is_empty());
    assert_eq!(either.try_recv(), None);

    // Deleting again is harmless.
    h.assets.contract_deleted(&a);
}

// ============================================================================
// PROVENANCE
// ============================================================================

#[tokio::test]
async fn test_override_wins_and_survives_official_update() {
    let a = address(1);
    let store = InMemoryBackingStore::new().with_official(a, &token_xml(&a, "official"), None);
    store.add_override("local.tsml", &token_xml(&a, "local"));
    let h = harness(store, ScriptedTransport::always(ok(token_xml(&a, "official v2"))));

    assert_eq!(h.assets.read(&a).unwrap().provenance, Provenance::Override);
    assert!(h.assets.has_conflict(&a));
    assert!(!h.assets.is_official(&a));
    let conflicts = h.assets.conflicting_file_names();
    assert_eq!(conflicts.overrides, vec!["local.tsml".to_string()]);

    let outcomes = h.assets.fetch(key(1), true).collect().await;
    assert_eq!(outcomes, vec![FetchOutcome::Cached, FetchOutcome::Updated]);

    let read = h.assets.read(&a).unwrap();
    assert_eq!(read.xml, token_xml(&a, "local"));
    assert_eq!(
        h.store.read_official(&a).unwrap().xml,
        token_xml(&a, "official v2")
    );
}

#[test]
fn test_schema_and_bad_file_queries() {
    let a = address(1);
    let b = address(2);
    let store = InMemoryBackingStore::new()
        .with_official(a, &token_xml(&a, "current"), None)
        .with_official(b, &outdated_xml(&b), None);
    store.add_override("junk.tsml", "<nothing here/>");
    let h = harness(store, ScriptedTransport::new());

    assert!(h.assets.is_official(&a));
    assert!(h.assets.is_canonicalized(&a));
    assert!(!h.assets.has_outdated(&a));
    assert!(h.assets.has_outdated(&b));
    assert!(!h.assets.is_canonicalized(&b));
    assert!(!h.assets.has_conflict(&a));
    assert_eq!(h.assets.bad_file_names(), vec!["junk.tsml".to_string()]);

    let mut seen = Vec::new();
    h.assets.for_each_contract_with_document(|address| seen.push(address));
    seen.sort();
    assert_eq!(seen, vec![a, b]);
}

// ============================================================================
// EXTERNAL STORE CHANGES
// ============================================================================

#[tokio::test]
async fn test_external_override_invalidates_notifies_and_refetches() {
    let a = address(1);
    let h = harness(
        InMemoryBackingStore::new().with_official(a, &token_xml(&a, "v1"), None),
        ScriptedTransport::always(status(304)),
    );
    h.assets.handler(&a);
    let listener = h.assets.listen_for_store_changes().unwrap();
    let mut either = h.assets.subscribe(TopicFilter::Either, Some(a));

    h.store.add_override("dropped-in.tsml", &token_xml(&a, "local"));

    let first = either.recv_event().await.unwrap();
    let second = either.recv_event().await.unwrap();
    assert_eq!(first.topic, Topic::BodyChanged);
    assert_eq!(second.topic, Topic::SignatureChanged);
    assert!(!h.assets.has_cached_handler(&a));

    let transport = h.transport.clone();
    settle(|| transport.request_count() == 1).await;
    listener.abort();
}

#[tokio::test]
async fn test_external_bad_file_is_broadcast() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    let _listener = h.assets.listen_for_store_changes().unwrap();
    let mut bad_files = h.assets.subscribe_bad_files();

    h.store.add_override("junk.tsml", "<no contracts/>");

    assert_eq!(bad_files.recv().await.unwrap(), vec!["junk.tsml".to_string()]);
}

#[tokio::test]
async fn test_listener_stops_when_coordinator_dropped() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    let listener = h.assets.listen_for_store_changes().unwrap();
    let store = h.store.clone();
    drop(h);

    store.add_override("late.tsml", &token_xml(&address(1), "late"));
    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener should stop")
        .unwrap();
}

#[tokio::test]
async fn test_lagged_listener_resyncs_every_contract() {
    let mut setup = Setup::new(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    setup.config.bus_capacity = 1024;
    let h = setup.build();
    let listener = h.assets.listen_for_store_changes().unwrap();
    let mut first = h.assets.subscribe(TopicFilter::Body, Some(address(1)));
    let mut last = h.assets.subscribe(TopicFilter::Body, Some(address(140)));
    let mut bad_files = h.assets.subscribe_bad_files();

    // More changes than the store channel buffers, all before the listener runs.
    for n in 1..=140u8 {
        h.store
            .add_override(&format!("override-{}.tsml", n), &token_xml(&address(n), "local"));
    }

    let first_event = tokio::time::timeout(Duration::from_secs(5), first.recv_event())
        .await
        .expect("contract 1 should be told its override changed")
        .unwrap();
    assert_eq!(first_event.key.address, address(1));
    let last_event = tokio::time::timeout(Duration::from_secs(5), last.recv_event())
        .await
        .expect("contract 140 should be told its override changed")
        .unwrap();
    assert_eq!(last_event.key.address, address(140));
    assert_eq!(bad_files.recv().await.unwrap(), Vec::<String>::new());

    let transport = h.transport.clone();
    settle(|| transport.request_count() >= 140).await;
    listener.abort();
}

#[tokio::test]
async fn test_external_change_refetches_on_last_known_network() {
    let a = address(1);
    let transport = ScriptedTransport::new();
    transport.push(ok(token_xml(&a, "v1")));
    transport.set_fallback(Ok(status(304)));
    let mut setup = Setup::new(InMemoryBackingStore::new(), transport);
    setup.script_uri = Some(Arc::new(StaticScriptUri::new(SCRIPT_URI)));
    let h = setup.build();

    let outcomes = h.assets.fetch(pointer_key(1), false).collect().await;
    assert_eq!(outcomes, vec![FetchOutcome::Updated]);

    let listener = h.assets.listen_for_store_changes().unwrap();
    let mut body = h.assets.subscribe(TopicFilter::Body, Some(a));
    h.store.add_override("local.tsml", &token_xml(&a, "local"));

    let event = body.recv_event().await.unwrap();
    assert_eq!(event.key.network, Some(NetworkId::MAINNET));

    let transport = h.transport.clone();
    settle(|| transport.request_count() == 2).await;
    assert_eq!(h.transport.requests()[1].url.as_str(), SCRIPT_URI);
    listener.abort();
}

#[tokio::test]
async fn test_contract_locks_are_released_after_use() {
    let h = harness(
        InMemoryBackingStore::new(),
        ScriptedTransport::always(ok(token_xml(&address(1), "v1"))),
    );

    let outcomes = h.assets.fetch(key(1), false).collect().await;
    assert_eq!(outcomes, vec![FetchOutcome::Updated]);
    assert!(h.assets.write(key(2), &token_xml(&address(2), "direct")));
    h.assets.contract_deleted(&address(2));

    assert_eq!(h.assets.lock_entries(), 0);
}

// ============================================================================
// SIGNATURES
// ============================================================================

#[tokio::test]
async fn test_signature_verification_is_keyed_by_content() {
    let a = address(1);
    let xml = token_xml(&a, "signed");
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::new());

    assert_eq!(h.assets.signature_verification(&xml), None);
    h.assets.record_signature_verification(
        &a,
        &xml,
        SignatureVerification::Verified {
            domain: "example.com".to_string(),
        },
    );

    assert_eq!(
        h.assets.signature_verification(&xml),
        Some(SignatureVerification::Verified {
            domain: "example.com".to_string()
        })
    );
    assert_eq!(h.assets.signature_verification(&token_xml(&a, "other")), None);
}

#[tokio::test]
async fn test_invalidate_signature_status_only_signals_signature() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::new());
    let mut signature = h.assets.subscribe(TopicFilter::Signature, None);
    let mut body = h.assets.subscribe(TopicFilter::Body, None);

    h.assets.invalidate_signature_status(key(4));

    assert_eq!(signature.try_recv(), Some(key(4)));
    assert_eq!(body.try_recv(), None);
}

// ============================================================================
// BASE TEMPLATES
// ============================================================================

#[test]
fn test_base_templates_parse_once() {
    let erc20 = "<ts:token>erc20 base</ts:token>";
    let parser = RecordingParser::new();
    let assets = AssetDefinitionStore::builder(Arc::new(InMemoryBackingStore::new()), parser.clone())
        .transport(Arc::new(ScriptedTransport::new()))
        .base_document(TokenType::Erc20, erc20)
        .build()
        .unwrap();

    assert_eq!(assets.base_token_script_file(TokenType::Erc20), Some(erc20));
    assert_eq!(assets.base_token_script_file(TokenType::Erc721), None);
    assert!(assets.contains_token_script_file(erc20));
    assert!(!assets.contains_token_script_file("<other/>"));

    let first = assets.base_handler(TokenType::Erc20).unwrap();
    let second = assets.base_handler(TokenType::Erc20).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.source, ParseSource::Base(TokenType::Erc20));
    assert_eq!(parser.parses(), 1);
    assert!(assets.base_handler(TokenType::Erc1155).is_none());
}

// ============================================================================
// CLIPBOARD
// ============================================================================

struct FixedClipboard(Option<String>);

impl ClipboardSource for FixedClipboard {
    fn text(&self) -> Option<String> {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_clipboard_fetches_new_addresses_once() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));

    assert!(h.assets.fetch_for_clipboard_text(&format!("  {}\n", SAMPLE_ADDRESS)));
    assert!(!h.assets.fetch_for_clipboard_text(SAMPLE_ADDRESS));
    assert!(!h.assets.fetch_for_clipboard_text("meeting at 5"));
    assert!(!h.assets.fetch_for_clipboard_text(""));

    let transport = h.transport.clone();
    settle(|| transport.request_count() == 1).await;
    assert!(h.transport.requests()[0].url.as_str().ends_with(SAMPLE_ADDRESS));
}

#[tokio::test]
async fn test_became_active_reads_clipboard() {
    let h = harness(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));

    assert!(!h.assets.on_became_active(&FixedClipboard(None)));
    assert!(h
        .assets
        .on_became_active(&FixedClipboard(Some(address(9).to_checksum()))));
    assert!(!h
        .assets
        .on_became_active(&FixedClipboard(Some(address(9).to_checksum()))));
}

#[tokio::test]
async fn test_clipboard_disabled_by_config() {
    let mut setup = Setup::new(InMemoryBackingStore::new(), ScriptedTransport::always(status(304)));
    setup.config.clipboard_fetch_enabled = false;
    let h = setup.build();

    assert!(!h.assets.fetch_for_clipboard_text(SAMPLE_ADDRESS));
    assert_eq!(h.assets.in_flight(&Address::parse(SAMPLE_ADDRESS).unwrap()), 0);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_build_rejects_invalid_config() {
    let mut config = AssetDefConfig::default();
    config.repository.base_url = "ftp://nowhere".to_string();
    let result = AssetDefinitionStore::builder(Arc::new(InMemoryBackingStore::new()), RecordingParser::new())
        .config(config)
        .transport(Arc::new(ScriptedTransport::new()))
        .build();
    assert!(result.is_err());
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_same_body_twice_updates_once(n in 1u8..=255, marker in "[a-z]{1,12}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let a = address(n);
            let h = harness(
                InMemoryBackingStore::new(),
                ScriptedTransport::always(ok(token_xml(&a, &marker))),
            );
            let first = h.assets.fetch(key(n), false).collect().await;
            let second = h.assets.fetch(key(n), false).collect().await;
            prop_assert_eq!(first, vec![FetchOutcome::Updated]);
            prop_assert_eq!(second, vec![FetchOutcome::Unmodified]);
            Ok(())
        })?;
    }
}
