//! End-to-end submission pipeline tests against a mocked downstream
//! repository.

use junction_common::{GatewayError, RetryPolicy};
use junction_core::avalon::AvalonClient;
use junction_core::collections::CollectionResolver;
use junction_core::orchestrator::Orchestrator;
use junction_core::request::IngestRequest;
use junction_core::router::{Router, RoutingTarget};
use junction_core::store::{
    CollectionRecord, CollectionStore, MemoryStore, RecordChanges, SubmissionStatus,
    SubmissionStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_TOKEN: &str = "secret-token";

const VIDEO_PROBE: &str = r#"<ffprobe>
    <streams>
        <stream codec_type="video" codec_name="h264" bit_rate="2500000"
                width="640" height="480" display_aspect_ratio="4:3">
            <disposition default="1"/>
        </stream>
        <stream codec_type="audio" codec_name="aac" bit_rate="128000">
            <disposition default="1"/>
        </stream>
    </streams>
    <format duration="125.5" size="39000000"/>
</ffprobe>"#;

const STRUCTURE: &str = r#"<Item label="Side A">
    <Span label="Segment 1" begin="0" end="60"/>
    <Span label="Segment 2" begin="1:05.25" end="2:00"/>
</Item>"#;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

fn ingest_body(target_avalon: Option<&str>) -> String {
    let tier = |name: &str| {
        serde_json::json!({
            "filename": format!("MDPI_40000000123456_01_{name}.mp4"),
            "url_rtmp": format!("rtmp://streaming/{name}.mp4"),
            "url_http": format!("https://streaming/{name}.m3u8"),
            "ffprobe": VIDEO_PROBE
        })
    };
    let mut body = serde_json::json!({
        "group_name": "GR00034889",
        "metadata": {
            "mods": "<mods><titleInfo><title>A Film Title</title></titleInfo>\
                     <name><namePart>Doe, J.</namePart>\
                     <role><roleTerm>creator</roleTerm></role></name></mods>",
            "unit": "B-ATM",
            "call_number": "PN1997",
            "oclc_number": "123456789",
            "format": { "40000000123456": "Film (16mm)" }
        },
        "comments": [["Object 40000000123456", "object level note"]],
        "parts": [{
            "mdpi_barcode": "40000000123456",
            "files": { "1": {
                "structure": STRUCTURE,
                "ingest": "06/10/2015 09:30:00",
                "master_md5": "d41d8cd98f00b204e9800998ecf8427e",
                "q": { "high": tier("high") }
            } }
        }]
    });
    if let Some(name) = target_avalon {
        body["target_avalon"] = serde_json::json!(name);
    }
    body.to_string()
}

fn build(url: &str) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let policy = fast_policy();
    let client =
        Arc::new(AvalonClient::with_timeout(policy.clone(), Duration::from_secs(5)).unwrap());

    let mut units = HashMap::new();
    units.insert(
        "B-ATM".to_string(),
        "Archives of Traditional Music".to_string(),
    );
    let resolver = CollectionResolver::new(
        store.clone() as Arc<dyn CollectionStore>,
        client.clone(),
        units,
        policy.clone(),
    );

    let mut targets = HashMap::new();
    targets.insert(
        "default".to_string(),
        RoutingTarget {
            url: url.to_string(),
            api_token: API_TOKEN.to_string(),
            default_managers: vec!["curator@example.edu".to_string()],
        },
    );
    let orchestrator = Orchestrator::new(
        store.clone() as Arc<dyn SubmissionStore>,
        resolver,
        Router::new(targets),
        client,
        policy,
    );
    (orchestrator, store)
}

async fn mock_collection_creation(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/admin/collections"))
        .and(header("Avalon-Api-Key", API_TOKEN))
        .and(body_partial_json(serde_json::json!({
            "admin_collection": {
                "name": "Archives of Traditional Music",
                "unit": "Archives of Traditional Music",
                "managers": ["curator@example.edu"],
                "default_read_groups": ["BL-LDLP-MDPI-MANAGERS-B-ATM"]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "col:1"})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn full_deposit_records_downstream_identity() {
    let server = MockServer::start().await;
    mock_collection_creation(&server).await;

    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .and(header("Avalon-Api-Key", API_TOKEN))
        .and(body_partial_json(serde_json::json!({
            "fields": { "title": "A Film Title", "creator": "Doe, J." },
            "collection_id": "col:1",
            "publish": true,
            "replace_masterfiles": true
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, _store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();

    let registered = orchestrator.register(&request, &raw).await.unwrap();
    assert_eq!(registered.status, SubmissionStatus::Received);
    assert_eq!(registered.message, "object received");

    assert!(!orchestrator
        .already_submitted_at_current_target(&request)
        .await
        .unwrap());

    let record = orchestrator.submit(&request).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Deposited);
    assert!(!record.error);
    assert_eq!(record.message, "successfully submitted");
    assert_eq!(record.avalon_chosen, server.uri());
    assert_eq!(record.avalon_pid, "avalon:1");
    assert_eq!(
        record.avalon_url,
        format!("{}/media_objects/avalon:1", server.uri())
    );
    assert!(!record.locked);

    assert!(orchestrator
        .already_submitted_at_current_target(&request)
        .await
        .unwrap());
}

#[tokio::test]
async fn downstream_rejection_marks_failed_and_propagates() {
    let server = MockServer::start().await;
    mock_collection_creation(&server).await;

    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();
    orchestrator.register(&request, &raw).await.unwrap();

    let err = orchestrator.submit(&request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { status: 500, .. }));

    let record = SubmissionStore::find(&*store, "GR00034889")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert!(record.error);
    assert!(record.message.contains("500"));
    assert!(record.message.contains("boom"));
}

#[tokio::test]
async fn gateway_timeout_is_retried_then_deposits() {
    let server = MockServer::start().await;
    mock_collection_creation(&server).await;

    // First deposit attempt hits a gateway timeout; the retry lands on the
    // mock mounted after it.
    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, _store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();
    orchestrator.register(&request, &raw).await.unwrap();

    let record = orchestrator.submit(&request).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Deposited);
    assert_eq!(record.avalon_pid, "avalon:1");
}

#[tokio::test]
async fn persistent_gateway_timeout_marks_failed() {
    let server = MockServer::start().await;
    mock_collection_creation(&server).await;

    // Every attempt times out at the gateway, exhausting the retry budget.
    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
        .expect(2)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();
    orchestrator.register(&request, &raw).await.unwrap();

    let err = orchestrator.submit(&request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)));

    let record = SubmissionStore::find(&*store, "GR00034889")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert!(record.error);
    assert!(record.message.contains("504"));
}

#[tokio::test]
async fn missing_downstream_object_is_recreated_with_prior_identifier() {
    let server = MockServer::start().await;

    // Collection already cached and still valid downstream.
    Mock::given(method("GET"))
        .and(path("/admin/collections/col:1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "col:1"})))
        .mount(&server)
        .await;

    // The downstream migrated away the old object.
    Mock::given(method("GET"))
        .and(path("/media_objects/avalon:old.json"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({"errors": ["not found"]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .and(body_partial_json(serde_json::json!({
            "fields": { "identifier": ["avalon:old"] }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:new"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();

    store
        .insert(CollectionRecord {
            name: "B-ATM".to_string(),
            pid: "col:1".to_string(),
            avalon_url: server.uri(),
            fullname: "Archives of Traditional Music".to_string(),
        })
        .await
        .unwrap();
    orchestrator.register(&request, &raw).await.unwrap();
    store
        .update(
            "GR00034889",
            RecordChanges {
                avalon_chosen: Some(server.uri()),
                avalon_pid: Some("avalon:old".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let record = orchestrator.submit(&request).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Deposited);
    assert_eq!(record.avalon_pid, "avalon:new");
    assert_eq!(
        record.avalon_url,
        format!("{}/media_objects/avalon:new", server.uri())
    );
}

#[tokio::test]
async fn existing_downstream_object_is_updated_in_place() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/collections/col:1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "col:1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/media_objects/avalon:old.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:old"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // No POST mock is mounted: a create attempt would get a 404 and fail
    // the submission, so a passing test proves the update path was taken.
    Mock::given(method("PUT"))
        .and(path("/media_objects/avalon:old.json"))
        .and(header("Avalon-Api-Key", API_TOKEN))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:old"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();

    store
        .insert(CollectionRecord {
            name: "B-ATM".to_string(),
            pid: "col:1".to_string(),
            avalon_url: server.uri(),
            fullname: "Archives of Traditional Music".to_string(),
        })
        .await
        .unwrap();
    orchestrator.register(&request, &raw).await.unwrap();
    store
        .update(
            "GR00034889",
            RecordChanges {
                avalon_chosen: Some(server.uri()),
                avalon_pid: Some("avalon:old".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let record = orchestrator.submit(&request).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Deposited);
    assert_eq!(record.avalon_pid, "avalon:old");
}

#[tokio::test]
async fn moved_downstream_identifier_is_refreshed_before_update() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/collections/col:1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "col:1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/media_objects/avalon:old.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:moved"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/media_objects/avalon:moved.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:moved"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();

    store
        .insert(CollectionRecord {
            name: "B-ATM".to_string(),
            pid: "col:1".to_string(),
            avalon_url: server.uri(),
            fullname: "Archives of Traditional Music".to_string(),
        })
        .await
        .unwrap();
    orchestrator.register(&request, &raw).await.unwrap();
    store
        .update(
            "GR00034889",
            RecordChanges {
                avalon_chosen: Some(server.uri()),
                avalon_pid: Some("avalon:old".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let record = orchestrator.submit(&request).await.unwrap();
    assert_eq!(record.avalon_pid, "avalon:moved");
}

#[tokio::test]
async fn stale_collection_cache_self_heals() {
    let server = MockServer::start().await;

    // The cached pid still resolves, but under a new id.
    Mock::given(method("GET"))
        .and(path("/admin/collections/col:old.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "col:new"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/media_objects.json"))
        .and(body_partial_json(serde_json::json!({"collection_id": "col:new"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "avalon:1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (orchestrator, store) = build(&server.uri());
    let raw = ingest_body(None);
    let request = IngestRequest::parse(&raw).unwrap();

    store
        .insert(CollectionRecord {
            name: "B-ATM".to_string(),
            pid: "col:old".to_string(),
            avalon_url: server.uri(),
            fullname: "Archives of Traditional Music".to_string(),
        })
        .await
        .unwrap();
    orchestrator.register(&request, &raw).await.unwrap();

    orchestrator.submit(&request).await.unwrap();

    let cached = CollectionStore::find(&*store, "B-ATM", &server.uri())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.pid, "col:new");
}

#[tokio::test]
async fn unconfigured_target_fails_the_submission_record() {
    let server = MockServer::start().await;
    let (orchestrator, store) = build(&server.uri());

    let raw = ingest_body(Some("nowhere"));
    let request = IngestRequest::parse(&raw).unwrap();
    orchestrator.register(&request, &raw).await.unwrap();

    let err = orchestrator.submit(&request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Routing(_)));

    let record = SubmissionStore::find(&*store, "GR00034889")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert!(record.error);
    assert!(record.message.contains("nowhere"));
}
