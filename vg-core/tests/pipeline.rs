//! End-to-end pipeline scenarios: publish through one gateway, arrive at
//! another, and observe what the listeners receive.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use vg_core::client::SessionPhase;
use vg_core::consts::{ENCRYPTED_FIELDS_KEY, IV_KEY, NO_FIELDS_SENTINEL, POLICY_KEY};
use vg_core::proxy::{Arrival, ChunkInfo};
use vg_core::test::{registry_with, MockConnector, MockProxy, MockService, RecordingListener};
use vg_core::{AttributeRegistry, Document, Gateway};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn receiver_over(
    service: &MockService,
    pairs: &[(u32, u32)],
) -> Gateway<MockConnector, MockProxy> {
    let gateway = Gateway::new(service.connector(), MockProxy::default(), registry_with(pairs));
    gateway.login().unwrap();
    gateway
}

/// Publishes `{"sensor": "thermal"}` with payload `0123` under equation `1`
/// from a gateway holding attribute 1 at version 3.
fn publish_sample() -> (MockProxy, Document) {
    let service = MockService::new();
    let proxy = MockProxy::default();

    let mut registry = AttributeRegistry::new();
    let key_material: Vec<u8> = (0..16).map(|_| rand::random()).collect();
    registry.register(1, 3, key_material);

    let publisher = Gateway::new(service.connector(), proxy.clone(), registry)
        .with_protected_fields(["sensor"]);
    publisher.login().unwrap();

    let mut document = Document::new();
    document.insert("sensor", "thermal");

    let equation = publisher.parse_equation("1").unwrap();
    publisher
        .publish(
            "blue.force",
            "track-7",
            "0",
            &document,
            Some(b"0123"),
            Duration::from_secs(60),
            &equation,
        )
        .unwrap();

    (proxy, document)
}

#[test]
fn publish_transforms_document_and_payload() {
    init_logs();
    let (proxy, _original) = publish_sample();

    let published = proxy.published();
    let sent = &published[0];
    assert_eq!(sent.group, "blue.force");
    assert!(sent.metadata.get(POLICY_KEY).is_some());
    assert!(sent.metadata.get(IV_KEY).is_some());
    assert_eq!(sent.metadata.get(ENCRYPTED_FIELDS_KEY), Some("sensor"));

    // The sensor value is base64 ciphertext now.
    let sensor = sent.metadata.get("sensor").unwrap();
    assert_ne!(sensor, "thermal");
    assert!(BASE64.decode(sensor).is_ok());

    let envelope = sent.payload.as_deref().unwrap();
    assert_ne!(envelope, b"0123");
}

#[test]
fn holder_of_right_version_recovers_document_and_payload() {
    init_logs();
    let (proxy, original) = publish_sample();
    let published = proxy.published();
    let sent = &published[0];

    let service = MockService::new();
    let receiver = receiver_over(&service, &[(1, 3)]);
    let listener = RecordingListener::new();
    receiver.add_listener(listener.clone());
    let undecryptable = RecordingListener::new();
    receiver.add_undecryptable_listener(undecryptable.clone());

    assert!(receiver.on_metadata_arrived(&sent.metadata));
    assert!(receiver.on_payload_arrived(sent.payload.as_deref().unwrap()));

    assert_eq!(listener.documents(), vec![original]);
    assert_eq!(listener.payloads().len(), 1);
    assert_eq!(listener.payloads()[0].data, b"0123");
    assert!(undecryptable.documents().is_empty());
    assert!(undecryptable.payloads().is_empty());
}

#[test]
fn stale_version_holder_is_routed_undecryptable() {
    init_logs();
    let (proxy, _original) = publish_sample();
    let published = proxy.published();
    let sent = &published[0];

    // The receiver holds attribute 1, but only at the older version 2.
    let service = MockService::new();
    let receiver = receiver_over(&service, &[(1, 2)]);
    let listener = RecordingListener::new();
    receiver.add_listener(listener.clone());
    let undecryptable = RecordingListener::new();
    receiver.add_undecryptable_listener(undecryptable.clone());

    assert!(receiver.on_metadata_arrived(&sent.metadata));
    assert!(receiver.on_payload_arrived(sent.payload.as_deref().unwrap()));

    assert!(listener.documents().is_empty());
    assert!(listener.payloads().is_empty());
    assert_eq!(undecryptable.documents().len(), 1);
    assert_eq!(undecryptable.payloads().len(), 1);

    // The undecryptable paths carry the raw material, not plaintext.
    assert_ne!(
        undecryptable.documents()[0].get("sensor"),
        Some("thermal")
    );
    assert_eq!(
        undecryptable.payloads()[0].data,
        sent.payload.clone().unwrap()
    );
}

#[test]
fn policy_only_documents_are_checked_locally() {
    init_logs();
    let service = MockService::new();
    let proxy = MockProxy::default();
    let publisher = Gateway::new(service.connector(), proxy.clone(), registry_with(&[(1, 3)]));
    publisher.login().unwrap();

    let mut document = Document::new();
    document.insert("title", "weather");
    let equation = publisher.parse_equation("1").unwrap();
    publisher
        .publish("g", "o", "i", &document, None, Duration::from_secs(60), &equation)
        .unwrap();

    let published = proxy.published();
    let sent = &published[0];
    assert_eq!(sent.metadata.get(ENCRYPTED_FIELDS_KEY), Some(NO_FIELDS_SENTINEL));
    assert_eq!(sent.metadata.get("title"), Some("weather"));
    assert!(sent.metadata.get(IV_KEY).is_none());

    // Satisfiable locally: delivered without any decrypt call.
    let recv_service = MockService::new();
    let receiver = receiver_over(&recv_service, &[(1, 3)]);
    let listener = RecordingListener::new();
    receiver.add_listener(listener.clone());

    assert!(receiver.on_metadata_arrived(&sent.metadata));
    assert_eq!(listener.documents(), vec![document]);
    assert!(!recv_service.ops().contains(&"decrypt"));

    // Not satisfiable locally: routed undecryptable, still no decrypt call.
    let stale_service = MockService::new();
    let stale = receiver_over(&stale_service, &[(1, 2)]);
    let normal = RecordingListener::new();
    stale.add_listener(normal.clone());
    let undecryptable = RecordingListener::new();
    stale.add_undecryptable_listener(undecryptable.clone());

    assert!(stale.on_metadata_arrived(&sent.metadata));
    assert!(normal.documents().is_empty());
    assert_eq!(undecryptable.documents().len(), 1);
    assert!(!stale_service.ops().contains(&"decrypt"));
}

#[test]
fn one_failing_field_aborts_the_whole_document() {
    init_logs();
    let service = MockService::new();
    let proxy = MockProxy::default();
    let publisher = Gateway::new(service.connector(), proxy.clone(), registry_with(&[(1, 3)]))
        .with_protected_fields(["sensor", "observer"]);
    publisher.login().unwrap();

    let mut document = Document::new();
    document.insert("sensor", "thermal");
    document.insert("observer", "alpha");
    let equation = publisher.parse_equation("1").unwrap();
    publisher
        .publish("g", "o", "i", &document, None, Duration::from_secs(60), &equation)
        .unwrap();

    let published = proxy.published();
    let sent = &published[0];
    assert_eq!(
        sent.metadata.get(ENCRYPTED_FIELDS_KEY),
        Some("sensor;observer")
    );

    // The receiver holds the right attribute version, but one field's
    // ciphertext is poisoned on the service side.
    let recv_service = MockService::new();
    let receiver = receiver_over(&recv_service, &[(1, 3)]);
    let observer_ct = BASE64
        .decode(sent.metadata.get("observer").unwrap())
        .unwrap();
    recv_service.poison_ciphertext(observer_ct);

    let listener = RecordingListener::new();
    receiver.add_listener(listener.clone());
    let undecryptable = RecordingListener::new();
    receiver.add_undecryptable_listener(undecryptable.clone());

    assert!(receiver.on_metadata_arrived(&sent.metadata));
    assert!(listener.documents().is_empty());
    assert_eq!(undecryptable.documents().len(), 1);
}

#[test]
fn gateway_survives_one_session_loss_per_call() {
    init_logs();
    let service = MockService::new();
    let proxy = MockProxy::default();
    let gateway = Gateway::new(service.connector(), proxy.clone(), registry_with(&[(1, 3)]))
        .with_protected_fields(["sensor"]);
    gateway.login().unwrap();

    // The service invalidates the session once; the publish still succeeds.
    service.fail_ops_with_auth(1);

    let mut document = Document::new();
    document.insert("sensor", "thermal");
    let equation = gateway.parse_equation("1").unwrap();
    gateway
        .publish("g", "o", "i", &document, None, Duration::from_secs(60), &equation)
        .unwrap();

    assert_eq!(service.logins(), 2);
    assert_eq!(gateway.session().phase(), SessionPhase::LoggedIn);
    assert_eq!(proxy.published().len(), 1);

    // Attributes were re-registered before the retried operation.
    let ops = service.ops();
    let retried_encrypt = ops.len() - 1;
    assert_eq!(ops[retried_encrypt], "encrypt");
    assert_eq!(&ops[retried_encrypt - 2..retried_encrypt], ["login", "register"]);
}

#[test]
fn on_arrival_routes_both_parts_with_context() {
    init_logs();
    let (proxy, original) = publish_sample();
    let published = proxy.published();
    let sent = &published[0];

    let service = MockService::new();
    let receiver = receiver_over(&service, &[(1, 3)]);
    let listener = RecordingListener::new();
    receiver.add_listener(listener.clone());

    let arrival = Arrival {
        id: "msg-1".to_string(),
        metadata: Some(sent.metadata.clone()),
        payload: sent.payload.clone(),
        mime_type: "application/octet-stream".to_string(),
        chunk: Some(ChunkInfo { index: 0, total: 1 }),
        query_id: None,
    };
    assert!(receiver.on_arrival(&arrival));

    assert_eq!(listener.documents(), vec![original]);
    let events = listener.payloads();
    let event = &events[0];
    assert_eq!(event.id.as_deref(), Some("msg-1"));
    assert_eq!(event.mime_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(event.chunk, Some(ChunkInfo { index: 0, total: 1 }));
    assert_eq!(event.data, b"0123");
}

#[test]
fn default_policy_comes_from_configuration() {
    init_logs();
    let source = "\
attribute.0.id = 1
attribute.0.version.0.id = 3
attribute.0.version.0.keyfile = clearance-3.key
policy.default = 1
";
    let config =
        vg_core::config::AttributeConfig::parse(std::io::Cursor::new(source)).unwrap();
    let default_policy = config.default_policy().unwrap().to_string();
    let registry = config
        .into_registry_with(|path| Ok(path.to_string_lossy().into_owned().into_bytes()))
        .unwrap();

    let service = MockService::new();
    let gateway = Gateway::new(service.connector(), MockProxy::default(), registry)
        .with_default_policy(default_policy);

    let equation = gateway.default_equation().unwrap();
    assert_eq!(equation.to_string(), "1@3");
}
