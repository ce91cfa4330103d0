use ctor::ctor;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use synapse_rpc::test_utilities::{
    closed_port, init_tracing, spawn_echo_axon, spawn_failing_server, spawn_garbage_server,
    spawn_silent_server, Dummy, FrozenDummy,
};
use synapse_rpc::{AxonInfo, Dendrite, DendriteConfig, Keypair, Synapse};

#[ctor]
fn init() {
    init_tracing();
}

fn dendrite() -> Dendrite {
    Dendrite::new(Arc::new(Keypair::new()), DendriteConfig::default())
}

#[tokio::test]
async fn successful_call_copies_back_mutable_fields() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();

    let reply = dendrite
        .call(&axon.info, Synapse::new(Dummy::new(21)), Duration::from_secs(5), false)
        .await
        .unwrap();
    let synapse = reply.into_synapse().unwrap();

    assert_eq!(synapse.dendrite.status_code, Some(200));
    assert_eq!(synapse.dendrite.status_message.as_deref(), Some("Success"));
    assert_eq!(synapse.payload.output, Some(42));
    // the axon zeroed it, but the field is frozen
    assert_eq!(synapse.payload.input, 21);
    assert_eq!(synapse.axon.hotkey.as_deref(), Some(axon.info.hotkey.as_str()));
    assert!(synapse.axon.pubkey.is_some());
    assert!(synapse.axon.process_time.is_some());
    assert!(synapse.dendrite.process_time.unwrap() > 0.0);
}

#[tokio::test]
async fn deserialized_call_returns_output() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();
    let reply = dendrite
        .call(&axon.info, Synapse::new(Dummy::new(5)), Duration::from_secs(5), true)
        .await
        .unwrap();
    assert_eq!(reply.into_output(), Some(Some(10)));
}

#[tokio::test]
async fn frozen_struct_is_never_overwritten() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();
    let local = FrozenDummy {
        value: "mine".to_string(),
    };
    let synapse = dendrite
        .call(&axon.info, Synapse::new(local), Duration::from_secs(5), true)
        .await
        .unwrap()
        .into_output()
        .unwrap();
    assert!(synapse.is_success());
    assert_eq!(synapse.payload.value, "mine");
}

#[tokio::test]
async fn closed_port_is_unavailable() {
    let port = closed_port().unwrap();
    let target = AxonInfo::new("127.0.0.1", port, "nobody");
    let dendrite = dendrite();
    let synapse = dendrite
        .call(&target, Synapse::new(Dummy::new(1)), Duration::from_secs(5), false)
        .await
        .unwrap()
        .into_synapse()
        .unwrap();
    assert_eq!(synapse.dendrite.status_code, Some(503));
    assert_eq!(
        synapse.dendrite.status_message,
        Some(format!("Service at 127.0.0.1:{}/Dummy unavailable.", port))
    );
    assert_eq!(synapse.payload.output, None);
    assert!(synapse.dendrite.process_time.is_some());
}

#[tokio::test]
#[serial]
async fn silent_peer_times_out() {
    let (addr, _server) = spawn_silent_server().await.unwrap();
    let target = AxonInfo::new("127.0.0.1", addr.port(), "silent");
    let dendrite = dendrite();
    let synapse = dendrite
        .call(&target, Synapse::new(Dummy::new(1)), Duration::from_millis(200), false)
        .await
        .unwrap()
        .into_synapse()
        .unwrap();
    assert!(synapse.is_timeout());
    assert_eq!(
        synapse.dendrite.status_message.as_deref(),
        Some("Timedout after 0.2 seconds.")
    );
    assert!(synapse.dendrite.process_time.unwrap() >= 0.2);
}

#[tokio::test]
async fn unparsable_answer_is_422() {
    let (addr, _server) = spawn_garbage_server().unwrap();
    let target = AxonInfo::new("127.0.0.1", addr.port(), "garbage");
    let dendrite = dendrite();
    let synapse = dendrite
        .call(&target, Synapse::new(Dummy::new(1)), Duration::from_secs(5), false)
        .await
        .unwrap()
        .into_synapse()
        .unwrap();
    assert_eq!(synapse.dendrite.status_code, Some(422));
    assert!(synapse
        .dendrite
        .status_message
        .unwrap()
        .starts_with("Failed to parse response object with error:"));
}

#[tokio::test]
async fn error_status_overrides_claimed_success() {
    let (addr, _server) = spawn_failing_server().unwrap();
    let target = AxonInfo::new("127.0.0.1", addr.port(), "liar");
    let dendrite = dendrite();
    let synapse = dendrite
        .call(&target, Synapse::new(Dummy::new(1)), Duration::from_secs(5), false)
        .await
        .unwrap()
        .into_synapse()
        .unwrap();
    assert!(!synapse.is_success());
    assert_eq!(synapse.dendrite.status_code, Some(500));
    assert_eq!(
        synapse.dendrite.status_message.as_deref(),
        Some("Internal Server Error")
    );
    assert_eq!(synapse.payload.output, None);
}

#[tokio::test]
async fn own_external_ip_is_reached_over_loopback() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let config = DendriteConfig {
        external_ip: Some("203.0.113.5".to_string()),
        ..DendriteConfig::default()
    };
    let dendrite = Dendrite::new(Arc::new(Keypair::new()), config);
    let published = AxonInfo::new("203.0.113.5", axon.info.port, &axon.info.hotkey);

    let synapse = dendrite
        .call(&published, Synapse::new(Dummy::new(4)), Duration::from_secs(5), false)
        .await
        .unwrap()
        .into_synapse()
        .unwrap();
    assert_eq!(synapse.dendrite.status_code, Some(200));
    assert_eq!(synapse.dendrite.ip.as_deref(), Some("203.0.113.5"));
    assert_eq!(synapse.axon.ip.as_deref(), Some("203.0.113.5"));
}

#[tokio::test]
#[serial]
async fn history_keeps_headers_only() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let (silent, _server) = spawn_silent_server().await.unwrap();
    let closed = closed_port().unwrap();
    let dendrite = dendrite();
    let secret = 987_654_321;

    for target in [
        axon.info.clone(),
        AxonInfo::new("127.0.0.1", silent.port(), "silent"),
        AxonInfo::new("127.0.0.1", closed, "nobody"),
    ] {
        dendrite
            .call(&target, Synapse::new(Dummy::new(secret)), Duration::from_millis(300), false)
            .await
            .unwrap();
    }

    let history = dendrite.history();
    let codes: Vec<_> = history
        .iter()
        .map(|entry| entry.dendrite.status_code)
        .collect();
    assert_eq!(codes, vec![Some(200), Some(408), Some(503)]);
    for entry in &history {
        assert_eq!(entry.name.as_deref(), Some("Dummy"));
        assert!(entry.body_hash.is_some());
        let json = serde_json::to_string(entry).unwrap();
        assert!(!json.contains(&secret.to_string()));
        assert!(!json.contains(&(secret * 2).to_string()));
    }

    dendrite.clear_history();
    assert!(dendrite.history().is_empty());
}

#[tokio::test]
async fn history_is_bounded() {
    let port = closed_port().unwrap();
    let target = AxonInfo::new("127.0.0.1", port, "nobody");
    let config = DendriteConfig {
        history_capacity: 2,
        ..DendriteConfig::default()
    };
    let dendrite = Dendrite::new(Arc::new(Keypair::new()), config);
    let mut nonces = vec![];
    for input in 0..3 {
        let synapse = dendrite
            .call(&target, Synapse::new(Dummy::new(input)), Duration::from_secs(1), false)
            .await
            .unwrap()
            .into_synapse()
            .unwrap();
        nonces.push(synapse.dendrite.nonce);
    }
    let kept: Vec<_> = dendrite
        .history()
        .iter()
        .map(|entry| entry.dendrite.nonce)
        .collect();
    assert_eq!(kept, nonces[1..].to_vec());
}
