use ctor::ctor;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_rpc::test_utilities::{
    closed_port, init_tracing, spawn_echo_axon, spawn_silent_server, Dummy,
};
use synapse_rpc::{
    AxonInfo, CallOptions, Dendrite, DendriteConfig, Error, Keypair, Responses, StaticDirectory,
    Synapse,
};

#[ctor]
fn init() {
    init_tracing();
}

fn dendrite() -> Dendrite {
    Dendrite::new(Arc::new(Keypair::new()), DendriteConfig::default())
}

fn options(timeout: Duration) -> CallOptions {
    CallOptions::default().with_timeout(timeout).deserialize(false)
}

#[tokio::test]
async fn result_shape_follows_targets() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();
    let synapse = Synapse::new(Dummy::new(1));

    let one = dendrite
        .forward(axon.info.clone(), &synapse, &options(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(matches!(one, Responses::One(_)));

    let single_list = dendrite
        .forward(vec![axon.info.clone()], &synapse, &options(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(matches!(single_list, Responses::Many(ref replies) if replies.len() == 1));

    let none = dendrite
        .forward(Vec::<AxonInfo>::new(), &synapse, &options(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn results_keep_input_order_and_are_independent() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let closed = AxonInfo::new("127.0.0.1", closed_port().unwrap(), "nobody");
    let dendrite = dendrite();
    let template = Synapse::new(Dummy::new(3));

    let replies = dendrite
        .forward(
            vec![closed.clone(), axon.info.clone(), axon.info.clone()],
            &template,
            &options(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .into_vec();
    let mut synapses: Vec<_> = replies
        .into_iter()
        .map(|reply| reply.into_synapse().unwrap())
        .collect();

    assert_eq!(synapses[0].dendrite.status_code, Some(503));
    assert_eq!(synapses[1].dendrite.status_code, Some(200));
    assert_eq!(synapses[2].dendrite.status_code, Some(200));
    assert_eq!(synapses[0].axon.port, Some(closed.port));

    // every target got its own signed clone
    assert_ne!(synapses[1].dendrite.nonce, synapses[2].dendrite.nonce);
    synapses[1].payload.output = Some(1000);
    assert_eq!(synapses[2].payload.output, Some(6));
    assert_eq!(template.payload.output, None);
    assert!(template.dendrite.nonce.is_none());
}

#[tokio::test]
#[serial]
async fn slow_peer_does_not_hold_up_fast_peer() {
    let fast = spawn_echo_axon(Duration::from_millis(50)).unwrap();
    let (silent, _server) = spawn_silent_server().await.unwrap();
    let slow = AxonInfo::new("127.0.0.1", silent.port(), "silent");
    let dendrite = dendrite();

    let start = Instant::now();
    let replies = dendrite
        .forward(
            vec![slow, fast.info.clone()],
            &Synapse::new(Dummy::new(1)),
            &options(Duration::from_millis(100)),
        )
        .await
        .unwrap()
        .into_vec();
    let elapsed = start.elapsed();

    let codes: Vec<_> = replies
        .iter()
        .map(|reply| reply.as_synapse().unwrap().dendrite.status_code)
        .collect();
    assert_eq!(codes, vec![Some(408), Some(200)]);
    assert!(elapsed >= Duration::from_millis(100));
    // run one after the other this would take at least 150 ms
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);

    let fast_time = replies[1].as_synapse().unwrap().dendrite.process_time.unwrap();
    assert!(fast_time < 0.1, "fast call took {}", fast_time);
}

#[tokio::test]
#[serial]
async fn sequential_mode_adds_up() {
    let axon = spawn_echo_axon(Duration::from_millis(100)).unwrap();
    let dendrite = dendrite();

    let start = Instant::now();
    let replies = dendrite
        .forward(
            vec![axon.info.clone(), axon.info.clone()],
            &Synapse::new(Dummy::new(1)),
            &options(Duration::from_secs(5)).concurrent(false),
        )
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(replies.len(), 2);

    let start = Instant::now();
    dendrite
        .forward(
            vec![axon.info.clone(), axon.info.clone()],
            &Synapse::new(Dummy::new(1)),
            &options(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn deserialized_fan_out() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let closed = AxonInfo::new("127.0.0.1", closed_port().unwrap(), "nobody");
    let dendrite = dendrite();
    let outputs: Vec<_> = dendrite
        .forward(
            vec![axon.info.clone(), closed],
            &Synapse::new(Dummy::new(8)),
            &dendrite.options(),
        )
        .await
        .unwrap()
        .into_vec()
        .into_iter()
        .map(|reply| reply.into_output().unwrap())
        .collect();
    assert_eq!(outputs, vec![Some(16), None]);
}

#[tokio::test]
async fn hotkeys_resolve_through_directory() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let directory = StaticDirectory::new(vec![axon.info.clone()]);
    let dendrite = dendrite();
    let synapse = Synapse::new(Dummy::new(2));

    let replies = dendrite
        .forward_to_hotkeys(&directory, &[axon.info.hotkey.as_str()], &synapse, &dendrite.options())
        .await
        .unwrap();
    assert_eq!(replies.into_vec().pop().unwrap().into_output(), Some(Some(4)));

    let unknown = dendrite
        .forward_to_hotkeys(
            &directory,
            &[axon.info.hotkey.as_str(), "stranger"],
            &synapse,
            &dendrite.options(),
        )
        .await;
    assert!(matches!(unknown, Err(Error::UnknownPeer(ref peer)) if peer == "stranger"));
    // nothing was sent for the failed fan-out
    assert_eq!(dendrite.history().len(), 1);
}
