use ctor::ctor;
use std::sync::Arc;
use std::time::Duration;
use synapse_rpc::test_utilities::{init_tracing, spawn_echo_axon, Dummy};
use synapse_rpc::{Dendrite, DendriteConfig, Error, Keypair, Synapse};

#[ctor]
fn init() {
    init_tracing();
}

fn dendrite() -> Dendrite {
    Dendrite::new(Arc::new(Keypair::new()), DendriteConfig::default())
}

#[tokio::test]
async fn session_is_lazy_and_reused() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();
    assert!(!dendrite.has_session());
    assert_eq!(dendrite.sessions_opened(), 0);

    for input in 0..3 {
        dendrite
            .forward(axon.info.clone(), &Synapse::new(Dummy::new(input)), &dendrite.options())
            .await
            .unwrap();
    }
    assert!(dendrite.has_session());
    assert_eq!(dendrite.sessions_opened(), 1);

    assert!(dendrite.aclose_session().await);
    assert!(!dendrite.close_session());
    assert!(!dendrite.has_session());

    dendrite
        .forward(axon.info.clone(), &Synapse::new(Dummy::new(1)), &dendrite.options())
        .await
        .unwrap();
    assert_eq!(dendrite.sessions_opened(), 2);
}

#[tokio::test]
async fn scoped_block_releases_the_session() {
    let axon = spawn_echo_axon(Duration::from_millis(0)).unwrap();
    let dendrite = dendrite();
    let info = axon.info.clone();

    let output = dendrite
        .scoped(|dendrite| async move {
            let reply = dendrite
                .forward(info, &Synapse::new(Dummy::new(6)), &dendrite.options())
                .await?;
            assert!(dendrite.has_session());
            Ok::<_, Error>(reply.into_one().and_then(|reply| reply.into_output()))
        })
        .await
        .unwrap();

    assert_eq!(output, Some(Some(12)));
    assert!(!dendrite.has_session());
    assert_eq!(dendrite.sessions_opened(), 1);
}

#[test]
fn query_blocks_from_synchronous_code() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let axon = runtime
        .block_on(async { spawn_echo_axon(Duration::from_millis(0)) })
        .unwrap();
    let dendrite = dendrite();

    let replies = dendrite
        .query(
            vec![axon.info.clone(), axon.info.clone()],
            &Synapse::new(Dummy::new(4)),
            &dendrite.options(),
        )
        .unwrap();
    let outputs: Vec<_> = replies
        .into_vec()
        .into_iter()
        .map(|reply| reply.into_output().unwrap())
        .collect();
    assert_eq!(outputs, vec![Some(8), Some(8)]);
    // query releases what it opened
    assert!(!dendrite.has_session());

    let again = dendrite
        .query(axon.info.clone(), &Synapse::new(Dummy::new(5)), &dendrite.options())
        .unwrap();
    assert_eq!(again.into_one().unwrap().into_output(), Some(Some(10)));
    assert_eq!(dendrite.sessions_opened(), 2);

    drop(dendrite);
    drop(axon);
    runtime.shutdown_timeout(Duration::from_secs(1));
}

#[tokio::test]
async fn query_refuses_to_block_a_runtime() {
    let dendrite = dendrite();
    let target = synapse_rpc::AxonInfo::new("127.0.0.1", 9, "nobody");
    let result = dendrite.query(target, &Synapse::new(Dummy::new(1)), &dendrite.options());
    assert!(matches!(result, Err(Error::Runtime(_))));
    assert!(!dendrite.has_session());
}
