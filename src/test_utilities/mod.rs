//! Payloads and local servers shared by the unit tests, the integration tests,
//! the benchmark and the demo binary.
use crate::error::AxonError;
use crate::keypair::Keypair;
use crate::networking::axon::{Axon, ServingAxon};
use crate::networking::synapse::{Payload, StreamingPayload, Synapse};
use crate::settings::AxonConfig;
use crate::util::LOOPBACK;
use crate::SynapseFields;
use crate::Result;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use warp::Filter;

/// Doubles `input` into `output`. `input` may not change after creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, SynapseFields)]
pub struct Dummy {
    #[synapse(frozen)]
    pub input: u64,
    pub output: Option<u64>,
}

impl Dummy {
    pub fn new(input: u64) -> Self {
        Dummy {
            input,
            output: None,
        }
    }
}

impl Payload for Dummy {
    type Output = Option<u64>;

    fn deserialize_synapse(synapse: Synapse<Self>) -> Self::Output {
        synapse.payload.output
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, SynapseFields)]
#[synapse(frozen)]
pub struct FrozenDummy {
    pub value: String,
}

impl Payload for FrozenDummy {
    type Output = Synapse<Self>;

    fn deserialize_synapse(synapse: Synapse<Self>) -> Self::Output {
        synapse
    }
}

/// Text streamed back one newline terminated word at a time.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, SynapseFields)]
pub struct Words {
    #[synapse(frozen)]
    pub text: String,
    pub completion: Vec<String>,
    #[serde(skip)]
    #[synapse(frozen)]
    pending: Vec<u8>,
}

impl Words {
    pub fn new(text: &str) -> Self {
        Words {
            text: text.to_string(),
            ..Words::default()
        }
    }
}

impl Payload for Words {
    type Output = Vec<String>;
    const IS_STREAMING: bool = true;

    fn deserialize_synapse(synapse: Synapse<Self>) -> Self::Output {
        synapse.payload.completion
    }
}

impl StreamingPayload for Words {
    type Chunk = String;

    fn process_streaming_chunk(&mut self, bytes: Bytes) -> Vec<String> {
        self.pending.extend_from_slice(&bytes);
        let mut words = vec![];
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let word = String::from_utf8_lossy(&line[..end]).to_string();
            self.completion.push(word.clone());
            words.push(word);
        }
        words
    }
}

/// Installs a fmt subscriber writing through the test harness. Safe to call
/// more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn local_axon_config() -> AxonConfig {
    AxonConfig {
        ip: LOOPBACK.to_string(),
        port: 0,
        ..AxonConfig::default()
    }
}

/// Handler for [`Dummy`]: doubles the input and tries to clobber it.
pub async fn double(mut synapse: Synapse<Dummy>) -> std::result::Result<Synapse<Dummy>, AxonError> {
    synapse.payload.output = Some(synapse.payload.input * 2);
    synapse.payload.input = 0;
    Ok(synapse)
}

/// Handler for [`Words`]: one line per whitespace separated word.
pub fn spell(synapse: Synapse<Words>) -> impl Stream<Item = Bytes> + Send + 'static {
    let words: Vec<String> = synapse
        .payload
        .text
        .split_whitespace()
        .map(|word| format!("{}\n", word))
        .collect();
    async_stream::stream! {
        for word in words {
            tokio::time::sleep(Duration::from_millis(5)).await;
            yield Bytes::from(word);
        }
    }
}

/// An axon with a fresh key serving [`Dummy`] (answered after `delay`),
/// [`FrozenDummy`] and the streaming [`Words`]. Must run inside a runtime.
pub fn spawn_echo_axon(delay: Duration) -> Result<ServingAxon> {
    echo_axon(delay, Axon::new(Arc::new(Keypair::new()), local_axon_config())).serve()
}

/// Attach the echo handlers to an existing axon.
pub fn echo_axon(delay: Duration, axon: Axon) -> Axon {
    axon.attach::<Dummy, _, _>(move |synapse| async move {
        tokio::time::sleep(delay).await;
        double(synapse).await
    })
    .attach::<FrozenDummy, _, _>(|mut synapse: Synapse<FrozenDummy>| async move {
        synapse.payload.value = "changed by the axon".to_string();
        Ok::<_, AxonError>(synapse)
    })
    .attach_stream::<Words, _, _>(spell)
}

/// Accepts connections and never answers.
pub async fn spawn_silent_server() -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind((LOOPBACK, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let mut open = vec![];
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });
    Ok((addr, handle))
}

/// Answers every request with `200` and a body that is not JSON.
pub fn spawn_garbage_server() -> Result<(SocketAddr, JoinHandle<()>)> {
    let routes = warp::any().map(|| "definitely not json");
    let (addr, server) = warp::serve(routes).try_bind_ephemeral(([127, 0, 0, 1], 0))?;
    Ok((addr, tokio::spawn(server)))
}

/// Answers every request with a 500 whose headers still claim success.
pub fn spawn_failing_server() -> Result<(SocketAddr, JoinHandle<()>)> {
    let routes = warp::any().map(|| {
        let reply = warp::reply::with_status("{}", warp::http::StatusCode::INTERNAL_SERVER_ERROR);
        let reply = warp::reply::with_header(reply, "x-axon-status-code", "200");
        warp::reply::with_header(reply, "x-axon-status-message", "Success")
    });
    let (addr, server) = warp::serve(routes).try_bind_ephemeral(([127, 0, 0, 1], 0))?;
    Ok((addr, tokio::spawn(server)))
}

/// A loopback port nothing listens on.
pub fn closed_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((LOOPBACK, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
