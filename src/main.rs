/*!
# Synapse RPC demo

Starts a local axon serving the test payloads and sends it a few envelopes:
one unary call, one fan-out including an unreachable peer, and one streaming
call.

```bash
RUST_LOG=synapse_rpc=debug cargo run
```

Settings are read from an optional `config.toml` next to the working
directory and `SYNAPSE_*` environment variables, e.g.
`SYNAPSE_DENDRITE__TIMEOUT=2`.
*/

use futures::StreamExt;
use std::sync::Arc;
use synapse_rpc::test_utilities::{closed_port, echo_axon, Dummy, Words};
use synapse_rpc::{
    Axon, AxonInfo, Dendrite, Keypair, Reply, Settings, StreamItem, Synapse,
};
use std::time::Duration;
use tracing::{event, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> synapse_rpc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load("config")?;
    let mut axon_config = settings.axon.clone();
    if axon_config.external_ip.is_none() {
        axon_config.ip = "127.0.0.1".to_string();
    }
    let axon = echo_axon(
        Duration::from_millis(20),
        Axon::new(Arc::new(Keypair::new()), axon_config),
    )
    .serve()?;

    let dendrite = Dendrite::new(Arc::new(Keypair::new()), settings.dendrite.clone());
    event!(Level::INFO, "{} calling {}", dendrite, axon.info);
    let options = dendrite.options();

    dendrite
        .scoped(|dendrite| async move {
            let reply = dendrite
                .forward(axon.info.clone(), &Synapse::new(Dummy::new(21)), &options)
                .await?;
            if let Some(Reply::Output(output)) = reply.into_one() {
                event!(Level::INFO, "unary answer: {:?}", output);
            }

            let unreachable = AxonInfo::new("127.0.0.1", closed_port()?, "nobody");
            let replies = dendrite
                .forward(
                    vec![axon.info.clone(), unreachable],
                    &Synapse::new(Dummy::new(2)),
                    &options.clone().deserialize(false),
                )
                .await?;
            for reply in replies.into_vec() {
                if let Some(synapse) = reply.into_synapse() {
                    event!(Level::INFO, "fan-out answer: {}", synapse);
                }
            }

            let mut stream = dendrite.call_stream(
                &axon.info,
                Synapse::new(Words::new("signals travel along the axon")),
                options.timeout,
                true,
            )?;
            while let Some(item) = stream.next().await {
                match item {
                    StreamItem::Chunk(word) => event!(Level::INFO, "chunk: {}", word),
                    StreamItem::Done(reply) => {
                        event!(Level::INFO, "stream done: {:?}", reply.into_output())
                    }
                }
            }
            Ok::<_, synapse_rpc::Error>(())
        })
        .await?;

    event!(Level::INFO, "{} calls in history", dendrite.history().len());
    Ok(())
}
