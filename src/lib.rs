/*!
# Synapse RPC

Signed request/response messaging between peers of a decentralized network.

A `Dendrite` sends a `Synapse` (an application payload plus caller and callee
metadata) to one or many `Axon` servers, concurrently, and hands back the
completed envelopes. Failures never abort a fan-out: every target gets its
own status code (`503` unavailable, `408` timed out, `422` unparsable).

# Usage

```no_run
use std::sync::Arc;
use synapse_rpc::{
    CallOptions, Dendrite, DendriteConfig, Keypair, Payload, Synapse, SynapseFields,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, SynapseFields)]
struct Ping {
    #[synapse(frozen)]
    question: String,
    answer: Option<String>,
}

impl Payload for Ping {
    type Output = Option<String>;

    fn deserialize_synapse(synapse: Synapse<Self>) -> Self::Output {
        synapse.payload.answer
    }
}

#[tokio::main]
async fn main() -> synapse_rpc::Result<()> {
    let dendrite = Dendrite::new(Arc::new(Keypair::new()), DendriteConfig::default());
    let target = synapse_rpc::AxonInfo::new("10.0.0.2", 8091, "5Fq...hotkey");
    let ping = Synapse::new(Ping { question: "?".to_string(), answer: None });
    let reply = dendrite.forward(target, &ping, &CallOptions::default()).await?;
    println!("{:?}", reply.into_one().and_then(|reply| reply.into_output()));
    dendrite.close_session();
    Ok(())
}
```

See the `networking` module for the wire format.
*/
#[macro_use]
extern crate lazy_static;

extern crate self as synapse_rpc;

pub mod crypto;
pub mod error;
pub mod keypair;
pub mod networking;
pub mod peer;
pub mod settings;
pub mod test_utilities;
mod test_setup;
pub mod time;
pub mod util;

include!(concat!(env!("OUT_DIR"), "/constants.rs"));

pub use crate::crypto::Signer;
pub use crate::error::{AxonError, CallError, Error, Result};
pub use crate::keypair::Keypair;
pub use crate::networking::axon::{Axon, ServingAxon};
pub use crate::networking::dendrite::{
    CallOptions, Dendrite, Reply, Responses, StreamItem, SynapseStream, Targets,
};
pub use crate::networking::synapse;
pub use crate::networking::synapse::{
    FieldPolicy, Payload, StreamingPayload, Synapse, SynapseFields, SynapseHeaders, TerminalInfo,
};
pub use crate::peer::{AxonInfo, PeerDirectory, StaticDirectory};
pub use crate::settings::{AxonConfig, DendriteConfig, Settings};
pub use macros::SynapseFields;
