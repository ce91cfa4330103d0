use crate::error::AxonError;
use crate::networking::axon::AxonState;
use crate::networking::synapse::{Payload, StreamingPayload, Synapse, SynapseHeaders};
use bytes::Bytes;
use futures::{Future, Stream};
use std::sync::Arc;
use std::time::Instant;
use tracing::{event, Level};
use warp::http::HeaderMap;
use warp::reply::Response;
use warp::Rejection;

pub async fn unary_handler<P, F, Fut>(
    headers: HeaderMap,
    body: Bytes,
    state: Arc<AxonState>,
    handler: F,
) -> Result<Response, Rejection>
where
    P: Payload,
    F: Fn(Synapse<P>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Synapse<P>, AxonError>> + Send + 'static,
{
    let start = Instant::now();
    let request = SynapseHeaders::from_header_map(&headers);
    log_request(&request);

    let synapse = match state.admit::<P>(&request, &body).await {
        Ok(synapse) => synapse,
        Err(err) => return Ok(state.reject(request, err, start)),
    };
    let received = synapse.headers();
    match handler(synapse).await {
        Ok(synapse) => Ok(state.respond(synapse, start)),
        Err(err) => Ok(state.reject(received, err, start)),
    }
}

pub async fn stream_handler<P, F, S>(
    headers: HeaderMap,
    body: Bytes,
    state: Arc<AxonState>,
    handler: F,
) -> Result<Response, Rejection>
where
    P: StreamingPayload,
    F: Fn(Synapse<P>) -> S + Clone + Send + Sync + 'static,
    S: Stream<Item = Bytes> + Send + 'static,
{
    let start = Instant::now();
    let request = SynapseHeaders::from_header_map(&headers);
    log_request(&request);

    match state.admit::<P>(&request, &body).await {
        Ok(synapse) => {
            let received = synapse.headers();
            Ok(state.respond_stream(received, handler(synapse), start))
        }
        Err(err) => Ok(state.reject(request, err, start)),
    }
}

fn log_request(request: &SynapseHeaders) {
    event!(
        Level::DEBUG,
        "axon | <-- | {} B | {} | {} | {}:{} | 200 | Success",
        request.total_size.unwrap_or_default(),
        request.name.as_deref().unwrap_or_default(),
        request.dendrite.hotkey.as_deref().unwrap_or_default(),
        request.dendrite.ip.as_deref().unwrap_or_default(),
        request.dendrite.port.unwrap_or_default()
    );
}
