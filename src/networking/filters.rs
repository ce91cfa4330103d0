use crate::error::AxonError;
use crate::networking::axon::AxonState;
use crate::networking::synapse::{Payload, StreamingPayload, Synapse};
use bytes::Bytes;
use futures::{Future, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use warp::reply::Response;
use warp::{Filter, Rejection};

use super::handlers::{stream_handler, unary_handler};

/// POST /{P::NAME} answered with a JSON envelope.
pub fn unary_route_filter<P, F, Fut>(
    state: Arc<AxonState>,
    handler: F,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone
where
    P: Payload,
    F: Fn(Synapse<P>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Synapse<P>, AxonError>> + Send + 'static,
{
    synapse_route::<P>()
        .and(with_state(state))
        .and(with_handler(handler))
        .and_then(unary_handler::<P, F, Fut>)
}

/// POST /{P::NAME} answered with a byte stream.
pub fn stream_route_filter<P, F, S>(
    state: Arc<AxonState>,
    handler: F,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone
where
    P: StreamingPayload,
    F: Fn(Synapse<P>) -> S + Clone + Send + Sync + 'static,
    S: Stream<Item = Bytes> + Send + 'static,
{
    synapse_route::<P>()
        .and(with_state(state))
        .and(with_handler(handler))
        .and_then(stream_handler::<P, F, S>)
}

/// path, headers and raw body of an incoming envelope.
fn synapse_route<P: Payload>(
) -> impl Filter<Extract = (warp::http::HeaderMap, Bytes), Error = Rejection> + Clone {
    warp::post()
        .and(warp::path(P::NAME))
        .and(warp::path::end())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
}

/// inject axon state
fn with_state(
    state: Arc<AxonState>,
) -> impl Filter<Extract = (Arc<AxonState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// inject the application handler
fn with_handler<F>(handler: F) -> impl Filter<Extract = (F,), Error = Infallible> + Clone
where
    F: Clone + Send + Sync + 'static,
{
    warp::any().map(move || handler.clone())
}
