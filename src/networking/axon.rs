use crate::crypto::{address_from_public_key, decode_signature, verify, Signer};
use crate::error::AxonError;
use crate::networking::filters::{stream_route_filter, unary_route_filter};
use crate::networking::synapse::{Payload, StreamingPayload, Synapse, SynapseHeaders, TerminalInfo};
use crate::peer::{format_endpoint, AxonInfo};
use crate::settings::AxonConfig;
use crate::util::LOOPBACK;
use crate::{Error, Result, VERSION_AS_INT};
use bytes::Bytes;
use futures::{Future, Stream};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{event, Level};
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;
use warp::Filter;

pub type Blacklist = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// State shared by every route of one axon.
pub struct AxonState {
    signer: Arc<dyn Signer>,
    config: AxonConfig,
    uuid: String,
    port: AtomicU16,
    nonces: RwLock<HashMap<String, u64>>,
    blacklist: std::sync::RwLock<Option<Blacklist>>,
}

impl AxonState {
    pub fn hotkey(&self) -> String {
        self.signer.address()
    }

    pub fn info(&self) -> AxonInfo {
        let ip = match &self.config.external_ip {
            Some(ip) => ip.clone(),
            None if self.config.ip == "0.0.0.0" => LOOPBACK.to_string(),
            None => self.config.ip.clone(),
        };
        let port = self
            .config
            .external_port
            .unwrap_or_else(|| self.port.load(Ordering::SeqCst));
        AxonInfo::new(&ip, port, &self.hotkey())
    }

    /// Parse an incoming request and run every check the config asks for.
    pub(crate) async fn admit<P: Payload>(
        &self,
        request: &SynapseHeaders,
        body: &Bytes,
    ) -> std::result::Result<Synapse<P>, AxonError> {
        let hotkey = request
            .dendrite
            .hotkey
            .clone()
            .ok_or(AxonError::MissingHeader("x-dendrite-hotkey"))?;

        if self.config.verify {
            let expected = request
                .body_hash
                .as_deref()
                .ok_or(AxonError::MissingHeader("x-synapse-body-hash"))?;
            if crate::crypto::hash_hex(body) != expected {
                return Err(AxonError::BodyHash);
            }
        }

        if self.is_blacklisted(&hotkey) {
            return Err(AxonError::Blacklisted(hotkey));
        }

        let payload: P =
            serde_json::from_slice(body).map_err(|err| AxonError::InvalidBody(err.to_string()))?;
        let synapse = Synapse::from_parts(request.clone(), payload);

        if self.config.verify {
            self.verify(&synapse, &hotkey).await?;
        }
        Ok(synapse)
    }

    fn is_blacklisted(&self, hotkey: &str) -> bool {
        self.blacklist
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(false, |blacklist| blacklist(hotkey))
    }

    async fn verify<P: Payload>(
        &self,
        synapse: &Synapse<P>,
        hotkey: &str,
    ) -> std::result::Result<(), AxonError> {
        let own = self.hotkey();
        let recipient = synapse.axon.hotkey.clone().unwrap_or_default();
        if recipient != own {
            return Err(AxonError::WrongRecipient(recipient));
        }

        let pubkey = synapse
            .dendrite
            .pubkey
            .as_deref()
            .and_then(|pubkey| hex::decode(pubkey).ok())
            .ok_or(AxonError::MissingHeader("x-dendrite-pubkey"))?;
        if address_from_public_key(&pubkey).as_deref() != Some(hotkey) {
            return Err(AxonError::PubkeyMismatch(hotkey.to_string()));
        }

        let signature = synapse
            .dendrite
            .signature
            .as_deref()
            .and_then(decode_signature)
            .ok_or(AxonError::MissingHeader("x-dendrite-signature"))?;
        if !verify(synapse.signature_message().as_bytes(), &signature, &pubkey) {
            return Err(AxonError::BadSignature(hotkey.to_string()));
        }

        let nonce = synapse
            .dendrite
            .nonce
            .ok_or(AxonError::MissingHeader("x-dendrite-nonce"))?;
        let key = format!(
            "{}:{}",
            hotkey,
            synapse.dendrite.uuid.as_deref().unwrap_or_default()
        );
        let mut nonces = self.nonces.write().await;
        if let Some(last) = nonces.get(&key) {
            if nonce <= *last {
                return Err(AxonError::StaleNonce { nonce, last: *last });
            }
        }
        nonces.insert(key, nonce);
        Ok(())
    }

    /// Our side of the call, as sent back in the `x-axon-*` headers.
    fn terminal(&self, status_code: u16, status_message: String, start: Instant) -> TerminalInfo {
        let info = self.info();
        TerminalInfo {
            status_code: Some(status_code),
            status_message: Some(status_message),
            process_time: Some(start.elapsed().as_secs_f64()),
            ip: Some(info.ip),
            port: Some(info.port),
            version: Some(VERSION_AS_INT),
            uuid: Some(self.uuid.clone()),
            hotkey: Some(info.hotkey),
            pubkey: Some(hex::encode(self.signer.public_key())),
            ..TerminalInfo::default()
        }
    }

    pub(crate) fn respond<P: Payload>(&self, mut synapse: Synapse<P>, start: Instant) -> Response {
        synapse.axon = self.terminal(200, "Success".to_string(), start);
        log_response(&synapse.headers());
        match serde_json::to_vec(&synapse.payload) {
            Ok(body) => build_response(StatusCode::OK, &synapse.headers(), Body::from(body)),
            Err(err) => self.reject(
                synapse.headers(),
                AxonError::Handler(err.to_string()),
                start,
            ),
        }
    }

    pub(crate) fn respond_stream<S>(&self, mut request: SynapseHeaders, chunks: S, start: Instant) -> Response
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        use futures::StreamExt;
        request.axon = self.terminal(200, "Success".to_string(), start);
        log_response(&request);
        let body = Body::wrap_stream(chunks.map(Ok::<Bytes, std::convert::Infallible>));
        build_response(StatusCode::OK, &request, body)
    }

    pub(crate) fn reject(&self, mut request: SynapseHeaders, err: AxonError, start: Instant) -> Response {
        let code = err.status_code();
        request.axon = self.terminal(code, err.to_string(), start);
        log_response(&request);
        let body = serde_json::json!({ "message": err.to_string() }).to_string();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        build_response(status, &request, Body::from(body))
    }
}

/// Server side of the protocol. Payload types are attached one route each
/// and served under `POST /{P::NAME}`.
pub struct Axon {
    state: Arc<AxonState>,
    routes: Vec<BoxedFilter<(Response,)>>,
}

impl Axon {
    pub fn new(signer: Arc<dyn Signer>, config: AxonConfig) -> Self {
        let port = config.port;
        Axon {
            state: Arc::new(AxonState {
                signer,
                config,
                uuid: Uuid::new_v4().to_string(),
                port: AtomicU16::new(port),
                nonces: RwLock::new(HashMap::new()),
                blacklist: std::sync::RwLock::new(None),
            }),
            routes: vec![],
        }
    }

    /// Refuse every request whose dendrite hotkey `blacklist` returns true for.
    /// Applies to every route, whether attached before or after this call.
    pub fn blacklist<F>(self, blacklist: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        *self
            .state
            .blacklist
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(blacklist));
        self
    }

    pub fn attach<P, F, Fut>(mut self, handler: F) -> Self
    where
        P: Payload,
        F: Fn(Synapse<P>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Synapse<P>, AxonError>> + Send + 'static,
    {
        self.routes
            .push(unary_route_filter::<P, F, Fut>(self.state.clone(), handler).boxed());
        self
    }

    /// Attach a handler answering with a byte stream.
    pub fn attach_stream<P, F, S>(mut self, handler: F) -> Self
    where
        P: StreamingPayload,
        F: Fn(Synapse<P>) -> S + Clone + Send + Sync + 'static,
        S: Stream<Item = Bytes> + Send + 'static,
    {
        self.routes
            .push(stream_route_filter::<P, F, S>(self.state.clone(), handler).boxed());
        self
    }

    pub fn info(&self) -> AxonInfo {
        self.state.info()
    }

    /// All attached routes as one filter.
    pub fn routes(&self) -> BoxedFilter<(Response,)> {
        let not_found = warp::any()
            .and_then(|| async { Err::<Response, _>(warp::reject::not_found()) })
            .boxed();
        self.routes
            .iter()
            .cloned()
            .fold(not_found, |routes, route| route.or(routes).unify().boxed())
    }

    /// Bind the configured address (port 0 picks a free one) and serve on
    /// the current tokio runtime.
    pub fn serve(self) -> Result<ServingAxon> {
        let bind = format_endpoint(&self.state.config.ip, self.state.config.port);
        let addr: SocketAddr = bind.parse().map_err(|_| Error::Address(bind))?;
        let (addr, server) = warp::serve(self.routes()).try_bind_ephemeral(addr)?;
        self.state.port.store(addr.port(), Ordering::SeqCst);
        let info = self.state.info();
        event!(Level::INFO, "axon {} serving on {}", info.hotkey, addr);
        Ok(ServingAxon {
            addr,
            info,
            handle: tokio::spawn(server),
        })
    }
}

/// A running axon. Dropping it stops the server.
pub struct ServingAxon {
    pub addr: SocketAddr,
    pub info: AxonInfo,
    handle: JoinHandle<()>,
}

impl ServingAxon {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for ServingAxon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_response(status: StatusCode, headers: &SynapseHeaders, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers.to_header_map());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn log_response(headers: &SynapseHeaders) {
    event!(
        Level::DEBUG,
        "axon | --> | {} B | {} | {} | {}:{} | {} | {}",
        headers.total_size.unwrap_or_default(),
        headers.name.as_deref().unwrap_or_default(),
        headers.dendrite.hotkey.as_deref().unwrap_or_default(),
        headers.dendrite.ip.as_deref().unwrap_or_default(),
        headers.dendrite.port.unwrap_or_default(),
        headers.axon.status_code.unwrap_or_default(),
        headers.axon.status_message.as_deref().unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;
    use crate::networking::dendrite::Dendrite;
    use crate::settings::DendriteConfig;
    use crate::test_utilities::Dummy;
    use std::time::Duration;

    fn axon_config() -> AxonConfig {
        AxonConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            ..AxonConfig::default()
        }
    }

    fn signed(axon: &AxonInfo, input: u64) -> (SynapseHeaders, Bytes) {
        let dendrite = Dendrite::new(Arc::new(Keypair::new()), DendriteConfig::default());
        let synapse = dendrite
            .preprocess(axon, Synapse::new(Dummy::new(input)), Duration::from_secs(1))
            .unwrap();
        (synapse.headers(), Bytes::from(synapse.body().unwrap()))
    }

    #[tokio::test]
    async fn admit_accepts_signed_request_once_test() {
        let axon = Axon::new(Arc::new(Keypair::new()), axon_config());
        let (headers, body) = signed(&axon.info(), 3);

        let synapse = axon.state.admit::<Dummy>(&headers, &body).await.unwrap();
        assert_eq!(synapse.payload.input, 3);

        let replay = axon.state.admit::<Dummy>(&headers, &body).await.unwrap_err();
        assert_eq!(replay.status_code(), 401);
        assert!(matches!(replay, AxonError::StaleNonce { .. }));
    }

    #[tokio::test]
    async fn admit_rejects_tampering_test() {
        let axon = Axon::new(Arc::new(Keypair::new()), axon_config());
        let (headers, _) = signed(&axon.info(), 3);
        let forged = Bytes::from(serde_json::to_vec(&Dummy::new(4)).unwrap());
        let err = axon.state.admit::<Dummy>(&headers, &forged).await.unwrap_err();
        assert_eq!(err, AxonError::BodyHash);

        let (mut headers, body) = signed(&axon.info(), 3);
        headers.dendrite.uuid = Some("someone-elses-uuid".to_string());
        let err = axon.state.admit::<Dummy>(&headers, &body).await.unwrap_err();
        assert!(matches!(err, AxonError::BadSignature(_)));

        let (mut headers, body) = signed(&axon.info(), 3);
        headers.dendrite.hotkey = Some(Keypair::new().address());
        let err = axon.state.admit::<Dummy>(&headers, &body).await.unwrap_err();
        assert!(matches!(err, AxonError::PubkeyMismatch(_)));
    }

    #[tokio::test]
    async fn admit_rejects_wrong_recipient_test() {
        let axon = Axon::new(Arc::new(Keypair::new()), axon_config());
        let other = AxonInfo::new("127.0.0.1", 1, &Keypair::new().address());
        let (headers, body) = signed(&other, 3);
        let err = axon.state.admit::<Dummy>(&headers, &body).await.unwrap_err();
        assert!(matches!(err, AxonError::WrongRecipient(_)));
    }

    #[tokio::test]
    async fn admit_without_verification_test() {
        let config = AxonConfig {
            verify: false,
            ..axon_config()
        };
        let axon = Axon::new(Arc::new(Keypair::new()), config);
        let other = AxonInfo::new("127.0.0.1", 1, "not-us");
        let (headers, body) = signed(&other, 3);
        assert!(axon.state.admit::<Dummy>(&headers, &body).await.is_ok());
        assert!(axon.state.admit::<Dummy>(&headers, &body).await.is_ok());
    }

    #[tokio::test]
    async fn blacklist_test() {
        let banned = Keypair::new();
        let banned_address = banned.address();
        let axon = Axon::new(Arc::new(Keypair::new()), axon_config())
            .blacklist(move |hotkey| hotkey == banned_address);

        let dendrite = Dendrite::new(Arc::new(banned), DendriteConfig::default());
        let synapse = dendrite
            .preprocess(&axon.info(), Synapse::new(Dummy::new(1)), Duration::from_secs(1))
            .unwrap();
        let body = Bytes::from(synapse.body().unwrap());
        let err = axon
            .state
            .admit::<Dummy>(&synapse.headers(), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn blacklist_after_attach_test() {
        let banned = Keypair::new();
        let banned_address = banned.address();
        let axon = Axon::new(Arc::new(Keypair::new()), axon_config())
            .attach::<Dummy, _, _>(|synapse| async move { Ok::<_, AxonError>(synapse) })
            .blacklist(move |hotkey| hotkey == banned_address);

        let dendrite = Dendrite::new(Arc::new(banned), DendriteConfig::default());
        let synapse = dendrite
            .preprocess(&axon.info(), Synapse::new(Dummy::new(1)), Duration::from_secs(1))
            .unwrap();
        let body = Bytes::from(synapse.body().unwrap());
        let err = axon
            .state
            .admit::<Dummy>(&synapse.headers(), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, AxonError::Blacklisted(_)));
    }

    #[test]
    fn info_test() {
        let keypair = Keypair::new();
        let address = keypair.address();
        let axon = Axon::new(Arc::new(keypair), AxonConfig::default());
        let info = axon.info();
        assert_eq!(info.ip, LOOPBACK);
        assert_eq!(info.port, crate::settings::DEFAULT_AXON_PORT);
        assert_eq!(info.hotkey, address);
    }
}
