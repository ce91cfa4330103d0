use crate::crypto::{encode_signature, hash_hex, Signer};
use crate::error::CallError;
use crate::networking::external_ip::get_external_ip;
use crate::networking::history::{redact, CallHistory, HistoryGuard};
use crate::networking::session::{SessionManager, SessionRelease};
use crate::networking::synapse::{Payload, StreamingPayload, Synapse, SynapseHeaders, TerminalInfo};
use crate::peer::{AxonInfo, PeerDirectory};
use crate::settings::{seconds, DendriteConfig, DEFAULT_TIMEOUT};
use crate::time::create_nonce;
use crate::util::{format_url_string, LOOPBACK};
use crate::{Error, Result, VERSION_AS_INT};
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{event, warn, Level};
use url::Url;
use uuid::Uuid;

/// Per call knobs of [`Dendrite::forward`] and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub timeout: Duration,
    /// Hand back `P::Output` instead of the completed envelope.
    pub deserialize: bool,
    /// Drive all targets at once. When false they are called one after another.
    pub concurrent: bool,
    /// What the caller expects, if it said. Only checked against the payload
    /// type and the entry point.
    pub streaming: Option<bool>,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            timeout: seconds(DEFAULT_TIMEOUT),
            deserialize: true,
            concurrent: true,
            streaming: None,
        }
    }
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn deserialize(mut self, deserialize: bool) -> Self {
        self.deserialize = deserialize;
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }
}

/// One axon or a list of them. The shape is mirrored by [`Responses`].
#[derive(Debug, Clone)]
pub enum Targets {
    One(AxonInfo),
    Many(Vec<AxonInfo>),
}

impl Targets {
    pub fn is_one(&self) -> bool {
        matches!(self, Targets::One(_))
    }

    pub fn into_vec(self) -> Vec<AxonInfo> {
        match self {
            Targets::One(axon) => vec![axon],
            Targets::Many(axons) => axons,
        }
    }
}

impl From<AxonInfo> for Targets {
    fn from(axon: AxonInfo) -> Self {
        Targets::One(axon)
    }
}

impl From<&AxonInfo> for Targets {
    fn from(axon: &AxonInfo) -> Self {
        Targets::One(axon.clone())
    }
}

impl From<Vec<AxonInfo>> for Targets {
    fn from(axons: Vec<AxonInfo>) -> Self {
        Targets::Many(axons)
    }
}

impl From<&[AxonInfo]> for Targets {
    fn from(axons: &[AxonInfo]) -> Self {
        Targets::Many(axons.to_vec())
    }
}

#[derive(Debug)]
pub enum Responses<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Responses<T> {
    fn from_vec(mut items: Vec<T>, one: bool) -> Self {
        if one && items.len() == 1 {
            if let Some(item) = items.pop() {
                return Responses::One(item);
            }
        }
        Responses::Many(items)
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Responses::One(item) => vec![item],
            Responses::Many(items) => items,
        }
    }

    /// The single response of a one-target call.
    pub fn into_one(self) -> Option<T> {
        match self {
            Responses::One(item) => Some(item),
            Responses::Many(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Responses::One(_) => 1,
            Responses::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one call: the envelope itself, or what the payload type makes
/// of it when deserialization was requested.
pub enum Reply<P: Payload> {
    Synapse(Synapse<P>),
    Output(P::Output),
}

impl<P: Payload> Reply<P> {
    pub fn into_synapse(self) -> Option<Synapse<P>> {
        match self {
            Reply::Synapse(synapse) => Some(synapse),
            Reply::Output(_) => None,
        }
    }

    pub fn into_output(self) -> Option<P::Output> {
        match self {
            Reply::Output(output) => Some(output),
            Reply::Synapse(_) => None,
        }
    }

    pub fn as_synapse(&self) -> Option<&Synapse<P>> {
        match self {
            Reply::Synapse(synapse) => Some(synapse),
            Reply::Output(_) => None,
        }
    }
}

impl<P: Payload> fmt::Debug for Reply<P>
where
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Synapse(synapse) => f.debug_tuple("Synapse").field(synapse).finish(),
            Reply::Output(_) => f.write_str("Output(..)"),
        }
    }
}

/// Items of a streaming call: any number of chunks, then exactly one `Done`.
pub enum StreamItem<P: StreamingPayload> {
    Chunk(P::Chunk),
    Done(Reply<P>),
}

pub type SynapseStream<'a, P> = BoxStream<'a, StreamItem<P>>;

/// A signed envelope ready to go on the wire.
struct Prepared<P> {
    synapse: Synapse<P>,
    url: Url,
    body: Vec<u8>,
    timeout: Duration,
    endpoint: String,
}

/// Client side of the protocol: signs envelopes and sends them to axons.
pub struct Dendrite {
    signer: Arc<dyn Signer>,
    uuid: String,
    external_ip: String,
    config: DendriteConfig,
    session: SessionManager,
    history: CallHistory,
    runtime: OnceLock<tokio::runtime::Runtime>,
}

impl Dendrite {
    /// A dendrite advertising `config.external_ip`, or loopback when unset.
    pub fn new(signer: Arc<dyn Signer>, config: DendriteConfig) -> Self {
        let external_ip = config
            .external_ip
            .clone()
            .unwrap_or_else(|| LOOPBACK.to_string());
        Dendrite {
            signer,
            uuid: Uuid::new_v4().to_string(),
            external_ip,
            session: SessionManager::new(config.clone()),
            history: CallHistory::new(config.history_capacity),
            config,
            runtime: OnceLock::new(),
        }
    }

    /// Like [`Dendrite::new`], but asks public echo services for our ip when
    /// the config does not name one.
    pub async fn with_external_ip_lookup(
        signer: Arc<dyn Signer>,
        config: DendriteConfig,
    ) -> Result<Self> {
        let mut dendrite = Dendrite::new(signer, config);
        if dendrite.config.external_ip.is_none() {
            let client = dendrite.session.client()?;
            dendrite.external_ip = get_external_ip(&client).await?;
        }
        Ok(dendrite)
    }

    pub fn address(&self) -> String {
        self.signer.address()
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn external_ip(&self) -> &str {
        &self.external_ip
    }

    pub fn config(&self) -> &DendriteConfig {
        &self.config
    }

    /// Default options with the configured timeout.
    pub fn options(&self) -> CallOptions {
        CallOptions::default().with_timeout(self.config.timeout())
    }

    /// Redacted copies of past calls, oldest first.
    pub fn history(&self) -> Vec<SynapseHeaders> {
        self.history.snapshot()
    }

    pub fn clear_history(&self) {
        self.history.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.session.opened()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_open()
    }

    /// Release the pooled session. Returns whether one was open.
    pub fn close_session(&self) -> bool {
        self.session.close()
    }

    pub async fn aclose_session(&self) -> bool {
        self.session.close()
    }

    /// Run `f` against this dendrite and release the session afterwards, also
    /// when `f` panics or the returned future is dropped.
    pub async fn scoped<'a, F, Fut, T>(&'a self, f: F) -> T
    where
        F: FnOnce(&'a Dendrite) -> Fut,
        Fut: Future<Output = T> + 'a,
    {
        let _release = SessionRelease(&self.session);
        f(self).await
    }

    /// Fill in timeout, both terminal blocks, body hash and signature.
    pub fn preprocess<P: Payload>(
        &self,
        target: &AxonInfo,
        synapse: Synapse<P>,
        timeout: Duration,
    ) -> Result<Synapse<P>> {
        self.sign_request(target, synapse, timeout)
            .map(|(synapse, _)| synapse)
    }

    fn sign_request<P: Payload>(
        &self,
        target: &AxonInfo,
        mut synapse: Synapse<P>,
        timeout: Duration,
    ) -> Result<(Synapse<P>, Vec<u8>)> {
        synapse.timeout = Some(timeout.as_secs_f64());
        synapse.dendrite = TerminalInfo {
            ip: Some(self.external_ip.clone()),
            version: Some(VERSION_AS_INT),
            nonce: Some(create_nonce()),
            uuid: Some(self.uuid.clone()),
            hotkey: Some(self.signer.address()),
            pubkey: Some(hex::encode(self.signer.public_key())),
            ..TerminalInfo::default()
        };
        synapse.axon = TerminalInfo {
            ip: Some(target.ip.clone()),
            port: Some(target.port),
            hotkey: Some(target.hotkey.clone()),
            ..TerminalInfo::default()
        };

        let body = synapse.body()?;
        synapse.total_size = body.len();
        synapse.body_hash = Some(hash_hex(&body));

        let message = synapse.signature_message();
        synapse.dendrite.signature = Some(encode_signature(&self.signer.sign(message.as_bytes())));
        Ok((synapse, body))
    }

    fn prepare<P: Payload>(
        &self,
        target: &AxonInfo,
        synapse: Synapse<P>,
        timeout: Duration,
    ) -> Result<Prepared<P>> {
        let url_string = format_url_string(target, &synapse.name, &self.external_ip);
        let url = Url::parse(&url_string).map_err(|err| Error::Endpoint(url_string, err))?;
        let (synapse, body) = self.sign_request(target, synapse, timeout)?;
        Ok(Prepared {
            synapse,
            url,
            body,
            timeout,
            endpoint: target.endpoint(),
        })
    }

    /// Send one envelope and wait for the answer. Transport problems end up
    /// in `dendrite.status_code`, never in the returned `Result`.
    pub async fn call<P: Payload>(
        &self,
        target: &AxonInfo,
        synapse: Synapse<P>,
        timeout: Duration,
        deserialize: bool,
    ) -> Result<Reply<P>> {
        let client = self.session.client()?;
        let prepared = self.prepare(target, synapse, timeout)?;
        Ok(self.send(&client, prepared, deserialize).await)
    }

    async fn send<P: Payload>(
        &self,
        client: &reqwest::Client,
        prepared: Prepared<P>,
        deserialize: bool,
    ) -> Reply<P> {
        let Prepared {
            mut synapse,
            url,
            body,
            timeout,
            endpoint,
        } = prepared;
        let start = Instant::now();
        log_outgoing_request(&synapse, &endpoint);

        if let Err(err) = exchange(client, url, body, timeout, &endpoint, &mut synapse).await {
            apply_call_error(&mut synapse, &err);
        }
        synapse.dendrite.process_time = Some(start.elapsed().as_secs_f64());

        log_incoming_response(&synapse, &endpoint);
        self.history.record(&synapse);
        finish(synapse, deserialize)
    }

    /// Open a streaming call. Nothing is sent until the stream is polled.
    pub fn call_stream<'a, P: StreamingPayload>(
        &'a self,
        target: &AxonInfo,
        synapse: Synapse<P>,
        timeout: Duration,
        deserialize: bool,
    ) -> Result<SynapseStream<'a, P>> {
        let client = self.session.client()?;
        let prepared = self.prepare(target, synapse, timeout)?;
        Ok(self.open_stream(client, prepared, deserialize))
    }

    fn open_stream<'a, P: StreamingPayload>(
        &'a self,
        client: reqwest::Client,
        prepared: Prepared<P>,
        deserialize: bool,
    ) -> SynapseStream<'a, P> {
        let stream = async_stream::stream! {
            let Prepared { mut synapse, url, body, timeout, endpoint } = prepared;
            let name = synapse.name.clone();
            let timeout_secs = timeout.as_secs_f64();
            let mut guard = HistoryGuard::new(&self.history, redact(&synapse));
            let start = Instant::now();
            log_outgoing_request(&synapse, &endpoint);

            let request = client
                .post(url)
                .headers(synapse.to_headers())
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .timeout(timeout);

            let mut outcome: std::result::Result<(), CallError> = Ok(());
            match request.send().await {
                Err(err) => {
                    outcome = Err(CallError::classify(&err, &endpoint, &name, timeout_secs));
                }
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    merge_server_headers(&headers, &mut synapse);
                    guard.update(redact(&synapse));
                    if status == StatusCode::OK {
                        let mut body = response.bytes_stream();
                        while let Some(fragment) = body.next().await {
                            match fragment {
                                Ok(bytes) => {
                                    for chunk in synapse.payload.process_streaming_chunk(bytes) {
                                        yield StreamItem::Chunk(chunk);
                                    }
                                }
                                Err(err) => {
                                    outcome = Err(CallError::classify(&err, &endpoint, &name, timeout_secs));
                                    break;
                                }
                            }
                        }
                    }
                    if outcome.is_ok() {
                        let json = if status == StatusCode::OK {
                            Some(synapse.payload.extract_response_json(&headers))
                        } else {
                            None
                        };
                        outcome = process_server_response(status, &headers, json, &mut synapse);
                    }
                }
            }

            if let Err(err) = outcome {
                apply_call_error(&mut synapse, &err);
            }
            synapse.dendrite.process_time = Some(start.elapsed().as_secs_f64());
            log_incoming_response(&synapse, &endpoint);
            guard.commit(redact(&synapse));
            yield StreamItem::Done(finish(synapse, deserialize));
        };
        Box::pin(stream)
    }

    /// Send a clone of `synapse` to every target and collect the answers in
    /// input order. All envelopes are signed before the first request leaves.
    pub async fn forward<P: Payload>(
        &self,
        targets: impl Into<Targets>,
        synapse: &Synapse<P>,
        options: &CallOptions,
    ) -> Result<Responses<Reply<P>>> {
        warn_on_streaming_mismatch::<P>(options.streaming, false);
        let targets = targets.into();
        let one = targets.is_one();
        let client = self.session.client()?;
        let prepared = targets
            .into_vec()
            .iter()
            .map(|target| self.prepare(target, synapse.clone(), options.timeout))
            .collect::<Result<Vec<_>>>()?;

        let replies = if options.concurrent {
            join_all(
                prepared
                    .into_iter()
                    .map(|prepared| self.send(&client, prepared, options.deserialize)),
            )
            .await
        } else {
            let mut replies = Vec::with_capacity(prepared.len());
            for prepared in prepared {
                replies.push(self.send(&client, prepared, options.deserialize).await);
            }
            replies
        };
        Ok(Responses::from_vec(replies, one))
    }

    /// Streaming counterpart of [`Dendrite::forward`]: one lazy stream per
    /// target, in input order.
    pub fn forward_stream<'a, P: StreamingPayload>(
        &'a self,
        targets: impl Into<Targets>,
        synapse: &Synapse<P>,
        options: &CallOptions,
    ) -> Result<Responses<SynapseStream<'a, P>>> {
        warn_on_streaming_mismatch::<P>(options.streaming, true);
        let targets = targets.into();
        let one = targets.is_one();
        let client = self.session.client()?;
        let streams = targets
            .into_vec()
            .iter()
            .map(|target| {
                let prepared = self.prepare(target, synapse.clone(), options.timeout)?;
                Ok(self.open_stream(client.clone(), prepared, options.deserialize))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Responses::from_vec(streams, one))
    }

    /// [`Dendrite::forward`] to peers named by hotkey. Unknown peers are an
    /// error before anything is sent.
    pub async fn forward_to_hotkeys<P: Payload>(
        &self,
        directory: &dyn PeerDirectory,
        hotkeys: &[&str],
        synapse: &Synapse<P>,
        options: &CallOptions,
    ) -> Result<Responses<Reply<P>>> {
        let targets = directory.resolve_all(hotkeys)?;
        self.forward(targets, synapse, options).await
    }

    /// Blocking [`Dendrite::forward`] for synchronous callers. Runs on a
    /// runtime owned by this dendrite and closes the session afterwards.
    pub fn query<P: Payload>(
        &self,
        targets: impl Into<Targets>,
        synapse: &Synapse<P>,
        options: &CallOptions,
    ) -> Result<Responses<Reply<P>>> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Runtime(
                "query() blocks and cannot be called from async code, use forward()".to_string(),
            ));
        }
        let runtime = self.runtime()?;
        let responses = runtime.block_on(self.forward(targets, synapse, options));
        self.close_session();
        responses
    }

    fn runtime(&self) -> Result<&tokio::runtime::Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        // lost a race with another thread, ours is dropped here
        let _ = self.runtime.set(runtime);
        self.runtime
            .get()
            .ok_or_else(|| Error::Runtime("query runtime unavailable".to_string()))
    }
}

impl fmt::Display for Dendrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dendrite({})", self.signer.address())
    }
}

impl fmt::Debug for Dendrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dendrite")
            .field("address", &self.signer.address())
            .field("uuid", &self.uuid)
            .field("external_ip", &self.external_ip)
            .field("session_open", &self.session.is_open())
            .finish()
    }
}

impl Drop for Dendrite {
    // Best effort only. Prefer close_session() or scoped().
    fn drop(&mut self) {
        self.session.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn exchange<P: Payload>(
    client: &reqwest::Client,
    url: Url,
    body: Vec<u8>,
    timeout: Duration,
    endpoint: &str,
    synapse: &mut Synapse<P>,
) -> std::result::Result<(), CallError> {
    let name = synapse.name.clone();
    let timeout_secs = timeout.as_secs_f64();
    let classify = |err: reqwest::Error| CallError::classify(&err, endpoint, &name, timeout_secs);

    let response = client
        .post(url)
        .headers(synapse.to_headers())
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    let headers = response.headers().clone();
    let json = if status == StatusCode::OK {
        let bytes = response.bytes().await.map_err(classify)?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| CallError::Parse(err.to_string()))?;
        Some(value)
    } else {
        None
    };
    process_server_response(status, &headers, json, synapse)
}

/// Merge an axon's answer into the local envelope.
///
/// A 200 body replaces the payload fields its policy marks mutable. The
/// terminal blocks in the headers fill whatever is still unset locally, and
/// the axon's status becomes ours. A non-200 answer is never a success: when
/// the axon reported none or claims 200, the HTTP status and its reason win.
pub fn process_server_response<P: Payload>(
    status: StatusCode,
    headers: &HeaderMap,
    json: Option<Value>,
    synapse: &mut Synapse<P>,
) -> std::result::Result<(), CallError> {
    if status == StatusCode::OK {
        if let Some(json) = json {
            let peer: P =
                serde_json::from_value(json).map_err(|err| CallError::Parse(err.to_string()))?;
            let copied = synapse.payload.merge_from_peer(peer);
            event!(Level::TRACE, "{} copied back {:?}", synapse.name, copied);
        }
    }

    merge_server_headers(headers, synapse);

    let reported = synapse
        .axon
        .status_code
        .filter(|&code| status == StatusCode::OK || code != StatusCode::OK.as_u16());
    let canonical = status.canonical_reason().map(str::to_string);
    match reported {
        Some(code) => {
            synapse.dendrite.status_code = Some(code);
            synapse.dendrite.status_message = synapse.axon.status_message.clone().or(canonical);
        }
        None => {
            synapse.dendrite.status_code = Some(status.as_u16());
            synapse.dendrite.status_message = canonical;
        }
    }
    Ok(())
}

/// Fill unset terminal fields from the axon's response headers.
fn merge_server_headers<P>(headers: &HeaderMap, synapse: &mut Synapse<P>) {
    let server = SynapseHeaders::from_header_map(headers);
    synapse.dendrite.merge_missing(&server.dendrite);
    synapse.axon.merge_missing(&server.axon);
}

fn apply_call_error<P>(synapse: &mut Synapse<P>, err: &CallError) {
    synapse.dendrite.status_code = Some(err.status_code());
    synapse.dendrite.status_message = Some(err.to_string());
}

fn finish<P: Payload>(synapse: Synapse<P>, deserialize: bool) -> Reply<P> {
    if deserialize {
        Reply::Output(P::deserialize_synapse(synapse))
    } else {
        Reply::Synapse(synapse)
    }
}

fn warn_on_streaming_mismatch<P: Payload>(requested: Option<bool>, streaming_call: bool) {
    let disagrees = requested.map_or(false, |requested| {
        requested != streaming_call || requested != P::IS_STREAMING
    });
    if disagrees || P::IS_STREAMING != streaming_call {
        warn!(
            "Argument streaming is {:?} while {} declares IS_STREAMING = {} and the call is {}. This may cause unexpected behavior.",
            requested,
            P::NAME,
            P::IS_STREAMING,
            if streaming_call { "streaming" } else { "unary" }
        );
    }
}

fn log_outgoing_request<P>(synapse: &Synapse<P>, endpoint: &str) {
    event!(
        Level::DEBUG,
        "dendrite | --> | {} B | {} | {} | {} | 0 | Success",
        synapse.total_size,
        synapse.name,
        synapse.axon.hotkey.as_deref().unwrap_or_default(),
        endpoint
    );
}

fn log_incoming_response<P>(synapse: &Synapse<P>, endpoint: &str) {
    event!(
        Level::DEBUG,
        "dendrite | <-- | {} B | {} | {} | {} | {} | {}",
        synapse.total_size,
        synapse.name,
        synapse.axon.hotkey.as_deref().unwrap_or_default(),
        endpoint,
        synapse.dendrite.status_code.unwrap_or_default(),
        synapse.dendrite.status_message.as_deref().unwrap_or_default()
    );
}
