/*!

# Networking Interfaces and Methods

## Introduction

Peers talk to each other with signed JSON envelopes over plain HTTP/1.1. The
calling side is a `Dendrite`, the answering side an `Axon`. Every envelope is
a `Synapse`: an application payload plus one block of metadata for each end
of the call (`TerminalInfo`).

## Requests

A request is a `POST /{TypeName}`. The body is the JSON of the payload
fields only. Everything else travels in headers:

```text
x-synapse-name          payload type name
x-synapse-timeout       seconds the caller is willing to wait
x-synapse-body-hash     hex sha256 of the body
x-synapse-total-size    body size in bytes
x-dendrite-{field}      caller block
x-axon-{field}          callee block
```

where `{field}` is one of `ip`, `port`, `hotkey`, `pubkey`, `version`,
`nonce`, `uuid`, `signature`, `status-code`, `status-message`,
`process-time`. Header text outside printable ASCII is replaced by `?`.

## Signatures

The dendrite signs

```text
{nonce}.{dendrite hotkey}.{axon hotkey}.{dendrite uuid}.{body hash}
```

with its secp256k1 key (sha256 digest, compact signature, `0x` prefixed
hex). Nonces strictly increase per process, so an axon can refuse replays by
remembering the last nonce of every `{hotkey}:{uuid}`.

## Responses

A unary answer is `200` with the JSON of the payload. A streaming answer is
`200` with an arbitrary byte stream the payload type knows how to decode.
Either way the axon reports its own block in `x-axon-*` headers, including
`status-code` and `status-message`. Refusals (bad signature, stale nonce,
wrong body hash, blacklisted hotkey) come back as non-200 answers with the
reason in those same headers.

## Failures

A dendrite never fails a call with an error. Transport problems become
status codes on the returned envelope:

```text
503     connection refused or unreachable
408     timed out
422     response could not be parsed
```

*/
pub mod axon;
pub mod dendrite;
pub mod external_ip;
pub mod filters;
pub mod handlers;
pub mod history;
pub mod session;
pub mod synapse;

pub use external_ip::get_external_ip;
