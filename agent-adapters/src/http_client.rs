//! Shared hyper client for model daemons.

use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};

pub(crate) type ModelClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Idle connections to a local daemon are cheap to reopen.
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);

fn web_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|root| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            root.subject,
            root.spki,
            root.name_constraints,
        )
    }));
    store
}

/// Client for guarded endpoints: plain HTTP on loopback, TLS elsewhere.
pub(crate) fn model_client(connect_timeout: Duration) -> ModelClient {
    let tls = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(web_roots())
        .with_no_client_auth();

    let mut tcp = HttpConnector::new();
    tcp.enforce_http(false);
    tcp.set_nodelay(true);
    tcp.set_connect_timeout(Some(connect_timeout));

    Client::builder()
        .pool_idle_timeout(IDLE_TIMEOUT)
        .pool_max_idle_per_host(2)
        .build(HttpsConnector::from((tcp, Arc::new(tls))))
}
