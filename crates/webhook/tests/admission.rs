//! Admission scenarios over a real TLS socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use haptic_bus::EventBus;
use haptic_controller::stub::{StubChecker, StubEngine};
use haptic_controller::{BasicValidator, DryRunValidator, ValidatorHost};
use haptic_webhook::{
    HandlerRegistry, KindResolver, ScatterGatherValidation, WebhookServer, WebhookStats,
    load_server_config,
};
use rustls_pki_types::{CertificateDer, ServerName};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

struct Server {
    addr: SocketAddr,
    root: CertificateDer<'static>,
    cancel: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_server(bus: &EventBus, gather_timeout: Duration) -> Server {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    let tls = load_server_config(&cert_path, &key_path).unwrap();

    let mut handlers = HandlerRegistry::new(true);
    handlers.register(
        "v1.ConfigMap",
        Arc::new(ScatterGatherValidation::new(
            bus,
            ["basic", "dryrun"],
            gather_timeout,
        )),
    );
    let server = WebhookServer::new(
        handlers,
        KindResolver::with_defaults(),
        Arc::new(WebhookStats::default()),
        "/validate",
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = server.serve_on(listener, tls, serve_cancel).await;
    });

    Server {
        addr,
        root: certified.cert.der().clone(),
        cancel,
    }
}

/// Hand-rolled HTTPS POST; returns (status, response body).
async fn post_review(server: &Server, review: &Value) -> (u16, Value) {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(server.root.clone()).unwrap();
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let name = ServerName::try_from("localhost".to_owned()).unwrap();
    let mut stream = connector.connect(name, tcp).await.unwrap();

    let body = review.to_string();
    let request = format!(
        "POST /validate HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let (head, payload) = text.split_once("\r\n\r\n").expect("header/body split");
    let status: u16 = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    (status, serde_json::from_str(payload).expect("json body"))
}

fn review(resource: &str, document: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "resource": {"group": "", "version": "v1", "resource": resource},
            "namespace": "ingress",
            "name": "haptic-config",
            "operation": "UPDATE",
            "object": {
                "metadata": {"name": "haptic-config", "namespace": "ingress"},
                "data": {"config": document},
            },
        },
    })
}

fn spawn_validators(bus: &EventBus, checker: StubChecker, cancel: &CancellationToken) {
    let engine = Arc::new(StubEngine::new());
    let hosts = [
        ValidatorHost::new(bus, Arc::new(BasicValidator)),
        ValidatorHost::new(
            bus,
            Arc::new(DryRunValidator::new(engine, Arc::new(checker))),
        ),
    ];
    for host in hosts {
        tokio::spawn(host.run(cancel.clone()));
    }
}

#[tokio::test]
async fn denial_concatenates_responder_and_reason() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    spawn_validators(&bus, StubChecker::failing(["bad spec"]), &cancel);
    bus.start();
    let server = start_server(&bus, Duration::from_secs(2)).await;

    let (status, body) =
        post_review(&server, &review("configmaps", "[templates]\nmain = \"global\"\n")).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(
        body["response"]["uid"],
        "705ab4f5-6393-11e8-b7cc-42010a800002"
    );
    let message = body["response"]["status"]["message"].as_str().unwrap();
    assert!(message.contains("dryrun: bad spec"), "message: {message}");
    assert_eq!(body["response"]["status"]["code"], 403);
    cancel.cancel();
}

#[tokio::test]
async fn unanimous_validators_allow() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    spawn_validators(&bus, StubChecker::ok(), &cancel);
    bus.start();
    let server = start_server(&bus, Duration::from_secs(2)).await;

    let (status, body) =
        post_review(&server, &review("configmaps", "[templates]\nmain = \"global\"\n")).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"]["allowed"], true);
    cancel.cancel();
}

#[tokio::test]
async fn unregistered_kind_is_allowed_by_default() {
    let bus = EventBus::new();
    bus.start();
    let server = start_server(&bus, Duration::from_secs(2)).await;

    // Secrets resolve to v1.Secret, which has no registered handler.
    let (status, body) = post_review(&server, &review("secrets", "ignored")).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"]["allowed"], true);
}

#[tokio::test]
async fn missing_validators_fail_closed() {
    let bus = EventBus::new();
    bus.start();
    // No validator hosts running: the gather can never complete.
    let server = start_server(&bus, Duration::from_millis(300)).await;

    let (status, body) =
        post_review(&server, &review("configmaps", "[templates]\nmain = \"global\"\n")).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(
        body["response"]["status"]["message"],
        "validation timeout or internal error"
    );
}

#[tokio::test]
async fn unparseable_candidate_config_is_denied() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    spawn_validators(&bus, StubChecker::ok(), &cancel);
    bus.start();
    let server = start_server(&bus, Duration::from_secs(2)).await;

    let (status, body) = post_review(&server, &review("configmaps", "not toml [")).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"]["allowed"], false);
    cancel.cancel();
}
