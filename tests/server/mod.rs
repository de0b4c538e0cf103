//! HTTP and WebSocket tests against a live server on a loopback port

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use softpack_frontend::server::{self, normalize_prefix};
use softpack_frontend::{Catalog, NotificationBus};

use crate::common::{ready_bundle, TestRemote};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

/// A served catalog over its own remote; shut down on drop
struct TestServer {
    remote: TestRemote,
    catalog: Arc<Catalog>,
    addr: SocketAddr,
    prefix: String,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(remote: TestRemote) -> Self {
        Self::start_with(remote, "", true).await
    }

    async fn start_with(remote: TestRemote, prefix: &str, reindex: bool) -> Self {
        let catalog = Arc::new(Catalog::new(
            remote.open_store(),
            NotificationBus::new(Duration::from_secs(5)),
        ));
        if reindex {
            catalog.reindex().unwrap();
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();

        let served = Arc::clone(&catalog);
        let mount = prefix.to_string();
        let task = tokio::spawn(async move {
            server::serve(served, listener, &mount, async move {
                let _ = signal.await;
            })
            .await
        });

        Self {
            remote,
            catalog,
            addr,
            prefix: normalize_prefix(prefix),
            client: reqwest::Client::new(),
            shutdown: Some(shutdown),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}{}", self.addr, self.prefix, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), StatusCode::OK, "GET {}", path);
        response.json().await.unwrap()
    }

    async fn upload(&self, env: &str, files: &[(&str, &str)]) -> reqwest::Response {
        let mut form = Form::new();
        for (name, contents) in files {
            form = form.text(name.to_string(), contents.to_string());
        }

        self.client
            .post(self.url(&format!("/artefacts/env/{}", env)))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn connect(&self) -> Socket {
        let url = format!("ws://{}{}/environments/socket", self.addr, self.prefix);
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");

        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_environments_json_served_with_gzip() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let server = TestServer::start(remote).await;

    let plain = server.get("/environments/environments.json").await;
    assert_eq!(plain.status(), StatusCode::OK);
    assert_eq!(plain.headers()[CONTENT_TYPE], "application/json");
    assert!(plain.headers().get(CONTENT_ENCODING).is_none());
    let identity = plain.bytes().await.unwrap();

    let json: Value = serde_json::from_slice(&identity).unwrap();
    assert_eq!(json["users/alice/py-1.0"]["Status"], 2);

    let compressed = server
        .client
        .get(server.url("/environments/environments.json"))
        .header(ACCEPT_ENCODING, "gzip, deflate")
        .send()
        .await
        .unwrap();
    assert_eq!(compressed.headers()[CONTENT_ENCODING], "gzip");
    let gzip = compressed.bytes().await.unwrap();

    let mut decoded = Vec::new();
    GzDecoder::new(&gzip[..]).read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, identity.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_environments_json_conditional_get() {
    let server = TestServer::start(TestRemote::new()).await;

    let first = server.get("/environments/environments.json").await;
    let etag = first.headers()[ETAG].to_str().unwrap().to_string();

    let second = server
        .client
        .get(server.url("/environments/environments.json"))
        .header(IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);

    server
        .upload("users/alice/py-1.0", &[("softpack.yml", "packages: []\n")])
        .await;

    let third = server
        .client
        .get(server.url("/environments/environments.json"))
        .header(IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::OK);
    assert_ne!(third.headers()[ETAG].to_str().unwrap(), etag);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_environments_json_unavailable_before_first_index() {
    let server = TestServer::start_with(TestRemote::new(), "", false).await;

    let response = server.get("/environments/environments.json").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let summary: Value = server
        .client
        .post(server.url("/environments/reindex"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary, json!({"environments": 0}));

    let response = server.get("/environments/environments.json").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listing_routes() {
    let remote = TestRemote::new();
    remote
        .add_environment("users/alice/py-1.0", &[("README.md", "hi")])
        .add_environment("groups/hgi/r-4.3", &[("builder.out", "x")]);
    let server = TestServer::start(remote).await;

    assert_eq!(server.get_json("/artefacts/list").await, json!(["groups", "users"]));
    assert_eq!(server.get_json("/artefacts/list/users").await, json!(["alice"]));
    assert_eq!(
        server.get_json("/artefacts/list/users/alice").await,
        json!(["py-1.0"])
    );

    let missing = server.get("/artefacts/list/users/nobody").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.text().await.unwrap(), "not found");

    let invalid = server.get("/artefacts/list/users/a:b").await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_then_read_back() {
    let server = TestServer::start(TestRemote::new()).await;

    let response = server
        .upload(
            "users/alice/py-1.0",
            &[("README.md", "hi"), ("softpack.yml", "packages: []\n")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"environments": 1}));

    let file = server.get("/artefacts/env/users/alice/py-1.0/README.md").await;
    assert_eq!(file.status(), StatusCode::OK);
    assert_eq!(file.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(file.text().await.unwrap(), "hi");

    let listing = server.get_json("/artefacts/env/users/alice/py-1.0").await;
    assert_eq!(listing["README.md"]["size"], 2);
    assert_eq!(listing["softpack.yml"]["size"], 13);
    assert!(listing["README.md"]["modified"].is_string());

    let missing = server.get("/artefacts/env/users/alice/py-1.0/module").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    assert_eq!(server.remote.head(), server.catalog.store().head());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_rejects_bad_requests() {
    let server = TestServer::start(TestRemote::new()).await;

    let empty = server
        .client
        .post(server.url("/artefacts/env/users/alice/py-1.0"))
        .multipart(Form::new())
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let bad_owner = server.upload("users/a:b/py-1.0", &[("README.md", "x")]).await;
    assert_eq!(bad_owner.status(), StatusCode::BAD_REQUEST);

    let bad_namespace = server.upload("teams/hgi/r-4.3", &[("README.md", "x")]).await;
    assert_eq!(bad_namespace.status(), StatusCode::NOT_FOUND);

    assert!(server.remote.head().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_push_is_a_server_error() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let server = TestServer::start(remote).await;
    server.remote.reject_pushes();

    let response = server.upload("users/bob/r-4.3", &[("README.md", "x")]).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "failed to update artefacts");

    assert_eq!(server.get_json("/artefacts/list/users").await, json!(["alice"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_environment() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let server = TestServer::start(remote).await;

    let response = server
        .client
        .delete(server.url("/artefacts/env/users/alice/py-1.0"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"environments": 0}));

    let gone = server.get("/artefacts/env/users/alice/py-1.0").await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let again = server
        .client
        .delete(server.url("/artefacts/env/users/alice/py-1.0"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routes_mounted_under_prefix() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &[("README.md", "hi")]);
    let server = TestServer::start_with(remote, "softpack/", true).await;

    assert_eq!(server.get_json("/artefacts/list").await, json!(["users"]));

    let unprefixed = server
        .client
        .get(format!("http://{}/artefacts/list", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(unprefixed.status(), StatusCode::NOT_FOUND);

    let mut socket = server.connect().await;
    assert_eq!(next_json(&mut socket).await["id"], -1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_socket_sends_snapshot_first() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let server = TestServer::start(remote).await;

    let mut socket = server.connect().await;
    let snapshot = next_json(&mut socket).await;

    assert_eq!(snapshot["id"], -1);
    assert_eq!(snapshot["result"]["users/alice/py-1.0"]["Status"], 2);
    assert_eq!(snapshot["result"]["users/alice/py-1.0"]["Tags"], json!(["python"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_socket_requests() {
    let remote = TestRemote::new();
    remote.add_environment("users/alice/py-1.0", &ready_bundle());
    let server = TestServer::start(remote).await;

    let mut socket = server.connect().await;
    next_json(&mut socket).await;

    send_json(&mut socket, json!({"id": 1, "method": "list", "params": ["users"]})).await;
    assert_eq!(next_json(&mut socket).await, json!({"id": 1, "result": ["alice"]}));

    send_json(&mut socket, json!({"id": 2, "method": "list"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"id": 2, "result": ["users"]}));

    send_json(&mut socket, json!({"id": 3, "method": "list", "params": ["groups"]})).await;
    let missing = next_json(&mut socket).await;
    assert_eq!(missing["id"], 3);
    assert_eq!(missing["error"]["code"], -32004);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_socket_survives_bad_requests() {
    let server = TestServer::start(TestRemote::new()).await;

    let mut socket = server.connect().await;
    next_json(&mut socket).await;

    send_json(&mut socket, json!({"id": 7, "method": "lsit"})).await;
    assert_eq!(
        next_json(&mut socket).await,
        json!({
            "id": 7,
            "error": {"code": -32601, "message": "unknown endpoint", "data": "lsit"}
        })
    );

    socket.send(Message::Text("{not json".to_string())).await.unwrap();
    let malformed = next_json(&mut socket).await;
    assert_eq!(malformed["id"], 0);
    assert_eq!(malformed["error"]["code"], -32700);

    send_json(&mut socket, json!({"id": "x", "method": "ping"})).await;
    let invalid = next_json(&mut socket).await;
    assert_eq!(invalid["id"], 0);
    assert_eq!(invalid["error"]["code"], -32600);

    send_json(&mut socket, json!({"id": 8, "method": "ping"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"id": 8, "result": "pong"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_socket_receives_broadcast_after_upload() {
    let server = TestServer::start(TestRemote::new()).await;

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    assert_eq!(next_json(&mut first).await, json!({"id": -1, "result": {}}));
    assert_eq!(next_json(&mut second).await, json!({"id": -1, "result": {}}));

    let response = server
        .upload("users/alice/py-1.0", &[("builder.out", "oops")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    for socket in [&mut first, &mut second] {
        let update = next_json(socket).await;
        assert_eq!(update["id"], -1);
        assert_eq!(update["result"]["users/alice/py-1.0"]["Status"], 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_socket_close_deregisters() {
    let server = TestServer::start(TestRemote::new()).await;

    let mut socket = server.connect().await;
    next_json(&mut socket).await;
    assert_eq!(server.catalog.bus().connection_count(), 1);

    socket.close(None).await.unwrap();
    drop(socket);

    let deadline = tokio::time::Instant::now() + WAIT;
    while server.catalog.bus().connection_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection still registered"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
