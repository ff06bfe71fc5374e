use onclick_signer::claim::{Hash256, digest, recover};
use async_trait::async_trait;
use onclick_signer::{
    AppState, ClaimSigner, Config, CounterStore, KeyProvider, MemoryCounterStore, SessionToken,
    Signature, StaticKeyProvider,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const TEST_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
const RECIPIENT: &str = "0x3e11d657331c286624826ac797a974777be0e47f";
const CONTRACT: &str = "0xee67A313FA15595cd8D20C018a0d6C3765585589";

/// Test harness that runs the gateway on a free local port
struct TestServer {
    handle: JoinHandle<()>,
    port: u16,
    client: reqwest::Client,
}

/// Counter store whose backend is down
struct UnreachableCounterStore;

#[async_trait]
impl CounterStore for UnreachableCounterStore {
    async fn get(&self, _token: &SessionToken) -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn increment(&self, _token: &SessionToken) -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

impl TestServer {
    async fn start(min_click_interval: Duration) -> Self {
        Self::start_with_store(min_click_interval, Arc::new(MemoryCounterStore::new())).await
    }

    async fn start_with_store(
        min_click_interval: Duration,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        // Only open when debugging
        // tracing_subscriber::fmt::init();

        let port = portpicker::pick_unused_port().expect("No available port");

        let secret = hex::decode(TEST_KEY).unwrap();
        let signer = StaticKeyProvider::new(&secret).unlock().unwrap();
        let state = AppState::new(
            counters,
            signer,
            min_click_interval,
            false,
        );

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let handle = tokio::spawn(async move {
            onclick_signer::serve(listener, state).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        // Poll until server is ready
        for _ in 0..20 {
            if let Ok(response) = client.get(format!("http://127.0.0.1:{port}/")).send().await
                && response.status().is_success()
            {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        TestServer {
            handle,
            port,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    async fn click(&self, token: Option<&str>) -> (u16, Value) {
        let response = self
            .client
            .post(self.url("/click"))
            .json(&json!({ "token": token }))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn clicks(&self, token: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(&format!("/clicks/{token}")))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn claim(&self, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url("/claim"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn is_token(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn unhex32(s: &str) -> Hash256 {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut out).unwrap();
    Hash256::from(out)
}

#[tokio::test]
async fn test_liveness_and_cors() {
    let server = TestServer::start(Duration::ZERO).await;

    let response = server
        .client
        .get(server.url("/"))
        .header("Origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    let preflight = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/click"))
        .header("Origin", "http://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert!(preflight.status().is_success());
    let methods = preflight
        .headers()
        .get("access-control-allow-methods")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(methods.contains("POST"));
    assert!(methods.contains("GET"));
}

#[tokio::test]
async fn test_signer_endpoint() {
    let server = TestServer::start(Duration::ZERO).await;
    let response = server.client.get(server.url("/signer")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["address"], TEST_ADDRESS);
}

#[tokio::test]
async fn test_click_without_token_mints_one() {
    let server = TestServer::start(Duration::ZERO).await;

    let (status, body) = server.click(None).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["clicks"], 1);
    assert!(is_token(&body["token"]));

    // An invalid token is replaced rather than rejected
    let (status, body) = server.click(Some("0xnothex")).await;
    assert_eq!(status, 200);
    assert_eq!(body["clicks"], 1);
    assert!(is_token(&body["token"]));
}

#[tokio::test]
async fn test_click_body_content_type_and_errors() {
    let server = TestServer::start(Duration::ZERO).await;

    // Browsers post JSON as text/plain
    let response = server
        .client
        .post(server.url("/click"))
        .header("Content-Type", "text/plain")
        .body(r#"{"name":"first"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = server.client.post(server.url("/click")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let response = server
        .client
        .post(server.url("/click"))
        .body("token=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_click_query_claim_scenario() {
    let server = TestServer::start(Duration::from_millis(500)).await;

    let (status, body) = server.click(None).await;
    assert_eq!(status, 200);
    assert_eq!(body["clicks"], 1);
    let token = body["token"].as_str().unwrap().to_string();

    sleep(Duration::from_millis(600)).await;
    let (status, body) = server.click(Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(body["clicks"], 2);
    assert_eq!(body["token"], token.as_str());

    let (status, body) = server.clicks(&token).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "clicks": 2 }));

    let request = json!({ "token": token, "recipient": RECIPIENT, "contract": CONTRACT });
    let (status, first) = server.claim(request.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(first["success"], true);
    assert_eq!(first["clicks"], 2);
    assert_eq!(first["token"], token.as_str());
    assert_eq!(first["amount"], "2000000000000000000");
    assert_eq!(first["contract"], CONTRACT);
    assert_eq!(first["recipient"], "0x3E11d657331c286624826ac797a974777be0e47F");
    assert_eq!(first["signer"], TEST_ADDRESS);

    // The signature recovers to the service key
    let claim_digest = unhex32(first["claim"].as_str().unwrap());
    let signature_bytes =
        hex::decode(first["signature"].as_str().unwrap().trim_start_matches("0x")).unwrap();
    let signature = Signature::from_bytes(&signature_bytes).unwrap();
    assert!(matches!(signature.v, 27 | 28));
    let recovered = recover(&digest::prefix(&claim_digest), &signature).unwrap();
    assert_eq!(recovered.to_checksum(None), TEST_ADDRESS);

    // The same digest computed straight from the fields
    let signer = ClaimSigner::from_hex(TEST_KEY).unwrap();
    let expected = signer
        .sign_claim(
            RECIPIENT.parse().unwrap(),
            token.parse().unwrap(),
            2,
            CONTRACT.parse().unwrap(),
        )
        .unwrap();
    assert_eq!(first["claim"], expected.digest_hex());

    // Claiming again is an identical read
    let (status, second) = server.claim(request).await;
    assert_eq!(status, 200);
    assert_eq!(first, second);

    let (_, body) = server.clicks(&token).await;
    assert_eq!(body["clicks"], 2);
}

#[tokio::test]
async fn test_rate_limited_click() {
    let server = TestServer::start(Duration::from_millis(500)).await;

    let (_, body) = server.click(None).await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = server.click(Some(&token)).await;
    assert_eq!(status, 429);
    assert_eq!(body["success"], false);
    assert_eq!(body["clicks"], 1);
    assert_eq!(body["token"], token.as_str());

    let (_, body) = server.clicks(&token).await;
    assert_eq!(body["clicks"], 1);

    sleep(Duration::from_millis(600)).await;
    let (status, body) = server.click(Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(body["clicks"], 2);
}

#[tokio::test]
async fn test_claim_without_clicks() {
    let server = TestServer::start(Duration::ZERO).await;

    let token = "ab".repeat(32);
    let (status, body) = server
        .claim(json!({ "token": token, "recipient": RECIPIENT, "contract": CONTRACT }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["clicks"], 0);
    assert_eq!(body["message"], "Token has no clicks");
    assert!(body.get("signature").is_none());
}

#[tokio::test]
async fn test_claim_invalid_fields() {
    let server = TestServer::start(Duration::ZERO).await;

    let (_, body) = server.click(None).await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = server
        .claim(json!({ "token": token, "recipient": "0x1234", "contract": CONTRACT }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid input");
    assert_eq!(body["invalid"], json!(["recipient"]));

    // Bad checksum on the contract, missing token
    let (status, body) = server
        .claim(json!({
            "recipient": RECIPIENT,
            "contract": "0xEe67A313FA15595cd8D20C018a0d6C3765585589",
        }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["invalid"], json!(["token", "contract"]));
}

#[tokio::test]
async fn test_clicks_query() {
    let server = TestServer::start(Duration::ZERO).await;

    let (status, body) = server.clicks(&"cd".repeat(32)).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "clicks": 0 }));

    let (status, body) = server.clicks("xyz").await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_concurrent_clicks_same_token() {
    let server = Arc::new(TestServer::start(Duration::ZERO).await);

    let (_, body) = server.click(None).await;
    let token = body["token"].as_str().unwrap().to_string();

    let handles = (0..20)
        .map(|_| {
            let server = server.clone();
            let token = token.clone();
            tokio::spawn(async move { server.click(Some(&token)).await })
        })
        .collect::<Vec<_>>();

    let mut counts = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            200 => {
                assert_eq!(body["token"], token.as_str());
                counts.push(body["clicks"].as_u64().unwrap());
            }
            // Lost the race for the token lock; nothing was counted
            409 => {
                assert_eq!(body["success"], false);
                assert!(body["clicks"].is_null());
            }
            other => panic!("unexpected status {other}: {body}"),
        }
    }

    counts.sort_unstable();
    let expected = (2..2 + counts.len() as u64).collect::<Vec<_>>();
    assert_eq!(counts, expected);

    let (_, body) = server.clicks(&token).await;
    assert_eq!(body["clicks"].as_u64().unwrap(), 1 + counts.len() as u64);
}

#[tokio::test]
async fn test_store_outage_returns_500() {
    let server =
        TestServer::start_with_store(Duration::from_millis(500), Arc::new(UnreachableCounterStore))
            .await;
    let outage = json!({ "success": false, "message": "Counter store unavailable" });
    let token = "ab".repeat(32);

    let (status, body) = server.click(None).await;
    assert_eq!(status, 500);
    assert_eq!(body, outage);

    // A failed click is not counted against the rate limit window
    let (status, body) = server.click(Some(&token)).await;
    assert_eq!(status, 500);
    assert_eq!(body, outage);

    let (status, body) = server.clicks(&token).await;
    assert_eq!(status, 500);
    assert_eq!(body, outage);

    let (status, body) = server
        .claim(json!({ "token": token, "recipient": RECIPIENT, "contract": CONTRACT }))
        .await;
    assert_eq!(status, 500);
    assert_eq!(body, outage);

    // Every lock was released, so the token is not reported as busy
    let (status, _) = server.click(Some(&token)).await;
    assert_eq!(status, 500);
}

#[tokio::test]
async fn test_run_fails_fast_without_key() {
    let dir = tempfile::TempDir::new().unwrap();
    let port = portpicker::pick_unused_port().expect("No available port");

    let config = Config {
        listen_on_port: port,
        bind_address: "127.0.0.1".to_string(),
        keystore: dir.path().join("missing.json").display().to_string(),
        ..Default::default()
    };

    let result = tokio::time::timeout(Duration::from_secs(5), onclick_signer::run(config))
        .await
        .expect("run should return instead of serving");
    assert!(result.is_err());

    // Nothing was bound
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
