//! Integration tests for the `openaero serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with a
//! clean environment, makes raw HTTP requests, and checks the responses.

use std::collections::BTreeMap;
use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::SigningKey;
use openaero_market::payment::{alipay, wechat};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Base port is derived from the process id so separate test binaries don't
/// collide on the same range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

const CREATOR: &str = "creator-token";
const REVIEWER: &str = "reviewer-token";
const ADMIN: &str = "admin-token";
const BUYER: &str = "buyer-token";
const WECHAT_KEY: &str = "integration-wechat-key";

const TOKENS: &str = "creator-token:creator-1:CREATOR,reviewer-token:reviewer-1:REVIEWER,\
admin-token:admin-1:ADMIN,buyer-token:buyer-1:USER";

/// A running server; killed on drop.
struct Server {
    child: Child,
    port: u16,
    // Keeps the working directory (and any database in it) alive.
    _dir: TempDir,
}

impl Server {
    fn start(env: &[(&str, &str)]) -> Server {
        Self::start_in(tempfile::tempdir().unwrap(), env)
    }

    fn start_in(dir: TempDir, env: &[(&str, &str)]) -> Server {
        let port = next_port();
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_openaero"));
        // An empty working directory means no stray .env gets loaded.
        cmd.current_dir(dir.path())
            .env_clear()
            .env("RUST_LOG", "warn")
            .env("OPENAERO_API_TOKENS", TOKENS)
            .env("WECHAT_API_KEY", WECHAT_KEY);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.arg("serve").arg("--port").arg(port.to_string());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let child = cmd.spawn().expect("failed to start openaero serve");
        for _ in 0..100 {
            if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Server {
            child,
            port,
            _dir: dir,
        }
    }

    fn stop(mut self) -> TempDir {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let dir = tempfile::tempdir().unwrap();
        std::mem::replace(&mut self._dir, dir)
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<(&str, &str)>,
    ) -> Response {
        let mut stream =
            TcpStream::connect(format!("127.0.0.1:{}", self.port)).expect("failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        let mut header_lines = String::new();
        for (name, value) in headers {
            header_lines.push_str(&format!("{}: {}\r\n", name, value));
        }
        let (content_type, payload) = body.unwrap_or(("", ""));
        if body.is_some() {
            header_lines.push_str(&format!(
                "Content-Type: {}\r\nContent-Length: {}\r\n",
                content_type,
                payload.len()
            ));
        }
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Connection: close\r\n\r\n{}",
            method, path, self.port, header_lines, payload
        );
        std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

        let mut raw = String::new();
        let _ = stream.read_to_string(&mut raw);
        parse_http_response(&raw)
    }

    fn get(&self, path: &str, token: &str) -> Response {
        let auth = format!("Bearer {}", token);
        self.request("GET", path, &[("Authorization", auth.as_str())], None)
    }

    fn send_json(&self, method: &str, path: &str, token: &str, body: &Value) -> Response {
        let auth = format!("Bearer {}", token);
        let body = body.to_string();
        self.request(
            method,
            path,
            &[("Authorization", auth.as_str())],
            Some(("application/json", body.as_str())),
        )
    }

    fn post(&self, path: &str, token: &str, body: &Value) -> Response {
        self.send_json("POST", path, token, body)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Response {
    status: u16,
    headers: String,
    body: String,
}

impl Response {
    fn json(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.body))
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then_some(value.trim())
        })
    }
}

fn parse_http_response(response: &str) -> Response {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status = headers
        .lines()
        .next()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
    {
        decode_chunked(&body)
    } else {
        body
    };

    Response {
        status,
        headers,
        body,
    }
}

fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }

    result
}

fn alipay_keys() -> (SigningKey, String) {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let public = base64::engine::general_purpose::STANDARD.encode(key.verifying_key().as_bytes());
    (key, public)
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn scores() -> Value {
    json!({"quality": 8, "completeness": 7, "innovation": 6, "marketPotential": 9})
}

/// Create, fill, submit, review and publish a solution. Returns its id.
fn publish_solution(server: &Server) -> String {
    let created = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "Survey hexacopter", "description": "RTK mapping rig", "price": "1299.00"}),
    );
    assert_eq!(created.status, 201, "{}", created.body);
    let id = created.json()["id"].as_str().unwrap().to_string();

    let bom = server.send_json(
        "PUT",
        &format!("/api/solutions/{id}/bom"),
        CREATOR,
        &json!({"items": [
            {"name": "Frame", "quantity": 1, "unitPrice": "899.00", "weightGrams": 1200},
            {"name": "Motor", "quantity": 6, "unitPrice": "129.00", "weightGrams": 180}
        ]}),
    );
    assert_eq!(bom.status, 200, "{}", bom.body);

    let submitted = server.post(&format!("/api/solutions/{id}/submit"), CREATOR, &json!({}));
    assert_eq!(submitted.status, 200, "{}", submitted.body);
    assert_eq!(submitted.json()["status"], "PENDING_REVIEW");

    let started = server.post(
        &format!("/api/admin/solutions/{id}/review/start"),
        REVIEWER,
        &json!({}),
    );
    assert_eq!(started.status, 200, "{}", started.body);

    let completed = server.post(
        &format!("/api/admin/solutions/{id}/review/complete"),
        REVIEWER,
        &json!({"decision": "APPROVED", "scores": scores(), "comments": "solid"}),
    );
    assert_eq!(completed.status, 200, "{}", completed.body);
    assert_eq!(completed.json()["solution"]["status"], "APPROVED");

    let published = server.post(
        &format!("/api/admin/solutions/{id}/publish"),
        ADMIN,
        &json!({}),
    );
    assert_eq!(published.status, 200, "{}", published.body);
    assert_eq!(published.json()["status"], "PUBLISHED");
    id
}

/// Order a published solution; returns (order id, transaction id, out_trade_no).
fn place_order(server: &Server, solution_id: &str, provider: &str) -> (String, String, String) {
    let created = server.post(
        "/api/orders",
        BUYER,
        &json!({"solutionId": solution_id, "provider": provider}),
    );
    assert_eq!(created.status, 201, "{}", created.body);
    let body = created.json();
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["transaction"]["amount"], "1299.00");
    (
        body["order"]["id"].as_str().unwrap().to_string(),
        body["transaction"]["id"].as_str().unwrap().to_string(),
        body["transaction"]["external_id"].as_str().unwrap().to_string(),
    )
}

#[test]
fn health_is_public() {
    let server = Server::start(&[]);
    let response = server.request("GET", "/health", &[], None);
    assert_eq!(response.status, 200);
    let body = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[test]
fn api_requires_a_known_token() {
    let server = Server::start(&[]);

    let anonymous = server.request("GET", "/api/solutions/x", &[], None);
    assert_eq!(anonymous.status, 401);
    assert_eq!(anonymous.json()["error"], "authentication required");

    let wrong = server.get("/api/solutions/x", "not-a-token");
    assert_eq!(wrong.status, 403);

    let via_header = server.request("GET", "/api/solutions/x", &[("X-API-Key", ADMIN)], None);
    assert_eq!(via_header.status, 404);
    assert_eq!(via_header.json()["code"], "NOT_FOUND");
}

#[test]
fn unknown_route_is_json_404() {
    let server = Server::start(&[]);
    let response = server.get("/api/nope", ADMIN);
    assert_eq!(response.status, 404);
    assert_eq!(response.json()["error"], "not found");
}

#[test]
fn errors_carry_status_and_code() {
    let server = Server::start(&[]);

    let forbidden = server.post(
        "/api/solutions",
        BUYER,
        &json!({"title": "x", "price": "1.00"}),
    );
    assert_eq!(forbidden.status, 403);
    assert_eq!(forbidden.json()["code"], "FORBIDDEN");

    let invalid = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "  ", "price": "-1"}),
    );
    assert_eq!(invalid.status, 400);
    assert_eq!(invalid.json()["code"], "VALIDATION_ERROR");

    let malformed = server.request(
        "POST",
        "/api/solutions",
        &[("Authorization", "Bearer creator-token")],
        Some(("application/json", "{not json")),
    );
    assert_eq!(malformed.status, 400);
    assert_eq!(malformed.json()["code"], "VALIDATION_ERROR");

    let created = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "Quad", "price": "10.00"}),
    );
    let id = created.json()["id"].as_str().unwrap().to_string();
    // Not submitted yet, so a review cannot start.
    let conflict = server.post(
        &format!("/api/admin/solutions/{id}/review/start"),
        REVIEWER,
        &json!({}),
    );
    assert_eq!(conflict.status, 409);
    assert_eq!(conflict.json()["code"], "CONFLICT");
}

#[test]
fn review_queue_and_history() {
    let server = Server::start(&[]);
    let created = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "Fixed wing", "price": "450.00"}),
    );
    let id = created.json()["id"].as_str().unwrap().to_string();
    server.post(&format!("/api/solutions/{id}/submit"), CREATOR, &json!({}));

    let queue = server.get("/api/admin/solutions/queue?limit=10", REVIEWER);
    assert_eq!(queue.status, 200, "{}", queue.body);
    let queued: Vec<Value> = serde_json::from_value(queue.json()).unwrap();
    assert!(queued.iter().any(|s| s["id"] == id.as_str()));

    let denied = server.get("/api/admin/solutions/queue", CREATOR);
    assert_eq!(denied.status, 403);

    server.post(
        &format!("/api/admin/solutions/{id}/review/start"),
        REVIEWER,
        &json!({}),
    );
    let revision = server.post(
        &format!("/api/admin/solutions/{id}/review/complete"),
        REVIEWER,
        &json!({"decision": "NEEDS_REVISION", "scores": scores(), "suggestions": "add specs"}),
    );
    assert_eq!(revision.status, 200, "{}", revision.body);
    assert_eq!(revision.json()["solution"]["status"], "PENDING_REVIEW");

    let record = server.post(
        &format!("/api/admin/solutions/{id}/reviews"),
        ADMIN,
        &json!({"reviewerId": "reviewer-2", "decision": "REJECTED", "scores": scores()}),
    );
    assert_eq!(record.status, 201, "{}", record.body);

    let history = server.get(&format!("/api/admin/solutions/{id}/reviews"), ADMIN);
    assert_eq!(history.status, 200);
    assert_eq!(history.json().as_array().unwrap().len(), 2);
}

#[test]
fn bom_and_assets_round_trip() {
    let server = Server::start(&[("ENABLE_BOM_DUAL_WRITE", "true")]);
    let created = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "Racing quad", "price": "300.00"}),
    );
    let id = created.json()["id"].as_str().unwrap().to_string();

    let empty = server.get(&format!("/api/solutions/{id}/bom"), CREATOR);
    assert_eq!(empty.json()["source"], "EMPTY");

    let rejected = server.send_json(
        "PUT",
        &format!("/api/solutions/{id}/bom"),
        CREATOR,
        &json!({"items": [{"name": "Prop"}]}),
    );
    assert_eq!(rejected.status, 400);

    let put = server.send_json(
        "PUT",
        &format!("/api/solutions/{id}/bom"),
        CREATOR,
        &json!({"items": [
            {"name": "Frame", "quantity": 1, "unitPrice": "120.00"},
            {"name": "Prop", "quantity": 4, "unitPrice": "2.50", "weightGrams": 5}
        ]}),
    );
    assert_eq!(put.status, 200, "{}", put.body);

    let read = server.get(&format!("/api/solutions/{id}/bom"), CREATOR).json();
    assert_eq!(read["source"], "RELATIONAL");
    assert_eq!(read["itemCount"], 2);
    assert_eq!(read["totalCost"], "130.00");
    assert_eq!(read["items"][1]["name"], "Prop");

    let solution = server.get(&format!("/api/solutions/{id}"), CREATOR).json();
    assert_eq!(solution["bom"]["itemCount"], 2);

    // Buyers cannot see a draft.
    assert_eq!(
        server.get(&format!("/api/solutions/{id}/bom"), BUYER).status,
        403
    );

    let asset = server.post(
        &format!("/api/solutions/{id}/assets"),
        CREATOR,
        &json!({"kind": "IMAGE", "url": "https://cdn.example.com/quad.png", "title": "Hero"}),
    );
    assert_eq!(asset.status, 201, "{}", asset.body);
    let bad_url = server.post(
        &format!("/api/solutions/{id}/assets"),
        CREATOR,
        &json!({"kind": "IMAGE", "url": "ftp://cdn.example.com/quad.png"}),
    );
    assert_eq!(bad_url.status, 400);

    let assets = server.get(&format!("/api/solutions/{id}/assets"), CREATOR).json();
    assert_eq!(assets.as_array().unwrap().len(), 1);
    assert_eq!(assets[0]["kind"], "IMAGE");
}

#[test]
fn alipay_payment_confirms_the_order() {
    let (key, public) = alipay_keys();
    let server = Server::start(&[("ALIPAY_PUBLIC_KEY", public.as_str())]);
    let solution_id = publish_solution(&server);
    let (order_id, tx_id, trade_no) = place_order(&server, &solution_id, "ALIPAY");

    let mut notification = params(&[
        ("out_trade_no", trade_no.as_str()),
        ("trade_no", "2025010122001"),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "1299.00"),
        ("sign_type", "ED25519"),
    ]);
    let sign = alipay::sign(&notification, &key);
    notification.insert("sign".to_string(), sign);
    let form = alipay::to_form(&notification);

    let webhook = |body: &str| {
        server.request(
            "POST",
            "/api/payments/webhook/alipay",
            &[],
            Some(("application/x-www-form-urlencoded", body)),
        )
    };

    let accepted = webhook(&form);
    assert_eq!(accepted.status, 200, "{}", accepted.body);
    assert_eq!(accepted.body, "success");
    assert!(accepted
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("text/plain")));

    // Redelivery is acknowledged without a second transition.
    let again = webhook(&form);
    assert_eq!(again.status, 200);
    assert_eq!(again.body, "success");

    let order = server.get(&format!("/api/orders/{order_id}"), BUYER);
    assert_eq!(order.status, 200);
    assert_eq!(order.json()["status"], "CONFIRMED");
    assert_eq!(
        server.get(&format!("/api/orders/{order_id}"), CREATOR).status,
        403
    );

    let events = server.get(
        &format!("/api/admin/payments/events?transaction_id={tx_id}"),
        ADMIN,
    );
    assert_eq!(events.status, 200, "{}", events.body);
    let kinds: Vec<String> = events
        .json()
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["DUPLICATE", "COMPLETED"]);
    assert_eq!(
        server.get("/api/admin/payments/events", BUYER).status,
        403
    );
}

#[test]
fn alipay_rejections() {
    let (key, public) = alipay_keys();
    let server = Server::start(&[("ALIPAY_PUBLIC_KEY", public.as_str())]);
    let solution_id = publish_solution(&server);
    let (order_id, _, trade_no) = place_order(&server, &solution_id, "ALIPAY");

    let signed = |pairs: &[(&str, &str)]| {
        let mut p = params(pairs);
        let sign = alipay::sign(&p, &key);
        p.insert("sign".to_string(), sign);
        p
    };
    let post_json = |p: &BTreeMap<String, String>| {
        let body = serde_json::to_string(p).unwrap();
        server.request(
            "POST",
            "/api/payments/webhook/alipay",
            &[],
            Some(("application/json", body.as_str())),
        )
    };

    let mut tampered = signed(&[
        ("out_trade_no", trade_no.as_str()),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "1299.00"),
    ]);
    tampered.insert("total_amount".to_string(), "1.00".to_string());
    let response = post_json(&tampered);
    assert_eq!(response.status, 400);
    assert_eq!(response.json()["code"], "SIGNATURE_INVALID");

    let short = signed(&[
        ("out_trade_no", trade_no.as_str()),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "1.00"),
    ]);
    let response = post_json(&short);
    assert_eq!(response.status, 400);
    assert_eq!(response.json()["code"], "AMOUNT_MISMATCH");

    let unknown = signed(&[
        ("out_trade_no", "no-such-trade"),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "1299.00"),
    ]);
    let response = post_json(&unknown);
    assert_eq!(response.status, 404);
    assert_eq!(response.json()["code"], "UNKNOWN_TRANSACTION");

    let order = server.get(&format!("/api/orders/{order_id}"), BUYER).json();
    assert_eq!(order["status"], "PENDING");

    let events = server.get("/api/admin/payments/events", ADMIN).json();
    let rejected = events
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "REJECTED")
        .count();
    assert_eq!(rejected, 3);
}

#[test]
fn alipay_without_key_is_unavailable() {
    let server = Server::start(&[]);
    let response = server.request(
        "POST",
        "/api/payments/webhook/alipay",
        &[],
        Some(("application/x-www-form-urlencoded", "out_trade_no=x")),
    );
    assert_eq!(response.status, 503);
    assert_eq!(response.json()["code"], "NOT_CONFIGURED");
}

#[test]
fn wechat_payment_replies_in_xml() {
    let server = Server::start(&[]);
    let solution_id = publish_solution(&server);
    let (order_id, _, trade_no) = place_order(&server, &solution_id, "WECHAT");

    let mut notification = params(&[
        ("return_code", "SUCCESS"),
        ("result_code", "SUCCESS"),
        ("out_trade_no", trade_no.as_str()),
        ("transaction_id", "4200001234"),
        ("total_fee", "129900"),
    ]);
    let sign = wechat::sign(&notification, WECHAT_KEY).unwrap();
    notification.insert("sign".to_string(), sign);
    let xml = wechat::to_xml(&notification);

    let response = server.request(
        "POST",
        "/api/payments/webhook/wechat",
        &[],
        Some(("text/xml", xml.as_str())),
    );
    assert_eq!(response.status, 200, "{}", response.body);
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/xml")));
    let reply = wechat::parse_xml(&response.body).unwrap();
    assert_eq!(reply["return_code"], "SUCCESS");

    let order = server.get(&format!("/api/orders/{order_id}"), BUYER).json();
    assert_eq!(order["status"], "CONFIRMED");

    let garbage = server.request(
        "POST",
        "/api/payments/webhook/wechat",
        &[],
        Some(("text/xml", "<xml><a>")),
    );
    assert_eq!(garbage.status, 400);
    let reply = wechat::parse_xml(&garbage.body).unwrap();
    assert_eq!(reply["return_code"], "FAIL");
}

#[test]
fn rate_limit_returns_429() {
    let server = Server::start(&[("OPENAERO_RATE_LIMIT", "3")]);
    for _ in 0..3 {
        assert_eq!(server.request("GET", "/health", &[], None).status, 200);
    }
    let limited = server.request("GET", "/health", &[], None);
    assert_eq!(limited.status, 429);
    let body = limited.json();
    assert_eq!(body["error"], "rate limit exceeded");
    assert!(body["retry_after"].as_u64().unwrap() <= 60);

    // Provider callbacks from the same address still get through.
    for _ in 0..3 {
        let webhook = server.request(
            "POST",
            "/api/payments/webhook/alipay",
            &[],
            Some(("application/x-www-form-urlencoded", "out_trade_no=x")),
        );
        assert_eq!(webhook.status, 503, "{}", webhook.body);
    }
}

#[test]
fn sqlite_data_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("market.db").display());

    let server = Server::start_in(dir, &[("OPENAERO_DATABASE_URL", url.as_str())]);
    let created = server.post(
        "/api/solutions",
        CREATOR,
        &json!({"title": "Persistent quad", "price": "99.90"}),
    );
    assert_eq!(created.status, 201, "{}", created.body);
    let id = created.json()["id"].as_str().unwrap().to_string();
    let dir = server.stop();

    let server = Server::start_in(dir, &[("OPENAERO_DATABASE_URL", url.as_str())]);
    let fetched = server.get(&format!("/api/solutions/{id}"), CREATOR);
    assert_eq!(fetched.status, 200, "{}", fetched.body);
    assert_eq!(fetched.json()["title"], "Persistent quad");
    assert_eq!(fetched.json()["price"], "99.90");
}
