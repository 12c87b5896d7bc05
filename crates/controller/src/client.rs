//! Controller API client.
//!
//! Async HTTP client using `reqwest`, with Bearer authentication when the
//! engine is configured with a secret.

use std::collections::HashMap;

use clashxw_protocol::{
    ClashConfig, ConfigReload, ModeUpdate, ProxiesResponse, ProxySelection, TunUpdate,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// URL the engine probes when measuring latency.
pub const DELAY_TEST_URL: &str = "https://www.gstatic.com/generate_204";

/// Latency probe timeout handed to the engine.
pub const DELAY_TIMEOUT_MS: u32 = 5000;

/// Errors from the controller client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid controller secret")]
    InvalidSecret,
}

/// Engine state fetched right before the tray menu opens.
///
/// Either half is `None` when its request failed.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub config: Option<ClashConfig>,
    pub proxies: Option<ProxiesResponse>,
}

#[derive(Deserialize)]
struct DelayResponse {
    delay: u32,
}

fn segment(name: &str) -> String {
    utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
}

fn delay_params() -> [(&'static str, String); 2] {
    [
        ("url", DELAY_TEST_URL.to_string()),
        ("timeout", DELAY_TIMEOUT_MS.to_string()),
    ]
}

/// Controller API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Creates a client for the controller at `base_url`
    /// (e.g. `http://127.0.0.1:9090`).
    pub fn new(base_url: &str, secret: Option<&str>) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {secret}"))
                    .map_err(|_| Error::InvalidSecret)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Sends `req` and turns a non-success status into [`Error::Api`].
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let resp = self
            .send(self.http.get(self.url(endpoint)).query(params))
            .await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// `GET /configs`.
    pub async fn configs(&self) -> Result<ClashConfig, Error> {
        self.get_json("/configs", &[]).await
    }

    /// `GET /proxies`.
    pub async fn proxies(&self) -> Result<ProxiesResponse, Error> {
        self.get_json("/proxies", &[]).await
    }

    /// Fetches configuration and proxies concurrently.
    ///
    /// Failures are logged and leave the corresponding half empty.
    pub async fn snapshot(&self) -> EngineState {
        let (config, proxies) = tokio::join!(self.configs(), self.proxies());
        EngineState {
            config: config
                .inspect_err(|e| tracing::warn!(error = %e, "failed to fetch configs"))
                .ok(),
            proxies: proxies
                .inspect_err(|e| tracing::warn!(error = %e, "failed to fetch proxies"))
                .ok(),
        }
    }

    /// Switches the routing mode.
    pub async fn set_mode(&self, mode: &str) -> Result<(), Error> {
        let body = ModeUpdate { mode: mode.into() };
        self.send(self.http.patch(self.url("/configs")).json(&body))
            .await?;
        tracing::info!(mode, "mode updated");
        Ok(())
    }

    /// Turns TUN mode on or off.
    pub async fn set_tun(&self, enable: bool) -> Result<(), Error> {
        self.send(
            self.http
                .patch(self.url("/configs"))
                .json(&TunUpdate::new(enable)),
        )
        .await?;
        tracing::info!(enable, "tun mode updated");
        Ok(())
    }

    /// Makes `node` the active member of selector `group`.
    pub async fn select_proxy(&self, group: &str, node: &str) -> Result<(), Error> {
        let body = ProxySelection { name: node.into() };
        let endpoint = format!("/proxies/{}", segment(group));
        self.send(self.http.put(self.url(&endpoint)).json(&body))
            .await?;
        tracing::info!(group, node, "proxy selected");
        Ok(())
    }

    /// Makes the engine load the config file at `path`.
    pub async fn reload_config(&self, path: &str) -> Result<(), Error> {
        let body = ConfigReload { path: path.into() };
        self.send(
            self.http
                .put(self.url("/configs"))
                .query(&[("force", "true")])
                .json(&body),
        )
        .await?;
        tracing::info!(path, "config reloaded");
        Ok(())
    }

    /// Measures every member of `group`.
    ///
    /// Returns member name to latency. A failed test is logged and yields an
    /// empty map; the engine still records what it measured.
    pub async fn test_group_delay(&self, group: &str) -> HashMap<String, u32> {
        let endpoint = format!("/group/{}/delay", segment(group));
        match self.get_json(&endpoint, &delay_params()).await {
            Ok(delays) => delays,
            Err(e) => {
                tracing::warn!(group, error = %e, "group latency test failed");
                HashMap::new()
            }
        }
    }

    /// Measures one proxy. A failed test is logged and yields `None`.
    pub async fn test_proxy_delay(&self, proxy: &str) -> Option<u32> {
        let endpoint = format!("/proxies/{}/delay", segment(proxy));
        match self
            .get_json::<DelayResponse>(&endpoint, &delay_params())
            .await
        {
            Ok(resp) => Some(resp.delay),
            Err(e) => {
                tracing::debug!(proxy, error = %e, "proxy latency test failed");
                None
            }
        }
    }

    /// Tests every selector group and every leaf proxy concurrently.
    ///
    /// Returns the number of tests started.
    pub async fn test_all_delays(&self, proxies: &ProxiesResponse) -> usize {
        let mut tasks = tokio::task::JoinSet::new();
        for (name, node) in &proxies.proxies {
            let client = self.clone();
            let name = name.clone();
            if node.is_selector() {
                tasks.spawn(async move {
                    client.test_group_delay(&name).await;
                });
            } else if node.members().is_empty() {
                tasks.spawn(async move {
                    client.test_proxy_delay(&name).await;
                });
            }
        }

        let started = tasks.len();
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "latency task aborted");
            }
        }
        tracing::info!(tests = started, "latency tests completed");
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clashxw_protocol::ProxyNode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// One request as seen by the mock server.
    #[derive(Debug)]
    struct Captured {
        method: String,
        target: String,
        authorization: Option<String>,
        body: String,
    }

    async fn read_request(stream: &mut TcpStream) -> Captured {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap().split(' ');
        let method = request_line.next().unwrap().to_string();
        let target = request_line.next().unwrap().to_string();

        let mut content_length = 0;
        let mut authorization = None;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim().to_string();
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap();
                } else if name.eq_ignore_ascii_case("authorization") {
                    authorization = Some(value);
                }
            }
        }

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();

        Captured {
            method,
            target,
            authorization,
            body,
        }
    }

    /// Starts a mock controller. Each request is answered with the first
    /// route whose path prefix matches, or 404.
    async fn mock_server(
        routes: Vec<(&'static str, u16, &'static str)>,
    ) -> (
        String,
        mpsc::UnboundedReceiver<Captured>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let req = read_request(&mut stream).await;
                let path = req.target.split('?').next().unwrap_or_default().to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _, _)| path.starts_with(prefix))
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, "not found"));
                let _ = tx.send(req);

                let resp = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, rx, handle)
    }

    #[test]
    fn client_new_trims_trailing_slash() {
        let client = Client::new("http://127.0.0.1:9090/", None).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9090");
        assert_eq!(client.url("/configs"), "http://127.0.0.1:9090/configs");
    }

    #[test]
    fn client_new_rejects_bad_secret() {
        let err = Client::new("http://127.0.0.1:9090", Some("bad\nsecret")).unwrap_err();
        assert!(matches!(err, Error::InvalidSecret));
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(segment("Proxy"), "Proxy");
        assert_eq!(segment("🇭🇰 HK/01"), "%F0%9F%87%AD%F0%9F%87%B0%20HK%2F01");
    }

    #[tokio::test]
    async fn configs_parses_and_sends_bearer() {
        let (url, mut rx, handle) = mock_server(vec![(
            "/configs",
            200,
            r#"{"mode":"rule","mixed-port":7890,"tun":{"enable":false}}"#,
        )])
        .await;

        let client = Client::new(&url, Some("s3cret")).unwrap();
        let cfg = client.configs().await.unwrap();
        assert_eq!(cfg.mode.as_deref(), Some("rule"));
        assert_eq!(cfg.mixed_port, Some(7890));

        let req = rx.recv().await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.authorization.as_deref(), Some("Bearer s3cret"));

        handle.abort();
    }

    #[tokio::test]
    async fn no_secret_means_no_auth_header() {
        let (url, mut rx, handle) = mock_server(vec![("/proxies", 200, r#"{"proxies":{}}"#)]).await;

        let client = Client::new(&url, Some("")).unwrap();
        client.proxies().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().authorization, None);

        handle.abort();
    }

    #[tokio::test]
    async fn set_mode_patches_configs() {
        let (url, mut rx, handle) = mock_server(vec![("/configs", 204, "")]).await;

        let client = Client::new(&url, None).unwrap();
        client.set_mode("global").await.unwrap();

        let req = rx.recv().await.unwrap();
        assert_eq!(req.method, "PATCH");
        assert_eq!(req.target, "/configs");
        assert_eq!(req.body, r#"{"mode":"global"}"#);

        handle.abort();
    }

    #[tokio::test]
    async fn set_tun_error_status_is_reported() {
        let (url, _rx, handle) = mock_server(vec![("/configs", 400, "tun unsupported")]).await;

        let client = Client::new(&url, None).unwrap();
        let err = client.set_tun(true).await.unwrap_err();
        match err {
            Error::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "tun unsupported");
            }
            other => panic!("unexpected error: {other}"),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn select_proxy_puts_encoded_group() {
        let (url, mut rx, handle) = mock_server(vec![("/proxies/", 204, "")]).await;

        let client = Client::new(&url, None).unwrap();
        client.select_proxy("My Group", "HK 01").await.unwrap();

        let req = rx.recv().await.unwrap();
        assert_eq!(req.method, "PUT");
        assert_eq!(req.target, "/proxies/My%20Group");
        assert_eq!(req.body, r#"{"name":"HK 01"}"#);

        handle.abort();
    }

    #[tokio::test]
    async fn reload_config_forces() {
        let (url, mut rx, handle) = mock_server(vec![("/configs", 204, "")]).await;

        let client = Client::new(&url, None).unwrap();
        client.reload_config("/cfg/config.yaml").await.unwrap();

        let req = rx.recv().await.unwrap();
        assert_eq!(req.method, "PUT");
        assert_eq!(req.target, "/configs?force=true");
        assert_eq!(req.body, r#"{"path":"/cfg/config.yaml"}"#);

        handle.abort();
    }

    #[tokio::test]
    async fn proxy_delay_queries_test_url() {
        let (url, mut rx, handle) = mock_server(vec![("/proxies/HK/delay", 200, r#"{"delay":87}"#)]).await;

        let client = Client::new(&url, None).unwrap();
        assert_eq!(client.test_proxy_delay("HK").await, Some(87));

        let req = rx.recv().await.unwrap();
        assert!(req.target.starts_with("/proxies/HK/delay?"));
        assert!(req.target.contains("url=https%3A%2F%2Fwww.gstatic.com%2Fgenerate_204"));
        assert!(req.target.contains("timeout=5000"));

        handle.abort();
    }

    #[tokio::test]
    async fn failed_delay_tests_are_swallowed() {
        let (url, _rx, handle) = mock_server(vec![
            ("/proxies/", 504, r#"{"message":"Timeout"}"#),
            ("/group/", 503, "unavailable"),
        ])
        .await;

        let client = Client::new(&url, None).unwrap();
        assert_eq!(client.test_proxy_delay("HK").await, None);
        assert!(client.test_group_delay("Proxy").await.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn group_delay_returns_members() {
        let (url, mut rx, handle) =
            mock_server(vec![("/group/", 200, r#"{"HK":120,"JP":0}"#)]).await;

        let client = Client::new(&url, None).unwrap();
        let delays = client.test_group_delay("Proxy").await;
        assert_eq!(delays.get("HK"), Some(&120));
        assert_eq!(delays.get("JP"), Some(&0));
        assert!(rx.recv().await.unwrap().target.starts_with("/group/Proxy/delay?"));

        handle.abort();
    }

    #[tokio::test]
    async fn snapshot_keeps_successful_half() {
        let (url, _rx, handle) = mock_server(vec![
            ("/configs", 200, r#"{"mode":"direct"}"#),
            ("/proxies", 500, "boom"),
        ])
        .await;

        let client = Client::new(&url, None).unwrap();
        let state = client.snapshot().await;
        assert_eq!(
            state.config.and_then(|c| c.mode).as_deref(),
            Some("direct")
        );
        assert!(state.proxies.is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn test_all_covers_groups_and_leaves() {
        let (url, mut rx, handle) = mock_server(vec![
            ("/group/", 200, "{}"),
            ("/proxies/", 200, r#"{"delay":1}"#),
        ])
        .await;

        let mut proxies = ProxiesResponse::default();
        let selector = ProxyNode {
            kind: "Selector".into(),
            all: Some(vec!["HK".into()]),
            ..Default::default()
        };
        let auto = ProxyNode {
            kind: "URLTest".into(),
            all: Some(vec!["HK".into()]),
            ..Default::default()
        };
        let leaf = ProxyNode {
            kind: "Shadowsocks".into(),
            ..Default::default()
        };
        proxies.proxies.insert("Proxy".into(), selector);
        proxies.proxies.insert("Auto".into(), auto);
        proxies.proxies.insert("HK".into(), leaf);

        let client = Client::new(&url, None).unwrap();
        assert_eq!(client.test_all_delays(&proxies).await, 2);

        let mut targets = vec![
            rx.recv().await.unwrap().target,
            rx.recv().await.unwrap().target,
        ];
        targets.sort();
        assert!(targets[0].starts_with("/group/Proxy/delay"));
        assert!(targets[1].starts_with("/proxies/HK/delay"));

        handle.abort();
    }
}
