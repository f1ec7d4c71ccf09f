use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    /// Whole-request limit for buffered calls. SSE bodies are left open.
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "chatrelay/0.1".to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }

    /// POST JSON and decode a typed JSON response. Non-2xx statuses map to `RelayError`.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let resp = self
            .post(url, body, headers)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|_e| RelayError::ProviderUnavailable {
                provider: "http".into(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error("http", status, ra, &text));
        }

        resp.json::<R>()
            .await
            .map_err(|e| RelayError::ProviderError {
                provider: "http".into(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })
    }

    /// POST JSON and hand back the raw status and body, whatever the status.
    /// Only transport failures are errors.
    pub async fn post_json_raw<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(StatusCode, String)> {
        let resp = self
            .post(url, body, headers)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RelayError::Other(anyhow::anyhow!("request to {url} failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| {
                RelayError::Other(anyhow::anyhow!("reading body from {url} failed: {e}"))
            })?;
        Ok((status, text))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let resp = self
            .post(url, body, headers)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|_| RelayError::ProviderUnavailable {
                provider: "http".into(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error("http", status, ra, &body));
        }

        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(Box::pin(byte_stream));
        Ok(Box::pin(line_stream))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> RelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => RelayError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => RelayError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: String,
    flushed_tail: bool,
}

impl LineStream {
    fn new(
        inner: std::pin::Pin<
            Box<
                dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>>
                    + Send,
            >,
        >,
    ) -> Self {
        Self {
            inner,
            buf: String::new(),
            flushed_tail: false,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            if let Some(idx) = self.buf.find('\n') {
                let mut line = self.buf.drain(..=idx).collect::<String>();
                line.truncate(line.len() - 1);
                if line.ends_with('\r') {
                    line.truncate(line.len() - 1);
                }
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                    continue;
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(RelayError::ProviderUnavailable {
                        provider: "http".into(),
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_success() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/threads").header("x-test", "1");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });

        #[derive(serde::Deserialize)]
        struct Resp {
            id: String,
        }

        let client = HttpClient::new_default().unwrap();
        let resp: Resp = client
            .post_json(
                &format!("{}/threads", server.base_url()),
                &json!({}),
                &[("x-test", "1")],
            )
            .await
            .unwrap();

        assert_eq!(resp.id, "thread_1");
        m.assert();
    }

    #[tokio::test]
    async fn post_json_429_maps_to_rate_limited() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/runs");
            then.status(429).header("Retry-After", "3").body("slow down");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/runs", server.base_url()),
                &json!({}),
                &[],
            )
            .await
            .unwrap_err();

        match err {
            RelayError::RateLimited {
                provider,
                retry_after,
            } => {
                assert_eq!(provider, "http");
                assert_eq!(retry_after, Some(3));
            }
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_503_maps_to_unavailable() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/runs");
            then.status(503).body("oops");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/runs", server.base_url()),
                &json!({}),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn post_json_400_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/runs");
            then.status(400).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/runs", server.base_url()),
                &json!({}),
                &[],
            )
            .await
            .unwrap_err();
        match err {
            RelayError::ProviderError { code, message, .. } => {
                assert_eq!(code, "400");
                assert!(message.ends_with("..."));
                assert_eq!(message.len(), 303);
            }
            other => panic!("expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_raw_keeps_error_status_and_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/search");
            then.status(401).body("bad key");
        });
        let client = HttpClient::new_default().expect("client");
        let (status, body) = client
            .post_json_raw(&format!("{}/search", server.base_url()), &json!({"query": "q"}), &[])
            .await
            .expect("raw post");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "bad key");
    }

    #[tokio::test]
    async fn network_error_maps_to_unavailable() {
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>("http://127.0.0.1:9/runs", &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn sse_lines_split_on_lf_and_crlf() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("event: a\r\ndata: {}\n\ntail");
        });
        let client = HttpClient::new_default().expect("client");
        let lines: Vec<String> = client
            .post_sse_lines(&format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .expect("stream")
            .map(|l| l.expect("line").line)
            .collect()
            .await;
        assert_eq!(lines, vec!["event: a", "data: {}", "", "tail"]);
    }

    #[tokio::test]
    async fn request_timeout_skips_streaming_calls() {
        let server = MockServer::start();
        let _slow_json = server.mock(|when, then| {
            when.method(POST).path("/json");
            then.status(200)
                .delay(std::time::Duration::from_millis(500))
                .json_body(json!({"ok": true}));
        });
        let _slow_stream = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(200)
                .delay(std::time::Duration::from_millis(500))
                .header("content-type", "text/event-stream")
                .body("data: {}\n");
        });
        let client = HttpClient::from_cfg(&HttpCfg {
            request_timeout_ms: 200,
            ..Default::default()
        })
        .expect("client");

        let url = format!("{}/json", server.base_url());
        let err = client
            .post_json::<_, serde_json::Value>(&url, &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));

        let lines: Vec<String> = client
            .post_sse_lines(&format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .expect("stream")
            .map(|l| l.expect("line").line)
            .collect()
            .await;
        assert_eq!(lines, vec!["data: {}"]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(200);
        let t = truncate(&s, 301);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), 300 + 3);
    }
}
