//! Remote object-store tier: S3-compatible REST with SigV4 signing.
//!
//! Talks to the bucket with plain `reqwest` and hand-rolled
//! [AWS Signature V4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using the pure-Rust `hmac` + `sha2` crates — no vendor SDK, no C
//! dependencies, and the same code path works against MinIO/LocalStack via a
//! custom endpoint.
//!
//! Every operation degrades to `false` / `None` / empty instead of erroring:
//! the remote tier is optional, and callers treat absence and unreachability
//! identically. Failures are logged at `warn` so operators can see the
//! divergence, but no request ever fails because the bucket did.
//!
//! # Credentials
//!
//! `AWS_ACCESS_KEY_ID` + `AWS_SECRET_ACCESS_KEY`, with optional
//! `AWS_SESSION_TOKEN`. When either required variable is unset,
//! [`S3RemoteTier::from_env`] returns `None` and the service runs local-only.
//!
//! # Endpoint convention
//!
//! Without a custom endpoint the virtual-hosted AWS form
//! `<bucket>.s3.<region>.amazonaws.com` is used. A custom endpoint is taken
//! verbatim as the host (it is expected to route to the bucket itself, as a
//! MinIO alias or reverse proxy would).

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::RemoteTier;
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// S3-compatible implementation of the remote tier.
pub struct S3RemoteTier {
    bucket: String,
    region: String,
    scheme: String,
    host: String,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    http: reqwest::Client,
}

impl S3RemoteTier {
    /// Build the tier from config + environment credentials.
    ///
    /// Returns `None` (soft degrade to local-only) when credentials are absent.
    pub fn from_env(config: &AppConfig) -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty());
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        let (access_key_id, secret_access_key) = match (access_key_id, secret_access_key) {
            (Some(a), Some(s)) => (a, s),
            _ => {
                warn!("object-store credentials not set; running with local tier only");
                return None;
            }
        };

        let (scheme, host) = match &config.endpoint_url {
            Some(endpoint) => {
                let trimmed = endpoint.trim_end_matches('/');
                if let Some(rest) = trimmed.strip_prefix("http://") {
                    ("http".to_string(), rest.to_string())
                } else {
                    (
                        "https".to_string(),
                        trimmed.trim_start_matches("https://").to_string(),
                    )
                }
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
            ),
        };

        Some(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            scheme,
            host,
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),
            http: reqwest::Client::new(),
        })
    }

    fn object_url(&self, encoded_key: &str) -> String {
        format!("{}://{}/{}", self.scheme, self.host, encoded_key)
    }

    /// Sign a request and return the headers to attach, including `Authorization`.
    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        payload_hash: &str,
        extra_headers: &[(&str, &str)],
    ) -> Vec<(String, String)> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers: Vec<(String, String)> = vec![
            ("host".into(), self.host.clone()),
            ("x-amz-content-sha256".into(), payload_hash.to_string()),
            ("x-amz-date".into(), amz_date.clone()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_string(), v.to_string()));
        }
        if let Some(token) = &self.session_token {
            headers.push(("x-amz-security-token".into(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_header_names = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String =
            headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_header_names}\n{payload_hash}"
        );
        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signature = hex_hmac(
            &self.signing_key(&date_stamp),
            string_to_sign.as_bytes(),
        );

        headers.push((
            "authorization".into(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_header_names}, Signature={signature}",
                self.access_key_id
            ),
        ));
        // `host` is set by reqwest itself; sending it twice is rejected.
        headers.retain(|(k, _)| k != "host");
        headers
    }

    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        hmac(&k_service, b"aws4_request")
    }

    async fn request(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Option<(Vec<u8>, &str)>,
    ) -> Option<reqwest::Response> {
        let encoded_key = encode_key(key);
        let mut sorted_query = query.to_vec();
        sorted_query.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_query = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let (payload, payload_hash, content_type) = match &body {
            Some((bytes, ct)) => (bytes.clone(), hex_sha256(bytes), Some(*ct)),
            None => (Vec::new(), hex_sha256(b""), None),
        };

        let headers = self.sign(
            method.as_str(),
            &format!("/{encoded_key}"),
            &canonical_query,
            &payload_hash,
            &[],
        );

        let url = if canonical_query.is_empty() {
            self.object_url(&encoded_key)
        } else {
            format!("{}?{}", self.object_url(&encoded_key), canonical_query)
        };

        let mut req = self.http.request(method, &url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        if !payload.is_empty() {
            req = req.body(payload);
        }

        match req.send().await {
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!(bucket = %self.bucket, key, error = %e, "remote tier request failed");
                None
            }
        }
    }
}

#[async_trait]
impl RemoteTier for S3RemoteTier {
    async fn exists(&self, key: &str) -> bool {
        match self.request(reqwest::Method::HEAD, key, &[], None).await {
            Some(resp) => resp.status().is_success(),
            None => false,
        }
    }

    async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let resp = self.request(reqwest::Method::GET, key, &[], None).await?;
        if !resp.status().is_success() {
            if resp.status() != reqwest::StatusCode::NOT_FOUND {
                warn!(key, status = %resp.status(), "remote tier GET failed");
            }
            return None;
        }
        resp.bytes().await.ok().map(|b| b.to_vec())
    }

    async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> bool {
        let resp = self
            .request(
                reqwest::Method::PUT,
                key,
                &[],
                Some((bytes.to_vec(), content_type)),
            )
            .await;
        match resp {
            Some(resp) if resp.status().is_success() => {
                debug!(key, size = bytes.len(), "uploaded to remote tier");
                true
            }
            Some(resp) => {
                warn!(key, status = %resp.status(), "remote tier PUT failed");
                false
            }
            None => false,
        }
    }

    async fn list(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = match self.request(reqwest::Method::GET, "", &query, None).await {
                Some(r) if r.status().is_success() => r,
                Some(r) => {
                    warn!(prefix, status = %r.status(), "remote tier list failed");
                    return keys;
                }
                None => return keys,
            };
            let xml = match resp.text().await {
                Ok(t) => t,
                Err(_) => return keys,
            };

            for block in xml_blocks(&xml, "Contents") {
                if let Some(key) = xml_text(block, "Key") {
                    if !key.ends_with('/') {
                        keys.push(key);
                    }
                }
            }

            let truncated = xml_text(&xml, "IsTruncated").as_deref() == Some("true");
            continuation = xml_text(&xml, "NextContinuationToken");
            if !truncated || continuation.is_none() {
                break;
            }
        }

        keys.sort();
        keys
    }

    async fn read_url(&self, key: &str, ttl_secs: u64) -> Option<String> {
        // Only issue URLs for keys that actually exist; a signed URL to a
        // missing object would just defer the 404 to the browser.
        if !self.exists(key).await {
            return None;
        }

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);

        let mut query = vec![
            (
                "X-Amz-Algorithm".to_string(),
                "AWS4-HMAC-SHA256".to_string(),
            ),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{scope}", self.access_key_id),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), ttl_secs.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(token) = &self.session_token {
            query.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        query.sort_by(|a, b| a.0.cmp(&b.0));

        let encoded_key = encode_key(key);
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let canonical_request = format!(
            "GET\n/{encoded_key}\n{canonical_query}\nhost:{}\n\nhost\n{UNSIGNED_PAYLOAD}",
            self.host
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signature = hex_hmac(&self.signing_key(&date_stamp), string_to_sign.as_bytes());

        Some(format!(
            "{}?{canonical_query}&X-Amz-Signature={signature}",
            self.object_url(&encoded_key)
        ))
    }
}

// ── SigV4 primitives ─────────────────────────────────────────────────────

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac(key, data))
}

/// RFC 3986 percent-encoding over everything but unreserved characters,
/// as SigV4 canonicalisation requires.
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Encode an object key segment-wise, preserving `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

// ── Minimal XML extraction for ListObjectsV2 ─────────────────────────────
//
// The listing response is flat, ASCII, and machine-generated; full XML
// parsing buys nothing here over substring scanning.

fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let body_start = start + open.len();
        match rest[body_start..].find(&close) {
            Some(end) => {
                blocks.push(&rest[body_start..body_start + end]);
                rest = &rest[body_start + end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}
