//! OCI distribution client.
//!
//! Implements the subset of the distribution protocol the builder needs:
//! index/manifest/blob pulls, bearer challenge/response authentication and
//! the monolithic two-step blob upload. Every request carries an individual
//! deadline; deadline overruns surface as [`OciError::Timeout`] and are not
//! retried here.

use crate::reference::ImageReference;
use crate::spec::{media_type, read_index, Digest, OciIndex};
use crate::{OciError, Result};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Scope requested when answering a bearer challenge.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScopeAction {
    Pull,
    Push,
}

impl ScopeAction {
    fn scope(self) -> &'static str {
        match self {
            ScopeAction::Pull => "pull",
            ScopeAction::Push => "push,pull",
        }
    }
}

/// Client for a single registry conversation.
///
/// Cloning is cheap (the underlying connection pool is shared), which lets
/// layer fetches fan out over the same client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    protocol: String,
    timeout: Duration,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        // Transport compression must stay off so blob bytes reach the wire
        // exactly as cached.
        let http = Client::builder()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction is infallible here");
        Self {
            http,
            protocol: "https".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the URL scheme. Plain `http` is for local registries and
    /// tests only.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Download and validate the image index of `image`.
    pub async fn download_index(&self, image: &ImageReference) -> Result<OciIndex> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.protocol,
            image.pull_host(),
            image.repository,
            image.reference
        );
        tracing::debug!(url = %url, "downloading index");

        let mut token = None;
        let response = self
            .send_authed(
                || self.http.get(&url).header(ACCEPT, media_type::IMAGE_INDEX),
                image,
                ScopeAction::Pull,
                &mut token,
            )
            .await?;

        let response = expect_download(response, || image.canonical_url())?;
        let bytes = response.bytes().await?;
        let index = read_index(&bytes)?;
        match index.media_type.as_deref() {
            Some(media_type::IMAGE_INDEX) => Ok(index),
            other => Err(OciError::InvalidIndexMediaType(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// Open a streaming download of a manifest blob by digest.
    pub async fn download_manifest(
        &self,
        image: &ImageReference,
        digest: &Digest,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.protocol,
            image.pull_host(),
            image.repository,
            digest
        );
        tracing::debug!(digest = %digest, "downloading manifest");

        let mut token = None;
        let response = self
            .send_authed(
                || {
                    self.http
                        .get(&url)
                        .header(ACCEPT, media_type::IMAGE_MANIFEST)
                },
                image,
                ScopeAction::Pull,
                &mut token,
            )
            .await?;
        expect_download(response, || digest.to_string())
    }

    /// Open a streaming download of a blob by digest.
    pub async fn download_blob(
        &self,
        image: &ImageReference,
        digest: &Digest,
        media_type: &str,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}://{}/v2/{}/blobs/{}",
            self.protocol,
            image.pull_host(),
            image.repository,
            digest
        );
        tracing::debug!(digest = %digest, media_type = %media_type, "downloading blob");

        let mut token = None;
        let response = self
            .send_authed(
                || self.http.get(&url).header(ACCEPT, media_type),
                image,
                ScopeAction::Pull,
                &mut token,
            )
            .await?;
        expect_download(response, || digest.to_string())
    }

    /// Monolithic two-step blob upload: POST an upload session, then PUT
    /// the bytes against the returned location with the digest attached.
    pub async fn upload_blob(
        &self,
        image: &ImageReference,
        hex_digest: &str,
        reader: Box<dyn Read + Send>,
        size: u64,
        token: &mut Option<String>,
    ) -> Result<()> {
        let start_url = format!(
            "{}://{}/v2/{}/blobs/uploads/",
            self.protocol,
            image.push_host(),
            image.repository
        );
        let response = self
            .send_authed(
                || self.http.post(&start_url),
                image,
                ScopeAction::Push,
                token,
            )
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return Err(OciError::UploadRejected(status.as_u16()));
        }
        let location = match response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(location) => location.to_string(),
            None => {
                tracing::warn!("upload session accepted without a Location header");
                return Err(OciError::UploadRejected(status.as_u16()));
            }
        };

        // Registries may hand back a relative session location.
        let location = if location.starts_with('/') {
            format!("{}://{}{}", self.protocol, image.push_host(), location)
        } else {
            location
        };
        let separator = if location.contains('?') { '&' } else { '?' };
        let put_url = format!("{location}{separator}digest=sha256:{hex_digest}");

        tracing::debug!(digest = %hex_digest, size = size, "uploading blob");

        let mut request = self
            .http
            .put(&put_url)
            .header(CONTENT_TYPE, media_type::OCTET_STREAM)
            .header(CONTENT_LENGTH, size)
            .body(stream_body(reader))
            .timeout(self.timeout);
        if let Some(token) = token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() != StatusCode::CREATED {
            return Err(OciError::UploadRejected(response.status().as_u16()));
        }
        Ok(())
    }

    /// PUT a manifest (or index) under `reference` with its declared media
    /// type.
    pub async fn upload_manifest(
        &self,
        image: &ImageReference,
        bytes: &[u8],
        manifest_media_type: &str,
        reference: &str,
        token: &mut Option<String>,
    ) -> Result<()> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.protocol,
            image.push_host(),
            image.repository,
            reference
        );
        tracing::debug!(reference = %reference, media_type = %manifest_media_type, "uploading manifest");

        let response = self
            .send_authed(
                || {
                    self.http
                        .put(&url)
                        .header(CONTENT_TYPE, manifest_media_type)
                        .body(bytes.to_vec())
                },
                image,
                ScopeAction::Push,
                token,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            status => Err(OciError::UploadRejected(status.as_u16())),
        }
    }

    /// Issue a request, answering a bearer challenge at most once.
    ///
    /// The retry happens only when no auth was previously attempted; a
    /// second 401/403 is fatal. On success the token is kept in `token` so
    /// a whole upload sequence reuses it.
    async fn send_authed<F>(
        &self,
        build: F,
        image: &ImageReference,
        action: ScopeAction,
        token: &mut Option<String>,
    ) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut request = build().timeout(self.timeout);
        if let Some(token) = token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();

        let challenged = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
        if !challenged || token.is_some() {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                OciError::AuthFailure(format!("status {status} without a WWW-Authenticate header"))
            })?;
        let (realm, service) = parse_www_authenticate(challenge)?;
        let fresh = self
            .fetch_token(&realm, &service, &image.repository, action)
            .await?;

        let retry = build().timeout(self.timeout).bearer_auth(&fresh).send().await?;
        let retry_status = retry.status();
        if retry_status == StatusCode::UNAUTHORIZED || retry_status == StatusCode::FORBIDDEN {
            return Err(OciError::AuthFailure(format!(
                "status {retry_status} after presenting a bearer token"
            )));
        }
        *token = Some(fresh);
        Ok(retry)
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: &str,
        repository: &str,
        action: ScopeAction,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let url = format!(
            "{realm}?service={service}&scope=repository:{repository}:{}",
            action.scope()
        );
        tracing::debug!(realm = %realm, service = %service, "requesting bearer token");

        let response = self.http.get(&url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(OciError::AuthFailure(format!(
                "token endpoint returned status {}",
                response.status()
            )));
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| OciError::AuthFailure(format!("invalid token response: {e}")))?;
        Ok(parsed.token)
    }
}

/// Map download statuses: 200 passes through, 404 is a cache-equivalent
/// miss, anything else is a rejection.
fn expect_download(
    response: reqwest::Response,
    subject: impl FnOnce() -> String,
) -> Result<reqwest::Response> {
    match response.status() {
        StatusCode::OK => Ok(response),
        StatusCode::NOT_FOUND => Err(OciError::NotFound(subject())),
        status => Err(OciError::DownloadRejected(status.as_u16())),
    }
}

/// Extract `(realm, service)` from a `WWW-Authenticate: Bearer` header.
fn parse_www_authenticate(header: &str) -> Result<(String, String)> {
    let mut realm = None;
    let mut service = None;
    for pair in header.trim_start_matches("Bearer ").split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            _ => {}
        }
    }
    match (realm, service) {
        (Some(realm), Some(service)) => Ok((realm, service)),
        _ => Err(OciError::AuthFailure(
            "challenge is missing realm or service".to_string(),
        )),
    }
}

/// Bridge a blocking cache reader into a request body without buffering
/// the whole blob.
fn stream_body(mut reader: Box<dyn Read + Send>) -> reqwest::Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<bytes::Bytes>>(8);
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx
                        .blocking_send(Ok(bytes::Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    reqwest::Body::wrap_stream(tokio_stream::wrappers::ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let (realm, service) = parse_www_authenticate(header).unwrap();
        assert_eq!(realm, "https://auth.docker.io/token");
        assert_eq!(service, "registry.docker.io");
    }

    #[test]
    fn challenge_without_realm_is_auth_failure() {
        assert!(matches!(
            parse_www_authenticate(r#"Bearer service="x""#),
            Err(OciError::AuthFailure(_))
        ));
    }

    #[test]
    fn push_scope_includes_pull() {
        assert_eq!(ScopeAction::Push.scope(), "push,pull");
        assert_eq!(ScopeAction::Pull.scope(), "pull");
    }
}
