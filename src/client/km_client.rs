use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::retry::RetryPolicy;
use super::verified::Verified;
use crate::config::ClientConfig;
use crate::error::{QkdError, QkdResult};
use crate::integrity::IntegritySecret;
use crate::protocol::{
    ConsumeRequest, CreateKeyRequest, ErrorBody, IntrusionState, IntrusionToggle, KeyCreatedResponse,
    KeyInfo, MaterialQuery, SliceResponse, StatusResponse, CONSUME_PATH, INTRUSION_PATH, KEYS_NEW_PATH,
    KEYS_PATH, MATERIAL_PATH, STATUS_PATH,
};

/// Blocking client for the KM service.
///
/// Every call blocks its caller for the request plus retries. Transient
/// failures (connection errors, timeouts, 5xx) are retried per the
/// [`RetryPolicy`]; every other error is returned immediately. Responses
/// that carry key bytes are checked against the server's digest and
/// returned as [`Verified`].
#[derive(Debug)]
pub struct KmClient {
    http: Client,
    config: ClientConfig,
    secret: IntegritySecret,
    retry: RetryPolicy,
}

impl KmClient {
    pub fn new(config: ClientConfig) -> QkdResult<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QkdError::ConfigError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            secret: IntegritySecret::new(&config.integrity_secret),
            retry: RetryPolicy::from_config(&config),
            config,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        key_id: Option<&str>,
        request: RequestBuilder,
    ) -> QkdResult<T> {
        let response = request
            .send()
            .map_err(|e| classify_send_error(operation, &e))?;
        decode_response(operation, key_id, response)
    }

    pub fn status(&self) -> QkdResult<StatusResponse> {
        self.retry.run("status", |_| {
            self.execute("status", None, self.http.get(self.url(STATUS_PATH)))
        })
    }

    /// Requests a key of `length` bytes between the configured client and peer.
    pub fn request_key(&self, length: usize) -> QkdResult<Verified<KeyInfo>> {
        self.create_key(&CreateKeyRequest {
            client_id: Some(self.config.client_id.clone()),
            peer_id: Some(self.config.peer_id.clone()),
            length: Some(length),
            ..Default::default()
        })
    }

    /// Creates a key, trying the short-timeout GET route once before the
    /// POST route.
    ///
    /// A failed GET attempt is never retried or confirmed: the POST creates
    /// a new, independent key even if the GET reached the server.
    pub fn create_key(&self, request: &CreateKeyRequest) -> QkdResult<Verified<KeyInfo>> {
        let fast = self.execute::<KeyCreatedResponse>(
            "create_key",
            None,
            self.http
                .get(self.url(KEYS_NEW_PATH))
                .query(request)
                .timeout(self.config.fast_timeout()),
        );
        let response = match fast {
            Ok(response) => response,
            Err(err) => {
                log::debug!("GET key creation failed, falling back to POST: {}", err);
                self.retry.run("create_key", |_| {
                    self.execute(
                        "create_key",
                        None,
                        self.http.post(self.url(KEYS_PATH)).json(request),
                    )
                })?
            }
        };

        let key_id = response.info.key_id.clone();
        let expected = response.info.length;
        let verified = Verified::check(
            response.info,
            "create_key",
            &key_id,
            &response.key_b64,
            &response.key_hmac,
            &self.secret,
        )?;
        if verified.material.len() != expected {
            return Err(QkdError::protocol_failure(
                "create_key",
                &format!(
                    "expected {} bytes of material, received {}",
                    expected,
                    verified.material.len()
                ),
            ));
        }
        log::info!("Obtained key {} ({} bytes)", key_id, expected);
        Ok(verified)
    }

    pub fn get_key(&self, key_id: &str) -> QkdResult<KeyInfo> {
        let url = self.url(&format!("{}/{}", KEYS_PATH, key_id));
        self.retry.run("get_key", |_| {
            self.execute("get_key", Some(key_id), self.http.get(&url))
        })
    }

    /// Consumes the next `n` bytes of `key_id`; the value is the offset they
    /// start at.
    pub fn consume(&self, key_id: &str, n: usize) -> QkdResult<Verified<usize>> {
        if n == 0 {
            return Err(QkdError::invalid_parameter("bytes", "a positive count", "0"));
        }
        let url = self.url(&format!("{}/{}", CONSUME_PATH, key_id));
        let response: SliceResponse = self
            .retry
            .run("consume", |_| {
                self.execute(
                    "consume",
                    Some(key_id),
                    self.http.post(&url).json(&ConsumeRequest { bytes: n }),
                )
            })
            .map_err(|err| match err {
                QkdError::InsufficientMaterial {
                    key_id, remaining, ..
                } => {
                    // The wire error carries no counts; fill them in best-effort
                    let remaining = self
                        .get_key(&key_id)
                        .map(|info| info.length.saturating_sub(info.consumed))
                        .unwrap_or(remaining);
                    QkdError::InsufficientMaterial {
                        key_id,
                        requested: n,
                        remaining,
                    }
                }
                other => other,
            })?;
        self.verify_slice("consume", key_id, n, response)
    }

    /// Reads `n` bytes at `offset` without consuming them.
    ///
    /// Bytes read here may be handed out again by [`KmClient::consume`];
    /// never use them as one-time-pad material.
    pub fn material(&self, key_id: &str, offset: usize, n: usize) -> QkdResult<Verified<usize>> {
        let url = self.url(&format!("{}/{}", MATERIAL_PATH, key_id));
        let query = MaterialQuery { offset, bytes: n };
        let response: SliceResponse = self.retry.run("material", |_| {
            self.execute("material", Some(key_id), self.http.get(&url).query(&query))
        })?;
        self.verify_slice("material", key_id, n, response)
    }

    fn verify_slice(
        &self,
        operation: &str,
        key_id: &str,
        n: usize,
        response: SliceResponse,
    ) -> QkdResult<Verified<usize>> {
        let verified = Verified::check(
            response.offset,
            operation,
            key_id,
            &response.slice_b64,
            &response.slice_hmac,
            &self.secret,
        )?;
        if verified.material.len() != n {
            return Err(QkdError::protocol_failure(
                operation,
                &format!("requested {} bytes, received {}", n, verified.material.len()),
            ));
        }
        log::debug!(
            "KM {} key_id={} offset={} bytes={}",
            operation,
            key_id,
            response.offset,
            n
        );
        Ok(verified)
    }

    pub fn intrusion(&self) -> QkdResult<bool> {
        let state: IntrusionState = self.retry.run("intrusion", |_| {
            self.execute("intrusion", None, self.http.get(self.url(INTRUSION_PATH)))
        })?;
        Ok(state.intrusion)
    }

    pub fn set_intrusion(&self, enabled: bool) -> QkdResult<bool> {
        let toggle = IntrusionToggle { enabled };
        let state: IntrusionState = self.retry.run("set_intrusion", |_| {
            self.execute(
                "set_intrusion",
                None,
                self.http.post(self.url(INTRUSION_PATH)).json(&toggle),
            )
        })?;
        Ok(state.intrusion)
    }
}

fn classify_send_error(operation: &str, err: &reqwest::Error) -> QkdError {
    if err.is_builder() {
        QkdError::protocol_failure(operation, &format!("invalid request: {}", err))
    } else {
        QkdError::network_failure(operation, &err.to_string())
    }
}

fn decode_response<T: DeserializeOwned>(
    operation: &str,
    key_id: Option<&str>,
    response: Response,
) -> QkdResult<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().map_err(|e| {
            if e.is_timeout() {
                QkdError::network_failure(operation, &e.to_string())
            } else {
                QkdError::protocol_failure(operation, &format!("malformed response: {}", e))
            }
        });
    }

    let text = response.text().unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| {
        if text.is_empty() {
            ErrorBody::new(status.canonical_reason().unwrap_or("unknown error"))
        } else {
            ErrorBody::new(text)
        }
    });
    Err(body.into_error(status.as_u16(), operation, key_id))
}
