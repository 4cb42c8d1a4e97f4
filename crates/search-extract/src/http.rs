use std::time::Duration;

use crate::error::ApiError;

/// An explicit, inspectable retry policy, replacing what the original
/// source implemented as a global `requests.Session` retry decorator.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

/// One logical HTTP call with built-in retry/backoff, status-code
/// dispatch, and `EntityTooLarge` detection. Doesn't retry 4xx responses,
/// and never retries a 401: a refreshed token at the wrong scope would
/// otherwise loop forever.
#[derive(Clone)]
pub struct HttpCore {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
}

const ENTITY_TOO_LARGE_MARKER: &str = "Response Entity Too Large";

impl HttpCore {
    pub fn new(client: reqwest::Client, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
        }
    }

    /// Executes `build`, which must construct a fresh `reqwest::RequestBuilder`
    /// each time it's called (attempts after the first rebuild the request).
    pub async fn request<F>(
        &self,
        mut build: F,
        timeout: Duration,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut wait = self.retry_policy.initial_wait;
        let mut attempt = 0u32;

        loop {
            let result = build().timeout(timeout).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() < 400 {
                        return Ok(response);
                    }
                    if status.as_u16() == 401 {
                        return Err(ApiError::Auth);
                    }
                    if status.as_u16() == 403 {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ApiError::Forbidden(body));
                    }
                    if status.as_u16() == 400 {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ApiError::BadRequest(body));
                    }
                    if status.as_u16() != 429 && status.as_u16() >= 400 && status.as_u16() < 500 {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ApiError::ClientError {
                            status: status.as_u16(),
                            body,
                        });
                    }

                    // 429 and 5xx share the same backoff schedule. 5xx is
                    // additionally checked for the entity-too-large signal
                    // before considering a retry.
                    let body = response.text().await.unwrap_or_default();
                    if body.contains(ENTITY_TOO_LARGE_MARKER) {
                        return Err(ApiError::EntityTooLarge);
                    }

                    if attempt >= self.retry_policy.max_attempts {
                        return Err(ApiError::ServerError {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    tracing::warn!(status = status.as_u16(), attempt, "rate limited or server error, retrying");
                    tokio::time::sleep(wait).await;
                    wait *= self.retry_policy.multiplier;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt >= self.retry_policy.max_attempts {
                        return Err(if err.is_timeout() {
                            ApiError::Timeout
                        } else {
                            ApiError::ConnectionError(err.to_string())
                        });
                    }
                    tracing::warn!(error = %err, attempt, "request error, retrying");
                    tokio::time::sleep(wait).await;
                    wait *= self.retry_policy.multiplier;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn core(_server: &MockServer, max_attempts: u32) -> HttpCore {
        HttpCore::new(
            reqwest::Client::new(),
            RetryPolicy {
                max_attempts,
                initial_wait: Duration::from_millis(1),
                multiplier: 2,
            },
        )
    }

    #[tokio::test]
    async fn success_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/ok", server.uri());
        let resp = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    fn http_client_get(url: &str) -> reqwest::RequestBuilder {
        reqwest::Client::new().get(url)
    }

    #[tokio::test]
    async fn non_retryable_400_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/bad", server.uri());
        let err = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn entity_too_large_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Response Entity Too Large"))
            .expect(1)
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/big", server.uri());
        let err = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EntityTooLarge));
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/flaky", server.uri());
        let resp = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn rate_limited_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/throttled", server.uri());
        let resp = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let http = core(&server, 2);
        let url = format!("{}/down", server.uri());
        let err = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServerError { status: 500, .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let http = core(&server, 3);
        let url = format!("{}/secure", server.uri());
        let err = http
            .request(|| http_client_get(&url), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth));
    }
}
