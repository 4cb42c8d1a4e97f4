use std::time::Duration;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::http::HttpCore;
use crate::record::{CountEstimate, TimeWindow};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const INTER_PROBE_SLEEP: Duration = Duration::from_millis(500);

#[derive(serde::Deserialize, Default)]
struct ProbeResponse {
    total: Option<i64>,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Issues a minimal `offset=0&limit=1` query against a window and
/// returns the server's reported total, or the length of `data` if no
/// total is present. A `401` aborts the run; any other failure is
/// treated as "count unknown" by the caller.
pub struct CountProbe {
    base_url: url::Url,
    client: reqwest::Client,
    http: HttpCore,
}

impl CountProbe {
    pub fn new(base_url: url::Url, client: reqwest::Client, http: HttpCore) -> Self {
        Self {
            base_url,
            client,
            http,
        }
    }

    pub async fn estimate_count(
        &self,
        auth: &mut Auth,
        endpoint: &str,
        window: TimeWindow,
        extra_params: &[(&str, &str)],
    ) -> Result<CountEstimate, ApiError> {
        let bearer = auth.current_bearer().await.map_err(|_| ApiError::Auth)?;
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let mut query: Vec<(String, String)> = vec![
            ("offset".to_string(), "0".to_string()),
            ("limit".to_string(), "1".to_string()),
            ("from".to_string(), window.from_wire()),
            ("to".to_string(), window.to_wire()),
        ];
        for (k, v) in extra_params {
            query.push((k.to_string(), v.to_string()));
        }

        let result = self
            .http
            .request(
                || {
                    let mut req = self.client.get(url.clone()).query(&query);
                    if let Some(token) = &bearer {
                        req = req.bearer_auth(token);
                    }
                    req
                },
                PROBE_TIMEOUT,
            )
            .await;

        tokio::time::sleep(INTER_PROBE_SLEEP).await;

        let response = match result {
            Ok(response) => response,
            Err(ApiError::Auth) => return Err(ApiError::Auth),
            Err(err) => {
                tracing::warn!(error = %err, "count probe failed, treating count as unknown");
                return Ok(None);
            }
        };

        match response.json::<ProbeResponse>().await {
            Ok(body) => {
                let estimate = body.total.or(Some(body.data.len() as i64));
                tracing::info!(
                    from = %window.from,
                    to = %window.to,
                    estimate = ?estimate,
                    "probed window"
                );
                Ok(estimate)
            }
            Err(err) => {
                tracing::warn!(error = %err, "count probe response unparseable, treating count as unknown");
                Ok(None)
            }
        }
    }
}
