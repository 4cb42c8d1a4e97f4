use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::auth::Auth;
use crate::batch::BatchLoader;
use crate::error::{ApiError, PipelineError};
use crate::http::HttpCore;
use crate::planner::WindowPlanner;
use crate::probe::CountProbe;
use crate::record::{Record, TimeWindow};

const PAGE_TIMEOUT: Duration = Duration::from_secs(60);
const INTER_PAGE_SLEEP: Duration = Duration::from_millis(500);
const BISECTION_SETTLE_SLEEP: Duration = Duration::from_secs(2);

#[derive(serde::Deserialize, Default)]
struct PageResponse {
    #[serde(default)]
    hits: Vec<Value>,
}

/// Drives every record whose `last_modified` lies in `[from, to)` into a
/// [`BatchLoader`] as pages arrive, rather than collecting them first.
/// Peak memory stays bounded by the loader's own batch capacity, not by
/// the size of the time range being fetched, since the loader flushes
/// and reclaims its buffer while pagination is still in flight.
///
/// Two independent bisection axes exist here, per the REDESIGN note in
/// SPEC_FULL.md: the adaptive split (driven by the Window Planner, no
/// depth limit, terminated by monotonic progress of `optimal_end`) and
/// the entity-too-large recovery bisection (depth-capped at
/// `max_bisection_depth`). They can interleave on pathological data;
/// both remain independently bounded.
pub struct FetchEngine {
    base_url: url::Url,
    endpoint: String,
    client: reqwest::Client,
    http: HttpCore,
    page_size: usize,
    max_pages: u32,
    max_bisection_depth: u32,
    ceiling: i64,
    extra_params: Vec<(String, String)>,
}

impl FetchEngine {
    pub fn new(
        base_url: url::Url,
        endpoint: String,
        client: reqwest::Client,
        http: HttpCore,
        page_size: usize,
        max_pages: u32,
        max_bisection_depth: u32,
        ceiling: i64,
        extra_params: Vec<(String, String)>,
    ) -> Self {
        Self {
            base_url,
            endpoint,
            client,
            http,
            page_size,
            max_pages,
            max_bisection_depth,
            ceiling,
            extra_params,
        }
    }

    pub fn fetch<'a>(
        &'a self,
        auth: &'a mut Auth,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        use_adaptive: bool,
        sink: &'a mut BatchLoader,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        async move {
            if TimeWindow::is_empty(from, to) {
                return Ok(());
            }

            if use_adaptive {
                let extra: Vec<(&str, &str)> = self
                    .extra_params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let probe = CountProbe::new(self.base_url.clone(), self.client.clone(), self.http.clone());
                let planner = WindowPlanner::new(&probe, &self.endpoint, &extra);
                let optimal_end = planner.find_optimal_end(auth, from, to, self.ceiling).await?;

                if optimal_end < to {
                    self.fetch(auth, from, optimal_end, true, sink).await?;
                    self.fetch(auth, optimal_end, to, true, sink).await?;
                    return Ok(());
                }
            }

            self.fetch_with_entity_recovery(auth, from, to, 0, sink).await
        }
        .boxed()
    }

    fn fetch_with_entity_recovery<'a>(
        &'a self,
        auth: &'a mut Auth,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        depth: u32,
        sink: &'a mut BatchLoader,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        async move {
            if TimeWindow::is_empty(from, to) {
                return Ok(());
            }
            match self.paginate(auth, from, to, sink).await {
                Ok(()) => Ok(()),
                Err(PipelineError::Api(ApiError::EntityTooLarge)) => {
                    self.bisect(auth, from, to, depth, sink).await
                }
                Err(err) => Err(err),
            }
        }
        .boxed()
    }

    fn bisect<'a>(
        &'a self,
        auth: &'a mut Auth,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        depth: u32,
        sink: &'a mut BatchLoader,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        async move {
            if depth >= self.max_bisection_depth {
                tracing::warn!(
                    depth,
                    from = %from,
                    to = %to,
                    "max bisection depth reached for entity-too-large recovery, dropping sub-window"
                );
                return Ok(());
            }

            let window = TimeWindow::new(from, to);
            let mid = window.midpoint();

            let result: Result<(), PipelineError> = async {
                self.fetch_with_entity_recovery(auth, from, mid, depth + 1, sink).await?;
                tokio::time::sleep(BISECTION_SETTLE_SLEEP).await;
                self.fetch_with_entity_recovery(auth, mid, to, depth + 1, sink).await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => Ok(()),
                // Auth, other non-retryable client errors, and warehouse
                // failures abort the whole run; they're never absorbed by
                // the bisection retry budget.
                Err(err @ (PipelineError::Auth(_)
                | PipelineError::Warehouse(_)
                | PipelineError::Api(ApiError::BadRequest(_))
                | PipelineError::Api(ApiError::Forbidden(_))
                | PipelineError::Api(ApiError::ClientError { .. }))) => Err(err),
                Err(_) => {
                    tracing::warn!(depth, "bisection half failed, retrying the same window");
                    self.bisect(auth, from, to, depth + 1, sink).await
                }
            }
        }
        .boxed()
    }

    async fn paginate(
        &self,
        auth: &mut Auth,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sink: &mut BatchLoader,
    ) -> Result<(), PipelineError> {
        let window = TimeWindow::new(from, to);
        let url = self
            .base_url
            .join(&self.endpoint)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let mut offset = 0usize;
        let mut page = 0u32;

        loop {
            if page >= self.max_pages {
                tracing::warn!(
                    max_pages = self.max_pages,
                    from = %from,
                    to = %to,
                    "hit max_pages guard, window output may be truncated"
                );
                break;
            }
            page += 1;

            let body = self.page_body(offset, &window);
            let bearer = auth
                .current_bearer()
                .await
                .map_err(|_| PipelineError::Api(ApiError::Auth))?;

            let response = self
                .http
                .request(
                    || {
                        let mut req = self.client.post(url.clone()).json(&body);
                        if let Some(token) = &bearer {
                            req = req.bearer_auth(token);
                        }
                        req
                    },
                    PAGE_TIMEOUT,
                )
                .await?;

            let page_response: PageResponse = response
                .json()
                .await
                .map_err(|e| ApiError::ServerError {
                    status: 0,
                    body: format!("unparseable page response: {e}"),
                })?;

            if page_response.hits.is_empty() {
                break;
            }

            let hit_count = page_response.hits.len();
            for hit in page_response.hits {
                sink.accumulate(extract_hit_record(hit)).await?;
            }

            if hit_count < self.page_size {
                break;
            }

            offset += hit_count;
            tokio::time::sleep(INTER_PAGE_SLEEP).await;
        }

        Ok(())
    }

    fn page_body(&self, offset: usize, window: &TimeWindow) -> Value {
        let mut body = serde_json::json!({
            "offset": offset,
            "limit": self.page_size,
            "sorts": [{ "field": "lastModified", "sortOrder": "asc" }],
            "query": {
                "filtered_query": {
                    "query": { "match_all_query": {} },
                    "filter": {
                        "range_filter": {
                            "field": "last_modified",
                            "from": window.from_wire(),
                            "to": window.to_wire(),
                        }
                    }
                }
            }
        });

        if let Value::Object(map) = &mut body {
            for (key, value) in &self.extra_params {
                map.insert(key.clone(), Value::String(value.clone()));
            }
        }

        body
    }
}

fn extract_hit_record(hit: Value) -> Record {
    match hit {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                map.insert("data".to_string(), other);
                map
            }
            None => map,
        },
        other => {
            let mut wrapped = Record::new();
            wrapped.insert("value".to_string(), other);
            wrapped
        }
    }
}
