use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::ApiError;
use crate::probe::CountProbe;
use crate::record::TimeWindow;
use crate::auth::Auth;

/// Locates the largest `end <= hard_end` whose estimated record count is
/// `<= ceiling`, first deciding whether day-grain or hour-grain bisection
/// applies. Two-level grain avoids wasting O(log n) probes at hour
/// resolution when days clearly fit; "probe absent => shrink" guarantees
/// correctness at the cost of slower convergence under probe flakiness.
pub struct WindowPlanner<'a> {
    probe: &'a CountProbe,
    endpoint: &'a str,
    extra_params: &'a [(&'a str, &'a str)],
}

impl<'a> WindowPlanner<'a> {
    pub fn new(probe: &'a CountProbe, endpoint: &'a str, extra_params: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            probe,
            endpoint,
            extra_params,
        }
    }

    pub async fn find_optimal_end(
        &self,
        auth: &mut Auth,
        start: DateTime<Utc>,
        hard_end: DateTime<Utc>,
        ceiling: i64,
    ) -> Result<DateTime<Utc>, ApiError> {
        if hard_end <= start {
            return Ok(hard_end);
        }

        let one_day_end = (start + ChronoDuration::days(1)).min(hard_end);
        let one_day_count = self.probe(auth, start, one_day_end).await?;

        match one_day_count {
            None => {
                // Grain-selection probe absent: shrinking conservatively
                // isn't possible yet since we have nothing to shrink from,
                // so return the one-day window to guarantee progress.
                tracing::warn!("grain-selection probe absent, returning one-day window");
                Ok(one_day_end)
            }
            Some(count) if count > ceiling => {
                tracing::info!(count, "single day exceeds ceiling, switching to hour-grain bisection");
                self.bisect_hours(auth, start, one_day_end, ceiling).await
            }
            Some(_) => {
                tracing::info!("day within ceiling, using day-grain bisection");
                self.bisect_days(auth, start, hard_end, ceiling).await
            }
        }
    }

    async fn probe(
        &self,
        auth: &mut Auth,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<i64>, ApiError> {
        if TimeWindow::is_empty(from, to) {
            return Ok(Some(0));
        }
        self.probe
            .estimate_count(auth, self.endpoint, TimeWindow::new(from, to), self.extra_params)
            .await
    }

    async fn bisect_days(
        &self,
        auth: &mut Auth,
        start: DateTime<Utc>,
        hard_end: DateTime<Utc>,
        ceiling: i64,
    ) -> Result<DateTime<Utc>, ApiError> {
        let total_days = (hard_end - start).num_days() + 1;
        let mut lo: i64 = 1;
        let mut hi: i64 = total_days;
        let mut best = start + ChronoDuration::days(1);

        while lo <= hi {
            let mid = (lo + hi) / 2;
            let test_end = (start + ChronoDuration::days(mid)).min(hard_end);

            match self.probe(auth, start, test_end).await? {
                None => hi = mid - 1,
                Some(count) if count <= ceiling => {
                    best = test_end;
                    lo = mid + 1;
                }
                Some(_) => hi = mid - 1,
            }
        }

        Ok(best)
    }

    async fn bisect_hours(
        &self,
        auth: &mut Auth,
        start: DateTime<Utc>,
        hard_end: DateTime<Utc>,
        ceiling: i64,
    ) -> Result<DateTime<Utc>, ApiError> {
        let total_hours = ((hard_end - start).num_seconds() / 3600).max(1);
        let mut lo: i64 = 1;
        let mut hi: i64 = total_hours;
        let mut best = start + ChronoDuration::hours(1);

        while lo <= hi {
            let mid = (lo + hi) / 2;
            let test_end = (start + ChronoDuration::hours(mid)).min(hard_end);

            match self.probe(auth, start, test_end).await? {
                None => hi = mid - 1,
                Some(count) if count <= ceiling => {
                    best = test_end;
                    lo = mid + 1;
                }
                Some(_) => hi = mid - 1,
            }
        }

        Ok(best)
    }
}
