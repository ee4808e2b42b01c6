//! Management portal access.
//!
//! The portal is a server-rendered PHP site. Pages are selected with query
//! parameters (section, sensor, date selectors) and the data of interest is
//! always an HTML table identified by its header texts. Oversized date
//! ranges make the site answer with a PHP fatal-error page; those are retried
//! once with the date selectors collapsed to today.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};

use crate::errors::Result;
use crate::table::Table;

/// Markers of a PHP fatal-error page (matched case-insensitively).
pub const FATAL_MARKERS: [&str; 3] = ["fatal error", "allowed memory size", "memory size"];

const DATE_SELECTORS: [&str; 6] = [
    "date_day_start",
    "date_month_start",
    "date_year_start",
    "date_day_end",
    "date_month_end",
    "date_year_end",
];

/// Query parameters selecting one portal page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalQuery {
    params: Vec<(String, String)>,
}

impl PortalQuery {
    /// Creates an empty query (the landing page).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing value.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// Sets all six date selectors.
    #[must_use]
    pub fn dates(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.param("date_day_start", start.day())
            .param("date_month_start", start.month())
            .param("date_year_start", start.year())
            .param("date_day_end", end.day())
            .param("date_month_end", end.month())
            .param("date_year_end", end.year())
    }

    /// Returns a copy with every date selector collapsed to `today`.
    #[must_use]
    pub fn with_dates_reset(&self, today: NaiveDate) -> Self {
        self.clone().dates(today, today)
    }

    /// Returns true if any date selector is set.
    #[must_use]
    pub fn has_dates(&self) -> bool {
        self.params
            .iter()
            .any(|(k, _)| DATE_SELECTORS.contains(&k.as_str()))
    }

    /// Looks up a parameter value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All parameters in insertion order.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// The device registry (landing page after login).
    #[must_use]
    pub fn registry() -> Self {
        Self::new().param("fid", 2)
    }

    /// General device log with DV2 counters for a date range.
    #[must_use]
    pub fn device_log(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new()
            .param("fid", 2)
            .param("device_stat", "log_general")
            .dates(start, end)
    }

    /// Sensor event log for one sensor (`dv3`, `dv6`).
    #[must_use]
    pub fn sensor_log(sensor: &str) -> Self {
        Self::new()
            .param("section", "sensors")
            .param("fid", 2)
            .param("sensor", sensor)
    }

    /// System event log filtered to service events.
    #[must_use]
    pub fn service_log(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new()
            .param("fid", 2)
            .param("sensors_stat", "system")
            .param("system", "Service")
            .dates(start, end)
    }
}

/// Returns true if the page body is a PHP fatal-error page.
#[must_use]
pub fn is_fatal_page(html: &str) -> bool {
    let lowered = html.to_lowercase();
    FATAL_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Read access to the management portal.
#[async_trait]
pub trait PortalSource: Send + Sync + std::fmt::Debug {
    /// Authenticates the session.
    async fn login(&self) -> Result<()>;

    /// Fetches a page and extracts the first table whose header cells
    /// contain every text in `required_headers`. `Ok(None)` when the page
    /// has no such table.
    async fn fetch_table(
        &self,
        query: &PortalQuery,
        required_headers: &[&str],
    ) -> Result<Option<Table>>;
}

#[cfg(feature = "portal")]
pub use client::{extract_table, PortalClient};

#[cfg(feature = "portal")]
mod client {
    use super::{is_fatal_page, PortalQuery, PortalSource};
    use crate::config::PortalConfig;
    use crate::errors::{Result, VodaflowError};
    use crate::pipeline::send_with_retry;
    use crate::table::Table;
    use crate::utils::Clock;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use scraper::{ElementRef, Html, Selector};
    use std::sync::{Arc, LazyLock};
    use tracing::{debug, info, warn};

    static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
    static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
    static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
    static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

    /// Cookie-session HTTP client for the portal.
    #[derive(Debug)]
    pub struct PortalClient {
        client: reqwest::Client,
        config: PortalConfig,
        clock: Arc<dyn Clock>,
        logged_in: Mutex<bool>,
    }

    impl PortalClient {
        /// Builds a client with its own cookie jar.
        pub fn new(config: PortalConfig, clock: Arc<dyn Clock>) -> Result<Self> {
            let client = reqwest::Client::builder()
                .cookie_store(true)
                .timeout(config.timeout())
                .build()?;
            Ok(Self {
                client,
                config,
                clock,
                logged_in: Mutex::new(false),
            })
        }

        async fn get_page(&self, query: &PortalQuery) -> Result<String> {
            let request = self
                .client
                .get(&self.config.base_url)
                .query(query.params());
            let response = send_with_retry(&self.config.retry, request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(VodaflowError::Portal(format!("HTTP {status}")));
            }
            let body = response.text().await?;
            if self.config.page_wait_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.page_wait_ms))
                    .await;
            }
            Ok(body)
        }

        async fn get_page_checked(&self, query: &PortalQuery) -> Result<String> {
            let body = self.get_page(query).await?;
            if !is_fatal_page(&body) {
                return Ok(body);
            }
            warn!("Fatal page from portal, retrying with today's dates");
            let retry = query.with_dates_reset(self.clock.today());
            let body = self.get_page(&retry).await?;
            if is_fatal_page(&body) {
                return Err(VodaflowError::Portal(
                    "fatal page again after resetting dates".to_string(),
                ));
            }
            Ok(body)
        }
    }

    #[async_trait]
    impl PortalSource for PortalClient {
        async fn login(&self) -> Result<()> {
            if !self.config.has_credentials() {
                return Err(VodaflowError::Config(
                    "portal credentials are not configured".to_string(),
                ));
            }
            // Opens the session cookie.
            self.get_page_checked(&PortalQuery::new()).await?;

            let form = [
                ("auth_login", self.config.login.as_str()),
                ("auth_pass", self.config.password.as_str()),
            ];
            let request = self.client.post(&self.config.base_url).form(&form);
            let response = send_with_retry(&self.config.retry, request).await?;
            let body = response.text().await?;
            if !body.contains(&self.config.auth_marker) {
                *self.logged_in.lock() = false;
                return Err(VodaflowError::Portal("login rejected".to_string()));
            }
            *self.logged_in.lock() = true;
            info!("Portal login succeeded");
            Ok(())
        }

        async fn fetch_table(
            &self,
            query: &PortalQuery,
            required_headers: &[&str],
        ) -> Result<Option<Table>> {
            let needs_login = !*self.logged_in.lock();
            if needs_login {
                self.login().await?;
            }
            let body = self.get_page_checked(query).await?;
            let table = extract_table(&body, required_headers);
            debug!(
                found = table.is_some(),
                rows = table.as_ref().map_or(0, Table::len),
                "Portal table extracted"
            );
            Ok(table)
        }
    }

    fn cell_text(element: ElementRef<'_>) -> String {
        element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Extracts the first `<table>` whose `<th>` cells contain every required
    /// header text. Rows with `<td>` cells become data rows; the header row
    /// is taken from the `<th>` cells.
    #[must_use]
    pub fn extract_table(html: &str, required_headers: &[&str]) -> Option<Table> {
        let document = Html::parse_document(html);

        document.select(&TABLE).find_map(|table| {
            let headers: Vec<String> = table.select(&TH).map(cell_text).collect();
            let matches = required_headers
                .iter()
                .all(|req| headers.iter().any(|h| h.contains(req)));
            if !matches {
                return None;
            }
            let rows: Vec<Vec<String>> = table
                .select(&TR)
                .map(|tr| tr.select(&TD).map(cell_text).collect::<Vec<_>>())
                .filter(|cells| !cells.is_empty())
                .collect();
            let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(headers.len());
            let mut header_row = headers;
            while header_row.len() < width {
                header_row.push(format!("col{}", header_row.len()));
            }
            let mut out = Table::new(header_row);
            for row in rows {
                out.push_row(row);
            }
            Some(out)
        })
    }

}
