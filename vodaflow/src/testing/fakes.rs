//! In-memory data sources.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;

use crate::errors::{Result, VodaflowError};
use crate::sources::{
    ApiEnvelope, ApiRange, DeviceApiSource, GeocodeProvider, PortalQuery, PortalSource, Record,
};
use crate::table::Table;
use crate::utils::LatLon;

type PagePredicate = Box<dyn Fn(&PortalQuery) -> bool + Send + Sync>;

/// A portal serving canned tables.
///
/// Pages are matched in registration order; an unmatched query yields
/// `Ok(None)` (no such table on the page).
#[derive(Default)]
pub struct FakePortal {
    pages: Vec<(PagePredicate, Table)>,
    login_error: Option<String>,
    failing_fetch: bool,
    queries: Mutex<Vec<PortalQuery>>,
}

impl fmt::Debug for FakePortal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakePortal")
            .field("pages", &self.pages.len())
            .field("login_error", &self.login_error)
            .finish_non_exhaustive()
    }
}

impl FakePortal {
    /// Creates a portal with no pages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `table` for every query matching `predicate`.
    #[must_use]
    pub fn with_page(
        mut self,
        predicate: impl Fn(&PortalQuery) -> bool + Send + Sync + 'static,
        table: Table,
    ) -> Self {
        self.pages.push((Box::new(predicate), table));
        self
    }

    /// Makes every login attempt fail.
    #[must_use]
    pub fn rejecting_login(mut self) -> Self {
        self.login_error = Some("invalid credentials".to_string());
        self
    }

    /// Makes every fetch fail.
    #[must_use]
    pub fn failing_fetch(mut self) -> Self {
        self.failing_fetch = true;
        self
    }

    /// Queries seen so far.
    #[must_use]
    pub fn queries(&self) -> Vec<PortalQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl PortalSource for FakePortal {
    async fn login(&self) -> Result<()> {
        match &self.login_error {
            Some(message) => Err(VodaflowError::Portal(message.clone())),
            None => Ok(()),
        }
    }

    async fn fetch_table(
        &self,
        query: &PortalQuery,
        _required_headers: &[&str],
    ) -> Result<Option<Table>> {
        self.queries.lock().push(query.clone());
        if self.failing_fetch {
            return Err(VodaflowError::Portal("fatal error page".to_string()));
        }
        Ok(self
            .pages
            .iter()
            .find(|(matches, _)| matches(query))
            .map(|(_, table)| table.clone()))
    }
}

/// Per-device API endpoints of [`FakeApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `water_quality.php`.
    Quality,
    /// `water_filter_speed.php`.
    FilterSpeed,
    /// `device_sensors.php`.
    Sensors,
    /// `water/index.php`.
    Stats,
    /// `device_inkas.php`.
    Inkas,
}

/// A device API serving canned records.
#[derive(Debug, Default)]
pub struct FakeApi {
    devices: Vec<Record>,
    failing_devices: bool,
    data: HashMap<(Endpoint, String), Vec<Record>>,
    device_calls: Mutex<usize>,
    calls: Mutex<Vec<(Endpoint, String, Option<ApiRange>)>>,
}

impl FakeApi {
    /// Creates an API with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device to the device list.
    #[must_use]
    pub fn with_device(mut self, id: i64, address: &str) -> Self {
        if let serde_json::Value::Object(record) = json!({ "id": id, "address": address }) {
            self.devices.push(record);
        }
        self
    }

    /// Serves `records` for one endpoint and device.
    #[must_use]
    pub fn with_data(
        mut self,
        endpoint: Endpoint,
        id: i64,
        records: Vec<serde_json::Value>,
    ) -> Self {
        let records = records
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.data.insert((endpoint, id.to_string()), records);
        self
    }

    /// Makes the device list fail.
    #[must_use]
    pub fn failing_devices(mut self) -> Self {
        self.failing_devices = true;
        self
    }

    /// Number of device list requests.
    #[must_use]
    pub fn device_calls(&self) -> usize {
        *self.device_calls.lock()
    }

    /// Per-device calls seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(Endpoint, String, Option<ApiRange>)> {
        self.calls.lock().clone()
    }

    fn answer(
        &self,
        endpoint: Endpoint,
        id: &str,
        range: Option<&ApiRange>,
    ) -> Option<ApiEnvelope> {
        self.calls
            .lock()
            .push((endpoint, id.to_string(), range.cloned()));
        let records = self.data.get(&(endpoint, id.to_string()))?;
        let address = self
            .devices
            .iter()
            .find(|d| crate::sources::api::device_id(d).as_deref() == Some(id))
            .map(|d| crate::sources::api::value_text(d.get("address")))
            .unwrap_or_default();
        Some(ApiEnvelope::success(address, records.clone()))
    }
}

#[async_trait]
impl DeviceApiSource for FakeApi {
    async fn devices(&self) -> Result<Vec<Record>> {
        *self.device_calls.lock() += 1;
        if self.failing_devices {
            return Err(VodaflowError::Api("device list: HTTP 503".to_string()));
        }
        Ok(self.devices.clone())
    }

    async fn water_quality(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
        self.answer(Endpoint::Quality, device_id, Some(range))
    }

    async fn filter_speed(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
        self.answer(Endpoint::FilterSpeed, device_id, Some(range))
    }

    async fn sensors(&self, device_id: &str) -> Option<ApiEnvelope> {
        self.answer(Endpoint::Sensors, device_id, None)
    }

    async fn water_stats(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
        self.answer(Endpoint::Stats, device_id, Some(range))
    }

    async fn device_inkas(&self, device_id: &str, range: &ApiRange) -> Option<ApiEnvelope> {
        self.answer(Endpoint::Inkas, device_id, Some(range))
    }
}

/// A geocoder resolving from a fixed address book.
#[derive(Debug, Default)]
pub struct FakeGeocoder {
    known: HashMap<String, LatLon>,
    lookups: Mutex<Vec<String>>,
}

impl FakeGeocoder {
    /// Creates a geocoder that finds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves any query containing `needle` to `point`.
    #[must_use]
    pub fn with_place(mut self, needle: &str, point: LatLon) -> Self {
        self.known.insert(needle.to_string(), point);
        self
    }

    /// Queries received so far.
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl GeocodeProvider for FakeGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<LatLon>> {
        self.lookups.lock().push(query.to_string());
        Ok(self
            .known
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, point)| *point))
    }
}
