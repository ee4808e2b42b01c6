//! Data directory layout.
//!
//! Stages hand data to each other only through these files.

use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::Result;

/// Device registry with all derived columns.
pub const IDADRES: &str = "idadres.csv";
/// DV3 sensor events.
pub const DV3: &str = "dv3dv.csv";
/// DV6 sensor events.
pub const DV6: &str = "dv6dv.csv";
/// Device list from the API.
pub const DEVICES: &str = "devices.csv";
/// Latest sensor states per device.
pub const DEVICE_SENSORS: &str = "device_sensors.csv";
/// Filter throughput samples.
pub const FILTER_SPEED: &str = "water_filter_speed.csv";
/// TDS samples.
pub const WATER_QUALITY: &str = "water_quality.csv";
/// Dispensing statistics.
pub const WATER_STATS: &str = "water_stats.csv";
/// Cash collections over the short window.
pub const DEVICE_INKAS: &str = "device_inkas.csv";
/// Service events of yesterday.
pub const SERVICE_DAY: &str = "service_day.csv";
/// Service events of the previous month.
pub const SERVICE_MONTH: &str = "service_mes.csv";
/// Per-apparatus daily service analytics.
pub const SERVICE_ANALYTICS: &str = "ser_mes_analitik.csv";
/// Per-technician daily analytics.
pub const TECHNICIAN_ANALYTICS: &str = "tex_analitik.csv";
/// Apparatus address to technician binding (maintained by hand).
pub const APPARATUS_BINDING: &str = "privyazka_aparat_texnik.csv";
/// Device id to technician binding (maintained by hand).
pub const DEVICE_BINDING: &str = "privyazka_tex_adres.csv";
/// Cash collections over the reporting window.
pub const INKAS: &str = "inkas5w.csv";
/// Cash collections with normalized technician names.
pub const INKAS_PROCESSED: &str = "inkas5w_processed.csv";
/// Cash collections linked to technicians.
pub const INKAS_LINKED: &str = "inki5nedel.csv";
/// Cash collection report.
pub const CASH_REPORT: &str = "otchet_inki.txt";
/// Field-service visits.
pub const SERVICE_VISITS: &str = "service_tex_analitik.csv";
/// Route map.
pub const ROUTES_MAP: &str = "interactive_routes_map.html";
/// Route summary.
pub const ROUTES_SUMMARY: &str = "service_routes_summary.csv";
/// Geocoding cache.
pub const ADDRESS_CACHE: &str = "address_cache.json";
/// Technician daily rollup.
pub const MONTHLY_ROLLUP: &str = "texnik_za_mesyac.csv";
/// Visit list behind the rollup.
pub const MONTHLY_ROLLUP_DETAILED: &str = "texnik_za_mesyac_detailed.csv";
/// Field-service run log.
pub const SERVICE_LOG: &str = "otchet_service.txt";

/// The directory all pipeline files live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wraps a directory path. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a file in the directory.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns true if the file exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Copies `name` to `{stem}_{tag}_{YYYYmmdd_HHMMSS}.{ext}` and returns
    /// the copy's path.
    pub fn backup(&self, name: &str, tag: &str, at: NaiveDateTime) -> Result<PathBuf> {
        let source = self.path(name);
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, "csv"));
        let target = self.path(&format!(
            "{stem}_{tag}_{}.{ext}",
            at.format("%Y%m%d_%H%M%S")
        ));
        fs::copy(&source, &target)?;
        Ok(target)
    }
}
