//! Runtime configuration.
//!
//! Every field has a default so an empty TOML file (or none at all) yields a
//! working configuration. Credentials can be supplied through the
//! environment instead of the file.

use crate::errors::{Result, VodaflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the portal login.
pub const ENV_PORTAL_LOGIN: &str = "VODAFLOW_PORTAL_LOGIN";
/// Environment variable overriding the portal password.
pub const ENV_PORTAL_PASSWORD: &str = "VODAFLOW_PORTAL_PASSWORD";
/// Environment variable adding access codes, as `code=role` pairs separated
/// by commas.
pub const ENV_ACCESS_CODES: &str = "VODAFLOW_ACCESS_CODES";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VodaflowConfig {
    /// Directory holding every intermediate and final data file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Stage runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Live status display settings.
    #[serde(default)]
    pub status: StatusConfig,
    /// Management portal settings.
    #[serde(default)]
    pub portal: PortalConfig,
    /// Device JSON API settings.
    #[serde(default)]
    pub api: ApiConfig,
    /// Geocoding settings.
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    /// Technician roster.
    #[serde(default)]
    pub technicians: TechnicianRoster,
    /// Access codes.
    #[serde(default)]
    pub access: AccessConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl VodaflowConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = default_data_dir();
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, falling back to defaults when `path` is
    /// `None`, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    VodaflowError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self {
                data_dir: default_data_dir(),
                ..Self::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejects numeric settings that cannot be turned into durations.
    pub fn validate(&self) -> Result<()> {
        check_seconds("portal.timeout_seconds", self.portal.timeout_seconds)?;
        check_seconds("api.timeout_seconds", self.api.timeout_seconds)?;
        check_seconds("geocoder.timeout_seconds", self.geocoder.timeout_seconds)?;
        self.portal.retry.validate("portal.retry")?;
        self.api.retry.validate("api.retry")?;
        self.geocoder.retry.validate("geocoder.retry")?;
        Ok(())
    }

    /// Applies overrides from an environment lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(login) = lookup(ENV_PORTAL_LOGIN) {
            self.portal.login = login;
        }
        if let Some(password) = lookup(ENV_PORTAL_PASSWORD) {
            self.portal.password = password;
        }
        if let Some(codes) = lookup(ENV_ACCESS_CODES) {
            self.access.extend_from_pairs(&codes);
        }
    }
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VodaflowError::Config(format!(
            "{field} must be a non-negative number of seconds, got {value}"
        )))
    }
}

fn seconds_or(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// Stage runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Pause between successful stages, in milliseconds.
    #[serde(default = "default_stage_pause_ms")]
    pub stage_pause_ms: u64,
}

fn default_stage_pause_ms() -> u64 {
    1000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stage_pause_ms: default_stage_pause_ms(),
        }
    }
}

impl RunnerConfig {
    /// A configuration without inter-stage pauses (tests, benches).
    #[must_use]
    pub fn immediate() -> Self {
        Self { stage_pause_ms: 0 }
    }

    /// Sets the inter-stage pause.
    #[must_use]
    pub fn with_stage_pause_ms(mut self, pause: u64) -> Self {
        self.stage_pause_ms = pause;
        self
    }

    /// Gets the pause as a Duration.
    #[must_use]
    pub fn stage_pause(&self) -> Duration {
        Duration::from_millis(self.stage_pause_ms)
    }
}

/// Live status display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Maximum number of characters shown before truncation.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Minimum spacing between two edits of the status message.
    #[serde(default)]
    pub min_edit_interval_ms: u64,
    /// Prefix put in front of every displayed status line.
    #[serde(default = "default_status_prefix")]
    pub prefix: String,
}

fn default_preview_limit() -> usize {
    200
}

fn default_status_prefix() -> String {
    "⏳ ".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            preview_limit: default_preview_limit(),
            min_edit_interval_ms: 0,
            prefix: default_status_prefix(),
        }
    }
}

impl StatusConfig {
    /// Gets the minimum edit interval as a Duration.
    #[must_use]
    pub fn min_edit_interval(&self) -> Duration {
        Duration::from_millis(self.min_edit_interval_ms)
    }
}

/// Retry policy for outbound HTTP calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in seconds; the n-th retry waits `factor * 2^n`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for a single backoff, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    /// Status codes that should trigger a retry.
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: HashSet<u16>,
    /// Randomize each delay between half and the full backoff.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_retry_status_codes() -> HashSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            max_delay_seconds: default_max_delay(),
            retry_status_codes: default_retry_status_codes(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    ///
    /// Out-of-range settings yield no delay rather than an error.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (self.backoff_factor * 2f64.powi(exponent)).min(self.max_delay_seconds);
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::ZERO)
    }

    fn validate(&self, section: &str) -> Result<()> {
        check_seconds(&format!("{section}.backoff_factor"), self.backoff_factor)?;
        check_seconds(&format!("{section}.max_delay_seconds"), self.max_delay_seconds)
    }

    /// Returns true if a response with this status should be retried.
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }
}

/// Management portal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal entry page, also used as the login form target.
    #[serde(default = "default_portal_url")]
    pub base_url: String,
    /// Login name.
    #[serde(default)]
    pub login: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Fragment of a link that only appears after a successful login.
    #[serde(default = "default_auth_marker")]
    pub auth_marker: String,
    /// Request timeout in seconds.
    #[serde(default = "default_portal_timeout")]
    pub timeout_seconds: f64,
    /// Pause after each page request, in milliseconds.
    #[serde(default = "default_page_wait_ms")]
    pub page_wait_ms: u64,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_portal_url() -> String {
    "https://soliton.net.ua/water/baza/".to_string()
}

fn default_auth_marker() -> String {
    "?fid=2&subsection=stat".to_string()
}

fn default_portal_timeout() -> f64 {
    30.0
}

fn default_page_wait_ms() -> u64 {
    500
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_url(),
            login: String::new(),
            password: String::new(),
            auth_marker: default_auth_marker(),
            timeout_seconds: default_portal_timeout(),
            page_wait_ms: default_page_wait_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl PortalConfig {
    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, default_portal_timeout())
    }

    /// Returns true if both credentials are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.login.is_empty() && !self.password.is_empty()
    }
}

/// Device JSON API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root, endpoint paths are appended to it.
    #[serde(default = "default_api_url")]
    pub base_url: String,
    /// Value sent in the `Origin` header.
    #[serde(default = "default_api_origin")]
    pub origin: String,
    /// Request timeout in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: f64,
    /// Pause between per-device telemetry requests, in milliseconds.
    #[serde(default = "default_telemetry_delay_ms")]
    pub telemetry_delay_ms: u64,
    /// Pause between per-device cash collection requests, in milliseconds.
    #[serde(default = "default_cash_delay_ms")]
    pub cash_delay_ms: u64,
    /// Days of water quality history to request.
    #[serde(default = "default_quality_days")]
    pub quality_days: i64,
    /// Weeks of cash collection history to request.
    #[serde(default = "default_cash_weeks")]
    pub cash_weeks: i64,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_url() -> String {
    "https://soliton.net.ua/water/api/".to_string()
}

fn default_api_origin() -> String {
    "https://soliton.net.ua".to_string()
}

fn default_api_timeout() -> f64 {
    30.0
}

fn default_telemetry_delay_ms() -> u64 {
    150
}

fn default_cash_delay_ms() -> u64 {
    300
}

fn default_quality_days() -> i64 {
    180
}

fn default_cash_weeks() -> i64 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            origin: default_api_origin(),
            timeout_seconds: default_api_timeout(),
            telemetry_delay_ms: default_telemetry_delay_ms(),
            cash_delay_ms: default_cash_delay_ms(),
            quality_days: default_quality_days(),
            cash_weeks: default_cash_weeks(),
            retry: RetryConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, default_api_timeout())
    }
}

/// Geocoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Search endpoint.
    #[serde(default = "default_geocoder_url")]
    pub endpoint: String,
    /// User agent sent with every request.
    #[serde(default = "default_geocoder_agent")]
    pub user_agent: String,
    /// Text prepended to every query to bias results towards one city.
    #[serde(default = "default_city_hint")]
    pub city_hint: String,
    /// Request timeout in seconds.
    #[serde(default = "default_geocoder_timeout")]
    pub timeout_seconds: f64,
    /// Pause after each network lookup, in milliseconds.
    #[serde(default = "default_politeness_ms")]
    pub politeness_delay_ms: u64,
    /// Map center as `[lat, lon]`.
    #[serde(default = "default_map_center")]
    pub map_center: [f64; 2],
    /// Initial map zoom.
    #[serde(default = "default_map_zoom")]
    pub map_zoom: u8,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org/search".to_string()
}

fn default_geocoder_agent() -> String {
    "WaterRoutesBot/1.0".to_string()
}

fn default_city_hint() -> String {
    "Львів".to_string()
}

fn default_geocoder_timeout() -> f64 {
    10.0
}

fn default_politeness_ms() -> u64 {
    1000
}

fn default_map_center() -> [f64; 2] {
    [49.8397, 24.0297]
}

fn default_map_zoom() -> u8 {
    12
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_url(),
            user_agent: default_geocoder_agent(),
            city_hint: default_city_hint(),
            timeout_seconds: default_geocoder_timeout(),
            politeness_delay_ms: default_politeness_ms(),
            map_center: default_map_center(),
            map_zoom: default_map_zoom(),
            retry: RetryConfig::default(),
        }
    }
}

impl GeocoderConfig {
    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_seconds, default_geocoder_timeout())
    }

    /// Gets the politeness delay as a Duration.
    #[must_use]
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

/// One technician and the ways they show up in raw data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technician {
    /// Canonical short name.
    pub id: String,
    /// Spellings found in free-text fields (matched case-insensitively).
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Collection card numbers belonging to this technician.
    #[serde(default)]
    pub cards: Vec<String>,
}

/// Technician roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicianRoster {
    /// Known technicians.
    #[serde(default = "default_technicians")]
    pub members: Vec<Technician>,
}

fn default_technicians() -> Vec<Technician> {
    let tech = |id: &str, aliases: &[&str], cards: &[&str]| Technician {
        id: id.to_string(),
        aliases: aliases.iter().map(ToString::to_string).collect(),
        cards: cards.iter().map(ToString::to_string).collect(),
    };
    vec![
        tech("igor", &["igor", "ігор", "игорь"], &["23129", "9576"]),
        tech("dmutro", &["dmutro", "дмитро", "дмитрий", "dmitro"], &["24662"]),
        tech("ruslan", &["ruslan", "руслан"], &["14147"]),
    ]
}

impl Default for TechnicianRoster {
    fn default() -> Self {
        Self {
            members: default_technicians(),
        }
    }
}

impl TechnicianRoster {
    /// Finds the technician owning a collection card.
    #[must_use]
    pub fn by_card(&self, card: &str) -> Option<&str> {
        let card = card.trim();
        self.members
            .iter()
            .find(|t| t.cards.iter().any(|c| c == card))
            .map(|t| t.id.as_str())
    }

    /// Finds the first technician whose alias occurs in `text`.
    #[must_use]
    pub fn match_alias(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.members
            .iter()
            .find(|t| {
                std::iter::once(&t.id)
                    .chain(t.aliases.iter())
                    .any(|alias| !alias.is_empty() && lowered.contains(&alias.to_lowercase()))
            })
            .map(|t| t.id.as_str())
    }

    /// Returns canonical technician ids in roster order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.members.iter().map(|t| t.id.as_str()).collect()
    }
}

/// Access codes mapping a code word to a role name.
///
/// Empty by default: nobody can log in until codes are configured in the
/// file or through [`ENV_ACCESS_CODES`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Code word to role name.
    #[serde(default)]
    pub codes: HashMap<String, String>,
}

impl AccessConfig {
    /// Adds a code for a role.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>, role: impl Into<String>) -> Self {
        self.codes.insert(code.into(), role.into());
        self
    }

    /// Adds codes from `code=role,code=role` text; malformed pairs are skipped.
    pub fn extend_from_pairs(&mut self, pairs: &str) {
        for pair in pairs.split(',') {
            if let Some((code, role)) = pair.split_once('=') {
                let (code, role) = (code.trim(), role.trim());
                if !code.is_empty() && !role.is_empty() {
                    self.codes.insert(code.to_string(), role.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = VodaflowConfig::from_toml_str("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.runner.stage_pause_ms, 1000);
        assert_eq!(config.status.preview_limit, 200);
        assert_eq!(config.status.prefix, "⏳ ");
        assert_eq!(config.api.quality_days, 180);
        assert_eq!(config.geocoder.map_zoom, 12);
        assert!(config.access.codes.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config = VodaflowConfig::from_toml_str(
            r#"
            data_dir = "/srv/voda"

            [runner]
            stage_pause_ms = 0

            [status]
            preview_limit = 50

            [[technicians.members]]
            id = "oleh"
            aliases = ["олег"]
            cards = ["111"]
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/voda"));
        assert_eq!(config.runner.stage_pause_ms, 0);
        assert_eq!(config.status.preview_limit, 50);
        assert_eq!(config.status.prefix, "⏳ ");
        assert_eq!(config.technicians.ids(), vec!["oleh"]);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = VodaflowConfig::from_toml_str("runner = 5").unwrap_err();
        assert!(matches!(err, VodaflowError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = VodaflowConfig::default();
        config.apply_env(|key| match key {
            ENV_PORTAL_LOGIN => Some("operator".to_string()),
            ENV_PORTAL_PASSWORD => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.portal.login, "operator");
        assert!(config.portal.has_credentials());
    }

    #[test]
    fn test_access_codes_from_env() {
        let mut config = VodaflowConfig::default();
        config.apply_env(|key| {
            (key == ENV_ACCESS_CODES).then(|| "k1=admin, k2 = igor,broken,=x".to_string())
        });
        assert_eq!(config.access.codes.len(), 2);
        assert_eq!(config.access.codes.get("k2").map(String::as_str), Some("igor"));
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        let err =
            VodaflowConfig::from_toml_str("[geocoder]\ntimeout_seconds = -1.0\n").unwrap_err();
        assert!(matches!(err, VodaflowError::Config(ref msg) if msg.contains("geocoder")));

        let err =
            VodaflowConfig::from_toml_str("[api.retry]\nmax_delay_seconds = -5.0\n").unwrap_err();
        assert!(matches!(err, VodaflowError::Config(_)));
        assert!(VodaflowConfig::from_toml_str("[portal]\ntimeout_seconds = nan\n").is_err());
    }

    #[test]
    fn test_out_of_range_values_do_not_panic() {
        let mut geocoder = GeocoderConfig::default();
        geocoder.timeout_seconds = -1.0;
        assert_eq!(geocoder.timeout(), Duration::from_secs(10));

        let retry = RetryConfig {
            max_delay_seconds: f64::NAN,
            ..RetryConfig::default()
        };
        let _ = retry.delay_for_attempt(3);
        let retry = RetryConfig {
            max_delay_seconds: -1.0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_retry_delay_for_attempt() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_should_retry_status() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry_status(429));
        assert!(retry.should_retry_status(503));
        assert!(!retry.should_retry_status(404));
    }

    #[test]
    fn test_roster_lookups() {
        let roster = TechnicianRoster::default();
        assert_eq!(roster.by_card("14147"), Some("ruslan"));
        assert_eq!(roster.by_card(" 9576 "), Some("igor"));
        assert_eq!(roster.by_card("1"), None);
        assert_eq!(roster.match_alias("Інкасація Дмитро"), Some("dmutro"));
        assert_eq!(roster.match_alias("IGOR card"), Some("igor"));
        assert_eq!(roster.match_alias("невідомо"), None);
    }
}
