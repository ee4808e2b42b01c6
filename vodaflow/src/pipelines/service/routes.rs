//! Service stage 2: daily technician routes on an interactive map.
//!
//! Visits are grouped per (day, technician) in start order. Each apparatus
//! address is cleaned, geocoded through the cache-first [`Geocoder`] and
//! joined into a polyline. Addresses that cannot be located are left out of
//! the route; a group with no located address produces no route at all.

use askama::Template;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::GeocoderConfig;
use crate::core::StageOutcome;
use crate::errors::{Result, VodaflowError};
use crate::pipelines::files::{ADDRESS_CACHE, ROUTES_MAP, ROUTES_SUMMARY, SERVICE_VISITS};
use crate::pipelines::{item_percent, required, PipelineContext};
use crate::sources::{GeocodeCache, GeocodeProvider, Geocoder, Lookup};
use crate::stages::{Stage, StageProgress};
use crate::table::{write_records, Table};
use crate::utils::{
    clean_address, format_date, format_time, haversine_km, parse_date, parse_time, LatLon,
};

/// Route colors, handed out to technicians in order of first appearance.
pub const PALETTE: [&str; 9] = [
    "red", "blue", "green", "purple", "orange", "darkred", "cadetblue", "darkblue", "darkgreen",
];

/// Columns of `service_routes_summary.csv`.
pub const SUMMARY_COLUMNS: [&str; 5] = ["date", "tech", "aparats", "km", "points"];

/// One visit as read back from the visits table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    /// Raw apparatus address.
    pub aparat: String,
    /// Arrival, if readable.
    pub start: Option<NaiveTime>,
    /// Departure, if readable.
    pub end: Option<NaiveTime>,
}

/// A located stop on a route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePoint {
    /// Cleaned address.
    pub address: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Arrival time of day.
    pub start: Option<String>,
    /// Departure time of day.
    pub end: Option<String>,
}

/// One technician's route of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    /// Day.
    pub date: String,
    /// Technician.
    pub tech: String,
    /// Line and marker color.
    pub color: String,
    /// Located stops in visit order.
    pub points: Vec<RoutePoint>,
}

impl Route {
    /// Sum of great-circle legs, rounded to metres.
    #[must_use]
    pub fn km(&self) -> f64 {
        let coords: Vec<LatLon> = self.points.iter().map(|p| LatLon::new(p.lat, p.lon)).collect();
        route_km(&coords)
    }

    /// Number of distinct addresses.
    #[must_use]
    pub fn distinct_addresses(&self) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        for point in &self.points {
            if !seen.contains(&point.address.as_str()) {
                seen.push(&point.address);
            }
        }
        seen.len()
    }
}

/// A row of `service_routes_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    /// Day.
    pub date: String,
    /// Technician.
    pub tech: String,
    /// Distinct addresses visited.
    pub aparats: usize,
    /// Route length.
    pub km: f64,
    /// Located stops.
    pub points: usize,
}

impl From<&Route> for RouteSummary {
    fn from(route: &Route) -> Self {
        Self {
            date: route.date.clone(),
            tech: route.tech.clone(),
            aparats: route.distinct_addresses(),
            km: route.km(),
            points: route.points.len(),
        }
    }
}

/// A legend line of the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    /// Technician.
    pub tech: String,
    /// Assigned color.
    pub color: &'static str,
}

/// Stable technician to color assignment.
#[derive(Debug, Default)]
pub struct Palette {
    assigned: Vec<LegendEntry>,
}

impl Palette {
    /// Returns the color of `tech`, assigning the next free one on first use.
    /// Colors repeat once the palette is exhausted.
    pub fn color_for(&mut self, tech: &str) -> &'static str {
        if let Some(entry) = self.assigned.iter().find(|e| e.tech == tech) {
            return entry.color;
        }
        let color = PALETTE[self.assigned.len() % PALETTE.len()];
        self.assigned.push(LegendEntry {
            tech: tech.to_string(),
            color,
        });
        color
    }

    /// Assignments in order of first use.
    #[must_use]
    pub fn legend(&self) -> &[LegendEntry] {
        &self.assigned
    }
}

/// Total length of a polyline, rounded to three decimals.
#[must_use]
pub fn route_km(points: &[LatLon]) -> f64 {
    let total: f64 = points.windows(2).map(|w| haversine_km(w[0], w[1])).sum();
    (total * 1000.0).round() / 1000.0
}

/// Groups the visits table per (day, technician), stops ordered by arrival.
/// Rows with an unreadable day or no technician are skipped.
pub fn group_stops(table: &Table) -> Result<BTreeMap<(NaiveDate, String), Vec<Stop>>> {
    for column in ["data", "aparat", "start", "tech", "end"] {
        table.require(column, SERVICE_VISITS)?;
    }
    let mut groups: BTreeMap<(NaiveDate, String), Vec<Stop>> = BTreeMap::new();
    for row in table.iter() {
        let tech = row.get("tech").trim();
        let Some(day) = parse_date(row.get("data")) else {
            continue;
        };
        if tech.is_empty() {
            continue;
        }
        groups.entry((day, tech.to_string())).or_default().push(Stop {
            aparat: row.get("aparat").to_string(),
            start: parse_time(row.get("start")),
            end: parse_time(row.get("end")),
        });
    }
    for stops in groups.values_mut() {
        stops.sort_by_key(|s| (s.start.is_none(), s.start));
    }
    Ok(groups)
}

#[derive(Template)]
#[template(path = "routes_map.html")]
struct RoutesMapTemplate<'a> {
    title: &'a str,
    center_lat: f64,
    center_lon: f64,
    zoom: u8,
    legend: &'a [LegendEntry],
    routes_json: String,
}

/// Renders the Leaflet map document.
pub fn render_map(
    routes: &[Route],
    legend: &[LegendEntry],
    config: &GeocoderConfig,
) -> Result<String> {
    let routes_json = serde_json::to_string(routes)?.replace("</", "<\\/");
    let template = RoutesMapTemplate {
        title: "Technician routes",
        center_lat: config.map_center[0],
        center_lon: config.map_center[1],
        zoom: config.map_zoom,
        legend,
        routes_json,
    };
    template
        .render()
        .map_err(|e| VodaflowError::Render(e.to_string()))
}

/// Geocodes visits and draws the routes map.
#[derive(Debug)]
pub struct RoutesStage {
    ctx: PipelineContext,
    provider: Arc<dyn GeocodeProvider>,
}

impl RoutesStage {
    /// Creates the stage.
    pub fn new(ctx: PipelineContext, provider: Arc<dyn GeocodeProvider>) -> Self {
        Self { ctx, provider }
    }

    async fn locate_stops(
        &self,
        geocoder: &mut Geocoder,
        stops: &[Stop],
        progress: &StageProgress,
    ) -> Vec<RoutePoint> {
        let mut points = Vec::new();
        for stop in stops {
            let address = clean_address(&stop.aparat);
            let lookup = geocoder.locate(&address).await;
            match (&lookup, lookup.coords()) {
                (Lookup::Failed(e), _) => {
                    progress
                        .detail(format!("⚠️ Geocoding failed for '{address}': {e}"))
                        .await;
                }
                (_, None) => {
                    progress.detail(format!("❓ Address not found: '{address}'")).await;
                }
                (_, Some(coords)) => {
                    if matches!(lookup, Lookup::Found(_)) {
                        debug!(address, lat = coords.lat, lon = coords.lon, "Geocoded");
                    }
                    points.push(RoutePoint {
                        address,
                        lat: coords.lat,
                        lon: coords.lon,
                        start: stop.start.map(format_time),
                        end: stop.end.map(format_time),
                    });
                }
            }
        }
        points
    }

    async fn execute(&self, progress: &StageProgress) -> Result<StageOutcome> {
        progress.report(0.0, "🗺 Building technician routes...").await;
        let data = &self.ctx.data;
        if !data.exists(SERVICE_VISITS) {
            return Ok(progress.fail(0.0, format!("{SERVICE_VISITS} not found")).await);
        }
        let table = Table::read(&data.path(SERVICE_VISITS))?;
        if table.is_empty() {
            progress
                .report(100.0, format!("✅ {SERVICE_VISITS} is empty, no routes to draw"))
                .await;
            return Ok(StageOutcome::Ok);
        }
        let groups = group_stops(&table)?;

        let config = &self.ctx.config.geocoder;
        let cache_path = data.path(ADDRESS_CACHE);
        let mut geocoder = Geocoder::new(
            self.provider.clone(),
            GeocodeCache::load(&cache_path),
            config.city_hint.clone(),
            config.politeness_delay(),
        );
        progress
            .detail(format!("{} cached addresses", geocoder.cache().len()))
            .await;

        let mut palette = Palette::default();
        let mut routes = Vec::new();
        let total = groups.len();
        for (index, ((day, tech), stops)) in groups.iter().enumerate() {
            progress
                .report(
                    item_percent(10.0, 70.0, index, total),
                    format!("📍 {tech}, {}", format_date(*day)),
                )
                .await;
            let points = self.locate_stops(&mut geocoder, stops, progress).await;
            if points.is_empty() {
                continue;
            }
            routes.push(Route {
                date: format_date(*day),
                tech: tech.clone(),
                color: palette.color_for(tech).to_string(),
                points,
            });
        }
        geocoder.cache().save(&cache_path)?;

        let html = render_map(&routes, palette.legend(), config)?;
        std::fs::write(data.path(ROUTES_MAP), html)?;

        let summary: Vec<RouteSummary> = routes.iter().map(RouteSummary::from).collect();
        if summary.is_empty() {
            progress.detail("No routes for the summary").await;
        } else {
            write_records(&data.path(ROUTES_SUMMARY), &summary, &SUMMARY_COLUMNS)?;
            for row in &summary {
                progress
                    .detail(format!(
                        "{} {}: {} addresses, {:.3} km",
                        row.date, row.tech, row.aparats, row.km
                    ))
                    .await;
            }
        }
        progress
            .report(100.0, format!("✅ Map saved: {ROUTES_MAP}, {} routes", routes.len()))
            .await;
        Ok(StageOutcome::Ok)
    }
}

#[async_trait]
impl Stage for RoutesStage {
    fn label(&self) -> &str {
        "Routes"
    }

    async fn run(&self, progress: &StageProgress) -> Result<StageOutcome> {
        required(progress, self.execute(progress).await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::sources::geocode::MockGeocodeProvider;
    use crate::testing::{fixture_context, write_fixture, FakeGeocoder};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const VISITS: &str = "data,aparat,start,tech,end,kol-time,v_doroge,fir_point,last_point\n\
        2024-02-03,\"Зелена, 5 магазин АТБ\",09:00:00,Ivan,09:20:00,20,0,YES,\n\
        2024-02-03,\"Лесі, 1\",10:00:00,Ivan,10:45:00,45,40,,YES\n\
        2024-02-03,Десь там,11:00:00,Ivan,11:10:00,10,15,,\n\
        2024-02-03,\"Зелена, 5\",08:00:00,Oleh,08:30:00,30,0,YES,YES\n\
        2024-02-04,Шевченка 12,08:00:00,,08:10:00,10,0,,\n";

    fn zelena() -> LatLon {
        LatLon::new(49.84, 24.03)
    }

    fn lesi() -> LatLon {
        LatLon::new(49.85, 24.03)
    }

    fn stage(dir: &std::path::Path, provider: Arc<dyn GeocodeProvider>) -> RoutesStage {
        RoutesStage::new(fixture_context(dir), provider)
    }

    #[test]
    fn test_palette_is_stable_and_wraps() {
        let mut palette = Palette::default();
        assert_eq!(palette.color_for("a"), "red");
        assert_eq!(palette.color_for("b"), "blue");
        assert_eq!(palette.color_for("a"), "red");
        for i in 0..7 {
            palette.color_for(&format!("t{i}"));
        }
        assert_eq!(palette.color_for("wrapped"), "red");
        assert_eq!(palette.legend().len(), 10);
    }

    #[test]
    fn test_route_km_rounds_and_handles_single_point() {
        assert!(route_km(&[zelena()]).abs() < f64::EPSILON);
        let km = route_km(&[zelena(), lesi(), zelena()]);
        assert!((km - 2.224).abs() < 0.002, "{km}");
        assert!(((km * 1000.0).round() - km * 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_group_stops_skips_anonymous_and_sorts() {
        let table = Table::parse(VISITS).unwrap();
        let groups = group_stops(&table).unwrap();

        let keys: Vec<String> = groups.keys().map(|(_, tech)| tech.clone()).collect();
        assert_eq!(keys, vec!["Ivan".to_string(), "Oleh".to_string()]);
        let day = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
        assert_eq!(groups[&(day, "Ivan".to_string())].len(), 3);
    }

    #[test]
    fn test_group_stops_requires_columns() {
        let table = Table::parse("data,aparat\n2024-02-03,x\n").unwrap();
        assert!(group_stops(&table).is_err());
    }

    #[test]
    fn test_render_escapes_script_breakout() {
        let routes = vec![Route {
            date: "2024-02-03".to_string(),
            tech: "</script><b>".to_string(),
            color: "red".to_string(),
            points: Vec::new(),
        }];
        let html = render_map(&routes, &[], &GeocoderConfig::default()).unwrap();
        assert!(!html.contains("</script><b>"));
        assert!(html.contains("<\\/script>"));
    }

    #[tokio::test]
    async fn test_routes_written_and_cache_saved() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), SERVICE_VISITS, VISITS).unwrap();
        let geocoder = Arc::new(
            FakeGeocoder::new()
                .with_place("Зелена, 5", zelena())
                .with_place("Лесі, 1", lesi()),
        );
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 1, 3, "Routes");

        let outcome = stage(dir.path(), geocoder.clone()).run(&progress).await.unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        // "Зелена, 5" is looked up once; Oleh's visit hits the cache.
        assert_eq!(geocoder.lookups().len(), 3);
        assert!(geocoder.lookups().iter().all(|q| q.starts_with("Львів ")));

        let summary = Table::read(&dir.path().join(ROUTES_SUMMARY)).unwrap();
        assert_eq!(summary.headers(), SUMMARY_COLUMNS.map(String::from).as_slice());
        assert_eq!(summary.len(), 2);
        let ivan = summary.iter().find(|r| r.get("tech") == "Ivan").unwrap();
        assert_eq!(ivan.get("aparats"), "2");
        assert_eq!(ivan.get("points"), "2");
        assert_eq!(ivan.get("km"), "1.112");

        let html = std::fs::read_to_string(dir.path().join(ROUTES_MAP)).unwrap();
        assert!(html.contains("leaflet"));
        assert!(html.contains("Oleh"));

        let cache = GeocodeCache::load(&dir.path().join(ADDRESS_CACHE));
        assert_eq!(cache.len(), 3);
        assert!(sink.contains("Address not found: 'Десь там'"));
    }

    #[tokio::test]
    async fn test_cached_addresses_need_no_network() {
        let dir = tempdir().unwrap();
        write_fixture(
            dir.path(),
            SERVICE_VISITS,
            "data,aparat,start,tech,end\n2024-02-03,\"Лесі, 1\",10:00:00,Ivan,10:45:00\n",
        )
        .unwrap();
        let mut cache = GeocodeCache::default();
        cache.insert("лесі, 1", Some(lesi()));
        cache.save(&dir.path().join(ADDRESS_CACHE)).unwrap();

        let mut provider = MockGeocodeProvider::new();
        provider.expect_lookup().times(0);
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink, 1, 3, "Routes");

        let outcome = stage(dir.path(), Arc::new(provider)).run(&progress).await.unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(dir.path().join(ROUTES_MAP).is_file());
    }

    #[tokio::test]
    async fn test_missing_visits_fails() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let progress = StageProgress::new(sink.clone(), 1, 3, "Routes");

        let outcome = stage(dir.path(), Arc::new(FakeGeocoder::new()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Fail);
        assert!(sink.contains("service_tex_analitik.csv not found"));
    }

    #[tokio::test]
    async fn test_headers_only_visits_succeed_without_map() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path(), SERVICE_VISITS, "data,aparat,start,tech,end\n").unwrap();
        let progress = StageProgress::new(Arc::new(CollectingSink::new()), 1, 3, "Routes");

        let outcome = stage(dir.path(), Arc::new(FakeGeocoder::new()))
            .run(&progress)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Ok);
        assert!(!dir.path().join(ROUTES_MAP).exists());
    }
}
