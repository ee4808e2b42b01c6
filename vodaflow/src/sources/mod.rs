//! External data sources: the management portal, the device API and the
//! geocoding service.
//!
//! Each source is a trait so pipelines can run against in-memory fakes.

pub mod api;
pub mod geocode;
pub mod portal;

pub use api::{ApiClient, ApiEnvelope, ApiRange, DeviceApiSource, Record};
pub use geocode::{GeocodeCache, GeocodeProvider, Geocoder, Lookup, NominatimClient};
#[cfg(feature = "portal")]
pub use portal::PortalClient;
pub use portal::{PortalQuery, PortalSource};
