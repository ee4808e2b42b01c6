//! Parsing and formatting helpers shared by the pipelines.

pub mod address;
pub mod clock;
pub mod dates;
pub mod geo;

pub use address::{clean_address, normalize_for_cache, parse_address};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dates::{
    clean_datetime, format_date, format_datetime, format_time, parse_date, parse_datetime,
    parse_time, previous_month,
};
pub use geo::{haversine_km, LatLon};
