//! Test doubles for stages, data sources and chat surfaces.
//!
//! Everything here works without network access so pipelines can be
//! exercised end to end against a temporary data directory.

mod fakes;
mod fixtures;
mod mocks;
mod surface;

pub use fakes::{Endpoint, FakeApi, FakeGeocoder, FakePortal};
pub use fixtures::{fixture_config, fixture_context, fixture_today, write_fixture};
pub use mocks::{ErroringStage, MockStage, PanickingStage, SlowStage};
pub use surface::{RecordingSurface, SurfaceCall};
