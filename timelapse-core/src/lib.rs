pub mod aggregate;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod filter;
pub mod ipc;
pub mod models;
pub mod normalize;
pub mod schema;
pub mod store;

pub use aggregate::{EndpointMap, EndpointQuery};
pub use config::TimelapseConfig;
pub use diff::{BodyDiff, ComparisonReport, DiffReport, SchemaDiff, Warning};
pub use error::{ErrorKind, TimelapseError, TimelapseResult};
pub use filter::TimelineFilter;
pub use models::{CapturedExchange, EndpointAggregate, RawEvent};
pub use normalize::{BodySource, InlineBody, ParsedBody};
pub use schema::{SchemaMap, SchemaType};
pub use store::{CaptureStore, MemCaptureStore, PgCaptureStore};
