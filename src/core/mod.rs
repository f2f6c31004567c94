pub mod flags;
pub mod gateway;
pub mod path_resolver;
pub mod refresh;
pub mod registry;
pub mod schema_index;
pub mod validation;

pub use flags::FeatureToggles;
pub use gateway::{UpstreamError, UpstreamRouter, UpstreamTarget};
pub use refresh::{RefreshCoordinator, RefreshError, build_generation};
pub use registry::{SchemaGeneration, SchemaRegistry};
pub use schema_index::{BuildError, Direction, RawSchema, RawSchemaSet, RouteEntry, SchemaIndex};
pub use validation::{ErrorKind, ErrorResponse, Rejection, ValidationEngine, ValidationOutcome};
