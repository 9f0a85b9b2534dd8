// icsforms - Incident-command form versioning and transmission engine

pub mod codec;
pub mod config;
pub mod fields;
pub mod persist;
pub mod relay;
pub mod schema;
pub mod session;
pub mod version;

pub use codec::{CodecError, DesLayout, DesOptions};
pub use config::{ConfigError, EngineConfig};
pub use fields::{FieldError, FieldMap, FieldValue, FieldValueStore, GroupRow, ValidationReport};
pub use persist::{DirectoryPersistence, FormPersistence, MemoryPersistence, PersistError};
pub use relay::{Relay, RelayError};
pub use schema::{SchemaCatalog, SchemaError};
pub use session::{ChangeRecord, EditSession, TrackerError};
pub use version::{CommitMode, Version, VersionError, VersionId, VersionStore};
