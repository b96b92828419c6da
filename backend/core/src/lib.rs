pub mod error;
pub mod traits;
pub mod types;

pub use error::PluginError;
pub use traits::{ArtifactSource, PluginArtifact, PluginInstance};
pub use types::{PluginRecord, PluginStatus, StateBlob};
