pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod reconcile;
pub mod scanner;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::LoadError;
pub use library::Library;
pub use reconcile::{PhotoSummary, SortMode};
pub use store::{FaceBox, FaceRecord, MetadataStore, PhotoRecord};
