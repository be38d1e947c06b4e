//! Loom core library: domain types, the lossless state document, its store,
//! the hierarchy model and the project layout.
//!
//! - [`types`]: validated names and the story lifecycle
//! - [`xml`] / [`document`]: lossless XML tree and the typed ledger mapping
//! - [`store`]: atomic saves, backups and restore
//! - [`hierarchy`]: lifecycle operations over the ledger
//! - [`tree`] / [`layout`] / [`config`]: what the project should look like

pub mod config;
pub mod document;
pub mod error;
pub mod hierarchy;
pub mod layout;
pub mod ledger;
pub mod store;
pub mod tree;
pub mod types;
pub mod xml;

pub use config::EngineConfig;
pub use document::{DocumentError, StatusDocument};
pub use error::{ConfigError, InvariantViolation, StoreError};
pub use hierarchy::Model;
pub use layout::{Blueprint, Layout};
pub use ledger::Ledger;
pub use store::StateStore;
pub use tree::FileTree;
pub use types::{
    CommitId, EntityRef, EpicName, FeatureName, StoryId, StoryRef, StoryStatus, TaskId, TaskOrigin,
};
