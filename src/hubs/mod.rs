//! Hub (tenant) configuration: directory, local documents and resolution

pub mod model;
pub mod registry;
pub mod resolver;
pub mod store;

pub use model::{
    Branding, DirectoryEntry, HubContext, HubDocument, HubSettings, HubSummary, HubUpdate, NewHub,
    RegistrationRequest, SigningKeyRef,
};
pub use registry::{DirectoryCache, DirectoryError, DirectorySource, FileDirectory, HttpDirectory};
pub use resolver::{HubResolver, HUB_HEADER};
pub use store::{generate_slug, is_valid_slug, HubStore};
