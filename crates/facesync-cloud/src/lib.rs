//! facesync-cloud — Client for the remote face-analysis provider.
//!
//! The daemon talks to the provider only through the [`FaceProvider`]
//! trait: detect, search-in-set, add-to-set and remove-from-set.
//! [`FacePlusPlus`] implements it over the Face++ v3 HTTPS API.

pub mod client;
pub mod provider;
mod wire;

pub use client::{ClientOptions, Credentials, FacePlusPlus, DEFAULT_API_URL};
pub use provider::{FaceProvider, ProviderError, RemoveTarget};
