// Credential store and OAuth token lifecycle management

//! # Auth Module
//!
//! Everything that keeps authenticated calls working while tokens expire:
//!
//! - `credentials`: the [`CredentialStore`] (token endpoint + grant
//!   configuration), the [`TokenRecord`] cached between refreshes, and the
//!   wire types for the OAuth token endpoint
//! - `token_manager`: the [`TokenLifecycleManager`] that hands out a
//!   currently-valid token, refreshing behind a double-checked lock so `N`
//!   concurrent callers trigger exactly one refresh
//!
//! The credential cache is the only mutable shared state in the crate; no
//! component reads or writes the cached [`TokenRecord`] directly.

pub mod credentials;
pub mod token_manager;

pub use credentials::{
    AuthError, CredentialStore, GrantConfig, TokenEndpointResponse, TokenRecord,
};
pub use token_manager::{
    HttpTokenEndpoint, InMemoryTokenStore, TokenEndpoint, TokenLifecycleManager, TokenStore,
};
