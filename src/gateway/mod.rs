// Tool call gateway and backend adapters

//! # Gateway Module
//!
//! Every external operation the pipeline performs goes through one dispatcher:
//!
//! - `operation`: the closed [`ToolOperation`] enum (no stringly-typed tool
//!   dispatch) plus the [`BackendFailure`] type whose `retriable` flag drives
//!   fallback
//! - `adapter`: the [`BackendAdapter`] trait and the shared classification
//!   rule that keeps fallback logic backend-agnostic
//! - `protocol`: adapter speaking the structured tool-call envelope to a
//!   fixed tool-invocation endpoint
//! - `rest`: direct REST adapters for the issue tracker and the code host
//! - `dispatch`: the [`ToolGateway`] itself - ordered adapter lists per
//!   operation, first-success-wins, bounded timeouts
//!
//! Adapters are registered once at startup; there is no dynamic discovery.

pub mod adapter;
pub mod dispatch;
pub mod operation;
pub mod protocol;
pub mod rest;

pub use adapter::BackendAdapter;
pub use dispatch::ToolGateway;
pub use operation::{
    BackendCallResult, BackendFailure, FailureKind, ServiceKind, ToolOperation, ToolPayload,
};
pub use protocol::ProtocolAdapter;
pub use rest::{CodeHostRestAdapter, TrackerRestAdapter};
