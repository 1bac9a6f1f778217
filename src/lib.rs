//! # modelgate
//!
//! Provider abstraction and normalization core for a unified LLM gateway.
//!
//! The crate resolves which provider mapping serves a requested model,
//! builds the provider-specific endpoint/headers/body, bounds the upstream
//! call with composable timeout/cancellation signals, and normalizes the
//! heterogeneous provider responses — token accounting, finish reasons,
//! failure classes — into one stable contract.
//!
//! ```rust,no_run
//! use modelgate::catalog::ModelCatalog;
//! use modelgate::dispatch::{DispatchOptions, Dispatcher};
//! use modelgate::types::{ChatMessage, ChatRequest};
//!
//! # async fn example(catalog: ModelCatalog) -> Result<(), modelgate::GatewayError> {
//! let dispatcher = Dispatcher::new();
//! let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("hello")]);
//! let outcome = dispatcher
//!     .execute(request, &catalog, DispatchOptions::default())
//!     .await?;
//! println!("{:?}", outcome.usage);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod classify;
pub mod collab;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod logrecord;
pub mod media;
pub mod providers;
pub mod stream;
pub mod timeout;
pub mod types;
pub mod utils;

pub use classify::{classify_failure, FinishClassification};
pub use error::GatewayError;
pub use providers::ProviderId;
pub use timeout::{AbortKind, AbortSignal, CancelHandle, TimeoutConfig};
pub use types::{ChatMessage, ChatRequest, FinishReason, Usage};
