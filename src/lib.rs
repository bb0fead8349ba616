//! # Chatgate Core - admission control and tool-server client
//!
//! The two subsystems of the chat platform that carry real concurrency and
//! failure-handling concerns:
//! - Admission control: sliding-window counters and token-bucket burst
//!   control per IP, per user and per tool, over a shared store
//! - Tool-server client: capability discovery, HMAC-signed invocation with
//!   timeout and linear-backoff retry, normalized results
//!
//! ## Architecture
//!
//! ```text
//!   inbound request
//!         │
//!         ▼
//!   ┌──────────────┐     ┌─────────────────────────────┐
//!   │ AdmissionGate│ ──► │ SlidingWindow / TokenBucket │ ──► LimiterStore
//!   └──────────────┘     └─────────────────────────────┘
//!         │ admitted
//!         ▼
//!   ┌──────────────┐     ┌────────────────────────────┐
//!   │ ToolRegistry │     │ ToolInvoker                │ ──► tool server
//!   │  (discovery) │     │  sign ─ send ─ retry ─ map │
//!   └──────────────┘     └────────────────────────────┘
//!                              │
//!                    RequestSigner / CredentialVault
//! ```
//!
//! Everything that talks to the network or the store never raises across its
//! public contract: `evaluate` returns a decision, `discover` returns a
//! (possibly empty) list, `invoke` returns a [`tools::ToolCallResult`]. Only a
//! credential that fails to decrypt is surfaced as an [`Error`].

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod clock;
pub mod limiter;
pub mod security;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{AdmissionGate, LimiterDecision, LimiterKey, StoreHandle};
pub use security::{Credential, CredentialVault, RequestSigner, SignedEnvelope};
pub use tools::{ToolCallRequest, ToolCallResult, ToolDescriptor, ToolInvoker, ToolRegistry};
pub use types::{Config, Error, Result};
