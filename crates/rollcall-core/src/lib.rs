//! Rollcall core: rotating attendance tokens and scan admission.
//!
//! Sans-IO engine that decides whether a scan request may record a person's
//! presence. All I/O (HTTP, databases, the clock) sits behind traits so the
//! production server and the tests drive the same logic.
//!
//! ## Architecture
//!
//! ```text
//! rollcall-core
//!   ├─ TokenIssuer          (unique token values + absolute expiry)
//!   ├─ TokenAuthority       (single current token, publish listeners)
//!   ├─ AdmissionValidator   (token + subnet policy → Decision)
//!   ├─ RecordingCoordinator (identity lookup + append-only events)
//!   ├─ ScanDesk             (full per-scan pipeline → ScanOutcome)
//!   └─ RecordStore          (identity directory + presence log)
//! ```
//!
//! # Invariants
//!
//! - At most one token is current; publishing a new one invalidates the
//!   previous token immediately, whatever its nominal expiry.
//! - A presence event is appended only after an `Admit` decision followed
//!   by a successful identity lookup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod authority;
pub mod env;
pub mod issuer;
pub mod network;
pub mod record;
pub mod recorder;
pub mod scan;
pub mod store;
pub mod token;

pub use admission::{AdmissionValidator, Decision};
pub use authority::{PublishListener, TokenAuthority};
pub use env::Environment;
pub use issuer::{DEFAULT_TOKEN_PREFIX, TokenIssuer};
pub use network::{NetworkPolicy, NetworkPrefix, PolicyError};
pub use record::{IdentityRecord, PresenceEvent};
pub use recorder::{DuplicatePolicy, RecordOutcome, RecordingCoordinator};
pub use scan::{ScanDesk, ScanOutcome};
pub use store::{ChaoticStore, MemoryStore, RecordStore, StoreError};
pub use token::{PublishError, Token, TokenCell};
