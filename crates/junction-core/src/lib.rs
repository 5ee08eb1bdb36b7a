//! Core of the Junction gateway: the request-to-submission transformation
//! and delivery pipeline.
//!
//! An inbound ingest request flows through six components:
//!
//! 1. [`request`] - parse and validate the posted JSON into a typed
//!    [`request::IngestRequest`].
//! 2. [`mods`] - extract and normalize bibliographic fields from the
//!    embedded descriptive-metadata XML.
//! 3. [`files`] - normalize per-file structural XML and technical probe
//!    data into masterfile descriptors with timing offsets and derivatives.
//! 4. [`router`] - resolve which downstream repository instance the request
//!    goes to.
//! 5. [`collections`] - find or lazily create the downstream collection for
//!    the request's unit.
//! 6. [`orchestrator`] - own state persistence, the create-vs-update
//!    protocol against the downstream API, and terminal outcomes.
//!
//! All collaborators are injected at construction ([`store`] traits,
//! [`avalon::AvalonClient`], [`junction_common::RetryPolicy`]) so each
//! component can be substituted in tests.

pub mod avalon;
pub mod collections;
pub mod files;
pub mod mods;
pub mod orchestrator;
pub mod payload;
pub mod request;
pub mod router;
pub mod store;

pub use junction_common::{GatewayError, Result, RetryPolicy};
