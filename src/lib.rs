//! Schema Contracts
//!
//! Negotiates schema evolution between data producers and the teams that
//! consume their assets. Producers publish versioned contracts; a change that
//! could break a registered consumer is held as a proposal until consumers
//! acknowledge it or an admin forces it through.
//!
//! ## Features
//!
//! - **Structural Diffing**: Typed, ordered change lists between two schema documents
//! - **Compatibility Policies**: backward / forward / full / none, Kafka registry style
//! - **Semantic Versioning**: Contract versions are bumped from the change class
//! - **Optimistic Publishing**: One active contract per asset, guarded by compare-and-swap
//! - **Acknowledgment Workflow**: Proposals resolve from the full set of consumer responses
//! - **Blast Radius**: Bounded, cycle-safe traversal of downstream dependencies
//!
//! ## Flow
//!
//! ```text
//! proposed schema
//!       │
//!       ▼
//! ContractLifecycle ──compare──► [Change] ──classify──► verdict
//!       │                                                  │
//!       ├── safe ───────────► publish vN+1, deprecate vN ◄─┤
//!       │                                                  │
//!       └── breaking ──► Proposal ──acknowledge──► approved ──► publish
//!                           │                                    ▲
//!                           └──────────────force─────────────────┘
//! ```

pub mod checksum;
pub mod classify;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod graph;
pub mod guarantees;
pub mod lifecycle;
pub mod model;
pub mod proposal;
pub mod schema;
pub mod store;
pub mod version;

pub use checksum::Checksum;
pub use classify::{classify, ChangeType, Classification, CompatibilityMode};
pub use config::CoreConfig;
pub use diff::{compare, Change, ChangeKind};
pub use error::{ContractError, ErrorKind, Result};
pub use events::{DomainEvent, EventEnvelope, EventSink};
pub use graph::{DependencyGraphWalker, ImpactReport, Traversal};
pub use guarantees::{GuaranteeMode, Guarantees};
pub use lifecycle::{ContractLifecycle, PublishOutcome, PublishRequest};
pub use model::{
    AckResponse, Acknowledgment, Actor, Asset, Contract, ContractStatus, DependencyEdge, Owner,
    Proposal, ProposalStatus, Registration,
};
pub use proposal::{ProposalProgress, ProposalWorkflow};
pub use schema::SchemaDocument;
pub use store::{MemoryStore, Store};
