//! Core of the Sift forward-chaining rules engine.
//!
//! Rules are compiled into a RETE discrimination network whose nodes are
//! shared between rules wherever their semantics agree. Facts propagate
//! incrementally: each submission or retraction touches only the memories
//! it changes, and only the entries a change added or removed are written
//! to a pluggable [`MemoryStore`].
//!
//! ```no_run
//! use sift_core::{ReteNetwork, SiftResult};
//!
//! fn run(program: &str) -> SiftResult<()> {
//!     let mut network = ReteNetwork::new();
//!     network.set_activation_handler(|activation: &sift_core::Activation| {
//!         println!("{} fired for {}", activation.rule_id, activation.token.id());
//!     });
//!     network.load_program_json(program)?;
//!     Ok(())
//! }
//! ```

use tracing::{debug, instrument};
use tracing_subscriber::EnvFilter;

/// Aggregation nodes and running aggregates
pub mod aggregation;
/// Type entry nodes and alpha filters
pub mod alpha_memory;
/// Serde model of rule programs
pub mod ast;
/// Join and existential nodes
pub mod beta_network;
/// Rule compilation into node plans
pub mod builder;
/// Engine configuration
pub mod config;
/// Error types
pub mod error;
/// Node reference counting
pub mod lifecycle;
/// Per-node working memory snapshots
pub mod memory;
/// Semantic signatures and sharing registries
pub mod node_sharing;
/// Network construction and propagation
pub mod rete_network;
/// Tokens, deltas and the node arena entry
pub mod rete_nodes;
/// Memory store contract and the in-memory store
pub mod store;
/// Terminal nodes and activation delivery
pub mod terminal;
/// Conditions and their evaluation
pub mod types;

pub use ast::{Program, RuleExpression, TypeDefinition};
pub use config::{EngineConfig, LogFormat};
pub use error::{ErrorCategory, SiftError, SiftResult};
pub use memory::{MemoryChange, MemoryKey, WorkingMemory};
pub use rete_network::{NetworkStats, ProgramReport, ReteNetwork};
pub use rete_nodes::{NodeId, Token, TokenId};
pub use sift_types::{Fact, FactId, FactValue};
pub use store::{InMemoryStore, MemoryStore};
pub use terminal::{ActionDescriptor, Activation, ActivationHandler};

/// Install the log subscriber described by the default configuration
#[instrument]
pub fn init() -> anyhow::Result<()> {
    init_with_config(&EngineConfig::default())
}

/// Install a `tracing` fmt subscriber. `RUST_LOG` takes precedence over the
/// configured filter. A subscriber that is already installed is kept.
pub fn init_with_config(config: &EngineConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match config.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        debug!("Log subscriber already installed");
    }
    Ok(())
}
