//! Retarget Consensus - contextual header verification over a committed chain
//!
//! Wraps the retarget core in a thread-safe header chain: every submitted
//! header must claim exactly the bits the dispatcher requires for its
//! position and must satisfy them.

pub mod config;
pub mod state;
pub mod verifier;

pub use config::{NodeConfig, ParamOverrides};
pub use state::{StateError, StateManager, StateStatistics};
pub use verifier::{ConsensusError, HeaderVerifier};
