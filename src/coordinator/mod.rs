//! Coordinator: leader election and sampling worker lifecycle
//!
//! The coordinator is responsible for:
//! - Creating the lock and store through a backend factory
//! - Running this node's seat in the leader election
//! - Building and starting the aggregator and the strategy store
//! - Shutting the election down, which stands the workers down with it

pub mod election;
pub mod http;
pub mod server;

pub use election::{
    Election, ElectionParticipant, ElectionRole, ParticipantOptions, DEFAULT_RESOURCE_NAME,
};
pub use http::{create_router, SamplerState};
pub use server::{Coordinator, CoordinatorState};
