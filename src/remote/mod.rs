/// Remote style engine module
///
/// This module handles everything that leaves the machine:
/// - The engine trait and its HTTP implementation (client.rs)
/// - Sequential batch orchestration over the engine (batch.rs)

pub mod batch;
pub mod client;
