// Backlog data model
pub mod model;

// Shared state store and stop flag
pub mod state;

// Run configuration
pub mod config;

// Event emitter
pub mod events;

// Event-folded progress board
pub mod progress;

// Backlog persistence
pub mod backlog;

// Agent gateway implementations
pub mod gateway;

// Grouper, gate, runner, scheduler, finalizer and development loop
pub mod orchestrator;

// CLI arguments
pub mod cli;
