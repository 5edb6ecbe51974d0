//! Behaviour-level tests for the daemon.

mod communicator_behaviour;
mod support;
