//! Integration tests, consolidated into a single binary.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod close_grace;
mod escalation_flow;
mod link_recovery;
mod microphones;
