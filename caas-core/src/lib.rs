//! caas Core
//!
//! Core types and abstractions shared by the caas agent, client, and CLI.
//!
//! This crate contains:
//! - Domain types: command requests, job state, the bounded log ring
//! - Protocol: the single-byte-tagged frame codec used on the session channel
//! - DTOs: response shapes served by the REST control plane

pub mod domain;
pub mod dto;
pub mod protocol;
