//! Eventflow Core
//!
//! Core types and abstractions for the Eventflow FaaS control plane.
//!
//! This crate contains:
//! - Domain types: Core business entities (BuildJob, Function, etc.)
//! - DTOs: Event envelopes and payloads for inter-service communication

pub mod domain;
pub mod dto;
