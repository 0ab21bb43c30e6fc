//! Gantry Core
//!
//! Core types for the Gantry automation orchestration system.
//!
//! This crate contains:
//! - Domain types: Core business entities (JobStatus, ExecutionRecord, etc.)
//! - DTOs: Request/response shapes exchanged with the remote runner service

pub mod domain;
pub mod dto;
