//! Request/response shapes for the remote runner service
//!
//! This module contains the types exchanged with the remote job service:
//! submission payloads (validated per category) and the acknowledgement
//! shapes the service replies with.

pub mod job;
pub mod payload;
