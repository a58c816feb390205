//! `lookout`: transparent expansion of TNEF (`winmail.dat`) attachments.
//!
//! This crate intercepts a mail client's attachment handling so that the
//! parts embedded in an `application/ms-tnef` container show up as ordinary
//! attachments, and opens, saves or imports them into a calendar on demand
//! by re-streaming the container.

pub mod calendar;
pub mod config;
pub mod error;
pub mod host;
pub mod intercept;
pub mod local;
pub mod model;
pub mod session;
pub mod sink;
pub mod tnef;
