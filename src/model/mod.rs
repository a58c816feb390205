//! Core data model types: attachments, decoded part headers, and message headers.

pub mod attachment;
pub mod part;
