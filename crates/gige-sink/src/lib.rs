#![cfg_attr(docsrs, feature(doc_cfg))]
//! Embeddable GigE Vision sink: exposes a simulated camera's GVCP/GVSP
//! endpoints to a host multimedia pipeline.
//!
//! The pipeline itself is an external collaborator — this crate takes
//! format/geometry updates and image buffers as plain method arguments
//! rather than depending on any particular pipeline framework.

mod sink;

pub use sink::{GigeSink, SinkConfig, SinkError};
