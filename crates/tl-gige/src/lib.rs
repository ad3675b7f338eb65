#![cfg_attr(docsrs, feature(doc_cfg))]
//! GigE Vision TL: the core of a simulated GigE Vision camera, built from
//! [`backend`] (register/memory state), [`codec`] and [`gvcp`] (the GVCP
//! wire format), [`controller`] (exclusive-control state machine),
//! [`engine`] (the receive loop tying them together), [`gvsp`] (streaming)
//! and [`socket_set`]/[`nic`] (transport setup).

pub mod backend;
pub mod codec;
pub mod controller;
pub mod engine;
pub mod gvcp;
pub mod gvsp;
pub mod nic;
pub mod socket_set;

pub use backend::{BackendError, RegisterBackend};
pub use engine::SharedState;
pub use gvcp::GVCP_PORT;
