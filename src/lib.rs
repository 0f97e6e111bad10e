//! This library crate turns a fire-and-forget publish/subscribe transport into request/response calls.
//!
//! Everything lives in the low-level [`library`] module: the [`communication`](library::communication)
//! submodule contains the transport and codec abstractions, the request machinery built on top of them
//! and the concrete transport implementations. Command line [`options`] are shared with the `courier` binary.

#![deny(missing_docs)]
#![allow(clippy::nonstandard_macro_braces)]

pub mod library;
pub mod options;
