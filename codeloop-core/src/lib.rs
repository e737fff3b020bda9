//! Concrete, effectful implementations of the `codeloop-kernel` ports: a
//! `git2`-backed `VcsPort`, a plain-`std::fs`-backed `FsPort`, HTTP and
//! browser transports, a tokio-backed `CommandPort`, the file-based state
//! store, the repo scanner, the blueprint manager, layered settings
//! resolution, and the orchestrator that wires all of it into the run loop.

pub mod apply;
pub mod blueprint;
pub mod command;
pub mod config;
pub mod fs;
pub mod orchestrator;
pub mod state;
pub mod transport;
pub mod vcs;
pub mod walker;
