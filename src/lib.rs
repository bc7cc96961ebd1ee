//! Step-based reconciliation for Kubernetes controllers
//!
//! A controller is an ordered pipeline of [`core::Step`]s run by an
//! [`core::Engine`]. The engine handles finalizers, status conditions,
//! error aggregation and persistence; steps only describe their own piece
//! of desired state.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod core;
pub mod crd;
pub mod demo;
pub mod error;
pub mod metrics;
pub mod predicates;
pub mod steps;
pub mod templates;

pub use error::{Error, Result};
