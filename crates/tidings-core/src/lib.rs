//! Core types and trait definitions for the Tidings notification pipeline.
//!
//! This crate has no network or database dependencies.
//! Storage backends implement the traits in [`store`]; the trigger engine and
//! the dispatch worker depend only on those traits.

pub mod alert;
pub mod error;
pub mod event;
pub mod flags;
pub mod notification;
pub mod resource;
pub mod store;
pub mod subscription;

pub use error::{Error, Result};
