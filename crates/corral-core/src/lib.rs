// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core domain types for the Corral resource broker.
//!
//! This crate defines the two durable object kinds the broker tracks —
//! [`Resource`] and [`DynamicResourceLifeCycle`] — together with the
//! declarative pool configuration ([`PoolConfig`]) operators use to describe
//! the fleet. It is a pure data crate: no I/O, no runtime.
//!
//! # Key concepts
//!
//! - **Resource**: an opaque leasable unit identified by name and typed by
//!   class. States are free-form strings; only [`state::TOMBSTONE`] is
//!   reserved (it marks a resource for deletion once unowned).
//! - **Lease**: the interval during which a resource has a non-empty owner
//!   and a bounded expiration.
//! - **Dynamic resource life cycle**: a declarative template that
//!   materializes a population of resources of one type, kept between
//!   `min_count` and `max_count`.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod resource;
pub mod state;

pub use config::{DynamicResourceEntry, PoolConfig, StaticResourceEntry};
pub use error::{CoreError, Result};
pub use lifecycle::{DynamicResourceLifeCycle, ResourceConfigSpec};
pub use resource::{Resource, UserData};
