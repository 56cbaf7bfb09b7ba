//! Hetzner Cloud access for the floating IP controller
//!
//! Provides the [`CloudApi`] trait, its REST implementation [`HcloudClient`],
//! and the [`Instance`] / [`FloatingIp`] domain types built from API responses.

#![deny(missing_docs)]

mod client;
pub mod schema;
mod types;

pub use client::{AssignResponse, CloudApi, HcloudClient, DEFAULT_ENDPOINT};
pub use types::{AddressFamily, FloatingIp, Instance, PrivateAddress};
