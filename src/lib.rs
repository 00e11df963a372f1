//! Library crate for tinsel-core, the shared-state coordinator behind the party apps.
//!
//! Mutations go through the service functions in [`services`], reads come
//! from the session cache, and every change lands as a [`dto::events::PartyEvent`]
//! on the hub once the store feed confirms it.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
