//! Folder upload service: storage backends behind one interface, batched
//! uploads with live progress, processed-folder provisioning and a listing
//! cache.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod progress;
pub mod provision;
pub mod upload;
pub mod ws;
