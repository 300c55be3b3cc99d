//! Library root for the `farmlink` crate
//! Client core for the farm marketplace: session shim, local state, feature services

// Core error handling
pub mod errors;

// Client-local persistence
pub mod local_store;
pub mod local_store_logging;
pub mod local_store_sled;

// Session & request authorization
pub mod headers;
pub mod password;
pub mod session;

// Backend access
pub mod backend;
pub mod backend_memory;
pub mod backend_rest;
pub mod client;
pub mod query;

// Data model & load tracking
pub mod load_state;
pub mod models;

// Feature services
pub mod auth;
pub mod cart;
pub mod customers;
pub mod orders;
pub mod payment_methods;
pub mod products;
pub mod reviews;
pub mod settings;

// Configuration, logging & CLI
pub mod app;
pub mod cli;
pub mod config;
pub mod logging;


pub use app::Marketplace;
pub use errors::{BackendError, MarketError, MarketResult};
pub use session::{Role, SessionRecord, SessionState};
