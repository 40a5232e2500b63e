//! Identity Engine - orchestration across a cloud workspace directory and an
//! on-premise identity server.

pub mod auth;
pub mod clients;
pub mod config;
pub mod context;
pub mod invoker;
pub mod models;
pub mod services;
pub mod startup;
