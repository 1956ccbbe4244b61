pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod moderation;
pub mod roles;
