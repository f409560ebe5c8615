pub mod access;
pub mod auth;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod scoring;
pub mod state;
pub mod storage;
pub mod store;
