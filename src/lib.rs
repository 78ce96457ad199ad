//! blueprintUE self-hosted edition
//!
//! Share, version and discuss Unreal Engine blueprints. Pages are rendered
//! on the server with Tera; data lives in SQLite or MySQL and blueprint
//! contents are plain files on disk.

pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod theme;
pub mod web;
