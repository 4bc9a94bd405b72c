//! Restyle Autopick
//!
//! This library provides the core functionality for the restyle-autopick
//! service, which asks an external image editor for hairstyle candidates on a
//! subject photo, retries until enough candidates exist, and automatically
//! picks the one that best preserves the subject's identity and matches the
//! target hair color.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
