//! Core session management: configuration, token issuing and the identity store seam

pub mod auth;
pub mod config;
pub mod db;
