//! HTTP front end for the Vision Studio models.

pub mod api;
pub mod config;
pub mod error;
pub mod state;
