// src/lib.rs
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod rewards;
pub mod sandbox;
pub mod slots;
