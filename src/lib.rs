//! Lander Arena - rollback simulation and authoritative rooms for
//! multiplayer lunar lander combat

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
