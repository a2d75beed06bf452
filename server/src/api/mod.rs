//! HTTP and WebSocket handlers, organized by domain.

pub mod games;
pub mod health;
pub mod puzzles;
pub mod realtime;
pub mod rooms;
