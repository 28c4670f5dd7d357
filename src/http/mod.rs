//! HTTP control surface over the fleet core

mod error;
mod handlers;
mod server;


pub use error::ApiError;
pub use server::{router, ApiState, ControlServer, ControlServerBuilder};
