pub mod action;
pub mod command;
pub mod config;
pub mod error;
pub mod motion;
pub mod recording;

pub use error::{Result, TeleopError};
