pub mod actions;
pub mod commands;
pub mod device;
pub mod motions;
pub mod recording;
