pub mod collector;
pub mod config;
pub mod device;
pub mod ring;
pub mod session;
pub mod sink;
