pub mod host;
pub mod manager;
pub mod protocol;
