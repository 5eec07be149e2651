pub mod backup;
pub mod completions;
pub mod config;
pub mod restore;
pub mod scan;
pub mod status;
pub mod verify;
