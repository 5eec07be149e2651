//! Integration tests for the cloudbak backup engine

mod common;
mod test_restore;
mod test_scan;
mod test_session;
