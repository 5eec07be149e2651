//! Integration tests for the cloudbak storage transports

mod test_aws_cli;
mod test_directory;
