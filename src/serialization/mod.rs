pub mod artifact_set;
pub mod config;
pub mod host_list;
