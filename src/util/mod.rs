//! Utility modules

pub mod paths;

pub use paths::{data_dir, init_data_dir, log_file_path, logs_dir, DATA_DIR_ENV};
