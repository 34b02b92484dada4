pub mod file_directory;
pub mod http_directory;
