pub mod file_type;
pub mod transcode;
pub mod webdav;
