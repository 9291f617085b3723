// WebDAV protocol client used by the WebDAV storage adapter

pub mod auth;
pub mod client;
pub mod common;
pub mod xml_parser;

pub use auth::{AuthType, WebDAVAuth};
pub use client::{DavEntry, DirectoryOptions, WebDAVClient, WebDAVClientOptions};
pub use xml_parser::{parse_multistatus, DavProps, DavPropStat, DavResponse, Multistatus};
