/// Common utilities and shared functions for WebDAV services

/// Build a standardized User-Agent string for all WebDAV requests
pub fn build_user_agent() -> String {
    format!("MediaVault/{} (WebDAV-Storage)", env!("CARGO_PKG_VERSION"))
}

/// Value of the `Accept` header sent with PROPFIND requests
pub const PROPFIND_ACCEPT: &str = "text/plain,application/xml";

/// Request body asking the server for every live property
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
    <d:allprop/>
</d:propfind>"#;
