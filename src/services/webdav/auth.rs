//! `Authorization` header construction for the WebDAV client

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    /// HTTP Basic; username and password are both required
    #[serde(alias = "basic")]
    Password,
    /// Bearer token
    Token,
    /// Digest authentication needs a challenge/response round trip which is
    /// not implemented. Selecting it is an error rather than an anonymous request.
    Digest,
    /// Basic auth if both credentials are present, otherwise anonymous
    #[default]
    Auto,
}

/// Credentials available to the client
#[derive(Debug, Clone, Default)]
pub struct WebDAVAuth {
    pub auth_type: AuthType,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl WebDAVAuth {
    /// Resolve the `Authorization` header value, `None` for anonymous access
    pub fn header_value(&self) -> Result<Option<String>, StorageError> {
        let credentials = match (non_empty(&self.username), non_empty(&self.password)) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };

        match self.auth_type {
            AuthType::None => Ok(None),
            AuthType::Auto => Ok(credentials.map(|(user, pass)| basic(user, pass))),
            AuthType::Password => credentials
                .map(|(user, pass)| Some(basic(user, pass)))
                .ok_or_else(|| {
                    StorageError::InvalidConfig("password authentication requires a username and password".to_string())
                }),
            AuthType::Token => non_empty(&self.token)
                .map(|token| Some(format!("Bearer {}", token)))
                .ok_or_else(|| StorageError::InvalidConfig("token authentication requires a bearer token".to_string())),
            AuthType::Digest => Err(StorageError::Unsupported(
                "digest authentication is not implemented".to_string(),
            )),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn basic(username: &str, password: &str) -> String {
    let encoded = Base64::encode_string(format!("{}:{}", username, password).as_bytes());
    format!("Basic {}", encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(auth_type: AuthType, username: Option<&str>, password: Option<&str>) -> WebDAVAuth {
        WebDAVAuth {
            auth_type,
            username: username.map(String::from),
            password: password.map(String::from),
            token: None,
        }
    }

    #[test]
    fn test_auto_uses_basic_only_with_both_credentials() {
        let header = auth(AuthType::Auto, Some("alice"), Some("secret")).header_value().unwrap();
        assert_eq!(header.as_deref(), Some("Basic YWxpY2U6c2VjcmV0"));

        assert_eq!(auth(AuthType::Auto, Some("alice"), None).header_value().unwrap(), None);
        assert_eq!(auth(AuthType::Auto, None, None).header_value().unwrap(), None);
        assert_eq!(auth(AuthType::Auto, Some("alice"), Some("")).header_value().unwrap(), None);
    }

    #[test]
    fn test_password_requires_both_credentials() {
        assert!(auth(AuthType::Password, Some("alice"), Some("secret")).header_value().unwrap().is_some());
        assert!(matches!(
            auth(AuthType::Password, Some("alice"), None).header_value(),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_token() {
        let mut token_auth = auth(AuthType::Token, None, None);
        assert!(token_auth.header_value().is_err());

        token_auth.token = Some("abc123".to_string());
        assert_eq!(token_auth.header_value().unwrap().as_deref(), Some("Bearer abc123"));
    }

    #[test]
    fn test_digest_is_rejected() {
        let result = auth(AuthType::Digest, Some("alice"), Some("secret")).header_value();
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[test]
    fn test_none_ignores_credentials() {
        assert_eq!(auth(AuthType::None, Some("alice"), Some("secret")).header_value().unwrap(), None);
    }
}
