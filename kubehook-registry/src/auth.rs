//! Registry authentication
//!
//! Registries answer an anonymous request with `401` and a
//! `WWW-Authenticate` challenge. A `Bearer` challenge points at a token
//! service that exchanges (optional) basic credentials for a pull token;
//! a `Basic` challenge takes the credentials directly.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{RegistryError, Result};

/// Username and password for a registry
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

/// How requests are authorized once a challenge has been answered
#[derive(Debug, Clone)]
pub enum Authorization {
    Basic(Credentials),
    Bearer(String),
}

impl Authorization {
    /// Attaches this authorization to a request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Basic(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,

    #[serde(default)]
    access_token: Option<String>,
}

/// Parses a `WWW-Authenticate` header value
///
/// # Example
/// ```
/// use kubehook_registry::auth::{Challenge, parse_challenge};
///
/// let challenge = parse_challenge(r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#);
/// assert!(matches!(challenge, Some(Challenge::Bearer { .. })));
/// ```
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = parse_params(params);
    let realm = params.remove("realm").filter(|r| !r.is_empty())?;
    Some(Challenge::Bearer {
        realm,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

/// Splits `key="value",key2=value2` into a map, honouring quotes
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

/// Answers a challenge, fetching a token when the registry asks for one
///
/// # Arguments
/// * `client` - HTTP client to reach the token service with
/// * `challenge` - Parsed challenge from the registry
/// * `default_scope` - Scope to request when the challenge names none
/// * `credentials` - Optional credentials for the token service or registry
pub async fn authorize(
    client: &Client,
    challenge: &Challenge,
    default_scope: &str,
    credentials: Option<&Credentials>,
) -> Result<Authorization> {
    match challenge {
        Challenge::Basic => credentials
            .cloned()
            .map(Authorization::Basic)
            .ok_or_else(|| RegistryError::AuthFailed("registry requires credentials".to_string())),
        Challenge::Bearer {
            realm,
            service,
            scope,
        } => {
            let mut query = vec![("scope", scope.as_deref().unwrap_or(default_scope))];
            if let Some(service) = service {
                query.push(("service", service.as_str()));
            }

            debug!("Requesting registry token from {}", realm);
            let mut request = client.get(realm).query(&query);
            if let Some(credentials) = credentials {
                request = request.basic_auth(&credentials.username, Some(&credentials.password));
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RegistryError::AuthFailed(format!(
                    "token service {} returned status {}",
                    realm,
                    status.as_u16()
                )));
            }

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| RegistryError::ParseError(format!("Failed to parse token response: {}", e)))?;

            body.token
                .or(body.access_token)
                .filter(|t| !t.is_empty())
                .map(Authorization::Bearer)
                .ok_or_else(|| RegistryError::AuthFailed(format!("token service {} returned no token", realm)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        );
        assert_eq!(
            challenge,
            Some(Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:library/alpine:pull".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_unquoted_and_spaced_params() {
        let challenge = parse_challenge("bearer realm=https://r.example/token, service=r.example");
        assert_eq!(
            challenge,
            Some(Challenge::Bearer {
                realm: "https://r.example/token".to_string(),
                service: Some("r.example".to_string()),
                scope: None,
            })
        );
    }

    #[test]
    fn test_parse_other_schemes() {
        assert_eq!(parse_challenge(r#"Basic realm="Registry""#), Some(Challenge::Basic));
        assert_eq!(parse_challenge("Negotiate"), None);
        assert_eq!(parse_challenge(r#"Bearer service="x""#), None);
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let credentials = Credentials {
            username: "octocat".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("octocat"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_basic_challenge_needs_credentials() {
        let client = Client::new();
        let result = authorize(&client, &Challenge::Basic, "repository:x:pull", None).await;
        assert!(matches!(result, Err(RegistryError::AuthFailed(_))));

        let credentials = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let result = authorize(&client, &Challenge::Basic, "repository:x:pull", Some(&credentials)).await;
        assert!(matches!(result, Ok(Authorization::Basic(_))));
    }
}
