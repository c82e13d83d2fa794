//! Immutable client configuration.
//!
//! Values come from the CLI/environment (`SIGNET_*`) and are passed to
//! constructors explicitly. Missing values are tolerated until a component
//! actually needs them: the console renders them as `unset`, while the
//! provider client reports a [`ConfigError`] at call time.

use thiserror::Error;
use url::Url;

pub const DEFAULT_SCOPES: [&str; 4] = [
    "email",
    "openid",
    "aws.cognito.signin.user.admin",
    "profile",
];
pub const DEFAULT_RESPONSE_TYPE: &str = "code";
pub const DEFAULT_TENANT_ID: &str = "wellnet";
pub const UNSET: &str = "unset";
pub const CONFIGURED: &str = "configured";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid URL for {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
}

/// Hosted sign-in (OAuth2 authorization code) settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthConfig {
    pub domain: Option<String>,
    pub scopes: Vec<String>,
    pub redirect_sign_in: Option<String>,
    pub redirect_sign_out: Option<String>,
    pub response_type: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            domain: None,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            redirect_sign_in: None,
            redirect_sign_out: None,
            response_type: DEFAULT_RESPONSE_TYPE.to_string(),
        }
    }
}

/// Identity provider configuration shared by the console and the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub region: Option<String>,
    pub user_pool_id: Option<String>,
    pub user_pool_client_id: Option<String>,
    pub identity_pool_id: Option<String>,
    pub oauth: OAuthConfig,
    pub tenant_id: String,
    user_pool_endpoint: Option<String>,
    identity_pool_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AppConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: None,
            user_pool_id: None,
            user_pool_client_id: None,
            identity_pool_id: None,
            oauth: OAuthConfig::default(),
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            user_pool_endpoint: None,
            identity_pool_endpoint: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = normalize(region.into());
        self
    }

    #[must_use]
    pub fn with_user_pool_id(mut self, id: impl Into<String>) -> Self {
        self.user_pool_id = normalize(id.into());
        self
    }

    #[must_use]
    pub fn with_user_pool_client_id(mut self, id: impl Into<String>) -> Self {
        self.user_pool_client_id = normalize(id.into());
        self
    }

    #[must_use]
    pub fn with_identity_pool_id(mut self, id: impl Into<String>) -> Self {
        self.identity_pool_id = normalize(id.into());
        self
    }

    #[must_use]
    pub fn with_oauth_domain(mut self, domain: impl Into<String>) -> Self {
        self.oauth.domain = normalize(domain.into());
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.oauth.scopes = scopes;
        }
        self
    }

    #[must_use]
    pub fn with_redirect_sign_in(mut self, uri: impl Into<String>) -> Self {
        self.oauth.redirect_sign_in = normalize(uri.into());
        self
    }

    #[must_use]
    pub fn with_redirect_sign_out(mut self, uri: impl Into<String>) -> Self {
        self.oauth.redirect_sign_out = normalize(uri.into());
        self
    }

    #[must_use]
    pub fn with_response_type(mut self, response_type: impl Into<String>) -> Self {
        if let Some(value) = normalize(response_type.into()) {
            self.oauth.response_type = value;
        }
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        if let Some(value) = normalize(tenant_id.into()) {
            self.tenant_id = value;
        }
        self
    }

    /// Override the user pool API endpoint (local emulators, tests).
    #[must_use]
    pub fn with_user_pool_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.user_pool_endpoint = normalize(endpoint.into());
        self
    }

    /// Override the identity pool API endpoint (local emulators, tests).
    #[must_use]
    pub fn with_identity_pool_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.identity_pool_endpoint = normalize(endpoint.into());
        self
    }

    /// Endpoint of the user pool JSON API.
    ///
    /// # Errors
    /// Returns an error if neither an override nor a region is configured.
    pub fn user_pool_endpoint(&self) -> Result<Url, ConfigError> {
        let raw = match &self.user_pool_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://cognito-idp.{}.amazonaws.com/", self.require_region()?),
        };
        parse_url("user pool endpoint", &raw)
    }

    /// Endpoint of the identity pool (credential exchange) JSON API.
    ///
    /// # Errors
    /// Returns an error if neither an override nor a region is configured.
    pub fn identity_pool_endpoint(&self) -> Result<Url, ConfigError> {
        let raw = match &self.identity_pool_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "https://cognito-identity.{}.amazonaws.com/",
                self.require_region()?
            ),
        };
        parse_url("identity pool endpoint", &raw)
    }

    /// Base URL of the hosted sign-in domain; `https://` is assumed when the
    /// configured domain has no scheme.
    ///
    /// # Errors
    /// Returns an error if the domain is missing or not a valid URL.
    pub fn oauth_base(&self) -> Result<Url, ConfigError> {
        let domain = self
            .oauth
            .domain
            .as_deref()
            .ok_or(ConfigError::Missing("oauth domain"))?;
        let raw = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_end_matches('/'))
        };
        parse_url("oauth domain", &raw)
    }

    /// Login key used by the identity pool to trust tokens of this user pool.
    ///
    /// # Errors
    /// Returns an error if the region or user pool id is missing.
    pub fn identity_provider_name(&self) -> Result<String, ConfigError> {
        let region = self.require_region()?;
        let pool = self
            .user_pool_id
            .as_deref()
            .ok_or(ConfigError::Missing("user pool id"))?;
        Ok(format!("cognito-idp.{region}.amazonaws.com/{pool}"))
    }

    /// Rows shown on the signed-out screen. Secrets-adjacent identifiers are
    /// only reported as configured or not.
    #[must_use]
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Region", shown(self.region.as_deref())),
            ("User Pool ID", presence(self.user_pool_id.as_deref())),
            ("Client ID", presence(self.user_pool_client_id.as_deref())),
            ("Identity Pool ID", presence(self.identity_pool_id.as_deref())),
            ("Domain", presence(self.oauth.domain.as_deref())),
            ("Redirect URL", shown(self.oauth.redirect_sign_in.as_deref())),
        ]
    }

    fn require_region(&self) -> Result<&str, ConfigError> {
        self.region.as_deref().ok_or(ConfigError::Missing("region"))
    }
}

fn normalize(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        name,
        reason: err.to_string(),
    })
}

fn shown(value: Option<&str>) -> String {
    value.unwrap_or(UNSET).to_string()
}

fn presence(value: Option<&str>) -> String {
    if value.is_some() { CONFIGURED } else { UNSET }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_treated_as_missing() {
        let config = AppConfig::new().with_region("   ").with_user_pool_id("");
        assert_eq!(config.region, None);
        assert_eq!(config.user_pool_id, None);
        assert_eq!(
            config.user_pool_endpoint(),
            Err(ConfigError::Missing("region"))
        );
    }

    #[test]
    fn endpoints_derive_from_region() {
        let config = AppConfig::new().with_region("ap-northeast-1");
        assert_eq!(
            config.user_pool_endpoint().map(|url| url.to_string()),
            Ok("https://cognito-idp.ap-northeast-1.amazonaws.com/".to_string())
        );
        assert_eq!(
            config.identity_pool_endpoint().map(|url| url.to_string()),
            Ok("https://cognito-identity.ap-northeast-1.amazonaws.com/".to_string())
        );
    }

    #[test]
    fn endpoint_override_wins_over_region() {
        let config = AppConfig::new()
            .with_region("eu-west-1")
            .with_user_pool_endpoint("http://127.0.0.1:9229/");
        assert_eq!(
            config.user_pool_endpoint().map(|url| url.to_string()),
            Ok("http://127.0.0.1:9229/".to_string())
        );
    }

    #[test]
    fn oauth_base_adds_scheme() {
        let config = AppConfig::new().with_oauth_domain("auth.example.com/");
        assert_eq!(
            config.oauth_base().map(|url| url.to_string()),
            Ok("https://auth.example.com/".to_string())
        );
    }

    #[test]
    fn identity_provider_name_combines_region_and_pool() {
        let config = AppConfig::new()
            .with_region("ap-northeast-1")
            .with_user_pool_id("ap-northeast-1_abc");
        assert_eq!(
            config.identity_provider_name(),
            Ok("cognito-idp.ap-northeast-1.amazonaws.com/ap-northeast-1_abc".to_string())
        );
    }

    #[test]
    fn summary_reports_unset_values() {
        let config = AppConfig::new()
            .with_region("us-east-1")
            .with_user_pool_client_id("client");
        let summary = config.summary();
        assert!(summary.contains(&("Region", "us-east-1".to_string())));
        assert!(summary.contains(&("User Pool ID", UNSET.to_string())));
        assert!(summary.contains(&("Client ID", CONFIGURED.to_string())));
        assert!(summary.contains(&("Redirect URL", UNSET.to_string())));
    }

    #[test]
    fn empty_scopes_keep_defaults() {
        let config = AppConfig::new().with_scopes(Vec::new());
        assert_eq!(config.oauth.scopes.len(), DEFAULT_SCOPES.len());
        assert_eq!(config.oauth.response_type, DEFAULT_RESPONSE_TYPE);
        assert_eq!(config.tenant_id, DEFAULT_TENANT_ID);
    }
}
