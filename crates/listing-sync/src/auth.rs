//! Bearer credentials shared by the Airtable and Webflow clients.

use reqwest::RequestBuilder;

/// An API token sent as `Authorization: Bearer …`.
///
/// The [`Debug`] impl redacts the token to prevent accidental credential
/// exposure in log output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Apply the token to a request builder.
    #[must_use]
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.0)
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiToken").field(&"[REDACTED]").finish()
    }
}
