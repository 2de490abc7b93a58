use reqwest::RequestBuilder;

/// Credential context applied to outgoing backend requests.
///
/// Credentials are handed in explicitly wherever a transport or collaborator
/// is constructed; nothing in this crate reads tokens from ambient process
/// state. Token acquisition and storage live outside this crate.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    bearer: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_token(&self) -> bool {
        self.bearer.is_some()
    }

    /// Attach the authorization header, if any, to an outgoing request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}
