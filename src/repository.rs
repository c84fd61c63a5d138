use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::TaxrefError;

/// Read access to text files in the remote support-data repository.
pub trait RepositoryClient: Send + Sync {
    /// Fetches `logical` (a path relative to the repository root) as UTF-8 text.
    fn fetch_text(&self, logical: &str) -> Result<String, TaxrefError>;
}

#[derive(Clone)]
pub struct RepositoryHttpClient {
    client: Client,
    base_url: String,
}

impl RepositoryHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TaxrefError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, logical: &str) -> String {
        format!("{}/{}", self.base_url, logical.trim_start_matches('/'))
    }
}

impl RepositoryClient for RepositoryHttpClient {
    fn fetch_text(&self, logical: &str) -> Result<String, TaxrefError> {
        let url = self.url_for(logical);
        tracing::debug!(%url, "fetching repository file");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| TaxrefError::RepositoryHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "repository request failed".to_string());
            return Err(TaxrefError::RepositoryStatus { status, message });
        }
        response
            .text()
            .map_err(|err| TaxrefError::RepositoryHttp(err.to_string()))
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, TaxrefError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("taxref/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| TaxrefError::Filesystem(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| TaxrefError::RepositoryHttp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client =
            RepositoryHttpClient::new("https://example.org/support_data/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.url_for("/gnomon/2.0/hmm_parameters/taxid.list"),
            "https://example.org/support_data/gnomon/2.0/hmm_parameters/taxid.list"
        );
    }
}
