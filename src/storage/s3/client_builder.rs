use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use aws_config::BehaviorVersion;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_credential_types::provider::ProvideCredentials;
use reqwest::Url;

use crate::config::ClientConfig;
use crate::storage::s3::transport::Endpoint;
use crate::types::error::S3mpuError;
use crate::types::{AccessKeys, S3Credentials};

/// Credentials and signing region resolved for one run.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub access_keys: AccessKeys,
    pub region: String,
}

impl ClientConfig {
    /// Endpoint requests are sent to. Without an explicit URL the regional
    /// AWS endpoint is used, addressed path-style.
    pub fn endpoint(&self, region: &str) -> Result<Endpoint> {
        let endpoint_url = match self.endpoint_url {
            Some(ref url) => url.clone(),
            None => format!("https://s3.{region}.amazonaws.com"),
        };

        let url = Url::parse(&endpoint_url)
            .map_err(|e| anyhow!(S3mpuError::InvalidConfig(format!("{endpoint_url}: {e}"))))?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                anyhow!(S3mpuError::InvalidConfig(format!(
                    "{endpoint_url}: endpoint has no host"
                )))
            })?;
        if url.path() != "/" || url.query().is_some() {
            return Err(anyhow!(S3mpuError::InvalidConfig(format!(
                "{endpoint_url}: endpoint must not contain a path or query"
            ))));
        }

        Ok(Endpoint {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port: url.port(),
        })
    }

    /// Build the HTTP client carrying the configured timeouts.
    ///
    /// Redirects are not followed: a 3xx answer is returned as is and
    /// decoded as a remote error.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

        if let Some(timeout) = self.timeout_config.connect_timeout_milliseconds {
            builder = builder.connect_timeout(Duration::from_millis(timeout));
        }
        if let Some(timeout) = self.timeout_config.operation_timeout_milliseconds {
            builder = builder.timeout(Duration::from_millis(timeout));
        }

        builder.build().context("failed to build HTTP client.")
    }

    /// Resolve access keys and region.
    ///
    /// Static keys are used as given. Profiles and the environment go
    /// through the `aws-config` default chain, which also supplies the
    /// region when none was configured.
    pub async fn resolve_identity(&self) -> Result<ResolvedIdentity> {
        if let S3Credentials::Credentials { ref access_keys } = self.credential {
            return Ok(ResolvedIdentity {
                access_keys: access_keys.clone(),
                region: self.region_or_default().to_string(),
            });
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let S3Credentials::Profile(ref profile_name) = self.credential {
            loader = loader.profile_name(profile_name);
        }
        if let Some(profile_files) = self.build_profile_files() {
            loader = loader.profile_files(profile_files);
        }
        if let Some(ref region) = self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        let sdk_config = loader.load().await;
        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            anyhow!(S3mpuError::InvalidConfig(
                "no credentials provider is available.".to_string()
            ))
        })?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| anyhow!(S3mpuError::InvalidConfig(e.to_string())))?;

        let region = sdk_config
            .region()
            .map(|region| region.to_string())
            .unwrap_or_else(|| self.region_or_default().to_string());

        Ok(ResolvedIdentity {
            access_keys: AccessKeys {
                access_key: credentials.access_key_id().to_string(),
                secret_access_key: credentials.secret_access_key().to_string(),
                session_token: credentials.session_token().map(str::to_string),
            },
            region,
        })
    }

    fn build_profile_files(&self) -> Option<ProfileFiles> {
        let location = &self.client_config_location;
        if location.aws_config_file.is_none() && location.aws_shared_credentials_file.is_none() {
            return None;
        }

        let mut builder = ProfileFiles::builder();
        builder = match location.aws_config_file {
            Some(ref path) => builder.with_file(ProfileFileKind::Config, path),
            None => builder.include_default_config_file(true),
        };
        builder = match location.aws_shared_credentials_file {
            Some(ref path) => builder.with_file(ProfileFileKind::Credentials, path),
            None => builder.include_default_credentials_file(true),
        };
        Some(builder.build())
    }
}
