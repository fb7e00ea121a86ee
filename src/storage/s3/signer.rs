use std::time::SystemTime;

use anyhow::{Context, Result};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest, SigningSettings,
    UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;

use crate::storage::s3::transport::RequestDescriptor;
use crate::types::AccessKeys;

/// SHA-256 of an empty body, sent with every request this crate issues.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const SIGNING_NAME: &str = "s3";

/// Adds authentication headers to a request.
pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        request: &mut RequestDescriptor,
        payload_hash: &str,
        access_keys: &AccessKeys,
    ) -> Result<()>;
}

/// AWS Signature Version 4 over `aws-sigv4`.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    region: String,
}

impl SigV4Signer {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
        }
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(
        &self,
        request: &mut RequestDescriptor,
        payload_hash: &str,
        access_keys: &AccessKeys,
    ) -> Result<()> {
        let identity: Identity = Credentials::new(
            access_keys.access_key.clone(),
            access_keys.secret_access_key.clone(),
            access_keys.session_token.clone(),
            None,
            "s3mpu",
        )
        .into();

        // Paths and queries are escaped once by the caller.
        let mut settings = SigningSettings::default();
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SIGNING_NAME)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .context("failed to build signing parameters.")?
            .into();

        let url = request.url();
        let signable_request = SignableRequest::new(
            request.method.as_str(),
            url.as_str(),
            request
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
            SignableBody::Precomputed(payload_hash.to_string()),
        )
        .context("failed to build signable request.")?;

        let (instructions, _signature) = sign(signable_request, &signing_params)
            .context("failed to sign request.")?
            .into_parts();

        for (name, value) in instructions.headers() {
            request.headers.push((name.to_string(), value.to_string()));
        }

        Ok(())
    }
}
