/*
 * Copyright 2023 Oxide Computer Company
 */

use crate::error::DownloadError;
use jsonwebtoken::{
    decode, encode, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/**
 * Claims embedded in a single-file/folder or dataset-zip download token.
 * `file_path` is the object store location the holder is entitled to
 * retrieve; everything else is carried through only so that activity
 * logging and ownership checks downstream of `/v1/download/{token}` do not
 * need a second round-trip to the job store.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DownloadTokenClaims {
    pub file_path: String,
    pub issuer: String,
    pub operator: String,
    pub session_id: String,
    pub job_id: String,
    pub container_code: String,
    pub container_type: String,
    pub payload: Value,
    pub iat: i64,
    pub exp: i64,
}

/**
 * Claims embedded in a dataset *version* token, which is minted by the
 * dataset service rather than by this one and carries only an object
 * store location.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DatasetVersionTokenClaims {
    pub location: String,
    pub iat: i64,
    pub exp: i64,
}

pub(crate) struct TokenCodec {
    secret: String,
    expiry_minutes: i64,
}

impl TokenCodec {
    pub(crate) fn new(secret: &str, expiry_minutes: i64) -> TokenCodec {
        TokenCodec { secret: secret.to_string(), expiry_minutes }
    }

    pub(crate) fn generate(
        &self,
        container_code: &str,
        container_type: &str,
        file_path: &str,
        operator: &str,
        session_id: &str,
        job_id: &str,
        payload: Value,
    ) -> Result<String, DownloadError> {
        let iat = download_common::unix_seconds();
        let claims = DownloadTokenClaims {
            file_path: file_path.to_string(),
            issuer: "SERVICE DATA DOWNLOAD".into(),
            operator: operator.to_string(),
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
            container_code: container_code.to_string(),
            container_type: container_type.to_string(),
            payload,
            iat,
            exp: iat + self.expiry_minutes * 60,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| DownloadError::TokenInvalid(e.to_string()))
    }

    /**
     * Decode and validate a download token. A token lacking `file_path`
     * is rejected the same way the upstream service rejects it: as an
     * invalid token, not merely a missing field.
     */
    pub(crate) fn verify(
        &self,
        token: &str,
    ) -> Result<DownloadTokenClaims, DownloadError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<DownloadTokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                DownloadError::TokenExpired
            }
            _ => DownloadError::TokenInvalid(e.to_string()),
        })?;

        if data.claims.file_path.is_empty() {
            return Err(DownloadError::TokenInvalid(
                "missing file_path".into(),
            ));
        }

        Ok(data.claims)
    }

    /**
     * Dataset version tokens are minted by the dataset service and only
     * ever verified here, never generated.
     */
    pub(crate) fn verify_dataset_version(
        &self,
        token: &str,
    ) -> Result<DatasetVersionTokenClaims, DownloadError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<DatasetVersionTokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                DownloadError::TokenExpired
            }
            _ => DownloadError::TokenInvalid(e.to_string()),
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_embeds_file_path() {
        let codec = TokenCodec::new("sekrit", 1440);
        let tok = codec
            .generate(
                "proj1",
                "project",
                "core-proj1/folder/file.txt",
                "alice",
                "sess-1",
                "data-download-1000",
                Value::Null,
            )
            .unwrap();

        let claims = codec.verify(&tok).unwrap();
        assert_eq!(claims.file_path, "core-proj1/folder/file.txt");
        assert_eq!(claims.job_id, "data-download-1000");
        assert_eq!(claims.exp - claims.iat, 1440 * 60);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let a = TokenCodec::new("sekrit-a", 60);
        let b = TokenCodec::new("sekrit-b", 60);

        let tok = a
            .generate(
                "proj1", "project", "x", "alice", "sess-1", "job-1",
                Value::Null,
            )
            .unwrap();

        assert!(matches!(
            b.verify(&tok),
            Err(DownloadError::TokenInvalid(_))
        ));
    }
}
