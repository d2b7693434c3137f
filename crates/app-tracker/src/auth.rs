//! Google OAuth bootstrap shared by the Gmail and Sheets hubs.

use crate::config::GoogleConfig;
use crate::error::{TrackerError, TrackerResult};
use google_gmail1::hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use google_gmail1::yup_oauth2::authenticator::Authenticator;
use google_gmail1::yup_oauth2::authorized_user::AuthorizedUserSecret;
use google_gmail1::yup_oauth2::{
    read_application_secret, AuthorizedUserAuthenticator, InstalledFlowAuthenticator,
    InstalledFlowReturnMethod,
};
use hyper_util::client::legacy::connect::HttpConnector;

/// Every Google call requests the same scope set so one cached token serves
/// both hubs.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/spreadsheets",
];

pub type GoogleAuth = Authenticator<HttpsConnector<HttpConnector>>;

pub fn https_connector() -> TrackerResult<HttpsConnector<HttpConnector>> {
    Ok(HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| TrackerError::Config(format!("Failed to load native TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build())
}

/// Build the authenticator and fetch a first token.
///
/// A client id, secret and refresh token in the config select the
/// authorized-user flow. Otherwise the installed flow runs against the
/// credentials file, caching tokens on disk so consent is asked only once.
pub async fn authenticate(config: &GoogleConfig) -> TrackerResult<GoogleAuth> {
    let auth = match (&config.client_id, &config.client_secret, &config.refresh_token) {
        (Some(client_id), Some(client_secret), Some(refresh_token)) => {
            tracing::info!("Authenticating with stored refresh token");
            let secret = AuthorizedUserSecret {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                refresh_token: refresh_token.clone(),
                key_type: "authorized_user".to_string(),
            };

            AuthorizedUserAuthenticator::builder(secret)
                .build()
                .await
                .map_err(|e| TrackerError::auth(format!("Failed to build authenticator: {}", e)))?
        }
        _ => {
            let secret = read_application_secret(&config.credentials_path)
                .await
                .map_err(|e| {
                    TrackerError::auth(format!(
                        "Failed to read OAuth credentials from {}: {}",
                        config.credentials_path.display(),
                        e
                    ))
                })?;

            if let Some(parent) = config.token_cache_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TrackerError::Config(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }

            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .persist_tokens_to_disk(&config.token_cache_path)
                .build()
                .await
                .map_err(|e| TrackerError::auth(format!("Failed to build authenticator: {}", e)))?
        }
    };

    auth.token(SCOPES)
        .await
        .map_err(|e| TrackerError::auth(format!("Failed to obtain access token: {}", e)))?;

    Ok(auth)
}
