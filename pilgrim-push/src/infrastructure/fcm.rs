//! FCM HTTP v1 推送渠道
//!
//! 使用服务账号私钥签发 RS256 断言换取 OAuth2 access token，
//! token 缓存到过期前一分钟。

use std::fs;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use pilgrim_core::error::{ErrorCode, InfraResultExt, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::PushConfig;
use crate::domain::model::PushPayload;
use crate::domain::repository::PushSender;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum FcmError {
    #[error("missing fcm project id")]
    MissingProjectId,
    #[error("neither service account credentials nor access token configured")]
    MissingCredentials,
    #[error("unable to read service account file {path}: {source}")]
    CredentialsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid service account json: {0}")]
    CredentialsFormat(#[from] serde_json::Error),
    #[error("failed to sign oauth assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("fcm rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// 服务账号 JSON 中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct FcmPushSender {
    client: reqwest::Client,
    project_id: String,
    service_account: Option<ServiceAccountKey>,
    static_token: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl FcmPushSender {
    pub fn from_config(config: &PushConfig) -> std::result::Result<Self, FcmError> {
        let project_id = config
            .fcm_project_id
            .clone()
            .ok_or(FcmError::MissingProjectId)?;

        let service_account = match config.fcm_credentials_path.as_deref() {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| FcmError::CredentialsFile {
                    path: path.to_string(),
                    source,
                })?;
                Some(serde_json::from_str::<ServiceAccountKey>(&raw)?)
            }
            None => None,
        };

        if service_account.is_none() && config.fcm_access_token.is_none() {
            return Err(FcmError::MissingCredentials);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            project_id,
            service_account,
            static_token: config.fcm_access_token.clone(),
            cached: Mutex::new(None),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        )
    }

    async fn access_token(&self) -> std::result::Result<String, FcmError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }
        let account = self
            .service_account
            .as_ref()
            .ok_or(FcmError::MissingCredentials)?;

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now)
        {
            return Ok(token.value.clone());
        }

        let token_uri = account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let assertion = sign_assertion(account, token_uri, now)?;

        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FcmError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "fcm access token refreshed");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }

    async fn deliver(&self, token: &str, payload: &PushPayload) -> std::result::Result<(), FcmError> {
        let bearer = self.access_token().await?;
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(bearer)
            .json(&json!({ "message": build_message(token, payload) }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FcmError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl PushSender for FcmPushSender {
    #[instrument(skip(self, payload), fields(kind = payload.kind().as_str()))]
    async fn send_one(&self, token: &str, payload: &PushPayload) -> Result<()> {
        self.deliver(token, payload)
            .await
            .into_pilgrim(ErrorCode::PushDeliveryError, "fcm delivery failed")
    }
}

fn sign_assertion(
    account: &ServiceAccountKey,
    audience: &str,
    now: DateTime<Utc>,
) -> std::result::Result<String, FcmError> {
    let claims = AssertionClaims {
        iss: &account.client_email,
        scope: FCM_SCOPE,
        aud: audience,
        iat: now.timestamp(),
        exp: now.timestamp() + 3600,
    };
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

/// 构建 FCM v1 `message` 对象
pub fn build_message(token: &str, payload: &PushPayload) -> Value {
    match payload {
        PushPayload::DataOnly { data } => json!({
            "token": token,
            "data": data,
            "android": { "priority": "HIGH" },
            "apns": {
                "headers": {
                    "apns-push-type": "background",
                    "apns-priority": "5"
                },
                "payload": { "aps": { "content-available": 1 } }
            }
        }),
        PushPayload::Visible {
            title,
            body,
            data,
            urgent,
        } => {
            let urgent = *urgent;
            json!({
                "token": token,
                "notification": { "title": title, "body": body },
                "data": data,
                "android": {
                    "priority": if urgent { "HIGH" } else { "NORMAL" },
                    "notification": {
                        "channel_id": if urgent { "urgent" } else { "default" },
                        "sound": if urgent { "urgent" } else { "default" },
                        "notification_priority": if urgent { "PRIORITY_MAX" } else { "PRIORITY_DEFAULT" },
                        "default_sound": !urgent
                    }
                }
            })
        }
    }
}
