/// Ambient Credential Discovery
///
/// Locates Google credentials the way the Cloud client libraries do and turns
/// them into OAuth2 access tokens:
/// - an explicit `GOOGLE_APPLICATION_CREDENTIALS` key file
/// - the gcloud application-default credentials file
/// - the GCE / Cloud Run metadata server
///
/// Tokens are cached until shortly before they expire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::StorageError;
use super::signing::UrlSigner;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_MARGIN: chrono::Duration = chrono::Duration::seconds(60);

/// Contents of a `service_account` key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

/// Contents of an `authorized_user` file written by `gcloud auth application-default login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    MetadataServer { host: String },
    /// No authentication, used against a local storage emulator.
    Anonymous,
}

impl Credentials {
    /// Discover ambient credentials from the environment.
    pub fn discover() -> Result<Self, StorageError> {
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = well_known_adc_path().filter(|p| p.is_file()) {
            tracing::debug!(path = %path.display(), "using gcloud application default credentials");
            return Self::from_file(&path);
        }

        let host = std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
        tracing::debug!(%host, "falling back to metadata server credentials");
        Ok(Credentials::MetadataServer { host })
    }

    /// Load a key file of type `service_account` or `authorized_user`.
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Auth(format!("cannot read credentials file {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, StorageError> {
        let parsed: CredentialsFile = serde_json::from_str(contents)
            .map_err(|e| StorageError::Auth(format!("unsupported credentials file: {e}")))?;
        Ok(match parsed {
            CredentialsFile::ServiceAccount(key) => Credentials::ServiceAccount(key),
            CredentialsFile::AuthorizedUser(user) => Credentials::AuthorizedUser(user),
        })
    }

    /// Project id embedded in the credentials, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Credentials::ServiceAccount(key) => key.project_id.as_deref(),
            Credentials::AuthorizedUser(user) => user.quota_project_id.as_deref(),
            _ => None,
        }
    }

    /// A URL signer, available only for service account keys.
    pub fn url_signer(&self) -> Result<UrlSigner, StorageError> {
        match self {
            Credentials::ServiceAccount(key) => UrlSigner::from_pem(&key.client_email, &key.private_key),
            Credentials::AuthorizedUser(_) => Err(StorageError::SigningUnavailable(
                "user credentials cannot sign URLs; a service account key is required".to_string(),
            )),
            Credentials::MetadataServer { .. } => Err(StorageError::SigningUnavailable(
                "metadata server credentials carry no private key; a service account key is required".to_string(),
            )),
            Credentials::Anonymous => Err(StorageError::SigningUnavailable(
                "anonymous credentials cannot sign URLs".to_string(),
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Credentials::ServiceAccount(_) => "service_account",
            Credentials::AuthorizedUser(_) => "authorized_user",
            Credentials::MetadataServer { .. } => "metadata_server",
            Credentials::Anonymous => "anonymous",
        }
    }
}

fn well_known_adc_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("gcloud")
            .join("application_default_credentials.json")
    })
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Produces bearer tokens for storage requests.
pub struct TokenProvider {
    credentials: Credentials,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current bearer token, or `None` for anonymous credentials.
    pub async fn token(&self) -> Result<Option<String>, StorageError> {
        if matches!(self.credentials, Credentials::Anonymous) {
            return Ok(None);
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - EXPIRY_MARGIN > Utc::now() {
                return Ok(Some(token.value.clone()));
            }
        }

        let fresh = self.fetch().await?;
        tracing::debug!(kind = self.credentials.kind(), expires_at = %fresh.expires_at, "refreshed access token");
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(Some(value))
    }

    async fn fetch(&self) -> Result<AccessToken, StorageError> {
        let request = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let assertion = service_account_assertion(key, token_uri, Utc::now())?;
                self.http
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            Credentials::AuthorizedUser(user) => self.http.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ]),
            Credentials::MetadataServer { host } => self
                .http
                .get(format!(
                    "http://{host}/computeMetadata/v1/instance/service-accounts/default/token"
                ))
                .header("Metadata-Flavor", "Google"),
            Credentials::Anonymous => {
                return Err(StorageError::Auth("anonymous credentials have no token".to_string()));
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Auth(format!("token request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!("token endpoint returned HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Auth(format!("malformed token response: {e}")))?;
        let lifetime = chrono::Duration::seconds(token.expires_in.unwrap_or(3600));
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + lifetime,
        })
    }

    /// Look up the project id from the metadata server.
    pub async fn metadata_project_id(&self, timeout: Duration) -> Result<String, StorageError> {
        let Credentials::MetadataServer { host } = &self.credentials else {
            return Err(StorageError::Auth(
                "no project id configured; set GOOGLE_CLOUD_PROJECT".to_string(),
            ));
        };
        let response = self
            .http
            .get(format!("http://{host}/computeMetadata/v1/project/project-id"))
            .header("Metadata-Flavor", "Google")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| StorageError::Auth(format!("metadata server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(StorageError::Auth(format!(
                "metadata server returned HTTP {} for project id",
                response.status()
            )));
        }
        let project = response.text().await?;
        Ok(project.trim().to_string())
    }
}

/// Self-signed JWT used in the service account token exchange.
fn service_account_assertion(
    key: &ServiceAccountKey,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, StorageError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let iat = now.timestamp();
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + 3600,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::Auth(format!("invalid service account private key: {e}")))?;
    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| StorageError::Auth(format!("cannot sign token assertion: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake_server::FakeServer;
    use crate::storage::signing::tests::TEST_KEY;

    fn service_account_json() -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "demo-project",
            "private_key_id": "abc123",
            "private_key": TEST_KEY,
            "client_email": "svc@demo-project.iam.gserviceaccount.com",
            "token_uri": "https://oauth2.googleapis.com/token"
        })
        .to_string()
    }

    #[test]
    fn parses_service_account_file() {
        let creds = Credentials::from_json(&service_account_json()).unwrap();
        assert!(matches!(creds, Credentials::ServiceAccount(_)));
        assert_eq!(creds.project_id(), Some("demo-project"));
        let signer = creds.url_signer().unwrap();
        assert_eq!(signer.client_email(), "svc@demo-project.iam.gserviceaccount.com");
    }

    #[test]
    fn authorized_user_cannot_sign() {
        let json = serde_json::json!({
            "type": "authorized_user",
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "refresh",
            "quota_project_id": "quota-project"
        })
        .to_string();
        let creds = Credentials::from_json(&json).unwrap();
        assert_eq!(creds.project_id(), Some("quota-project"));
        assert!(matches!(creds.url_signer(), Err(StorageError::SigningUnavailable(_))));
    }

    #[test]
    fn rejects_unknown_credential_type() {
        let json = r#"{"type": "external_account", "audience": "x"}"#;
        assert!(matches!(Credentials::from_json(json), Err(StorageError::Auth(_))));
    }

    #[test]
    fn assertion_is_a_three_part_jwt_with_key_id() {
        let Credentials::ServiceAccount(key) = Credentials::from_json(&service_account_json()).unwrap() else {
            panic!("expected service account");
        };
        let jwt = service_account_assertion(&key, DEFAULT_TOKEN_URI, Utc::now()).unwrap();
        assert_eq!(jwt.split('.').count(), 3);
        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn anonymous_credentials_yield_no_token() {
        let provider = TokenProvider::new(Credentials::Anonymous, reqwest::Client::new());
        assert!(provider.token().await.unwrap().is_none());
    }

    fn fake_metadata(req: &actix_web::HttpRequest, _body: &[u8]) -> actix_web::HttpResponse {
        let flavored = req
            .headers()
            .get("Metadata-Flavor")
            .is_some_and(|v| v.as_bytes() == b"Google");
        match req.uri().path() {
            "/computeMetadata/v1/instance/service-accounts/default/token" if flavored => {
                actix_web::HttpResponse::Ok().json(serde_json::json!({
                    "access_token": "fresh-token",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }))
            }
            _ => actix_web::HttpResponse::Forbidden().finish(),
        }
    }

    async fn provider_with_cached(host: &str, valid_for: chrono::Duration) -> TokenProvider {
        let credentials = Credentials::MetadataServer { host: host.to_string() };
        let provider = TokenProvider::new(credentials, reqwest::Client::new());
        *provider.cached.lock().await = Some(AccessToken {
            value: "cached-token".to_string(),
            expires_at: Utc::now() + valid_for,
        });
        provider
    }

    #[actix_rt::test]
    async fn cached_token_is_reused_until_the_expiry_margin() {
        let server = FakeServer::start(fake_metadata);

        let provider = provider_with_cached(&server.host, chrono::Duration::minutes(30)).await;
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("cached-token"));
        assert!(server.requests().is_empty());

        // Inside the 60s margin the cached token counts as expired.
        let provider = provider_with_cached(&server.host, chrono::Duration::seconds(30)).await;
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("fresh-token"));
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("fresh-token"));
        assert_eq!(
            server.requests(),
            vec!["GET /computeMetadata/v1/instance/service-accounts/default/token"]
        );
        server.stop().await;
    }

    #[actix_rt::test]
    async fn token_endpoint_failure_is_an_auth_error() {
        let server = FakeServer::start(|_, _| actix_web::HttpResponse::InternalServerError().body("down"));
        let credentials = Credentials::MetadataServer { host: server.host.clone() };
        let provider = TokenProvider::new(credentials, reqwest::Client::new());
        let err = provider.token().await.unwrap_err();
        assert!(matches!(&err, StorageError::Auth(m) if m.contains("500")), "{err:?}");
        server.stop().await;
    }
}
