//! Proxmox VE REST client
//!
//! The reconcilers only see the [`ProxmoxApi`] trait; the HTTP
//! implementation below speaks to `pveproxy` over HTTPS.

use async_trait::async_trait;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response};
use serde_json::Value;

use pve_shared_types::{list_from_value, object_from_value, wire_string, ManagedObject};

use crate::config::{ApiConfig, Credentials};
use crate::error::ApiError;

/// Request parameters, sent form encoded on writes and as query on reads.
pub type ApiParams = ManagedObject;

/// The four verbs of the Proxmox VE API. Every method returns the
/// unwrapped `data` member of the response.
#[async_trait]
pub trait ProxmoxApi: Send + Sync {
    async fn get(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError>;
    async fn post(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError>;
    async fn put(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError>;
    async fn delete(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError>;
}

/// `GET` a collection and decode it as a list of objects.
pub async fn get_list(api: &dyn ProxmoxApi, path: &str) -> Result<Vec<ManagedObject>, ApiError> {
    let data = api.get(path, &ApiParams::new()).await?;
    Ok(list_from_value(data)?)
}

/// `GET` a single object.
pub async fn get_object(api: &dyn ProxmoxApi, path: &str) -> Result<ManagedObject, ApiError> {
    let data = api.get(path, &ApiParams::new()).await?;
    Ok(object_from_value(data)?)
}

/// Like [`get_object`] but a missing object is `None`.
pub async fn find_object(
    api: &dyn ProxmoxApi,
    path: &str,
) -> Result<Option<ManagedObject>, ApiError> {
    match get_object(api, path).await {
        Ok(object) => Ok(Some(object)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Percent-encode one path segment (realm names, ACL paths, ...).
pub fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Flatten parameters into form pairs. Lists become repeated keys,
/// booleans `1`/`0`, nulls are dropped.
pub fn encode_params(params: &ApiParams) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                pairs.extend(
                    items
                        .iter()
                        .filter_map(wire_string)
                        .map(|item| (key.clone(), item)),
                );
            }
            other => {
                if let Some(text) = wire_string(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

enum Auth {
    Token(String),
    Ticket { ticket: String, csrf: String },
}

/// HTTPS client for the Proxmox VE API
pub struct HttpProxmoxClient {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl HttpProxmoxClient {
    /// Build the HTTP client, authenticate and verify the credentials with
    /// `GET /version`.
    pub async fn connect(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = build_http_client(config)?;
        let base_url = config.base_url();

        let auth = match config.credentials() {
            Credentials::Token { id, secret } => Auth::Token(format!(
                "PVEAPIToken={}!{}={}",
                config.api_user, id, secret
            )),
            Credentials::Password(password) => {
                login(&client, &base_url, &config.api_user, &password).await?
            }
        };

        let api = Self {
            client,
            base_url,
            auth,
        };

        let version = api.get("/version", &ApiParams::new()).await?;
        log::debug!(
            "Connected to {} (pve-manager {})",
            config.api_host,
            version.get("version").and_then(Value::as_str).unwrap_or("unknown")
        );

        Ok(api)
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorize(&self, builder: RequestBuilder, method: &Method) -> RequestBuilder {
        match &self.auth {
            Auth::Token(header) => builder.header("Authorization", header),
            Auth::Ticket { ticket, csrf } => {
                let builder = builder.header("Cookie", format!("PVEAuthCookie={ticket}"));
                if *method == Method::GET {
                    builder
                } else {
                    builder.header("CSRFPreventionToken", csrf)
                }
            }
        }
    }

    async fn request(&self, method: Method, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        log::debug!("{} {}", method, path);

        let url = self.build_url(path);
        let pairs = encode_params(params);

        let builder = self.client.request(method.clone(), &url);
        let builder = if method == Method::POST || method == Method::PUT {
            builder.form(&pairs)
        } else {
            builder.query(&pairs)
        };

        let response = self.authorize(builder, &method).send().await?;
        decode_response(path, response).await
    }
}

#[async_trait]
impl ProxmoxApi for HttpProxmoxClient {
    async fn get(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.request(Method::GET, path, params).await
    }

    async fn post(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.request(Method::POST, path, params).await
    }

    async fn put(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, params).await
    }

    async fn delete(&self, path: &str, params: &ApiParams) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, params).await
    }
}

fn build_http_client(config: &ApiConfig) -> Result<Client, ApiError> {
    let mut builder = Client::builder()
        .timeout(config.timeout())
        .danger_accept_invalid_certs(!config.verify_tls());

    if config.validate_certs.is_none() {
        log::warn!("validate_certs not set, TLS certificates are not verified");
    }

    if let Some(path) = config.ca_path.as_ref().filter(|_| config.verify_tls()) {
        let pem = std::fs::read(path).map_err(|err| {
            ApiError::Config(format!("cannot read CA file {}: {}", path.display(), err))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| ApiError::Config(format!("invalid CA file {}: {}", path.display(), err)))?;
        builder = builder.add_root_certificate(certificate);
    }

    builder
        .build()
        .map_err(|err| ApiError::Config(format!("failed to create HTTP client: {err}")))
}

async fn login(client: &Client, base_url: &str, user: &str, password: &str) -> Result<Auth, ApiError> {
    log::debug!("Requesting ticket for {}", user);

    let response = client
        .post(format!("{base_url}/access/ticket"))
        .form(&[("username", user), ("password", password)])
        .send()
        .await?;

    let data = decode_response("/access/ticket", response).await?;
    let field = |name: &str| {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Parse(format!("ticket response lacks '{name}'")))
    };

    Ok(Auth::Ticket {
        ticket: field("ticket")?,
        csrf: field("CSRFPreventionToken")?,
    })
}

async fn decode_response(path: &str, response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    let body: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)
            .map_err(|e| ApiError::Parse(format!("JSON parse error: {}", e)))?
    };

    if !status.is_success() {
        let message = error_message(&body)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ApiError::from_status(status.as_u16(), path, message));
    }

    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

fn error_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(message.trim().to_string());
    }

    match body.get("errors")? {
        Value::Object(errors) => Some(
            errors
                .iter()
                .map(|(field, reason)| {
                    format!("{}: {}", field, reason.as_str().unwrap_or_default().trim())
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}
