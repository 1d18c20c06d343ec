//! Username/password login against the Salesforce SOAP partner endpoint.
//!
//! The password and the user's security token are concatenated into one
//! credential, exactly as the login contract requires. Neither value nor the
//! returned session id is ever logged.

use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info};
use url::Url;

use crate::config::SalesforceConfig;
use crate::error::AppError;
use crate::salesforce::client::Session;

/// Joins the password and security token into the single login secret.
pub fn combined_secret(password: &SecretString, security_token: &SecretString) -> SecretString {
    SecretString::from(format!(
        "{}{}",
        password.expose_secret(),
        security_token.expose_secret()
    ))
}

/// Escapes the five XML special characters.
fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn xml_unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Returns the text of the first `<tag>...</tag>` element, unescaped.
///
/// The login response is flat enough that a full XML parser buys nothing.
fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml_unescape(&xml[start..end]))
}

fn login_envelope(username: &str, secret: &SecretString) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8" ?>"#,
            r#"<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
            "<n1:username>{}</n1:username><n1:password>{}</n1:password>",
            "</n1:login></env:Body></env:Envelope>"
        ),
        xml_escape(username),
        xml_escape(secret.expose_secret())
    )
}

/// Authenticates and returns a session.
///
/// # Errors
///
/// - `AppError::Auth` - Credentials rejected, unreachable endpoint, or an
///   unreadable login response
pub async fn authenticate(
    http: &reqwest::Client,
    config: &SalesforceConfig,
) -> Result<Session, AppError> {
    let secret = combined_secret(&config.password, &config.security_token);
    let login_url = format!("{}/services/Soap/u/{}", config.login_url, config.api_version);

    info!("[SFDC] Logging in as {}", config.username);

    let response = http
        .post(&login_url)
        .header("Content-Type", "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .body(login_envelope(&config.username, &secret))
        .send()
        .await
        .map_err(|_| {
            error!("[SFDC] Login request failed");
            AppError::Auth("could not reach the Salesforce login endpoint".into())
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|_| AppError::Auth("could not read the login response".into()))?;

    if !status.is_success() {
        let fault = extract_tag(&body, "faultstring")
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        error!("[SFDC] Login rejected: {}", status.as_u16());
        return Err(AppError::Auth(fault));
    }

    let server_url = extract_tag(&body, "serverUrl")
        .ok_or_else(|| AppError::Auth("login response has no serverUrl".into()))?;
    let session_id = extract_tag(&body, "sessionId")
        .ok_or_else(|| AppError::Auth("login response has no session".into()))?;

    let instance_url = Url::parse(&server_url)
        .map_err(|_| AppError::Auth("login response has an invalid serverUrl".into()))?
        .origin()
        .ascii_serialization();

    info!("[SFDC] Login successful");

    Ok(Session {
        instance_url,
        session_id: SecretString::from(session_id),
        user_id: extract_tag(&body, "userId").unwrap_or_default(),
        org_id: extract_tag(&body, "organizationId").unwrap_or_default(),
        api_version: config.api_version.clone(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
