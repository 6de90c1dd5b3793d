// src/services/oauth.rs

//! OAuth 1.0a request signing (HMAC-SHA1) for user-context API calls.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, distributions::Alphanumeric};
use sha1::Sha1;

use crate::error::{AppError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Environment variables holding the long-lived credentials.
pub const CONSUMER_KEY_ENV: &str = "CONSUMER_KEY";
pub const CONSUMER_SECRET_ENV: &str = "CONSUMER_SECRET";
pub const ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";
pub const ACCESS_TOKEN_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";

/// All credential variables, in the order they are checked.
pub const CREDENTIAL_ENVS: [&str; 4] = [
    CONSUMER_KEY_ENV,
    CONSUMER_SECRET_ENV,
    ACCESS_TOKEN_ENV,
    ACCESS_TOKEN_SECRET_ENV,
];

// RFC 3986 unreserved characters stay as is.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

/// Consumer and access credentials of one account.
#[derive(Clone)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl std::fmt::Debug for OAuth1Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl OAuth1Credentials {
    /// Read all four credentials; every missing variable is named in the error.
    pub fn from_env() -> Result<Self> {
        let values: Vec<Option<String>> = CREDENTIAL_ENVS
            .iter()
            .map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
            .collect();

        let missing: Vec<&str> = CREDENTIAL_ENVS
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::config(format!(
                "missing credentials: {}",
                missing.join(", ")
            )));
        }

        let mut values = values.into_iter().flatten();
        let mut next = || values.next().unwrap_or_default();
        Ok(Self {
            consumer_key: next(),
            consumer_secret: next(),
            access_token: next(),
            access_token_secret: next(),
        })
    }

    /// `Authorization` header value for a request.
    ///
    /// `params` are the query and form parameters that take part in the
    /// signature; JSON and multipart bodies do not.
    pub fn authorization(&self, method: &str, url: &str, params: &[(&str, &str)]) -> Result<String> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_with(method, url, params, &nonce, &timestamp)
    }

    fn authorization_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String> {
        let mut oauth = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", self.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let signature = self.signature(method, url, &oauth, params)?;
        oauth.push(("oauth_signature", signature.as_str()));
        oauth.sort();

        let fields = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }

    fn signature(
        &self,
        method: &str,
        url: &str,
        oauth: &[(&str, &str)],
        params: &[(&str, &str)],
    ) -> Result<String> {
        let mut pairs: Vec<(String, String)> = oauth
            .iter()
            .chain(params)
            .map(|(k, v)| (encode(k), encode(v)))
            .collect();
        pairs.sort();

        let parameter_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let base = format!(
            "{}&{}&{}",
            method.to_ascii_uppercase(),
            encode(url),
            encode(&parameter_string)
        );
        let key = format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(&self.access_token_secret)
        );

        let mut mac = HmacSha1::new_from_slice(key.as_bytes()).map_err(AppError::publish)?;
        mac.update(base.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> OAuth1Credentials {
        OAuth1Credentials {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog".into(),
            consumer_secret: "kAcSOqF21Fu85e7zgjTNLFVTh5frNTemSvMavI".into(),
            access_token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".into(),
            access_token_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".into(),
        }
    }

    #[test]
    fn test_encode_is_rfc3986() {
        assert_eq!(
            encode("Ladies + Gentlemen, a signed OAuth request!"),
            "Ladies%20%2B%20Gentlemen%2C%20a%20signed%20OAuth%20request%21"
        );
        assert_eq!(encode("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(encode("愛"), "%E6%84%9B");
    }

    #[test]
    fn test_reference_signature() {
        let header = credentials()
            .authorization_with(
                "post",
                "https://api.twitter.com/1.1/statuses/update.json",
                &[
                    ("include_entities", "true"),
                    ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
                ],
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                "1318622958",
            )
            .unwrap();

        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(!header.contains("include_entities"));
    }

    #[test]
    fn test_fresh_nonce_per_request() {
        let creds = credentials();
        let a = creds.authorization("POST", "https://api.x.com/2/tweets", &[]).unwrap();
        let b = creds.authorization("POST", "https://api.x.com/2/tweets", &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let text = format!("{:?}", credentials());
        assert!(!text.contains("kAcSOqF21Fu85e7zgjTNLFVTh5frNTemSvMavI"));
        assert!(!text.contains("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE"));
    }
}
