// src/services/publisher.rs

//! Social post composition and delivery.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{PublishConfig, UpdateToken};
use crate::services::oauth::OAuth1Credentials;
use crate::utils::{fill_template, http, text::weighted_len};

const ELLIPSIS: &str = "…";

/// A post ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub text: String,
    pub media: Vec<PathBuf>,
}

/// Confirmation of a published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReceipt {
    pub id: String,
}

/// Sink for posts.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &Post) -> Result<PostReceipt>;
}

/// Values substituted into the post template.
#[derive(Debug, Clone)]
pub struct PostContext<'a> {
    pub updated: &'a UpdateToken,
    pub prefecture: &'a str,
    pub licensee: &'a str,
    pub summary: &'a str,
}

/// Fill the template, dropping trailing summary lines until the post fits.
pub fn compose_post(config: &PublishConfig, ctx: &PostContext<'_>) -> String {
    let hashtags = config
        .hashtags
        .iter()
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect::<Vec<_>>()
        .join(" ");

    let render = |summary: &str| {
        fill_template(
            &config.template,
            &[
                ("updated", ctx.updated.as_str()),
                ("prefecture", ctx.prefecture),
                ("licensee", ctx.licensee),
                ("summary", summary),
                ("link", config.link.as_str()),
                ("hashtags", hashtags.as_str()),
            ],
        )
    };

    let lines: Vec<&str> = ctx.summary.lines().collect();
    let full = render(ctx.summary);
    if weighted_len(&full) <= config.max_weight {
        return full;
    }

    for keep in (0..lines.len()).rev() {
        let mut summary = lines[..keep].join("\n");
        if !summary.is_empty() {
            summary.push('\n');
        }
        summary.push_str(ELLIPSIS);

        let text = render(&summary);
        if weighted_len(&text) <= config.max_weight {
            log::warn!(
                "Post trimmed to {keep} of {} summary lines to fit {}",
                lines.len(),
                config.max_weight
            );
            return text;
        }
    }

    log::warn!("Post template alone exceeds {}; sending as is", config.max_weight);
    render(ELLIPSIS)
}

/// Logs posts instead of sending them.
#[derive(Debug, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, post: &Post) -> Result<PostReceipt> {
        log::info!("[dry-run] Would post ({} chars):\n{}", weighted_len(&post.text), post.text);
        for media in &post.media {
            log::info!("[dry-run] Would attach {}", media.display());
        }
        Ok(PostReceipt {
            id: "dry-run".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    data: Option<ApiId>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiId {
    id: String,
}

/// Posts through the X API v2, signing every request with OAuth 1.0a.
pub struct XPublisher {
    client: Client,
    credentials: OAuth1Credentials,
    post_endpoint: String,
    media_endpoint: String,
}

impl XPublisher {
    pub fn new(config: &PublishConfig, credentials: OAuth1Credentials) -> Result<Self> {
        let client = http::build_client("musen-tracker", 60)?;
        Ok(Self::with_client(config, credentials, client))
    }

    /// Create a publisher around an existing HTTP client.
    pub fn with_client(
        config: &PublishConfig,
        credentials: OAuth1Credentials,
        client: Client,
    ) -> Self {
        Self {
            client,
            credentials,
            post_endpoint: config.post_endpoint.clone(),
            media_endpoint: config.media_endpoint.clone(),
        }
    }

    /// Build from the credentials in the environment.
    pub fn from_env(config: &PublishConfig) -> Result<Self> {
        Self::new(config, OAuth1Credentials::from_env()?)
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        let mime = media_type(path)
            .ok_or_else(|| AppError::publish(format!("unsupported media {}", path.display())))?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(AppError::publish)?;
        let form = Form::new()
            .text("media_category", "tweet_image")
            .part("media", part);

        let auth = self
            .credentials
            .authorization("POST", &self.media_endpoint, &[])?;
        let response = self
            .client
            .post(&self.media_endpoint)
            .header(reqwest::header::AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .map_err(AppError::publish)?;

        Self::read_id(response, "media upload").await
    }

    async fn read_id(response: reqwest::Response, what: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await.map_err(AppError::publish)?;
        if !status.is_success() {
            return Err(AppError::publish(format!("{what} failed with {status}: {body}")));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body)
            .map_err(|e| AppError::publish(format!("{what}: malformed response: {e}")))?;
        match envelope.data {
            Some(data) => Ok(data.id),
            None => Err(AppError::publish(format!(
                "{what}: no id in response ({} errors)",
                envelope.errors.len()
            ))),
        }
    }
}

#[async_trait]
impl Publisher for XPublisher {
    async fn publish(&self, post: &Post) -> Result<PostReceipt> {
        let mut media_ids = Vec::new();
        for path in &post.media {
            if media_type(path).is_none() {
                log::warn!("Skipping attachment {}: not an image type the API accepts", path.display());
                continue;
            }
            media_ids.push(self.upload_media(path).await?);
        }

        let mut body = json!({ "text": post.text });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }

        let auth = self
            .credentials
            .authorization("POST", &self.post_endpoint, &[])?;
        let response = self
            .client
            .post(&self.post_endpoint)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(AppError::publish)?;

        let id = Self::read_id(response, "post").await?;
        log::info!("Published post {id}");
        Ok(PostReceipt { id })
    }
}

/// MIME type of an attachable image, by extension.
pub fn media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::utils::http::testing::{local_client, serve};

    fn config() -> PublishConfig {
        PublishConfig {
            link: "https://example.com/sheet".to_string(),
            ..PublishConfig::default()
        }
    }

    #[test]
    fn test_compose_default_template() {
        let token = UpdateToken::new("2024-05-01");
        let text = compose_post(
            &config(),
            &PostContext {
                updated: &token,
                prefecture: "愛媛県",
                licensee: "楽天モバイル",
                summary: "松山市 +2\n今治市 +1",
            },
        );

        assert_eq!(
            text,
            "2024-05-01現在\n\n愛媛県の楽天モバイルの基地局数\n\n松山市 +2\n今治市 +1\n\nhttps://example.com/sheet\n\n#楽天モバイル #愛媛 #基地局"
        );
    }

    #[test]
    fn test_compose_trims_long_summary() {
        let token = UpdateToken::new("2024-05-01");
        let summary: Vec<String> = (0..40).map(|i| format!("市町村{i} +{i}")).collect();
        let summary = summary.join("\n");

        let text = compose_post(
            &config(),
            &PostContext {
                updated: &token,
                prefecture: "愛媛県",
                licensee: "楽天モバイル",
                summary: &summary,
            },
        );

        assert!(weighted_len(&text) <= 280);
        assert!(text.contains("市町村0 +0"));
        assert!(text.contains(ELLIPSIS));
        assert!(text.ends_with("#基地局"));
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(media_type(Path::new("a.svg")), None);
        assert_eq!(media_type(Path::new("noext")), None);
    }

    fn x_publisher(base: &str) -> XPublisher {
        let config = PublishConfig {
            post_endpoint: format!("{base}/2/tweets"),
            media_endpoint: format!("{base}/2/media/upload"),
            ..PublishConfig::default()
        };
        let credentials = OAuth1Credentials {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
        };
        XPublisher::with_client(&config, credentials, local_client())
    }

    #[tokio::test]
    async fn test_x_publisher_signs_and_attaches_media() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("2024-05-01.png");
        std::fs::write(&image, b"\x89PNG\r\n\x1a\n").unwrap();
        let skipped = tmp.path().join("2024-05-01.svg");
        std::fs::write(&skipped, "<svg/>").unwrap();

        let (base, seen) = serve(vec![
            ("200 OK", r#"{"data": {"id": "m-1"}}"#.to_string()),
            ("201 Created", r#"{"data": {"id": "p-9", "text": "hi"}}"#.to_string()),
        ])
        .await;

        let receipt = x_publisher(&base)
            .publish(&Post {
                text: "hello".into(),
                media: vec![skipped, image],
            })
            .await
            .unwrap();
        assert_eq!(receipt.id, "p-9");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let upload = seen[0].to_ascii_lowercase();
        assert!(upload.starts_with("post /2/media/upload "));
        assert!(upload.contains("authorization: oauth oauth_consumer_key=\"ck\""));
        assert!(upload.contains("oauth_signature=\""));

        let post = &seen[1];
        assert!(post.starts_with("POST /2/tweets "));
        assert!(post.contains(r#""text":"hello""#));
        assert!(post.contains(r#""media_ids":["m-1"]"#));
    }

    #[tokio::test]
    async fn test_x_publisher_reports_rejection() {
        let (base, _) = serve(vec![(
            "401 Unauthorized",
            r#"{"title": "Unauthorized"}"#.to_string(),
        )])
        .await;

        let err = x_publisher(&base)
            .publish(&Post {
                text: "hello".into(),
                media: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Publish(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_dry_run_publisher() {
        let receipt = DryRunPublisher
            .publish(&Post {
                text: "hello".into(),
                media: vec![],
            })
            .await
            .unwrap();
        assert_eq!(receipt.id, "dry-run");
    }
}
