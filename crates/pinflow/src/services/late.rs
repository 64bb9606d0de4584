//! Late-style scheduling API publisher: uploads finished media and creates
//! Pinterest posts, cleaning up each record's files once it is live.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::artifacts::{remove_file_if_exists, ArtifactLayout};
use crate::config::Account;
use crate::state::MediaKind;

use super::{PinMetadata, PublicationReport, PublishFailure, PublishedPin, Publisher, ServiceError};

const PLATFORM: &str = "pinterest";
const RECORDS_PER_BOARD: usize = 5;

#[derive(Debug, Clone)]
pub struct LatePublisher {
    http: reqwest::blocking::Client,
    layout: ArtifactLayout,
}

/// One finished artifact ready for publication: the media file plus the
/// metadata sidecar it was generated with.
#[derive(Debug, Clone)]
struct PinRecord {
    media_path: PathBuf,
    json_path: PathBuf,
    meta: PinMetadata,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<PlatformAccount>,
}

#[derive(Debug, Deserialize)]
struct PlatformAccount {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    platform: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    url: String,
}

/// Metadata sidecars are written either flat or nested under a "metadata"
/// key depending on which stage produced them.
#[derive(Debug, Deserialize)]
struct MetadataDoc {
    #[serde(default)]
    metadata: Option<PinMetadata>,
    #[serde(flatten)]
    flat: PinMetadata,
}

impl LatePublisher {
    pub fn new(layout: ArtifactLayout) -> Result<Self, ServiceError> {
        // Account proxies are for browsing sessions; API traffic must go
        // direct, so ambient proxy configuration is ignored.
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .no_proxy()
            .build()?;
        Ok(Self { http, layout })
    }

    fn api_key<'a>(&self, account: &'a Account) -> Result<&'a str, ServiceError> {
        let key = account.publish_api_key.trim();
        if key.is_empty() {
            return Err(ServiceError::Auth(format!(
                "publish_api_key missing for account '{}'",
                account.alias
            )));
        }
        Ok(key)
    }

    /// Resolves the platform-side account id behind this API key.
    fn platform_account_id(&self, account: &Account) -> Result<String, ServiceError> {
        let resp = self
            .http
            .get(format!("{}/accounts", account.publish_base_url))
            .bearer_auth(self.api_key(account)?)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: AccountsResponse = resp.json()?;
        body.accounts
            .into_iter()
            .find(|a| a.platform == PLATFORM)
            .map(|a| a.id)
            .ok_or_else(|| {
                ServiceError::Upstream(format!("no {PLATFORM} account behind this API key"))
            })
    }

    fn upload_media(&self, account: &Account, media_path: &Path) -> Result<String, ServiceError> {
        let bytes = std::fs::read(media_path).map_err(|source| ServiceError::Io {
            path: media_path.to_path_buf(),
            source,
        })?;
        let file_name = media_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(guess_mime(media_path))?;
        let form = reqwest::blocking::multipart::Form::new().part("files", part);

        let resp = self
            .http
            .post(format!("{}/media", account.publish_base_url))
            .bearer_auth(self.api_key(account)?)
            .multipart(form)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: UploadResponse = resp.json()?;
        body.files
            .into_iter()
            .next()
            .map(|f| f.url)
            .ok_or_else(|| ServiceError::EmptyResponse("upload returned no files".to_string()))
    }

    fn publish_pin(
        &self,
        account: &Account,
        platform_account_id: &str,
        board_id: &str,
        record: &PinRecord,
        media_url: &str,
        kind: MediaKind,
    ) -> Result<(), ServiceError> {
        let mut platform_data = json!({
            "title": record.meta.title,
            "boardId": board_id,
        });
        if let Some(link) = &record.meta.link {
            platform_data["link"] = json!(link);
        }

        let payload = json!({
            "content": compose_description(&record.meta),
            "platforms": [{
                "platform": PLATFORM,
                "accountId": platform_account_id,
                "platformSpecificData": platform_data,
            }],
            "mediaItems": [{
                "url": media_url,
                "type": match kind {
                    MediaKind::Image => "image",
                    MediaKind::Video => "video",
                },
            }],
        });

        let resp = self
            .http
            .post(format!("{}/posts", account.publish_base_url))
            .bearer_auth(self.api_key(account)?)
            .json(&payload)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Collects publishable records from a board's generated directory:
    /// metadata sidecars in filename order, capped, each paired with its
    /// media file. Records whose media is missing are skipped.
    fn build_records(&self, alias: &str, board_id: &str, kind: MediaKind) -> Vec<PinRecord> {
        let dir = self.layout.generated_dir(alias, board_id, kind);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut json_paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        json_paths.sort();
        json_paths.truncate(RECORDS_PER_BOARD);

        let mut records = Vec::new();
        for json_path in json_paths {
            let media_path = json_path.with_extension(kind.media_extension());
            if !ArtifactLayout::has_output(&media_path) {
                warn!("No media for sidecar {}, skipping", json_path.display());
                continue;
            }
            let doc = std::fs::read_to_string(&json_path)
                .ok()
                .and_then(|s| serde_json::from_str::<MetadataDoc>(&s).ok());
            let Some(doc) = doc else {
                warn!("Unreadable sidecar {}, skipping", json_path.display());
                continue;
            };
            records.push(PinRecord {
                media_path,
                json_path,
                meta: doc.metadata.unwrap_or(doc.flat),
            });
        }
        records
    }
}

impl Publisher for LatePublisher {
    fn list_board_ids(&self, account: &Account) -> Vec<String> {
        self.layout.list_board_ids(&account.alias)
    }

    fn publish_board(
        &self,
        account: &Account,
        board_id: &str,
        kind: MediaKind,
    ) -> Result<PublicationReport, ServiceError> {
        let records = self.build_records(&account.alias, board_id, kind);
        let mut report = PublicationReport::empty(board_id);
        if records.is_empty() {
            return Ok(report);
        }

        let platform_account_id = self.platform_account_id(account)?;
        info!("Publishing {} records for board {}", records.len(), board_id);

        for record in &records {
            let outcome = self.upload_media(account, &record.media_path).and_then(|url| {
                self.publish_pin(account, &platform_account_id, board_id, record, &url, kind)
                    .map(|()| url)
            });
            match outcome {
                Ok(media_url) => {
                    // A published record's files are gone for good; the next
                    // run must not re-publish it.
                    remove_file_if_exists(&record.media_path);
                    remove_file_if_exists(&record.json_path);
                    report.published.push(PublishedPin {
                        title: record.meta.title.clone(),
                        media_url,
                    });
                }
                Err(e) => {
                    warn!("Failed to publish {}: {}", record.media_path.display(), e);
                    report.failures.push(PublishFailure {
                        media_path: record.media_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

fn compose_description(meta: &PinMetadata) -> String {
    if meta.hashtags.is_empty() {
        return meta.description.clone();
    }
    format!("{}\n\n{}", meta.description, meta.hashtags.join(" "))
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
