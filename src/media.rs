use std::path::PathBuf;

use uuid::Uuid;

use crate::platform::AttachmentKind;

pub const MAX_UPLOAD_FILES: usize = 10;
pub const MAX_UPLOAD_BYTES: usize = 6 * 1024 * 1024;

/// Local directory for operator uploads, served back under `/uploads/`.
/// The platform fetches media from the public URL, so one must be configured.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    dir: PathBuf,
    public_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub file_name: String,
    pub url: String,
    pub kind: AttachmentKind,
}

impl MediaStorage {
    pub fn new(dir: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            dir,
            public_base_url: public_base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    pub fn has_public_url(&self) -> bool {
        self.public_base_url.is_some()
    }

    pub fn public_url(&self, file_name: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}/uploads/{file_name}"))
    }

    pub async fn store(
        &self,
        original_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> std::io::Result<StoredMedia> {
        if bytes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty upload",
            ));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("upload exceeds {MAX_UPLOAD_BYTES} bytes"),
            ));
        }
        let ext = media_extension_from_filename(original_name)
            .unwrap_or_else(|| media_extension_from_mime(mime_type).to_string());
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let Some(url) = self.public_url(&file_name) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no public base url configured",
            ));
        };
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&file_name), bytes).await?;

        Ok(StoredMedia {
            url,
            file_name,
            kind: AttachmentKind::from_mime(mime_type),
        })
    }

    pub async fn read(&self, file_name: &str) -> Option<Vec<u8>> {
        if !is_safe_media_file_name(file_name) {
            return None;
        }
        tokio::fs::read(self.dir.join(file_name)).await.ok()
    }
}

pub fn media_extension_from_filename(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

fn media_extension_from_mime(mime: &str) -> &'static str {
    let mt = mime.to_ascii_lowercase();
    if mt.contains("jpeg") || mt.contains("jpg") {
        "jpg"
    } else if mt.contains("png") {
        "png"
    } else if mt.contains("webp") {
        "webp"
    } else if mt.contains("gif") {
        "gif"
    } else if mt.contains("mp4") {
        "mp4"
    } else if mt.contains("quicktime") {
        "mov"
    } else if mt.starts_with("video/") {
        "mp4"
    } else {
        "jpg"
    }
}

pub fn media_content_type_from_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

pub fn is_safe_media_file_name(value: &str) -> bool {
    !value.is_empty()
        && !value.contains('/')
        && !value.contains('\\')
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
