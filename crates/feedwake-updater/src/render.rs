//! Notification rendering.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::thumbnail::Thumbnail;

/// Longest body text passed to the renderer.
const MAX_BODY_CHARS: usize = 280;

/// One surfaced item, ready to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub source_id: String,
    pub item_id: String,
    pub title: String,
    pub body: Option<String>,
    pub link: Option<String>,
    pub breaking: bool,
    pub thumbnail: Option<Thumbnail>,
}

impl Notification {
    /// Body text truncated for display.
    pub fn short_body(&self) -> Option<String> {
        let body = self.body.as_deref()?.trim();
        if body.is_empty() {
            return None;
        }
        if body.chars().count() <= MAX_BODY_CHARS {
            return Some(body.to_string());
        }
        let mut short: String = body.chars().take(MAX_BODY_CHARS - 1).collect();
        short.push('…');
        Some(short)
    }
}

/// Shows notifications. Fire-and-forget: failures are logged by the
/// implementation and never reach the wake.
#[async_trait]
pub trait NotificationRenderer: Send + Sync {
    async fn render(&self, notification: &Notification);
}

/// Writes notifications to the log.
pub struct LogRenderer;

#[async_trait]
impl NotificationRenderer for LogRenderer {
    async fn render(&self, notification: &Notification) {
        info!(
            source = %notification.source_id,
            item_id = %notification.item_id,
            breaking = notification.breaking,
            link = notification.link.as_deref().unwrap_or_default(),
            has_thumbnail = notification.thumbnail.is_some(),
            "{}",
            notification.title
        );
    }
}

/// Shows notifications on the desktop through `notify-send`.
pub struct DesktopRenderer {
    program: String,
    icon_dir: PathBuf,
}

impl DesktopRenderer {
    /// Thumbnails are written under `icon_dir` so the notification daemon can
    /// read them.
    pub fn new(icon_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "notify-send".to_string(),
            icon_dir: icon_dir.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn write_icon(&self, item_id: &str, thumbnail: &Thumbnail) -> Option<PathBuf> {
        let mut hasher = DefaultHasher::new();
        item_id.hash(&mut hasher);
        let path = self.icon_dir.join(format!("{:016x}.img", hasher.finish()));

        let written = async {
            tokio::fs::create_dir_all(&self.icon_dir).await?;
            tokio::fs::write(&path, &thumbnail.bytes).await
        };
        match written.await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(error = %e, "failed to write notification icon");
                None
            }
        }
    }

    fn arguments(&self, notification: &Notification, icon: Option<&PathBuf>) -> Vec<String> {
        let mut args = vec!["--app-name=feedwake".to_string()];
        if notification.breaking {
            args.push("--urgency=critical".to_string());
        }
        if let Some(icon) = icon {
            args.push(format!("--icon={}", icon.display()));
        }
        args.push(notification.title.clone());
        if let Some(body) = notification.short_body() {
            args.push(body);
        }
        args
    }
}

#[async_trait]
impl NotificationRenderer for DesktopRenderer {
    async fn render(&self, notification: &Notification) {
        let icon = match &notification.thumbnail {
            Some(thumbnail) => self.write_icon(&notification.item_id, thumbnail).await,
            None => None,
        };

        let output = Command::new(&self.program)
            .args(self.arguments(notification, icon.as_ref()))
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                debug!(item_id = %notification.item_id, "desktop notification shown");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    item_id = %notification.item_id,
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "desktop notification failed"
                );
            }
            Err(e) => {
                warn!(item_id = %notification.item_id, program = %self.program, error = %e, "failed to run notifier");
            }
        }
    }
}
