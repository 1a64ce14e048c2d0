use crate::entities::files;
use crate::services::storage::StorageService;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait};
use std::sync::Arc;

/// How much of a file's head gets pattern-matched.
const SCAN_HEAD_BYTES: usize = 10 * 1024;

/// Extensions that are never plausible room uploads.
const DENYLISTED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "scr", "ps1", "vbs", "js", "jar", "msi", "com", "pif",
];

/// Script-ish markers in the file head. Lowercased before matching.
const CONTENT_PATTERNS: &[&str] = &["eval(", "exec(", "<script", "powershell"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
    pub status: &'static str,
    pub result: String,
}

pub struct HeuristicScanner;

impl HeuristicScanner {
    /// Verdict for files large enough to skip content inspection.
    pub fn large_file_verdict() -> ScanVerdict {
        ScanVerdict {
            status: files::SCAN_SAFE,
            result: "Large file - content scan skipped".to_string(),
        }
    }

    /// Extension checks that need no file content.
    pub fn check_filename(filename: &str) -> Option<String> {
        let lower = filename.to_lowercase();
        let segments: Vec<&str> = lower.split('.').collect();
        if segments.len() < 2 {
            return None;
        }

        let ext = segments[segments.len() - 1];
        if DENYLISTED_EXTENSIONS.contains(&ext) {
            return Some(format!("Blocked extension .{}", ext));
        }

        // invoice.pdf.exe is caught above; app.exe.txt is the sneaky one
        for inner in &segments[1..segments.len() - 1] {
            if DENYLISTED_EXTENSIONS.contains(inner) {
                return Some(format!("Masquerading double extension .{}", inner));
            }
        }

        None
    }

    /// Pattern-match the file head. Returns the first hit.
    pub fn check_content(head: &[u8]) -> Option<String> {
        let lowered: Vec<u8> = head.iter().map(|b| b.to_ascii_lowercase()).collect();
        let text = String::from_utf8_lossy(&lowered);
        for pattern in CONTENT_PATTERNS {
            if text.contains(pattern) {
                return Some(format!("Suspicious pattern '{}' in content", pattern));
            }
        }
        None
    }

    /// Deferred scan for files below the size limit: runs after the upload
    /// response is sent and updates the row in place. Failures leave the
    /// file at `unknown` and are only logged.
    pub fn spawn_scan(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        file_id: String,
        file_key: String,
        filename: String,
    ) {
        tokio::spawn(async move {
            let verdict = Self::run_scan(&storage, &file_key, &filename).await;
            let Some(existing) = files::Entity::find_by_id(&file_id)
                .one(&db)
                .await
                .ok()
                .flatten()
            else {
                return;
            };
            let mut active: files::ActiveModel = existing.into();
            active.scan_status = Set(verdict.status.to_string());
            active.scan_result = Set(Some(verdict.result.clone()));
            if let Err(e) = active.update(&db).await {
                tracing::error!("Failed to persist scan verdict for {}: {}", file_id, e);
            } else {
                tracing::info!(
                    "🔬 Scan finished for {}: {} ({})",
                    file_id,
                    verdict.status,
                    verdict.result
                );
            }
        });
    }

    async fn run_scan(
        storage: &Arc<dyn StorageService>,
        file_key: &str,
        filename: &str,
    ) -> ScanVerdict {
        if let Some(reason) = Self::check_filename(filename) {
            return ScanVerdict {
                status: files::SCAN_RISKY,
                result: reason,
            };
        }

        match storage.get_object_head(file_key, SCAN_HEAD_BYTES).await {
            Ok(head) => {
                if let Some(reason) = Self::check_content(&head) {
                    ScanVerdict {
                        status: files::SCAN_RISKY,
                        result: reason,
                    }
                } else {
                    ScanVerdict {
                        status: files::SCAN_SAFE,
                        result: "No threats detected".to_string(),
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Scan could not read head of {}: {}", file_key, e);
                ScanVerdict {
                    status: files::SCAN_UNKNOWN,
                    result: "Scan unavailable".to_string(),
                }
            }
        }
    }
}
