use crate::api::error::AppError;
use crate::entities::{files, rooms};
use crate::services::storage::StorageService;
use crate::utils::validation::slugify;
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::{SimpleFileOptions, ZipWriter};

/// One-request bundle of a room's files. A member that fails to read is
/// logged and skipped; the archive still ships with everything else.
pub struct BulkArchiver;

impl BulkArchiver {
    pub fn archive_name(room: &rooms::Model) -> String {
        format!("{}.zip", slugify(&room.name))
    }

    pub async fn build(
        storage: &Arc<dyn StorageService>,
        room: &rooms::Model,
        files: &[files::Model],
    ) -> Result<Vec<u8>, AppError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut used_names: Vec<String> = Vec::new();
        let mut members = 0usize;

        for file in files {
            let data = match storage.get_object(&file.file_key).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        "Skipping archive member {} ({}): {}",
                        file.filename,
                        file.file_key,
                        e
                    );
                    continue;
                }
            };

            let member_name = dedupe_name(&file.filename, &used_names);
            used_names.push(member_name.clone());

            let write = (|| -> zip::result::ZipResult<()> {
                writer.start_file(member_name.as_str(), options)?;
                writer.write_all(&data)?;
                Ok(())
            })();

            if let Err(e) = write {
                tracing::warn!("Failed to write archive member {}: {}", member_name, e);
                continue;
            }
            members += 1;
        }

        if members == 0 {
            return Err(AppError::NotFound(
                "No downloadable files in this room".to_string(),
            ));
        }

        let cursor = writer
            .finish()
            .map_err(|e| AppError::Internal(format!("Archive finalization failed: {}", e)))?;

        tracing::info!(
            "📦 Archived {} file(s) for room {} ({} bytes)",
            members,
            room.id,
            cursor.get_ref().len()
        );

        Ok(cursor.into_inner())
    }
}

/// Display filenames are not unique inside a room; archive members must be.
fn dedupe_name(name: &str, used: &[String]) -> String {
    if !used.iter().any(|u| u == name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    for n in 1.. {
        let candidate = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        if !used.iter().any(|u| u == &candidate) {
            return candidate;
        }
    }
    unreachable!()
}
