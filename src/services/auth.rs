use crate::api::error::AppError;
use crate::entities::{prelude::*, *};
use crate::utils::validation::is_valid_room_id;
use sea_orm::{DatabaseConnection, EntityTrait};
use subtle::ConstantTimeEq;

/// Who is asking. Authors hold the room's opaque token; guests are known by
/// their device string appearing in the room's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Author,
    Guest,
}

/// Constant-time string comparison for secrets. Length leaks, content does
/// not.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

pub struct AuthService;

impl AuthService {
    /// True iff `token` is the author token of `room_id`. False for
    /// malformed room ids, missing rows, or mismatch, never an error the
    /// caller could distinguish.
    pub async fn is_author_token(
        db: &DatabaseConnection,
        room_id: &str,
        token: &str,
    ) -> Result<bool, AppError> {
        if !is_valid_room_id(room_id) || token.is_empty() {
            return Ok(false);
        }

        let Some(secret) = RoomSecrets::find_by_id(room_id).one(db).await? else {
            return Ok(false);
        };

        Ok(constant_time_eq(token, &secret.author_token))
    }

    /// Author path wins; otherwise the device must appear in the room's
    /// presence. Gates download, download lock/unlock and bulk-mark.
    pub async fn authorize(
        db: &DatabaseConnection,
        room_id: &str,
        token: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<Principal, AppError> {
        if let Some(token) = token {
            if Self::is_author_token(db, room_id, token).await? {
                return Ok(Principal::Author);
            }
        }

        if let Some(device_id) = device_id {
            if !device_id.is_empty() && is_valid_room_id(room_id) {
                let present = RoomPresence::find_by_id((room_id.to_string(), device_id.to_string()))
                    .one(db)
                    .await?
                    .is_some();
                if present {
                    return Ok(Principal::Guest);
                }
            }
        }

        Err(AppError::Unauthorized(
            "Not the room author and not present in the room".to_string(),
        ))
    }

    /// Compare a client-supplied password hash against the stored one.
    pub async fn verify_password_hash(
        db: &DatabaseConnection,
        room_id: &str,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        if !is_valid_room_id(room_id) {
            return Ok(false);
        }
        let Some(secret) = RoomSecrets::find_by_id(room_id).one(db).await? else {
            return Ok(false);
        };
        Ok(constant_time_eq(password_hash, &secret.password_hash))
    }

    /// Generate a fresh author token: 32 random bytes, URL-safe base64.
    pub fn generate_author_token() -> String {
        use base64::Engine;
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }
}
