use anyhow::{Result, anyhow};

/// Strict UUID v1-v5 shape check for room identifiers. Everything reaching
/// the database or the object store as a room id goes through this first.
pub fn is_valid_room_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if b != b'-' {
                    return false;
                }
            }
            14 => {
                // version nibble, 1-5
                if !(b'1'..=b'5').contains(&b) {
                    return false;
                }
            }
            19 => {
                // variant nibble
                if !matches!(b, b'8' | b'9' | b'a' | b'b' | b'A' | b'B') {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// Password hashes are sha256 hex computed client-side: exactly 64 lower-hex.
pub fn is_valid_password_hash(hash: &str) -> bool {
    hash.len() == 64
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Minimal email shape gate; the mailer provider does the real validation.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

/// Reject filenames before blob-key construction. Unlike a general file
/// server we do not rewrite names: a room upload with a hostile name is
/// refused outright.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(anyhow!("Filename cannot be empty"));
    }
    if filename.len() > 255 {
        return Err(anyhow!("Filename too long"));
    }
    if filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path separator in uploaded filename: {}", filename);
        return Err(anyhow!("Filename must not contain path separators"));
    }
    if filename.contains('\0') || filename.chars().any(|c| c.is_control()) {
        return Err(anyhow!("Filename contains control characters"));
    }
    if filename == "." || filename == ".." {
        return Err(anyhow!("Invalid filename"));
    }
    Ok(())
}

/// Slug for archive names: lowercase alphanumeric runs joined by '-'.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "room".to_string() } else { slug }
}

/// URL-fragment key parameter riding on share links: base64url, 32-128 chars.
pub fn is_valid_key_fragment(key: &str) -> bool {
    (32..=128).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
