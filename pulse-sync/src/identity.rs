//! Durable client identity.
//!
//! A client keeps one user id for its whole life, stored in a small text
//! file so that restarts and reconnects register as the same user.

use std::fs;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Prefix of generated user ids.
pub const USER_ID_PREFIX: &str = "user-";

/// Fresh `user-<random>` id.
pub fn generate_user_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{USER_ID_PREFIX}{}", &random[..13])
}

/// Return the id stored at `path`, or generate one and store it there.
///
/// A missing or blank file counts as "no id yet". Parent directories are
/// created as needed.
pub fn load_or_create_user_id(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();

    match fs::read_to_string(path) {
        Ok(contents) => {
            let stored = contents.trim();
            if !stored.is_empty() {
                log::debug!("Loaded user id from {}", path.display());
                return Ok(stored.to_string());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let user_id = generate_user_id();
    fs::write(path, &user_id)?;
    log::info!("Created user id {user_id} at {}", path.display());
    Ok(user_id)
}
