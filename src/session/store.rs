use super::types::{SessionError, SessionProfile};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PROFILE_SUFFIX: &str = ".session.json";

/// Saved login profiles, one JSON file per profile.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, profile: &SessionProfile) -> Result<PathBuf, SessionError> {
        let path = self.profile_path(&profile.name)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::Profile(format!("Failed to create {}: {}", self.dir.display(), e)))?;

        let json = serde_json::to_string_pretty(profile)
            .map_err(|e| SessionError::Profile(format!("Failed to serialize profile: {}", e)))?;

        // holds a bearer token: created 0600 under a temp name, then renamed
        let tmp = path.with_extension("json.tmp");
        // a leftover temp file would keep its old mode
        let _ = tokio::fs::remove_file(&tmp).await;
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| SessionError::Profile(format!("Failed to write {}: {}", tmp.display(), e)))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| SessionError::Profile(format!("Failed to write {}: {}", tmp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| SessionError::Profile(format!("Failed to write {}: {}", tmp.display(), e)))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::Profile(format!("Failed to write {}: {}", path.display(), e)))?;

        info!(profile = %profile.name, "Saved session profile");
        Ok(path)
    }

    pub async fn load(&self, name: &str) -> Result<SessionProfile, SessionError> {
        let path = self.profile_path(name)?;

        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::Profile(format!("No saved session named '{}'", name)));
            }
            Err(e) => {
                return Err(SessionError::Profile(format!("Failed to read {}: {}", path.display(), e)));
            }
        };

        serde_json::from_str(&json)
            .map_err(|e| SessionError::Profile(format!("Invalid session file {}: {}", path.display(), e)))
    }

    /// All readable profiles, sorted by name. Unreadable files are skipped.
    pub async fn list(&self) -> Result<Vec<SessionProfile>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SessionError::Profile(format!("Failed to list {}: {}", self.dir.display(), e)));
            }
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::Profile(e.to_string()))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = file_name.strip_suffix(PROFILE_SUFFIX) else {
                continue;
            };
            match self.load(name).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => debug!(file = %file_name, error = %e, "Skipping session file"),
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    /// Most recently used profile, falling back to the newest one.
    pub async fn latest(&self) -> Result<Option<SessionProfile>, SessionError> {
        let profiles = self.list().await?;
        Ok(profiles
            .into_iter()
            .max_by_key(|p| p.last_used.unwrap_or(p.created_at)))
    }

    pub async fn remove(&self, name: &str) -> Result<bool, SessionError> {
        let path = self.profile_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(profile = %name, "Removed session profile");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Profile(format!("Failed to remove {}: {}", path.display(), e))),
        }
    }

    pub async fn touch(&self, name: &str) -> Result<SessionProfile, SessionError> {
        let mut profile = self.load(name).await?;
        profile.last_used = Some(Utc::now());
        self.save(&profile).await?;
        Ok(profile)
    }

    fn profile_path(&self, name: &str) -> Result<PathBuf, SessionError> {
        validate_profile_name(name)?;
        Ok(self.dir.join(format!("{}{}", name, PROFILE_SUFFIX)))
    }
}

pub fn validate_profile_name(name: &str) -> Result<(), SessionError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'));

    if valid {
        Ok(())
    } else {
        Err(SessionError::Profile(format!(
            "Invalid session name '{}': use letters, digits, '_', '-' or '+'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_save_load_and_list() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));

        let profile = SessionProfile::new("caster_bot", "https://api.example.org", "1:abc");
        assert_ok!(store.save(&profile).await);
        assert_ok!(store.save(&SessionProfile::new("another", "https://api.example.org", "2:def")).await);

        let loaded = store.load("caster_bot").await.unwrap();
        assert_eq!(loaded.token, "1:abc");

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["another".to_string(), "caster_bot".to_string()]);
    }

    #[tokio::test]
    async fn test_touch_marks_latest() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.save(&SessionProfile::new("first", "u", "t1")).await.unwrap();
        store.save(&SessionProfile::new("second", "u", "t2")).await.unwrap();
        store.touch("first").await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.name, "first");
    }

    #[tokio::test]
    async fn test_missing_and_invalid_names() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        assert_err!(store.load("nobody").await);
        assert_err!(store.load("../escape").await);
        assert!(!store.remove("nobody").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_profile_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let path = store.save(&SessionProfile::new("secret", "u", "1:abc")).await.unwrap();

        // a stale file with loose permissions is replaced, not reused
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        store.save(&SessionProfile::new("secret", "u", "2:def")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!dir.path().join("secret.session.json.tmp").exists());
        assert_eq!(store.load("secret").await.unwrap().token, "2:def");
    }

    #[test]
    fn test_validate_profile_name() {
        assert!(validate_profile_name("+15551234567").is_ok());
        assert!(validate_profile_name("bot_1-a").is_ok());
        assert!(validate_profile_name("").is_err());
        assert!(validate_profile_name("a/b").is_err());
        assert!(validate_profile_name("a.b").is_err());
    }
}
