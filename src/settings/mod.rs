pub mod notify;
pub mod store;

pub use notify::{LogNotifier, Notice, NoticeLevel, Notifier, RecordingNotifier};
pub use store::{JsonFileStore, MemoryStore, PersistenceError, PreferenceStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const SCAN_PREFERENCES_KEY: &str = "scan_preferences";
pub const API_KEYS_KEY: &str = "user_api_keys";

/// Which suggestion categories may push a photo into the deletion bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanPreferences {
    pub scan_screenshots: bool,
    pub scan_blurry: bool,
    pub scan_duplicates: bool,
    pub scan_no_people: bool,
}

impl Default for ScanPreferences {
    fn default() -> Self {
        Self {
            scan_screenshots: true,
            scan_blurry: true,
            scan_duplicates: true,
            scan_no_people: false,
        }
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPreferencesPatch {
    pub scan_screenshots: Option<bool>,
    pub scan_blurry: Option<bool>,
    pub scan_duplicates: Option<bool>,
    pub scan_no_people: Option<bool>,
}

impl ScanPreferences {
    pub fn apply(&self, patch: ScanPreferencesPatch) -> Self {
        Self {
            scan_screenshots: patch.scan_screenshots.unwrap_or(self.scan_screenshots),
            scan_blurry: patch.scan_blurry.unwrap_or(self.scan_blurry),
            scan_duplicates: patch.scan_duplicates.unwrap_or(self.scan_duplicates),
            scan_no_people: patch.scan_no_people.unwrap_or(self.scan_no_people),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(name = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    #[value(name = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
    ];
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
        };
        f.write_str(name)
    }
}

/// User-supplied API keys, one optional entry per provider.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<String>,
}

impl ProviderCredentials {
    /// The key for `kind`, ignoring blank entries.
    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        let slot = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::DeepSeek => &self.deepseek,
        };
        slot.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn set(&mut self, kind: ProviderKind, key: Option<String>) {
        let slot = match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::DeepSeek => &mut self.deepseek,
        };
        *slot = key;
    }

    pub fn is_empty(&self) -> bool {
        ProviderKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

// Keys must never end up in logs.
impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ProviderCredentials");
        for kind in ProviderKind::ALL {
            s.field(&kind.to_string(), &self.get(kind).map(mask_key));
        }
        s.finish()
    }
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Scan preferences and provider credentials, loaded once per session and
/// written back through the platform store on every change.
pub struct SettingsService<S: PreferenceStore> {
    store: S,
    notifier: Arc<dyn Notifier>,
    preferences: ScanPreferences,
    credentials: ProviderCredentials,
}

impl<S: PreferenceStore> SettingsService<S> {
    pub async fn load(store: S, notifier: Arc<dyn Notifier>) -> Self {
        let preferences = load_json(&store, SCAN_PREFERENCES_KEY, notifier.as_ref()).await;
        let credentials = load_json(&store, API_KEYS_KEY, notifier.as_ref()).await;

        Self {
            store,
            notifier,
            preferences,
            credentials,
        }
    }

    pub fn preferences(&self) -> ScanPreferences {
        self.preferences
    }

    pub fn credentials(&self) -> &ProviderCredentials {
        &self.credentials
    }

    pub async fn update_preferences(
        &mut self,
        patch: ScanPreferencesPatch,
    ) -> Result<ScanPreferences, PersistenceError> {
        let updated = self.preferences.apply(patch);
        self.persist(SCAN_PREFERENCES_KEY, &updated, "Failed to save scan preferences")
            .await?;
        self.preferences = updated;
        Ok(updated)
    }

    pub async fn update_api_key(
        &mut self,
        kind: ProviderKind,
        key: String,
    ) -> Result<(), PersistenceError> {
        let mut updated = self.credentials.clone();
        updated.set(kind, Some(key));
        self.persist(API_KEYS_KEY, &updated, "Failed to save API key")
            .await?;
        self.credentials = updated;
        log::info!("Stored API key for {}", kind);
        Ok(())
    }

    pub async fn remove_api_key(&mut self, kind: ProviderKind) -> Result<(), PersistenceError> {
        let mut updated = self.credentials.clone();
        updated.set(kind, None);
        self.persist(API_KEYS_KEY, &updated, "Failed to remove API key")
            .await?;
        self.credentials = updated;
        log::info!("Removed API key for {}", kind);
        Ok(())
    }

    pub async fn clear_api_keys(&mut self) -> Result<(), PersistenceError> {
        if let Err(e) = self.store.remove(API_KEYS_KEY).await {
            self.notifier
                .notify(Notice::error(format!("Failed to clear API keys: {}", e)));
            return Err(e);
        }
        self.credentials = ProviderCredentials::default();
        Ok(())
    }

    async fn persist<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        failure: &str,
    ) -> Result<(), PersistenceError> {
        let result = match serde_json::to_string(value) {
            Ok(json) => self.store.set(key, json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            log::error!("{}: {}", failure, e);
            self.notifier.notify(Notice::error(format!("{}: {}", failure, e)));
        }
        result
    }
}

/// Missing values fall back to defaults silently; unreadable ones fall back
/// too, but the user is told.
async fn load_json<T, S>(store: &S, key: &str, notifier: &dyn Notifier) -> T
where
    T: serde::de::DeserializeOwned + Default,
    S: PreferenceStore,
{
    let parsed = match store.get(key).await {
        Ok(None) => return T::default(),
        Ok(Some(raw)) => serde_json::from_str(&raw).map_err(PersistenceError::from),
        Err(e) => Err(e),
    };

    parsed.unwrap_or_else(|e| {
        log::error!("Failed to load {}: {}", key, e);
        notifier.notify(Notice::error(format!(
            "Could not load saved settings ({}), using defaults",
            key
        )));
        T::default()
    })
}
