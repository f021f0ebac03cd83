use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Mistral,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mistral => "mistral",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Mistral => "mistral-large-latest",
            Self::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Mistral => "https://api.mistral.ai",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn console_url(self) -> &'static str {
        match self {
            Self::Mistral => "https://console.mistral.ai/api-keys",
            Self::Gemini => "https://aistudio.google.com/app/apikey",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mistral" => Ok(Self::Mistral),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unsupported provider `{other}` (expected mistral|gemini)")),
        }
    }
}

/// Identity of one model backend plus its run-scoped quota state.
///
/// The identity never changes after construction. Only the fallback selector
/// flips `quota_exhausted`, and only in one direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    id: ProviderId,
    capability: String,
    quota_exhausted: bool,
}

impl ProviderProfile {
    pub fn new(id: ProviderId, capability: impl Into<String>) -> Self {
        Self { id, capability: capability.into(), quota_exhausted: false }
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.quota_exhausted
    }

    pub fn mark_quota_exhausted(&mut self) {
        self.quota_exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderId, ProviderKind, ProviderProfile};

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("Mistral".parse::<ProviderKind>(), Ok(ProviderKind::Mistral));
        assert_eq!(" gemini ".parse::<ProviderKind>(), Ok(ProviderKind::Gemini));
        assert!("openai".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn quota_flag_only_moves_forward() {
        let mut profile = ProviderProfile::new(ProviderId::new("mistral"), "text-generation");
        assert!(!profile.is_quota_exhausted());

        profile.mark_quota_exhausted();
        profile.mark_quota_exhausted();

        assert!(profile.is_quota_exhausted());
        assert_eq!(profile.id().as_str(), "mistral");
        assert_eq!(profile.capability(), "text-generation");
    }
}
