use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Whose traffic a counter tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    User,
    Client,
    Ip,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Client => "client",
            Self::Ip => "ip",
        }
    }
}

impl FromStr for LimitType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "client" => Ok(Self::Client),
            "ip" => Ok(Self::Ip),
            _ => Err(UnknownVariant),
        }
    }
}

/// Which class of endpoint a request hits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitCategory {
    General,
    Auth,
    Admin,
    Sensitive,
}

impl LimitCategory {
    pub const ALL: [LimitCategory; 4] = [Self::General, Self::Auth, Self::Admin, Self::Sensitive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Admin => "admin",
            Self::Sensitive => "sensitive",
        }
    }
}

impl FromStr for LimitCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "auth" => Ok(Self::Auth),
            "admin" => Ok(Self::Admin),
            "sensitive" => Ok(Self::Sensitive),
            _ => Err(UnknownVariant),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownVariant;

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("unknown variant")
    }
}

impl std::error::Error for UnknownVariant {}

/// `limit` requests per `window`, plus `burst` extra before rejecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub burst: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: u64, burst: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            burst,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Requests admitted per window.
    pub fn allowed(&self) -> u64 {
        self.limit.saturating_add(self.burst)
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// One rule per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub general: RateLimitRule,
    pub auth: RateLimitRule,
    pub admin: RateLimitRule,
    pub sensitive: RateLimitRule,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            general: RateLimitRule::new(100, 20, 60),
            auth: RateLimitRule::new(10, 2, 60),
            admin: RateLimitRule::new(60, 10, 60),
            sensitive: RateLimitRule::new(5, 0, 300),
        }
    }
}

impl RateLimitPolicy {
    pub fn rule(&self, category: LimitCategory) -> &RateLimitRule {
        match category {
            LimitCategory::General => &self.general,
            LimitCategory::Auth => &self.auth,
            LimitCategory::Admin => &self.admin,
            LimitCategory::Sensitive => &self.sensitive,
        }
    }

    pub fn rule_mut(&mut self, category: LimitCategory) -> &mut RateLimitRule {
        match category {
            LimitCategory::General => &mut self.general,
            LimitCategory::Auth => &mut self.auth,
            LimitCategory::Admin => &mut self.admin,
            LimitCategory::Sensitive => &mut self.sensitive,
        }
    }
}
