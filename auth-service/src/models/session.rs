//! Session model - one row per authenticated device, keyed by refresh-token hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    SessionLimit,
    UserLogout,
    ForcedLogout,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::SessionLimit => "session_limit",
            TerminationReason::UserLogout => "user_logout",
            TerminationReason::ForcedLogout => "forced_logout",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "session_limit" => Some(TerminationReason::SessionLimit),
            "user_logout" => Some(TerminationReason::UserLogout),
            "forced_logout" => Some(TerminationReason::ForcedLogout),
            _ => None,
        }
    }
}

/// Device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Unknown => "unknown",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "desktop" => DeviceType::Desktop,
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            _ => DeviceType::Unknown,
        }
    }
}

/// Request metadata captured when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl ClientInfo {
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            user_agent,
            ip_address,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        let Some(ua) = self.user_agent.as_deref() else {
            return DeviceType::Unknown;
        };
        let ua = ua.to_lowercase();
        if ua.contains("mobile") {
            DeviceType::Mobile
        } else if ua.contains("tablet") || ua.contains("ipad") {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }

    /// Browser family. Edge and Chrome both advertise "Chrome", and Chrome
    /// advertises "Safari", so the more specific tokens are tested first.
    pub fn client_name(&self) -> Option<String> {
        let ua = self.user_agent.as_deref()?;
        let name = if ua.contains("Edg") {
            "Edge"
        } else if ua.contains("Firefox") {
            "Firefox"
        } else if ua.contains("Chrome") {
            "Chrome"
        } else if ua.contains("Safari") {
            "Safari"
        } else {
            return None;
        };
        Some(name.to_string())
    }
}

/// Session entity.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device_type_code: String,
    pub client_name: Option<String>,
    pub is_active: bool,
    pub last_activity_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub terminated_utc: Option<DateTime<Utc>>,
    pub termination_reason_code: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Session {
    /// Create a new active session. Only the hash of the refresh token is kept.
    pub fn new(
        user_id: Uuid,
        refresh_token_hash: String,
        client: &ClientInfo,
        expires_utc: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            refresh_token_hash,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            device_type_code: client.device_type().as_str().to_string(),
            client_name: client.client_name(),
            is_active: true,
            last_activity_utc: now,
            expires_utc,
            terminated_utc: None,
            termination_reason_code: None,
            created_utc: now,
        }
    }

    /// Active and not past its absolute expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_utc > now
    }

    pub fn terminate(&mut self, reason: TerminationReason, now: DateTime<Utc>) {
        self.is_active = false;
        self.terminated_utc = Some(now);
        self.termination_reason_code = Some(reason.as_str().to_string());
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason_code
            .as_deref()
            .and_then(TerminationReason::from_code)
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType::from_code(&self.device_type_code)
    }
}

/// Picks the sessions to terminate so that inserting one more keeps the
/// principal at or below `cap` valid sessions.
///
/// Least recently active goes first; ties fall to the earliest created.
pub fn select_evictions(active: &[Session], cap: usize) -> Vec<Uuid> {
    let cap = cap.max(1);
    if active.len() < cap {
        return Vec::new();
    }

    let mut ordered: Vec<&Session> = active.iter().collect();
    ordered.sort_by(|a, b| {
        a.last_activity_utc
            .cmp(&b.last_activity_utc)
            .then(a.created_utc.cmp(&b.created_utc))
    });

    let excess = active.len() + 1 - cap;
    ordered
        .into_iter()
        .take(excess)
        .map(|s| s.session_id)
        .collect()
}

/// Session info for API responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device_type: DeviceType,
    pub client_name: Option<String>,
    pub ip_address: Option<String>,
    pub last_activity_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            device_type: s.device_type(),
            session_id: s.session_id,
            client_name: s.client_name,
            ip_address: s.ip_address,
            last_activity_utc: s.last_activity_utc,
            expires_utc: s.expires_utc,
            created_utc: s.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0";
    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

    fn session_at(last_activity_offset: i64, created_offset: i64) -> Session {
        let base = Utc::now();
        let mut s = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4().to_string(),
            &ClientInfo::default(),
            base + Duration::days(30),
        );
        s.last_activity_utc = base + Duration::seconds(last_activity_offset);
        s.created_utc = base + Duration::seconds(created_offset);
        s
    }

    #[test]
    fn classifies_user_agents() {
        let chrome = ClientInfo::new(Some(CHROME_UA.into()), None);
        assert_eq!(chrome.device_type(), DeviceType::Desktop);
        assert_eq!(chrome.client_name().as_deref(), Some("Chrome"));

        let edge = ClientInfo::new(Some(EDGE_UA.into()), None);
        assert_eq!(edge.client_name().as_deref(), Some("Edge"));

        let iphone = ClientInfo::new(Some(IPHONE_UA.into()), None);
        assert_eq!(iphone.device_type(), DeviceType::Mobile);
        assert_eq!(iphone.client_name().as_deref(), Some("Safari"));

        let none = ClientInfo::default();
        assert_eq!(none.device_type(), DeviceType::Unknown);
        assert_eq!(none.client_name(), None);
    }

    #[test]
    fn terminate_records_reason() {
        let now = Utc::now();
        let mut s = session_at(0, 0);
        assert!(s.is_valid(now));

        s.terminate(TerminationReason::UserLogout, now);
        assert!(!s.is_valid(now));
        assert_eq!(s.termination_reason(), Some(TerminationReason::UserLogout));
        assert_eq!(s.terminated_utc, Some(now));
    }

    #[test]
    fn expired_session_is_not_valid() {
        let mut s = session_at(0, 0);
        s.expires_utc = Utc::now() - Duration::seconds(1);
        assert!(!s.is_valid(Utc::now()));
    }

    #[test]
    fn no_eviction_below_cap() {
        let sessions = vec![session_at(0, 0), session_at(1, 1)];
        assert!(select_evictions(&sessions, 3).is_empty());
    }

    #[test]
    fn evicts_least_recently_active_at_cap() {
        let oldest = session_at(-100, -5);
        let middle = session_at(-50, -300);
        let newest = session_at(-1, -200);
        let sessions = vec![newest.clone(), oldest.clone(), middle.clone()];

        assert_eq!(select_evictions(&sessions, 3), vec![oldest.session_id]);
    }

    #[test]
    fn ties_fall_to_earliest_created() {
        let first = session_at(-10, -100);
        let second = session_at(-10, -50);
        let sessions = vec![second.clone(), first.clone()];

        assert_eq!(select_evictions(&sessions, 2), vec![first.session_id]);
    }

    #[test]
    fn over_cap_evicts_down_to_cap_minus_one() {
        let sessions: Vec<Session> = (0..5).map(|i| session_at(i, i)).collect();
        let evicted = select_evictions(&sessions, 3);
        assert_eq!(evicted.len(), 3);
        assert_eq!(evicted[0], sessions[0].session_id);
        assert_eq!(evicted[2], sessions[2].session_id);
    }
}
