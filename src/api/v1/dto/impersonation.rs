use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::v1::dto::auth::TokenResponse;
use crate::services::auth::impersonation::ImpersonationSession;

#[derive(Debug, Clone, Deserialize)]
pub struct StartImpersonationBody {
    pub target_user_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndByTokenBody {
    pub jti: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpersonationResponse {
    pub session: ImpersonationSession,
    pub tokens: TokenResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSessionsResponse {
    pub sessions: Vec<ImpersonationSession>,
}
