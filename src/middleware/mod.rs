pub mod auth;

pub use auth::{
    issue_session,
    require_ingest_key,
    require_session,
    session_cookie,
    verify_session,
    SessionClaims,
    SessionUser,
    SESSION_COOKIE,
};
