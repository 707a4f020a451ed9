//! Authentication for the Relay backend
//!
//! Access is granted by an emailed access code: the user requests a code
//! for their address, validates it, and the validated code becomes the
//! bearer token for API calls until it expires.

pub mod flow;
pub mod session;

pub use flow::{handle_api_auth_error, AuthClient, AuthErrorOutcome, ValidationOutcome};
pub use session::{Clock, Session, SessionStore, SystemClock, DEFAULT_EXPIRY_WARNING};

/// Auth endpoint set derived from the backend base URL.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub request_token: String,
    pub validate_token: String,
    pub logout: String,
}

impl AuthEndpoints {
    pub fn for_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            request_token: format!("{base}/api/v1/auth/request-token"),
            validate_token: format!("{base}/api/v1/auth/validate-token"),
            logout: format!("{base}/api/v1/auth/logout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_tolerate_trailing_slash() {
        let endpoints = AuthEndpoints::for_base_url("http://localhost:8000/");
        assert_eq!(
            endpoints.request_token,
            "http://localhost:8000/api/v1/auth/request-token"
        );
        assert_eq!(
            endpoints.validate_token,
            "http://localhost:8000/api/v1/auth/validate-token"
        );
        assert_eq!(endpoints.logout, "http://localhost:8000/api/v1/auth/logout");
    }
}
