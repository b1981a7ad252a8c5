//! Bearer-token authentication and server verification.
//!
//! The deployed tool server validates Azure AD tokens. This module obtains
//! one with the client-credentials grant and uses it to probe the server.

mod probe;
mod token;

pub use probe::{EndpointCheck, ProbeReport, ServerProbe, HEALTH_PATH, TOOLS_PATH};
pub use token::{AccessToken, AuthSettings, TokenClient, DEFAULT_AUTHORITY};
