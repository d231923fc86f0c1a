mod token;
mod verifier;

pub use token::{DecodedToken, Role};
pub use verifier::{AuthVerifier, HttpAuthVerifier, VerifyError};
