pub mod callback;
pub mod oauth;
pub mod pkce;
pub mod tokens;

pub use oauth::{AuthError, OAuthFlow};
pub use tokens::{TokenRecord, TokenStore};
