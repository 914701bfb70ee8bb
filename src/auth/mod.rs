pub mod password;
pub mod token;

pub use token::{AccessToken, TokenError, TokenIssuer};
