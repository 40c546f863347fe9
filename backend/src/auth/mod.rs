mod token;

pub use token::{AuthError, TokenValidator};
