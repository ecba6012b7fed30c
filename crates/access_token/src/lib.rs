mod jwt;

pub use jwt::{
    AccessTokenClaims, AccessTokenHeader, Error, derive_public_key_pem, sign_rs256, verify_rs256,
};
