pub mod authorization_request;
pub mod claims;
pub mod credential_format;
pub mod dcql_query;
pub mod iso_18013_5;
pub mod iso_18013_7;
pub mod jwe;
pub mod jwt;
pub mod object;
pub mod proof;
pub mod response;
pub mod sd_jwt;
pub mod signer;
pub mod storage;
pub mod util;
