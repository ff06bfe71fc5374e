pub mod middleware;
pub mod params;
pub mod routes;

pub use middleware::{client_addr, log_request_errors};
pub use params::{ClaimRequest, ClickRequest, ValidClaim, parse_body};
pub use routes::{
    ClaimResponse, ClickResponse, ClicksResponse, FailureResponse, SignerResponse,
    StatusResponse, claim, click, clicks, index, signer,
};
