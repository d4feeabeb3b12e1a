//! Upstream platform access: endpoint constants, URL normalization, and the
//! header-replaying poll client.

pub mod client;
pub mod url;

pub use client::{UpstreamClient, UpstreamResponse, build_studies_headers};
pub use url::{
    normalize_participant_submissions_url, normalize_studies_collection_url,
    normalize_submission_url,
};

/// Default studies collection endpoint, used when no capture names one.
pub const STUDIES_COLLECTION_URL: &str =
    "https://internal-api.prolific.com/api/v1/participant/studies/";
/// Host every accepted upstream URL must resolve to.
pub const STUDIES_COLLECTION_HOST: &str = "internal-api.prolific.com";
/// Canonical studies collection path.
pub const STUDIES_COLLECTION_PATH: &str = "/api/v1/participant/studies/";

/// Origin header injected on upstream polls.
pub const FRONTEND_ORIGIN: &str = "https://app.prolific.com";
/// Referer header injected on upstream polls.
pub const FRONTEND_REFERER: &str = "https://app.prolific.com/";
/// Client version header injected on upstream polls.
pub const CLIENT_VERSION: &str = "1ff599f2";
