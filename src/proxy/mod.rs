pub mod upstream;

pub use upstream::{RelayBody, RelayClient, RelayError, RelayRequest, UpstreamResponse};
