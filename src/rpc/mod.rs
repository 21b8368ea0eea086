//! RPC clients for the external analysis services, with a uniform
//! retry/safe-default envelope and filesystem fallbacks.

pub mod architect;
pub mod contracts;
pub mod intel;
pub mod retry;
pub mod transport;

pub use architect::{ArchitectClient, decompose_prd_basic, decompose_with_fallback};
pub use contracts::{ContractRegistryClient, contracts_with_fallback, scan_contract_files};
pub use intel::{CodeIntelClient, codebase_map_with_fallback, generate_codebase_map};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, ToolTransport};
