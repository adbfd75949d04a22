// 服务层模块
// 包含所有业务逻辑服务

pub mod credential_service;
pub mod epay_client;
pub mod gateway_service;
pub mod order_service;
pub mod platform_client;
pub mod site_service;
pub mod transaction_service;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出服务
pub use credential_service::CredentialResolver;
pub use epay_client::{CreateOrder, EpayClient, ProcessorClient, ProcessorError};
pub use gateway_service::GatewayCatalog;
pub use order_service::OrderCorrelation;
pub use platform_client::{GraphqlPlatformClient, PlatformClient, PlatformError, TransactionEvent};
pub use site_service::SiteRegistry;
pub use transaction_service::{OrchestratorSettings, TransactionOrchestrator};
