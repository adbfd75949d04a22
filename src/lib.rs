// epay-bridge
// 多租户商城与易支付之间的签名支付桥

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use state::AppState;
