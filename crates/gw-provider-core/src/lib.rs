pub mod model;
pub mod provider;
pub mod retry;
pub mod selector;

pub use model::{
    CacheTtlPreference, Key, KeyId, MessageRequest, ModelPrice, ModelPriceMode, ProviderChainEntry,
    ProviderConfig, ProviderId, ProviderType, ProxyUrlConfig, User, UserId, UserRole,
};
pub use provider::{Provider, ProxyRequest, ProxyResponse, StreamBody, UpstreamContext, UpstreamPassthroughError};
pub use retry::{execute, AttemptInput, ProxyError, RetryOutcome};
pub use selector::{candidate_set, order_candidates, SelectionContext};
