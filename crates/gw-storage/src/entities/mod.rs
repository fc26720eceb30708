pub mod api_keys;
pub mod circuit_breaker_states;
pub mod error_rules;
pub mod message_requests;
pub mod model_prices;
pub mod providers;
pub mod request_filters;
pub mod users;

pub use api_keys::Entity as ApiKeys;
pub use circuit_breaker_states::Entity as CircuitBreakerStates;
pub use error_rules::Entity as ErrorRules;
pub use message_requests::Entity as MessageRequests;
pub use model_prices::Entity as ModelPrices;
pub use providers::Entity as Providers;
pub use request_filters::Entity as RequestFilters;
pub use users::Entity as Users;
