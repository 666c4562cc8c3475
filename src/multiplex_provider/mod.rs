pub mod builder;
mod dialer;
pub mod discovery;
pub mod errors;
#[cfg(feature = "k8s-discovery")]
pub mod k8s;
pub mod provider;
pub mod registry;
mod retry;
pub mod subscription;

pub use builder::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_DIAL_TIMEOUT, DEFAULT_RETRY_DELAY, DEFAULT_RETRY_LIMIT,
    DEFAULT_RETRY_PERIOD, DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY, MultiplexProviderBuilder,
};
pub use discovery::{Discovery, StaticEndpoints};
pub use errors::{BroadcastError, EndpointError, Error};
#[cfg(feature = "k8s-discovery")]
pub use k8s::KubernetesEndpoints;
pub use provider::{BatchCall, MultiplexProvider};
pub use registry::{Endpoint, EndpointRegistry};
pub use subscription::{HeadEvent, HeadsSubscription};
