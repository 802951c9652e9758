// Moderation policy: the locally cached thresholds and toggles.
//
// `model` defines the policy and how it is coerced and enforced, `traits`
// abstracts where fresh policies come from, and `store` caches them with
// single-flight refresh.

pub mod model;
pub mod store;
pub mod traits;

pub use model::Policy;
pub use store::PolicyStore;
pub use traits::PolicySource;
