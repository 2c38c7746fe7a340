//! Shared types for the Pressroom platform.

pub mod types;

pub use types::{ParseTierError, SubscriptionTier};
