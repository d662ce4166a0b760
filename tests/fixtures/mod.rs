//! Reusable relay fixtures.

mod relay;

pub use relay::RelayFixture;
