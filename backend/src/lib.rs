//! Concurrency-control core for flash-sale commerce.

pub mod domain;
pub mod outbound;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
