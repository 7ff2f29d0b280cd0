pub mod adapters;
pub mod app;
pub mod domain;

pub const DOMAIN: &str = "50five";

#[cfg(test)]
mod test_support;
