pub mod charger;
pub mod market;
pub mod poll_schedule;
pub mod service_call;
