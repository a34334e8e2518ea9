//! Delivery loop: link check, consume, sign, send, flush pending

mod worker;

pub use worker::{DeliveryConfig, DeliveryWorker};
