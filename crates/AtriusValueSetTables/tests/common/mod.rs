#![allow(dead_code)]

pub mod http;
pub mod warehouse;

pub use http::serve;
pub use warehouse::{FakeWarehouse, Event, EventLog};
