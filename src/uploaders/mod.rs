pub mod http;
pub mod simulated;

pub use http::HttpEngine;
pub use simulated::SimulatedEngine;
