#[macro_use]
pub mod tracing_util;

mod channels;
pub use channels::*;

pub mod hash_util;

pub mod validation_util;

pub mod metrics_util;

mod approx_f64;
pub use approx_f64::*;

mod panic_util;
pub use panic_util::*;
