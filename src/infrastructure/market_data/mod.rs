pub mod sim;
pub mod stooq;

pub use sim::{SimBarSource, SimQuoteSource};
pub use stooq::StooqBarSource;
