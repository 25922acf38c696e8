pub mod attempt;
pub mod proxy;
pub mod request;

pub use attempt::*;
pub use proxy::*;
pub use request::*;
