pub mod journey;
pub mod notification;
pub mod route;
pub mod stop;

pub use journey::*;
pub use notification::*;
pub use route::*;
pub use stop::*;
