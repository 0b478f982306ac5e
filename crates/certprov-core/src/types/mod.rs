mod certificate;
mod result;
mod session;

pub use certificate::*;
pub use result::*;
pub use session::*;
