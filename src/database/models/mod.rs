pub mod occurrence;
pub mod prayer;
pub mod user_preference;

pub use occurrence::*;
pub use prayer::*;
pub use user_preference::*;
