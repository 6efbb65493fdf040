pub mod alert;
pub mod baby;
pub mod creation;
pub mod measurement;

pub use alert::*;
pub use baby::*;
pub use creation::*;
pub use measurement::*;
