pub mod appointment;
pub mod enums;
pub mod feedback;
pub mod identity;
pub mod prescription;

pub use appointment::*;
pub use enums::*;
pub use feedback::*;
pub use identity::*;
pub use prescription::*;
