pub mod hash;
pub mod temp;
pub mod validation;
