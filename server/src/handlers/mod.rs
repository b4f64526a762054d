mod capture;

pub use capture::*;
