pub mod math;
pub mod precession;
pub mod sexagesimal;
