pub mod consts;
pub mod engine;
pub mod events;
