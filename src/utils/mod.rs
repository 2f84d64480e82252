pub mod geo;
pub mod jwt;
pub mod money;
pub mod time;
