pub mod admin;
pub mod driver;
pub mod passenger;
pub mod realtime;
pub mod trips;
pub mod wallet;
