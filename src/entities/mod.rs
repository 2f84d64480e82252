pub mod commission_rate;
pub mod driver;
pub mod ledger_transaction;
pub mod passenger;
pub mod platform_earning;
pub mod role;
pub mod settlement;
pub mod tariff;
pub mod trip;
pub mod trip_history;
pub mod trip_location;
pub mod wallet;
