pub mod dispatch;
pub mod fare;
pub mod gateway;
pub mod ledger;
pub mod legacy_coordinates;
pub mod lifecycle;
pub mod matcher;
pub mod tracker;
