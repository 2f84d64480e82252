use chrono::{Duration, SubsecRound, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;

/// Current time at the precision the database keeps.
pub fn now() -> DateTimeWithTimeZone {
    Utc::now().trunc_subsecs(6).fixed_offset()
}

/// A timestamp strictly after `prev`, so transition stamps keep increasing
/// even when two transitions land in the same microsecond.
pub fn stamp_after(prev: DateTimeWithTimeZone) -> DateTimeWithTimeZone {
    let now = now();
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}
