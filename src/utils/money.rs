/// Round an amount to whole cents.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
