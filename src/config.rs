use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub dispatch: DispatchConfig,
    pub settlement: SettlementConfig,
    pub gateway_url: Option<String>,
    pub gateway_webhook_secret: Option<String>,
    /// Local development only: accept webhooks when no secret is set
    pub allow_unsigned_webhooks: bool,
}

/// Tunables for matching, fan-out and tracing.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub broadcast_radius_km: f64,
    pub driver_fanout: usize,
    pub nearby_passenger_limit: usize,
    pub location_throttle: Duration,
    pub trace_interval: Duration,
    pub coordinate_correction: bool,
    pub fare_from_trace: bool,
}

#[derive(Clone, Debug)]
pub struct SettlementConfig {
    /// Percentage applied when no commission rate row is active
    pub default_commission_rate: f64,
    pub retry_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            broadcast_radius_km: 5.0,
            driver_fanout: 5,
            nearby_passenger_limit: 5,
            location_throttle: Duration::from_millis(3000),
            trace_interval: Duration::from_secs(60),
            coordinate_correction: true,
            fare_from_trace: false,
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            default_commission_rate: 15.0,
            retry_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dispatch_defaults = DispatchConfig::default();
        let settlement_defaults = SettlementConfig::default();

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_or("SERVER_PORT", 3000),
            dispatch: DispatchConfig {
                broadcast_radius_km: env_or(
                    "BROADCAST_RADIUS_KM",
                    dispatch_defaults.broadcast_radius_km,
                ),
                driver_fanout: env_or("DISPATCH_FANOUT", dispatch_defaults.driver_fanout),
                nearby_passenger_limit: env_or(
                    "NEARBY_PASSENGER_LIMIT",
                    dispatch_defaults.nearby_passenger_limit,
                ),
                location_throttle: Duration::from_millis(env_or(
                    "LOCATION_UPDATE_THROTTLE_MS",
                    3000,
                )),
                trace_interval: Duration::from_secs(env_or("TRACE_INTERVAL_SECS", 60)),
                coordinate_correction: env_or(
                    "COORDINATE_CORRECTION",
                    dispatch_defaults.coordinate_correction,
                ),
                fare_from_trace: env_or("FARE_FROM_TRACE", dispatch_defaults.fare_from_trace),
            },
            settlement: SettlementConfig {
                default_commission_rate: env_or(
                    "DEFAULT_COMMISSION_RATE",
                    settlement_defaults.default_commission_rate,
                ),
                retry_interval: Duration::from_secs(env_or("SETTLEMENT_RETRY_SECS", 300)),
            },
            gateway_url: env::var("GATEWAY_URL").ok().filter(|v| !v.is_empty()),
            gateway_webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            allow_unsigned_webhooks: env_or("GATEWAY_ALLOW_UNSIGNED_WEBHOOKS", false),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => parse_var(key, &raw),
        Err(_) => default,
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> T {
    raw.trim()
        .parse()
        .unwrap_or_else(|_| panic!("{} must be a valid value, got {:?}", key, raw))
}
