use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "ombuds")]
#[command(about = "ombud chat relay server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "OMBUDS_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "OMBUDS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "OMBUDS_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    #[arg(long, default_value = "32", env = "OMBUDS_MAX_CONNS_IP")]
    pub max_conns_ip: usize,
    /// Maximum messages per minute per connection.
    #[arg(long, default_value = "120", env = "OMBUDS_MSG_RATE")]
    pub msg_rate: u32,
    /// Maximum inbound text frame size in bytes.
    #[arg(long, default_value = "16384", env = "OMBUDS_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Path to the shared token secret file.
    #[arg(long, env = "OMBUDS_TOKEN_SECRET")]
    pub token_secret: Option<PathBuf>,
    /// Authentication handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "OMBUDS_AUTH_TIMEOUT")]
    pub auth_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "OMBUDS_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "OMBUDS_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Automated bot replies issued per identity before escalation.
    #[arg(long, default_value = "5", env = "OMBUDS_BOT_REPLY_LIMIT")]
    pub bot_reply_limit: u32,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    pub max_conns_ip: usize,
    /// Maximum messages per minute per connection.
    pub msg_rate: u32,
    /// Maximum inbound text frame size in bytes.
    pub max_payload: usize,
    /// Authentication handshake timeout in seconds.
    pub auth_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
    /// Automated bot replies issued per identity before escalation.
    pub bot_reply_limit: u32,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_conns_ip == 0 {
            return Err("max_conns_ip must be greater than 0".to_string());
        }
        if self.max_conns_ip > self.max_conns {
            return Err("max_conns_ip cannot exceed max_conns".to_string());
        }

        if self.msg_rate == 0 {
            return Err("msg_rate must be greater than 0".to_string());
        }
        if self.msg_rate > 100_000 {
            return Err("msg_rate exceeds reasonable limit (100,000 msg/min)".to_string());
        }

        // Frames are single JSON chat messages; anything bigger than 1 MiB
        // is not a chat message.
        const MAX_ALLOWED_PAYLOAD: usize = 1_048_576;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({MAX_ALLOWED_PAYLOAD} bytes)"
            ));
        }

        if self.auth_timeout == 0 {
            return Err("auth_timeout must be greater than 0".to_string());
        }
        if self.auth_timeout > 300 {
            return Err("auth_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }

        if self.bot_reply_limit == 0 {
            return Err("bot_reply_limit must be greater than 0".to_string());
        }
        if self.bot_reply_limit > 1000 {
            return Err("bot_reply_limit exceeds reasonable limit (1000)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_conns_ip: args.max_conns_ip,
            msg_rate: args.msg_rate,
            max_payload: args.max_payload,
            auth_timeout: args.auth_timeout,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
            bot_reply_limit: args.bot_reply_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:8080".parse().unwrap(),
            metrics_addr: "127.0.0.1:9090".parse().unwrap(),
            max_conns: 1000,
            max_conns_ip: 32,
            msg_rate: 120,
            max_payload: 16_384,
            auth_timeout: 5,
            ping_interval: 30,
            idle_timeout: 120,
            bot_reply_limit: 5,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn max_conns_zero() {
        let mut c = valid_config();
        c.max_conns = 0;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_conns_too_large() {
        let mut c = valid_config();
        c.max_conns = 1_000_001;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_conns_ip_zero() {
        let mut c = valid_config();
        c.max_conns_ip = 0;
        assert!(c.validate().unwrap_err().contains("max_conns_ip"));
    }

    #[test]
    fn max_conns_ip_exceeds_max_conns() {
        let mut c = valid_config();
        c.max_conns_ip = c.max_conns + 1;
        assert!(c.validate().unwrap_err().contains("max_conns_ip"));
    }

    #[test]
    fn msg_rate_zero() {
        let mut c = valid_config();
        c.msg_rate = 0;
        assert!(c.validate().unwrap_err().contains("msg_rate"));
    }

    #[test]
    fn max_payload_too_large() {
        let mut c = valid_config();
        c.max_payload = 1_048_577;
        assert!(c.validate().unwrap_err().contains("max_payload"));
    }

    #[test]
    fn auth_timeout_zero() {
        let mut c = valid_config();
        c.auth_timeout = 0;
        assert!(c.validate().unwrap_err().contains("auth_timeout"));
    }

    #[test]
    fn ping_interval_too_large() {
        let mut c = valid_config();
        c.ping_interval = 3601;
        assert!(c.validate().unwrap_err().contains("ping_interval"));
    }

    #[test]
    fn idle_timeout_too_large() {
        let mut c = valid_config();
        c.idle_timeout = 86_401;
        assert!(c.validate().unwrap_err().contains("idle_timeout"));
    }

    #[test]
    fn bot_reply_limit_zero() {
        let mut c = valid_config();
        c.bot_reply_limit = 0;
        assert!(c.validate().unwrap_err().contains("bot_reply_limit"));
    }

    #[test]
    fn bot_reply_limit_too_large() {
        let mut c = valid_config();
        c.bot_reply_limit = 1001;
        assert!(c.validate().unwrap_err().contains("bot_reply_limit"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = valid_config();
        c.max_conns = 1;
        c.max_conns_ip = 1;
        c.msg_rate = 1;
        c.max_payload = 1;
        c.auth_timeout = 300;
        c.ping_interval = 3600;
        c.idle_timeout = 86_400;
        c.bot_reply_limit = 1;
        assert!(c.validate().is_ok());
    }
}
