use std::net::SocketAddr;

use eyre::Result;

use crate::{
    config::models::{
        CircuitBreakerConfig, HealthCheckConfig, PathRewriteConfig, RateLimitConfig, ServerConfig,
        ServiceConfig, WebSocketConfig,
    },
    core::service::ServiceUrl,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if !config.api_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "api_prefix".to_string(),
                message: "Must start with '/'".to_string(),
            });
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        } else {
            for (name, service) in &config.services {
                if let Err(mut service_errors) = Self::validate_service(config, name, service) {
                    errors.append(&mut service_errors);
                }
            }
        }

        if let Err(mut rewrite_errors) = Self::validate_path_rewrites(&config.path_rewrites) {
            errors.append(&mut rewrite_errors);
        }

        if let Err(mut cb_errors) = Self::validate_circuit_breaker(&config.circuit_breaker) {
            errors.append(&mut cb_errors);
        }

        if let Err(mut rl_errors) = Self::validate_rate_limit(&config.rate_limit) {
            errors.append(&mut rl_errors);
        }

        if let Err(mut health_check_errors) =
            Self::validate_health_check_config(&config.health_check)
        {
            errors.append(&mut health_check_errors);
        }

        if let Err(e) = Self::validate_websocket(&config.websocket) {
            errors.push(e);
        }

        if let Err(conflict_error_list) = Self::check_route_conflicts(config) {
            errors.extend(conflict_error_list);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single service registry entry
    fn validate_service(
        config: &ServerConfig,
        name: &str,
        service: &ServiceConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if name.trim().is_empty() || name.contains('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("services.{name}"),
                message: "Service names must be non-empty and must not contain '/'".to_string(),
            });
        }

        if let Err(e) = Self::validate_url(&service.url, &format!("services.{name}.url")) {
            errors.push(e);
        }

        match humantime::parse_duration(&service.timeout) {
            Ok(d) if d.is_zero() => errors.push(ValidationError::InvalidField {
                field: format!("services.{name}.timeout"),
                message: "Timeout must be greater than 0".to_string(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidField {
                field: format!("services.{name}.timeout"),
                message: format!("Invalid duration '{}': {e}", service.timeout),
            }),
        }

        let prefix = config.route_prefix_for(name, service);
        if !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("services.{name}.route_prefix"),
                message: "Route prefixes must start with '/'".to_string(),
            });
        }

        let api_prefix = config.api_prefix.trim_end_matches('/');
        if prefix != api_prefix && !prefix.starts_with(&format!("{api_prefix}/")) {
            errors.push(ValidationError::InvalidField {
                field: format!("services.{name}.route_prefix"),
                message: format!(
                    "Route prefix '{prefix}' is not under the API prefix '{}'",
                    config.api_prefix
                ),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        ServiceUrl::new(url_str)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: context.to_string(),
                message: e.to_string(),
            })
    }

    fn validate_path_rewrites(config: &PathRewriteConfig) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<_> = config
            .exact
            .iter()
            .map(|pair| ("exact", pair))
            .chain(config.prefix.iter().map(|pair| ("prefix", pair)))
            .filter(|(_, (from, to))| !from.starts_with('/') || !to.starts_with('/'))
            .map(|(kind, (from, to))| ValidationError::InvalidField {
                field: format!("path_rewrites.{kind}.{from}"),
                message: format!("Both '{from}' and '{to}' must start with '/'"),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_circuit_breaker(
        config: &CircuitBreakerConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "circuit_breaker.failure_threshold".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if config.cooldown_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "circuit_breaker.cooldown_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate rate limit configuration
    fn validate_rate_limit(config: &RateLimitConfig) -> Result<(), Vec<ValidationError>> {
        if !config.enabled {
            return Ok(());
        }

        let mut errors = Vec::new();

        if config.requests_per_minute == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests_per_minute".to_string(),
                message: "Rate limit requests must be greater than 0".to_string(),
            });
        }

        if config.burst == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.burst".to_string(),
                message: "Burst size must be greater than 0".to_string(),
            });
        }

        if config.cleanup_interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.cleanup_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(adaptive) = &config.adaptive {
            if !(adaptive.max_load.is_finite() && adaptive.max_load > 0.0) {
                errors.push(ValidationError::InvalidField {
                    field: "rate_limit.adaptive.max_load".to_string(),
                    message: "Must be a positive number".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_health_check_config(
        config: &HealthCheckConfig,
    ) -> Result<(), Vec<ValidationError>> {
        if !config.enabled {
            return Ok(());
        }

        let mut errors = Vec::new();

        if config.interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.interval_secs".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.timeout_secs".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.path.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "health_check.path".to_string(),
                message: "Cannot be empty when health checks are enabled".to_string(),
            });
        } else if !config.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "health_check.path".to_string(),
                message: "Must start with '/' when health checks are enabled".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_websocket(config: &WebSocketConfig) -> ValidationResult<()> {
        if !config.enabled {
            return Ok(());
        }
        if config.chat_subject.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "websocket.chat_subject".to_string(),
                message: "Cannot be empty".to_string(),
            });
        }
        if config.outbound_buffer == 0 || config.write_timeout_secs == 0 {
            return Err(ValidationError::InvalidField {
                field: "websocket".to_string(),
                message: "outbound_buffer and write_timeout_secs must be greater than 0"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Two services may not claim the same route prefix.
    fn check_route_conflicts(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
        let mut prefixes: Vec<(String, &String)> = config
            .services
            .iter()
            .map(|(name, svc)| {
                (
                    config
                        .route_prefix_for(name, svc)
                        .trim_end_matches('/')
                        .to_string(),
                    name,
                )
            })
            .collect();
        prefixes.sort();

        let errors: Vec<_> = prefixes
            .windows(2)
            .filter(|pair| pair[0].0 == pair[1].0)
            .map(|pair| ValidationError::RouteConflict {
                message: format!(
                    "Services '{}' and '{}' share route prefix '{}'",
                    pair[0].1, pair[1].1, pair[0].0
                ),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
