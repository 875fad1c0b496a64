use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Jitter windows are well-formed (min <= max)
/// - Encoder binary paths are non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.pool.start_delay_min_ms > config.pool.start_delay_max_ms {
        return Err(ConfigError::ValidationError(
            "pool.start_delay_min_ms cannot exceed pool.start_delay_max_ms".to_string(),
        ));
    }

    if config.pool.teardown_delay_min_ms > config.pool.teardown_delay_max_ms {
        return Err(ConfigError::ValidationError(
            "pool.teardown_delay_min_ms cannot exceed pool.teardown_delay_max_ms".to_string(),
        ));
    }

    if config.encoder.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "encoder.ffmpeg_path cannot be empty".to_string(),
        ));
    }

    if config.encoder.ffprobe_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "encoder.ffprobe_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_inverted_jitter_window_fails() {
        let mut config = Config::default();
        config.pool.start_delay_min_ms = 5000;
        config.pool.start_delay_max_ms = 1000;

        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_empty_ffmpeg_path_fails() {
        let mut config = Config::default();
        config.encoder.ffmpeg_path = std::path::PathBuf::new();

        assert!(validate_config(&config).is_err());
    }
}
