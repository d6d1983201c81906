//! Guards applied before and during a descriptor fetch

use url::Url;
use wfref_foundation::{CoreError, CoreResult, ResolutionError};

/// Validate a configured base URL.
///
/// Plain `http` is only accepted when `require_https` is off (local mirrors,
/// tests).
pub fn validate_base_url(url: &str, require_https: bool) -> CoreResult<Url> {
    let parsed =
        Url::parse(url).map_err(|e| CoreError::config(format!("Invalid URL '{}': {}", url, e)))?;

    match parsed.scheme() {
        "https" => {}
        "http" if !require_https => {}
        _ => {
            return Err(CoreError::config(format!(
                "Insecure URL (must use HTTPS): {}",
                url
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(CoreError::config(format!("No host in URL: {}", url)));
    }

    Ok(parsed)
}

/// Check a descriptor body size against the configured limit
pub fn validate_size(size: u64, max: u64) -> Result<(), ResolutionError> {
    if size > max {
        return Err(ResolutionError::parse(format!(
            "Descriptor too large: {} bytes (max: {} bytes)",
            size, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_required() {
        assert!(validate_base_url("http://example.com", true).is_err());
        assert!(validate_base_url("https://raw.githubusercontent.com", true).is_ok());
        assert!(validate_base_url("http://127.0.0.1:8080", false).is_ok());
        assert!(validate_base_url("ftp://example.com", false).is_err());
        assert!(validate_base_url("not a url", false).is_err());
    }

    #[test]
    fn test_size_limits() {
        assert!(validate_size(1024, 2048).is_ok());
        assert!(validate_size(2048, 2048).is_ok());
        assert!(matches!(
            validate_size(2049, 2048),
            Err(ResolutionError::Parse(_))
        ));
    }
}
