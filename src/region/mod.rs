//! Validation of the location constraint sent when a volume (bucket) is created.
//!
//! The region the server runs in is handed in through [`RegionConfig`], there is no global state.
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

/// Region assumed when a request carries an empty location constraint
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegionConfig {
    pub region: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Body of a create volume request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct CreateVolumeConfiguration {
    #[serde(default)]
    location_constraint: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub enum LocationConstraintError {
    /// The body could not be decoded
    Malformed { reason: String },
    /// The requested region is not the one this server runs in
    InvalidRegion { expected: String, got: String },
}

impl std::fmt::Display for LocationConstraintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for LocationConstraintError {}

/// Checks that the location constraint in `body` matches the configured region.
///
/// `content_length` follows HTTP semantics: `0` means there is no body, in which case the volume is
/// created in the configured region, and `-1` means the length is unknown, in which case an empty body is accepted.
pub fn validate_location_constraint(
    config: &RegionConfig,
    body: &[u8],
    content_length: i64,
) -> Result<(), LocationConstraintError> {
    if content_length == 0 {
        return Ok(());
    }

    let constraint: CreateVolumeConfiguration = match serde_json::from_slice(body) {
        Ok(constraint) => constraint,
        Err(err)
            if err.is_eof()
                && content_length == -1
                && body.iter().all(u8::is_ascii_whitespace) =>
        {
            return Ok(());
        }
        Err(err) => {
            event!(Level::WARN, "Unable to decode location constraint: {}", err);
            return Err(LocationConstraintError::Malformed {
                reason: err.to_string(),
            });
        }
    };

    let requested = if constraint.location_constraint.is_empty() {
        DEFAULT_REGION.to_string()
    } else {
        constraint.location_constraint
    };

    if requested != config.region {
        return Err(LocationConstraintError::InvalidRegion {
            expected: config.region.clone(),
            got: requested,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_location_constraint, LocationConstraintError, RegionConfig};

    fn config(region: &str) -> RegionConfig {
        RegionConfig {
            region: region.to_string(),
        }
    }

    #[test]
    fn no_body() {
        assert!(validate_location_constraint(&config("eu-west-1"), b"", 0).is_ok());
    }

    #[test]
    fn unknown_length_with_empty_body() {
        assert!(validate_location_constraint(&config("eu-west-1"), b"", -1).is_ok());
    }

    #[test]
    fn matching_region() {
        let body = br#"{"location_constraint": "eu-west-1"}"#;
        assert!(
            validate_location_constraint(&config("eu-west-1"), body, body.len() as i64).is_ok()
        );
    }

    #[test]
    fn empty_constraint_is_the_default_region() {
        let body = br#"{"location_constraint": ""}"#;
        assert!(
            validate_location_constraint(&RegionConfig::default(), body, body.len() as i64)
                .is_ok()
        );

        let body = b"{}";
        let err = validate_location_constraint(&config("eu-west-1"), body, body.len() as i64)
            .err()
            .unwrap();
        assert_eq!(
            err,
            LocationConstraintError::InvalidRegion {
                expected: "eu-west-1".to_string(),
                got: "us-east-1".to_string(),
            }
        );
    }

    #[test]
    fn mismatching_region() {
        let body = br#"{"location_constraint": "ap-south-1"}"#;
        let err = validate_location_constraint(&config("eu-west-1"), body, body.len() as i64)
            .err()
            .unwrap();
        assert!(matches!(err, LocationConstraintError::InvalidRegion { .. }));
    }

    #[test]
    fn malformed_body() {
        let body = b"<CreateBucketConfiguration>";
        let err = validate_location_constraint(&config("eu-west-1"), body, body.len() as i64)
            .err()
            .unwrap();
        assert!(matches!(err, LocationConstraintError::Malformed { .. }));

        // a truncated body is only acceptable when the length is unknown and nothing was sent
        let body = br#"{"location_constraint": "#;
        assert!(validate_location_constraint(&config("eu-west-1"), body, -1).is_err());
        assert!(validate_location_constraint(&config("eu-west-1"), b"", 10).is_err());
    }
}
