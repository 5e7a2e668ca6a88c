//! Error classification and configuration edge cases

use prodapic::{
    prompt::validate_prompt, BackgroundFamily, ComposeError, ErrorClass, GenerationRequest,
    PipelineConfig, QuotaPolicy, QuotaScope, RunId, ScopeLimit, UpstreamClass,
};
use std::time::Duration;

#[test]
fn test_every_error_has_a_caller_facing_class() {
    let cases = [
        (ComposeError::upload("not an image"), ErrorClass::Input),
        (ComposeError::removal("timeout"), ErrorClass::Transient),
        (ComposeError::removal_status(413, "too large"), ErrorClass::Input),
        (ComposeError::removal_status(503, "overloaded"), ErrorClass::Transient),
        (
            ComposeError::QuotaDenied {
                scope: QuotaScope::Identified,
            },
            ErrorClass::QuotaExhausted,
        ),
        (ComposeError::generation(422, "nsfw"), ErrorClass::Input),
        (ComposeError::generation(502, "bad gateway"), ErrorClass::Transient),
        (
            ComposeError::generation_transport("connection reset"),
            ErrorClass::Transient,
        ),
        (ComposeError::composition("degenerate-input"), ErrorClass::Input),
        (ComposeError::Busy, ErrorClass::Conflict),
        (ComposeError::invalid_state("nothing uploaded"), ErrorClass::Conflict),
        (
            ComposeError::Superseded {
                run: RunId::new(1),
                active: RunId::new(2),
            },
            ErrorClass::Conflict,
        ),
        (ComposeError::MissingIdentity, ErrorClass::Input),
    ];
    for (err, class) in cases {
        assert_eq!(err.class(), class, "{}", err);
        assert_eq!(err.is_retryable(), class == ErrorClass::Transient);
    }
}

#[test]
fn test_upstream_status_boundaries() {
    assert_eq!(UpstreamClass::from_status(399), UpstreamClass::Server);
    assert_eq!(UpstreamClass::from_status(400), UpstreamClass::Client);
    assert_eq!(UpstreamClass::from_status(499), UpstreamClass::Client);
    assert_eq!(UpstreamClass::from_status(500), UpstreamClass::Server);

    match ComposeError::generation(429, "slow down") {
        ComposeError::Generation {
            class,
            status,
            message,
        } => {
            assert_eq!(class, UpstreamClass::Client);
            assert_eq!(status, Some(429));
            assert_eq!(message, "slow down");
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_error_messages_name_the_problem() {
    let denied = ComposeError::QuotaDenied {
        scope: QuotaScope::Anonymous,
    };
    assert!(denied.to_string().contains("anonymous"));

    let stale = ComposeError::Superseded {
        run: RunId::new(4),
        active: RunId::new(6),
    };
    let text = stale.to_string();
    assert!(text.contains('4') && text.contains('6'));
}

#[test]
fn test_config_rejects_out_of_range_values() {
    for scale in [0.0, -1.0, 1.01, f64::NAN] {
        let err = PipelineConfig::builder().scale(scale).build().unwrap_err();
        assert!(matches!(err, ComposeError::InvalidConfig(_)), "scale {}", scale);
    }
    assert!(PipelineConfig::builder().scale(1.0).build().is_ok());

    let mut config = PipelineConfig::default();
    config.jpeg_quality = 101;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.generation.width = 0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.generation.endpoint = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_quota_windows_checked_only_when_enabled() {
    let zero_window = QuotaPolicy {
        anonymous: ScopeLimit::new(3, Duration::ZERO),
        ..QuotaPolicy::default()
    };
    let enabled = PipelineConfig::builder().quota(zero_window.clone()).build();
    assert!(enabled.is_err());

    let disabled = PipelineConfig::builder()
        .quota(QuotaPolicy {
            enabled: false,
            ..zero_window
        })
        .build();
    assert!(disabled.is_ok());

    // Zero capacity is a valid way to switch a scope off.
    let closed = QuotaPolicy {
        identified: ScopeLimit::days(0, 30),
        ..QuotaPolicy::default()
    };
    assert!(PipelineConfig::builder().quota(closed).build().is_ok());
}

#[test]
fn test_config_file_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = PipelineConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, ComposeError::Io(_)));

    let malformed_path = dir.path().join("bad.json");
    std::fs::write(&malformed_path, "{ not json").unwrap();
    let malformed = PipelineConfig::from_json_file(&malformed_path).unwrap_err();
    assert!(matches!(malformed, ComposeError::InvalidConfig(_)));

    let invalid_path = dir.path().join("invalid.json");
    let mut config = PipelineConfig::default();
    config.scale = 3.0;
    std::fs::write(&invalid_path, serde_json::to_string(&config).unwrap()).unwrap();
    assert!(PipelineConfig::from_json_file(&invalid_path).is_err());
}

#[test]
fn test_prompt_edge_cases() {
    assert!(matches!(
        validate_prompt(" \t\n "),
        Err(ComposeError::InvalidPrompt(_))
    ));
    assert_eq!(validate_prompt("  beach  ").unwrap(), "beach");

    assert!(GenerationRequest::new("").is_err());
    let request = GenerationRequest::new("ocean").unwrap().with_credential(Some("  ".into()));
    assert!(!request.uses_personal_credential());
}

#[test]
fn test_background_family_parsing() {
    for family in BackgroundFamily::ALL {
        let parsed: BackgroundFamily = family.to_string().parse().unwrap();
        assert_eq!(parsed, family);
    }
    assert!("holiday".parse::<BackgroundFamily>().is_err());
}
