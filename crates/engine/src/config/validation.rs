use std::collections::HashSet;

use super::loader::{ConfigError, EngineConfig};

/// Validate the complete engine configuration.
///
/// Accumulates every error found rather than stopping at the first (§10.1),
/// so a misconfigured deployment sees the whole list in one startup attempt.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_concurrency(config, &mut errors);
    validate_retry(config, &mut errors);
    validate_probe(config, &mut errors);
    validate_oems(config, &mut errors);
    validate_llm(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_concurrency(config: &EngineConfig, errors: &mut Vec<String>) {
    let c = &config.system.concurrency;
    if c.global_concurrency == 0 {
        errors.push("concurrency.global_concurrency must be > 0".into());
    }
    if c.per_host_concurrency == 0 {
        errors.push("concurrency.per_host_concurrency must be > 0".into());
    }
    if c.renderer_session_cap == 0 {
        errors.push("concurrency.renderer_session_cap must be > 0".into());
    }
}

fn validate_retry(config: &EngineConfig, errors: &mut Vec<String>) {
    let validate_one =
        |rc: &oemwatch_common::config::RetryConfig, name: &str, errors: &mut Vec<String>| {
            if rc.max_attempts == 0 {
                errors.push(format!("retry.{}.max_attempts must be > 0", name));
            }
            if rc.initial_backoff_ms == 0 {
                errors.push(format!("retry.{}.initial_backoff_ms must be > 0", name));
            }
            if rc.max_backoff_ms < rc.initial_backoff_ms {
                errors.push(format!(
                    "retry.{}.max_backoff_ms must be >= initial_backoff_ms",
                    name
                ));
            }
            if rc.backoff_multiplier < 1.0 {
                errors.push(format!("retry.{}.backoff_multiplier must be >= 1.0", name));
            }
        };

    validate_one(&config.system.retry.http_fetch, "http_fetch", errors);
    validate_one(&config.system.retry.llm_api, "llm_api", errors);
}

fn validate_probe(config: &EngineConfig, errors: &mut Vec<String>) {
    let p = &config.system.probe;
    if !(0.0..=1.0).contains(&p.min_reliability_to_replay) {
        errors.push("probe.min_reliability_to_replay must be between 0.0 and 1.0".into());
    }
    if !(0.0..=1.0).contains(&p.retire_below_score) {
        errors.push("probe.retire_below_score must be between 0.0 and 1.0".into());
    }
}

fn validate_oems(config: &EngineConfig, errors: &mut Vec<String>) {
    if config.oems.is_empty() {
        errors.push("at least one OEM must be configured".into());
    }

    let mut seen_ids = HashSet::new();
    for oem in &config.oems {
        if oem.id.is_empty() {
            errors.push("oem.id must not be empty".into());
        }
        if !seen_ids.insert(oem.id.clone()) {
            errors.push(format!("duplicate oem id: {}", oem.id));
        }
        if oem.base_url.is_empty() {
            errors.push(format!("oem {}: base_url must not be empty", oem.id));
        }
        if oem.seeds.is_empty() {
            errors.push(format!("oem {}: at least one seed URL is required", oem.id));
        }
    }
}

fn validate_llm(config: &EngineConfig, errors: &mut Vec<String>) {
    const REQUIRED_TASKS: &[&str] = &[
        "html_normalisation",
        "llm_extraction",
        "diff_classification",
        "change_summary",
        "design_vision",
        "content_generation",
    ];

    for task in REQUIRED_TASKS {
        match config.llm.tasks.get(*task) {
            None => errors.push(format!("llm.tasks is missing routing for task '{}'", task)),
            Some(routing) => {
                for model_ref in [&routing.primary, &routing.fallback] {
                    let key = format!("{}:{}", model_ref.provider, model_ref.model);
                    if !config.llm.prices.contains_key(&key) && !config.llm.prices.contains_key(&model_ref.model) {
                        errors.push(format!(
                            "llm.prices is missing an entry for model '{}' routed from task '{}'",
                            model_ref.model, task
                        ));
                    }
                }
            }
        }
    }
}
