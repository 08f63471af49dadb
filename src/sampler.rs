use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

use crate::event::ObjectMap;
use crate::object;

/// One sampling rule: messages matching `pattern` are thinned to every
/// `ratio`-th occurrence, counted per rule.
#[derive(Debug)]
pub struct SampleRule {
    key: String,
    pattern: Regex,
    count: AtomicU64,
}

impl SampleRule {
    pub fn new(key: impl Into<String>, pattern: Regex) -> Self {
        SampleRule {
            key: key.into(),
            pattern,
            count: AtomicU64::new(0),
        }
    }
}

/// Decides which messages are forwarded. Messages matching no rule always
/// pass; a message matching a rule passes once per `ratio` occurrences and
/// carries `{sample: {key, ratio}}` so the aggregate can be re-weighted
/// downstream. Shared by every worker, hence the atomic counters.
#[derive(Debug)]
pub struct Sampler {
    ratio: u64,
    rules: Vec<SampleRule>,
}

impl Sampler {
    pub fn new(ratio: u64, rules: Vec<SampleRule>) -> Self {
        Sampler {
            ratio: ratio.max(1),
            rules,
        }
    }

    /// Everything passes, nothing is annotated.
    pub fn passthrough() -> Self {
        Sampler::new(1, Vec::new())
    }

    /// `Some(metadata)` to forward the message (metadata may be empty),
    /// `None` to drop it.
    pub fn sample(&self, message: &str) -> Option<ObjectMap> {
        let rule = match self.rules.iter().find(|rule| rule.pattern.is_match(message)) {
            Some(rule) => rule,
            None => return Some(ObjectMap::new()),
        };

        let count = rule.count.fetch_add(1, Ordering::Relaxed);
        if count % self.ratio != 0 {
            return None;
        }

        Some(object! {
            "sample" => object! {
                "key" => rule.key.clone(),
                "ratio" => self.ratio as i64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;

    fn rule(key: &str, pattern: &str) -> SampleRule {
        SampleRule::new(key, Regex::new(pattern).unwrap())
    }

    #[test]
    fn unmatched_messages_always_pass_without_metadata() {
        let sampler = Sampler::new(10, vec![rule("health", "^health")]);
        for _ in 0..20 {
            let metadata = sampler.sample("regular log line").unwrap();
            assert!(metadata.is_empty());
        }
    }

    #[test]
    fn matched_messages_pass_every_nth() {
        let sampler = Sampler::new(3, vec![rule("health", "^health")]);
        let passes: Vec<bool> = (0..9)
            .map(|_| sampler.sample("healthcheck ok").is_some())
            .collect();
        assert_eq!(
            passes,
            vec![true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn passed_samples_carry_key_and_ratio() {
        let sampler = Sampler::new(5, vec![rule("health", "^health")]);
        let metadata = sampler.sample("healthcheck ok").unwrap();
        let sample = metadata.get("sample").and_then(Value::as_map).unwrap();
        assert_eq!(sample.get("key"), Some(&Value::from("health")));
        assert_eq!(sample.get("ratio"), Some(&Value::Integer(5)));
    }

    #[test]
    fn first_matching_rule_wins() {
        let sampler = Sampler::new(2, vec![rule("first", "check"), rule("second", "health")]);
        let metadata = sampler.sample("healthcheck").unwrap();
        let sample = metadata.get("sample").and_then(Value::as_map).unwrap();
        assert_eq!(sample.get("key"), Some(&Value::from("first")));
    }

    #[test]
    fn passthrough_never_drops() {
        let sampler = Sampler::passthrough();
        for _ in 0..5 {
            assert!(sampler.sample("anything").unwrap().is_empty());
        }
    }

    #[test]
    fn rules_count_independently() {
        let sampler = Sampler::new(2, vec![rule("a", "^a"), rule("b", "^b")]);
        assert!(sampler.sample("a one").is_some());
        assert!(sampler.sample("b one").is_some());
        assert!(sampler.sample("a two").is_none());
        assert!(sampler.sample("b two").is_none());
        assert!(sampler.sample("a three").is_some());
    }
}
