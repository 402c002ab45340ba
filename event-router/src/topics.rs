use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

/// Picks the Kafka topic for each event.
#[derive(Clone, Debug)]
pub struct TopicResolver {
    destination: String,
    dead_letter: String,
    overrides: Arc<HashMap<String, String>>,
}

impl TopicResolver {
    pub fn new(
        destination: impl Into<String>,
        dead_letter: impl Into<String>,
        overrides: HashMap<String, String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            dead_letter: dead_letter.into(),
            overrides: Arc::new(overrides),
        }
    }

    /// Topic for a raw (not yet remapped) event type.
    pub fn resolve(&self, event_type: &str) -> &str {
        self.overrides
            .get(event_type)
            .map(String::as_str)
            .unwrap_or(&self.destination)
    }

    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

// Takes "eventType:topic,eventType:topic", malformed parts are skipped
pub fn parse_topic_overrides(config: &str) -> HashMap<String, String> {
    let mut overrides = HashMap::new();

    for part in config.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        match part.split_once(':') {
            Some((event_type, topic))
                if !event_type.trim().is_empty() && !topic.trim().is_empty() =>
            {
                overrides.insert(event_type.trim().to_string(), topic.trim().to_string());
            }
            _ => warn!("Invalid topic override {}", part),
        }
    }

    overrides
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_topic() {
        let resolver = TopicResolver::new("er.event.sa", "dead.letter", HashMap::new());
        assert_eq!(resolver.resolve("gpsPosition"), "er.event.sa");
        assert_eq!(resolver.dead_letter(), "dead.letter");
    }

    #[test]
    fn test_override_takes_precedence() {
        let resolver = TopicResolver::new(
            "er.event.sa",
            "dead.letter",
            parse_topic_overrides("impactRawData:er.event.raw"),
        );
        assert_eq!(resolver.resolve("impactRawData"), "er.event.raw");
        assert_eq!(resolver.resolve("gpsPosition"), "er.event.sa");
    }

    #[test]
    fn test_empty_config() {
        assert!(parse_topic_overrides("").is_empty());
    }

    #[test]
    fn test_multiple_overrides() {
        let overrides = parse_topic_overrides("a:topic.a, b:topic.b ,");
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["a"], "topic.a");
        assert_eq!(overrides["b"], "topic.b");
    }

    #[test]
    fn test_invalid_parts_are_skipped() {
        let overrides = parse_topic_overrides("nocolon,:topic,type:,ok:topic.ok");
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["ok"], "topic.ok");
    }

    #[test]
    fn test_last_override_wins() {
        let overrides = parse_topic_overrides("a:first,a:second");
        assert_eq!(overrides["a"], "second");
    }
}
